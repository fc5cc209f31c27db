use std::env;
use std::process;

use log::{debug, info};

use super::executor::Executor;
use super::process::{exit_child, flush_stdio};
use crate::shell::error::{ExecResult, ShellError};
use crate::shell::parser::ast::Command;
use crate::utils::path;

/// 在引擎自身进程中执行的命令
pub const BUILTINS: [&str; 6] = ["exit", "cd", "set", "unset", "fg", "bg"];

pub fn is_builtin(program: &str) -> bool {
    BUILTINS.contains(&program)
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['=', '\0'])
}

impl Executor {
    /// 不是内建命令时返回 None
    pub(super) fn run_builtin(&mut self, command: &Command) -> Option<ExecResult> {
        let args = command.args();
        let result = match command.program.as_str() {
            "exit" => self.builtin_exit(args),
            "cd" => builtin_cd(args),
            "set" => builtin_set(args),
            "unset" => builtin_unset(args),
            "fg" => Ok(self.builtin_resume(true)),
            "bg" => Ok(self.builtin_resume(false)),
            _ => return None,
        };
        Some(result)
    }

    fn builtin_exit(&mut self, args: &[String]) -> ExecResult {
        let status = match args {
            [] => 0,
            [code] => code.parse::<i32>().map_err(|_| ShellError::Usage("exit [code]"))?,
            _ => return Err(ShellError::Usage("exit [code]")),
        };

        if self.in_child {
            exit_child(status);
        }
        info!("退出 pgsh，状态码 {}", status);
        flush_stdio();
        process::exit(status)
    }

    fn builtin_resume(&mut self, foreground: bool) -> i32 {
        match self.jobs.resume_last(foreground) {
            Some(status) => status,
            None => {
                debug!("{}: 没有可恢复的作业", if foreground { "fg" } else { "bg" });
                0
            }
        }
    }
}

fn builtin_cd(args: &[String]) -> ExecResult {
    if args.len() > 1 {
        return Err(ShellError::Usage("cd [dir]"));
    }
    let target = path::cd_target(args.first().map(String::as_str));
    env::set_current_dir(&target).map_err(|source| ShellError::Chdir { path: target, source })?;
    debug!("当前目录: {}", path::current_dir());
    Ok(0)
}

/// `set NAME=VALUE` 或 `set NAME VALUE`
fn builtin_set(args: &[String]) -> ExecResult {
    let (name, value) = match args {
        [pair] => match pair.split_once('=') {
            Some(split) => split,
            None => return Err(ShellError::Usage("set NAME=VALUE")),
        },
        [name, value] => (name.as_str(), value.as_str()),
        _ => return Err(ShellError::Usage("set NAME=VALUE")),
    };
    if !valid_name(name) || value.contains('\0') {
        return Err(ShellError::Usage("set NAME=VALUE"));
    }
    env::set_var(name, value);
    debug!("set {}={}", name, value);
    Ok(0)
}

fn builtin_unset(args: &[String]) -> ExecResult {
    match args {
        [name] if valid_name(name) => {
            env::remove_var(name);
            debug!("unset {}", name);
            Ok(0)
        }
        _ => Err(ShellError::Usage("unset NAME")),
    }
}
