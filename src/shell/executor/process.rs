use std::ffi::CString;
use std::io::{self, Write};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, getpid, setpgid, ForkResult, Pid};

use super::builtins;
use super::executor::{report, Executor};
use crate::shell::error::ShellError;
use crate::shell::parser::ast::{Command, Node};
use crate::shell::signals;

/// 子进程加入哪个进程组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Group {
    /// 以自己的 pid 新建进程组
    New { foreground: bool },
    /// 加入已有的进程组（管道的后续阶段）
    Join { pgid: Pid, foreground: bool },
    /// 已经在子进程中，沿用当前进程组
    Inherit,
}

impl Group {
    fn enter(self) -> nix::Result<()> {
        match self {
            Group::New { .. } => setpgid(Pid::from_raw(0), Pid::from_raw(0)),
            Group::Join { pgid, .. } => setpgid(Pid::from_raw(0), pgid),
            Group::Inherit => Ok(()),
        }
    }

    /// 需要占有终端的前台进程组，在子进程 `enter` 之后调用
    fn foreground_pgid(self) -> Option<Pid> {
        match self {
            Group::New { foreground: true } => Some(getpid()),
            Group::Join { pgid, foreground: true } => Some(pgid),
            _ => None,
        }
    }

    // 父子进程都调用 setpgid，避免等待时子进程还没进组
    fn adopt(self, child: Pid) {
        let result = match self {
            Group::New { .. } => setpgid(child, child),
            Group::Join { pgid, .. } => setpgid(child, pgid),
            Group::Inherit => Ok(()),
        };
        // 子进程已经 exec 时返回 EACCES，此时组已由子进程自己设置
        if let Err(e) = result {
            debug!("setpgid({}) 在父进程中失败: {}", child, e);
        }
    }
}

pub(super) fn flush_stdio() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// fork 出的子进程的唯一出口，不会回到引擎的控制流
pub(super) fn exit_child(status: i32) -> ! {
    flush_stdio();
    // SAFETY: 只在 fork 出的子进程中调用，跳过父进程注册的清理逻辑
    unsafe { libc::_exit(status) }
}

/// 用 execvp 替换当前进程映像，只有失败时才返回
pub(super) fn exec_program(command: &Command) -> ShellError {
    let argv: Result<Vec<CString>, _> = command
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect();

    let source = match (CString::new(command.program.as_bytes()), argv) {
        (Ok(program), Ok(argv)) => match execvp(&program, &argv) {
            Ok(never) => match never {},
            Err(e) => e,
        },
        _ => Errno::EINVAL,
    };
    ShellError::Exec {
        program: command.program.clone(),
        source,
    }
}

/// 子进程模式下等待一组直接子进程，返回最后一个的退出码
pub(super) fn wait_children(pids: &[Pid]) -> i32 {
    let mut status = 0;
    for pid in pids {
        loop {
            match waitpid(*pid, None) {
                Ok(WaitStatus::Exited(_, code)) => status = code,
                Ok(WaitStatus::Signaled(_, sig, _)) => status = 128 + sig as i32,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("等待子进程 {} 失败: {}", pid, e);
                    status = 1;
                }
            }
            break;
        }
    }
    status
}

impl Executor {
    pub(super) fn group_for(&self, leader: Option<Pid>, foreground: bool) -> Group {
        match (self.in_child, leader) {
            (true, _) => Group::Inherit,
            (false, None) => Group::New { foreground },
            (false, Some(pgid)) => Group::Join { pgid, foreground },
        }
    }

    /// fork 一个子进程：子进程先 `prepare` 接好描述符，再运行 `body` 并以其返回值退出
    pub(super) fn spawn<B, P>(&mut self, group: Group, body: B, prepare: P) -> Result<Pid, ShellError>
    where
        B: FnOnce(&mut Executor) -> i32,
        P: FnOnce() -> nix::Result<()>,
    {
        flush_stdio();
        // SAFETY: 子进程只执行本引擎的逻辑，最终 exec 或 _exit
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                group.adopt(child);
                debug!("fork 子进程 {} ({:?})", child, group);
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                if let Err(e) = group.enter() {
                    warn!("子进程设置进程组失败: {}", e);
                }
                // 子进程自己也拿一次终端，exec 后立即读终端不会被 SIGTTIN 停住
                // 此时还继承着父进程对 SIGTTOU 的忽略
                if let (Some(pgid), Some(terminal)) = (group.foreground_pgid(), self.jobs.terminal()) {
                    terminal.give_to(pgid);
                }
                signals::restore_defaults();
                self.enter_child();
                if let Err(e) = prepare() {
                    report(&ShellError::resource("dup2", e));
                    exit_child(1);
                }
                let status = body(self);
                exit_child(status)
            }
            Err(e) => Err(ShellError::resource("fork", e)),
        }
    }

    /// 在子进程里运行一个节点；外部命令直接 exec，不再多 fork 一层
    pub(super) fn run_tail(&mut self, node: &Node) -> i32 {
        match node {
            Node::Command(command) if !builtins::is_builtin(&command.program) => {
                let err = exec_program(command);
                report(&err);
                err.exit_status()
            }
            _ => {
                self.execute(node);
                self.last_status()
            }
        }
    }
}
