use log::{debug, error, info, warn};
use std::error::Error;
use std::io::{self, BufRead, IsTerminal, Write};

use crate::shell::engine::Engine;
use crate::shell::parser::parse;
use crate::shell::readline::{ReadlineError, ReadlineManager};
use crate::utils::config::Config;
use crate::utils::theme::Theme;

/// 语法错误的退出码
const SYNTAX_ERROR_STATUS: i32 = 2;

pub struct Shell<'a> {
    config: &'a Config,
    theme: Theme,
    engine: Engine,
    interactive: bool,
    status: i32,
}

impl<'a> Shell<'a> {
    pub fn new(config: &'a Config) -> Result<Self, Box<dyn Error>> {
        let interactive = io::stdin().is_terminal();
        Ok(Self {
            config,
            theme: Theme::for_session(interactive),
            engine: Engine::initialize(interactive)?,
            interactive,
            status: 0,
        })
    }

    /// 运行到输入结束，返回最后一条命令的状态码
    pub fn run(&mut self) -> Result<i32, Box<dyn Error>> {
        debug!("初始化 pgsh (交互: {})...", self.interactive);

        if self.interactive {
            self.run_interactive()?;
        } else {
            self.run_script()?;
        }

        debug!("退出 pgsh，状态码 {}", self.status);
        Ok(self.status)
    }

    fn run_interactive(&mut self) -> Result<(), Box<dyn Error>> {
        let mut readline = ReadlineManager::new(self.config)?;
        readline.load_history();
        debug!("pgsh 准备就绪...");

        loop {
            self.print_notices();
            io::stdout().flush()?;

            let prompt = self.engine.prompt().to_string();
            match readline.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        readline.add_history(&line);
                    }
                    self.handle_line(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    debug!("提示符处收到中断");
                }
                Err(ReadlineError::Eof) => {
                    info!("接收到 EOF，退出 pgsh...");
                    println!();
                    break;
                }
                Err(err) => {
                    error!("读取输入失败: {}", err);
                    eprintln!("{}", (self.theme.error_style)(format!("pgsh: {}", err)));
                    break;
                }
            }
        }
        Ok(())
    }

    fn run_script(&mut self) -> Result<(), Box<dyn Error>> {
        for line in io::stdin().lock().lines() {
            let line = line?;
            self.handle_line(&line);
            // 非交互模式不打印作业通知，只回收
            for notice in self.engine.take_notices() {
                debug!("{}", notice);
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) {
        match parse(line) {
            Ok(Some(node)) => {
                self.status = self.engine.run_command(&node);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("语法错误: {} ({})", e, line);
                eprintln!("{}", (self.theme.error_style)(format!("pgsh: syntax error: {}", e)));
                self.status = SYNTAX_ERROR_STATUS;
            }
        }
    }

    fn print_notices(&mut self) {
        for notice in self.engine.take_notices() {
            eprintln!("{}", (self.theme.notice_style)(notice));
        }
    }
}
