use std::io;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::shell::executor::Executor;
use crate::shell::job_manager::JobController;
use crate::shell::parser::ast::Node;
use crate::shell::prompt;
use crate::shell::signals::{SignalCoordinator, SignalState};
use crate::shell::terminal::Terminal;

/// 前端看到的执行引擎：安装信号处理，逐行执行语法树，维护提示符
pub struct Engine {
    executor: Executor,
    prompt: String,
    _coordinator: SignalCoordinator,
}

impl Engine {
    /// 交互模式下同时接管控制终端，失败时退化为不切换终端的作业控制
    pub fn initialize(interactive: bool) -> io::Result<Self> {
        let signals = Arc::new(SignalState::new());
        let coordinator = SignalCoordinator::install(&signals)?;
        let mut jobs = JobController::new(signals);

        if interactive {
            match Terminal::acquire() {
                Ok(terminal) => {
                    info!("接管控制终端，shell 进程组 {}", terminal.shell_pgid());
                    jobs.attach_terminal(terminal);
                }
                Err(e) => warn!("无法接管控制终端: {}", e),
            }
        }

        info!("引擎初始化完成，pid {}", std::process::id());
        Ok(Self {
            executor: Executor::new(jobs),
            prompt: prompt::render(),
            _coordinator: coordinator,
        })
    }

    /// 执行一行命令，直到它结束、被暂停或进入后台
    pub fn run_command(&mut self, node: &Node) -> i32 {
        self.reap();
        debug!("run_command: {}", node);
        self.executor.execute(node);
        self.reap();
        let jobs = self.executor.jobs();
        debug!(
            "暂停栈 {} 个作业 (栈顶 {:?})，后台 {} 个",
            jobs.stopped_jobs().len(),
            jobs.stopped_jobs().peek().map(|job| job.pgid),
            jobs.background_jobs().len()
        );
        self.prompt = prompt::render();
        self.executor.last_status()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// 回收后台作业后取出待显示的通知
    pub fn take_notices(&mut self) -> Vec<String> {
        self.reap();
        self.executor.jobs_mut().take_notices()
    }

    // SIGCHLD 只设置标志，回收放在主流程里做
    fn reap(&mut self) {
        if !self.executor.jobs().signals().take_child_event() {
            return;
        }
        for job in self.executor.jobs_mut().reap_finished() {
            debug!("作业 {} 已回收", job.command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::parse;
    use serial_test::serial;
    use std::thread;
    use std::time::Duration;

    fn run(engine: &mut Engine, line: &str) -> i32 {
        match parse(line) {
            Ok(Some(node)) => engine.run_command(&node),
            other => panic!("无法解析 {:?}: {:?}", line, other),
        }
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_prompt_follows_cd() {
        let before = std::env::current_dir().unwrap();
        let saved = std::env::var("PS1").ok();
        std::env::set_var("PS1", "\\w> ");

        let mut engine = Engine::initialize(false).unwrap();
        assert_eq!(run(&mut engine, "cd /"), 0);
        assert_eq!(engine.prompt(), "/> ");

        std::env::set_current_dir(before).unwrap();
        match saved {
            Some(value) => std::env::set_var("PS1", value),
            None => std::env::remove_var("PS1"),
        }
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_background_completion_is_reaped() {
        let mut engine = Engine::initialize(false).unwrap();
        assert_eq!(run(&mut engine, "true &"), 0);

        let mut notices = Vec::new();
        for _ in 0..50 {
            notices.extend(engine.take_notices());
            if !notices.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("Done"), "{:?}", notices);
        assert!(engine.executor.jobs().background_jobs().is_empty());
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_status_of_last_command() {
        let mut engine = Engine::initialize(false).unwrap();
        assert_eq!(run(&mut engine, "true; false"), 1);
        assert_eq!(engine.executor.last_status(), 1);
        assert_eq!(run(&mut engine, "pgsh-no-such-program"), 127);
    }
}
