use log::{debug, warn};

use super::process::{exec_program, wait_children};
use crate::shell::error::{ExecResult, ShellError};
use crate::shell::job_manager::{Job, JobController};
use crate::shell::parser::ast::{Command, Node};

use nix::unistd::Pid;

/// 报告错误并继续会话，没有错误会让引擎退出
pub(super) fn report(err: &ShellError) {
    warn!("{}", err);
    eprintln!("{}", err);
}

pub struct Executor {
    pub(super) jobs: JobController,
    /// 在 fork 出的子进程里运行：不新建进程组，也不做作业控制
    pub(super) in_child: bool,
    last_status: i32,
}

impl Executor {
    pub fn new(jobs: JobController) -> Self {
        Self {
            jobs,
            in_child: false,
            last_status: 0,
        }
    }

    pub fn jobs(&self) -> &JobController {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut JobController {
        &mut self.jobs
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    /// 按节点类型分发；语法树只读，不会在执行中被修改
    pub fn execute(&mut self, node: &Node) {
        let result = match node {
            Node::Sequence { first, second } => {
                self.execute(first);
                self.execute(second);
                Ok(self.last_status)
            }
            Node::Pipe(stages) => self.execute_pipeline(stages),
            Node::Redirect(redirect) => self.execute_redirect(redirect),
            Node::Command(command) => self.execute_command(command),
            Node::Subshell(child) => self.execute_subshell(child),
            Node::Detach(child) => self.execute_detach(child),
        };

        self.last_status = match result {
            Ok(status) => status,
            Err(err) => {
                report(&err);
                err.exit_status()
            }
        };
    }

    /// fork 之后进入子进程模式，继承来的作业表属于父进程
    pub(super) fn enter_child(&mut self) {
        self.in_child = true;
        self.jobs.clear();
    }

    /// 等待刚 fork 出的一组进程
    pub(super) fn wait_group(&mut self, pgid: Pid, pids: Vec<Pid>, node: &dyn std::fmt::Display) -> i32 {
        if self.in_child {
            wait_children(&pids)
        } else {
            self.jobs.wait_foreground(Job::new(pgid, pids, node.to_string()))
        }
    }

    fn execute_command(&mut self, command: &Command) -> ExecResult {
        // 处理内建命令
        if let Some(result) = self.run_builtin(command) {
            debug!("执行内建命令: {}", command);
            return result;
        }

        debug!("执行外部命令: {}", command);
        let group = self.group_for(None, true);
        let pid = self.spawn(
            group,
            |_| {
                let err = exec_program(command);
                report(&err);
                err.exit_status()
            },
            || Ok(()),
        )?;
        Ok(self.wait_group(pid, vec![pid], command))
    }

    fn execute_subshell(&mut self, child: &Node) -> ExecResult {
        let group = self.group_for(None, true);
        let pid = self.spawn(group, |executor| executor.run_tail(child), || Ok(()))?;
        Ok(self.wait_group(pid, vec![pid], &format!("({})", child)))
    }

    fn execute_detach(&mut self, child: &Node) -> ExecResult {
        let group = self.group_for(None, false);
        let pid = self.spawn(group, |executor| executor.run_tail(child), || Ok(()))?;
        if !self.in_child {
            self.jobs.add_background(Job::new(pid, vec![pid], child.to_string()));
        }
        Ok(0)
    }
}
