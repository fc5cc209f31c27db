use std::os::fd::{AsRawFd, OwnedFd};

use log::{debug, warn};
use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{dup2, pipe, Pid};

use super::executor::Executor;
use super::process::wait_children;
use crate::shell::error::{ExecResult, ShellError};
use crate::shell::parser::ast::Node;

type PipeEnds = (OwnedFd, OwnedFd);

/// 一次性分配全部管道，任何一个失败都直接放弃整个管道
fn open_pipes(count: usize) -> Result<Vec<PipeEnds>, ShellError> {
    (0..count)
        .map(|_| pipe())
        .collect::<nix::Result<Vec<_>>>()
        .map_err(|e| ShellError::resource("pipe creation failed", e))
}

/// 在第 `index` 个阶段的子进程中接好 stdin/stdout，然后关闭所有管道描述符
fn connect_stage(pipes: &mut Vec<PipeEnds>, index: usize) -> nix::Result<()> {
    if index > 0 {
        dup2(pipes[index - 1].0.as_raw_fd(), STDIN_FILENO)?;
    }
    if index < pipes.len() {
        dup2(pipes[index].1.as_raw_fd(), STDOUT_FILENO)?;
    }
    // 任何进程里残留的写端都会让下游读者一直等不到 EOF
    pipes.clear();
    Ok(())
}

impl Executor {
    pub(super) fn execute_pipeline(&mut self, stages: &[Node]) -> ExecResult {
        match stages {
            [] => return Ok(0),
            [only] => {
                self.execute(only);
                return Ok(self.last_status());
            }
            _ => {}
        }

        let mut pipes = open_pipes(stages.len() - 1)?;
        debug!("管道共 {} 个阶段", stages.len());

        let mut leader: Option<Pid> = None;
        let mut pids = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            let group = self.group_for(leader, true);
            let spawned = self.spawn(
                group,
                |executor| executor.run_tail(stage),
                || connect_stage(&mut pipes, index),
            );
            match spawned {
                Ok(pid) => {
                    leader.get_or_insert(pid);
                    pids.push(pid);
                }
                Err(err) => {
                    drop(pipes);
                    abort_stages(&pids);
                    return Err(err);
                }
            }
        }

        // 父进程不需要任何管道端
        drop(pipes);

        match leader {
            Some(pgid) => {
                let line: Vec<String> = stages.iter().map(ToString::to_string).collect();
                Ok(self.wait_group(pgid, pids, &line.join(" | ")))
            }
            None => Ok(0),
        }
    }
}

/// fork 失败时不留下半截管道
fn abort_stages(pids: &[Pid]) {
    if pids.is_empty() {
        return;
    }
    warn!("中止已启动的 {} 个管道阶段", pids.len());
    for pid in pids {
        let _ = kill(*pid, Signal::SIGKILL);
    }
    wait_children(pids);
}
