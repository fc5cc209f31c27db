use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::waitpid;
use nix::sys::wait::WaitPidFlag as WF;
use nix::sys::wait::WaitStatus as WS;
use nix::unistd::Pid;

use super::signals::SignalState;
use super::terminal::Terminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
}

/// 一个进程组，进程组 id 即第一个 fork 出的子进程的 pid
#[derive(Debug, Clone)]
pub struct Job {
    pub pgid: Pid,
    pub index: usize,
    pub command: String,
    pub state: JobState,
    members: Vec<Pid>,
    last: Pid,
    status: i32,
}

impl Job {
    /// `members` 按 fork 顺序排列，最后一个决定作业的退出码
    pub fn new(pgid: Pid, members: Vec<Pid>, command: String) -> Self {
        let last = members.last().copied().unwrap_or(pgid);
        Self {
            pgid,
            index: 0,
            command,
            state: JobState::Running,
            members,
            last,
            status: 0,
        }
    }

    pub fn members(&self) -> &[Pid] {
        &self.members
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.members.contains(&pid)
    }

    pub fn is_finished(&self) -> bool {
        self.members.is_empty()
    }

    /// 成员退出后移出作业，返回它是否属于这个作业
    fn forget_member(&mut self, pid: Pid, status: i32) -> bool {
        let Some(pos) = self.members.iter().position(|p| *p == pid) else {
            return false;
        };
        self.members.remove(pos);
        if pid == self.last {
            self.status = status;
        }
        true
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
        };
        write!(f, "[{}]  {}\t{}", self.index, state, self.command)
    }
}

/// 被暂停作业的后进先出栈，无容量上限
#[derive(Debug, Default)]
pub struct JobStack {
    jobs: Vec<Job>,
}

impl JobStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只接受处于 Stopped 状态且尚未入栈的作业
    pub fn push(&mut self, job: Job) -> Result<(), Job> {
        if job.state != JobState::Stopped || self.jobs.iter().any(|j| j.pgid == job.pgid) {
            return Err(job);
        }
        self.jobs.push(job);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop()
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    fn position_of(&self, pid: Pid) -> Option<usize> {
        self.jobs.iter().position(|job| job.contains(pid))
    }

    fn take(&mut self, pos: usize) -> Job {
        self.jobs.remove(pos)
    }

    fn get_mut(&mut self, pos: usize) -> Option<&mut Job> {
        self.jobs.get_mut(pos)
    }
}

fn signal_status(sig: Signal) -> i32 {
    128 + sig as i32
}

/// 作业控制：前台等待、暂停栈、恢复以及后台回收
pub struct JobController {
    signals: Arc<SignalState>,
    stack: JobStack,
    background: Vec<Job>,
    notices: Vec<String>,
    /// 只有交互模式才持有终端
    terminal: Option<Terminal>,
}

impl JobController {
    pub fn new(signals: Arc<SignalState>) -> Self {
        Self {
            signals,
            stack: JobStack::new(),
            background: Vec::new(),
            notices: Vec::new(),
            terminal: None,
        }
    }

    pub fn attach_terminal(&mut self, terminal: Terminal) {
        self.terminal = Some(terminal);
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    fn give_terminal(&self, pgid: Pid) {
        if let Some(terminal) = &self.terminal {
            terminal.give_to(pgid);
        }
    }

    fn reclaim_terminal(&self) {
        if let Some(terminal) = &self.terminal {
            terminal.reclaim();
        }
    }

    pub fn signals(&self) -> &Arc<SignalState> {
        &self.signals
    }

    pub fn stopped_jobs(&self) -> &JobStack {
        &self.stack
    }

    pub fn background_jobs(&self) -> &[Job] {
        &self.background
    }

    /// 子进程继承来的作业属于父进程，丢弃且不发送任何信号
    pub fn clear(&mut self) {
        self.stack = JobStack::new();
        self.background.clear();
        self.notices.clear();
        self.terminal = None;
        self.signals.set_foreground(None);
    }

    /// 取出待显示的作业状态变化
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn find_available_index(&self) -> usize {
        let mut index = 1;
        while self.stack.iter().chain(self.background.iter()).any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    fn assign_index(&self, job: &mut Job) {
        if job.index == 0 {
            job.index = self.find_available_index();
        }
    }

    fn push_stopped(&mut self, mut job: Job) {
        self.assign_index(&mut job);
        job.state = JobState::Stopped;
        self.notices.push(job.to_string());
        if let Err(job) = self.stack.push(job) {
            warn!("作业 {} 已在暂停栈中", job.pgid);
        }
    }

    /// 登记一个不等待的后台作业
    pub fn add_background(&mut self, mut job: Job) -> usize {
        self.assign_index(&mut job);
        info!("后台作业 [{}] {} 进程组 {}", job.index, job.command, job.pgid);
        let index = job.index;
        self.background.push(job);
        index
    }

    /// 阻塞直到进程组全部退出或被暂停
    ///
    /// 暂停时作业入栈并立即返回 128 + 信号值。
    /// 等待期间终端交给作业的进程组，返回前收回。
    pub fn wait_foreground(&mut self, job: Job) -> i32 {
        debug!("等待前台进程组 {} ({:?})", job.pgid, job.members());
        self.signals.set_foreground(Some(job.pgid));
        self.give_terminal(job.pgid);
        let status = self.wait_members(job);
        self.signals.set_foreground(None);
        self.reclaim_terminal();
        status
    }

    fn wait_members(&mut self, mut job: Job) -> i32 {
        let group = Pid::from_raw(-job.pgid.as_raw());

        while !job.is_finished() {
            match waitpid(group, Some(WF::WUNTRACED)) {
                Ok(WS::Exited(pid, status)) => {
                    debug!("进程 {} 退出, 状态 {}", pid, status);
                    job.forget_member(pid, status);
                }
                Ok(WS::Signaled(pid, sig, _core_dumped)) => {
                    debug!("进程 {} 被信号 {} 终止", pid, sig);
                    job.forget_member(pid, signal_status(sig));
                }
                Ok(WS::Stopped(pid, sig)) => {
                    debug!("进程 {} 被信号 {} 暂停", pid, sig);
                    return self.suspend_current(job, sig);
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    // 成员已被别处回收
                    job.members.clear();
                }
                Err(e) => {
                    error!("jobc: 等待进程组 {} 出错: {}", job.pgid, e);
                    return 1;
                }
            }
        }

        debug!("前台进程组 {} 结束, 状态 {}", job.pgid, job.status);
        job.status
    }

    /// 暂停整个前台进程组并压入暂停栈，清除前台作业
    pub fn suspend_current(&mut self, job: Job, sig: Signal) -> i32 {
        // 可能只有一个成员收到了停止信号
        if let Err(e) = killpg(job.pgid, Signal::SIGTSTP) {
            warn!("暂停进程组 {} 失败: {}", job.pgid, e);
        }
        self.signals.set_foreground(None);
        self.reclaim_terminal();
        info!("前台作业 {} 已暂停", job.command);
        self.push_stopped(job);
        signal_status(sig)
    }

    /// 恢复最近暂停的作业
    ///
    /// 暂停栈为空时，`fg` 会把最近的后台作业带到前台；
    /// 两者都没有时什么也不做，返回 None。
    pub fn resume_last(&mut self, foreground: bool) -> Option<i32> {
        if self.stack.is_empty() {
            if foreground {
                let job = self.background.pop()?;
                info!("将后台作业 [{}] {} 切到前台", job.index, job.command);
                return Some(self.wait_foreground(job));
            }
            debug!("bg: 没有暂停的作业");
            return None;
        }
        let mut job = self.stack.pop()?;

        // 先交出终端再继续，恢复的程序一运行就可能读终端
        if foreground {
            self.give_terminal(job.pgid);
        }
        if let Err(e) = killpg(job.pgid, Signal::SIGCONT) {
            warn!("继续进程组 {} 失败: {}", job.pgid, e);
            if e == Errno::ESRCH {
                self.reclaim_terminal();
                return Some(0);
            }
        }
        job.state = JobState::Running;
        info!("继续作业 [{}] {} (前台: {})", job.index, job.command, foreground);

        if foreground {
            Some(self.wait_foreground(job))
        } else {
            self.notices.push(format!("{} &", job));
            self.background.push(job);
            Some(0)
        }
    }

    /// 非阻塞地回收所有已退出的子进程，返回结束的作业
    pub fn reap_finished(&mut self) -> Vec<Job> {
        let mut finished = Vec::new();

        loop {
            let options = WF::WNOHANG | WF::WUNTRACED | WF::WCONTINUED;
            match waitpid(Pid::from_raw(-1), Some(options)) {
                Ok(WS::StillAlive) => break,
                Ok(WS::Exited(pid, status)) => {
                    if let Some(job) = self.forget(pid, status) {
                        finished.push(job);
                    }
                }
                Ok(WS::Signaled(pid, sig, _core_dumped)) => {
                    if let Some(job) = self.forget(pid, signal_status(sig)) {
                        finished.push(job);
                    }
                }
                Ok(WS::Stopped(pid, _)) => self.mark_stopped(pid),
                Ok(WS::Continued(pid)) => self.mark_continued(pid),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    error!("jobc: 回收子进程出错: {}", e);
                    break;
                }
            }
        }

        for job in &finished {
            info!("作业 [{}] {} 结束, 状态 {}", job.index, job.command, job.status);
            self.notices.push(format!("[{}]  Done\t{}", job.index, job.command));
        }
        finished
    }

    fn forget(&mut self, pid: Pid, status: i32) -> Option<Job> {
        if let Some(pos) = self.background.iter().position(|job| job.contains(pid)) {
            self.background[pos].forget_member(pid, status);
            if self.background[pos].is_finished() {
                return Some(self.background.remove(pos));
            }
            return None;
        }
        if let Some(pos) = self.stack.position_of(pid) {
            if let Some(job) = self.stack.get_mut(pos) {
                job.forget_member(pid, status);
                if job.is_finished() {
                    return Some(self.stack.take(pos));
                }
            }
            return None;
        }
        debug!("回收未登记的子进程 {}", pid);
        None
    }

    fn mark_stopped(&mut self, pid: Pid) {
        if let Some(pos) = self.background.iter().position(|job| job.contains(pid)) {
            let job = self.background.remove(pos);
            info!("后台作业 [{}] {} 被暂停", job.index, job.command);
            self.push_stopped(job);
        }
    }

    fn mark_continued(&mut self, pid: Pid) {
        if let Some(pos) = self.stack.position_of(pid) {
            let mut job = self.stack.take(pos);
            job.state = JobState::Running;
            info!("作业 [{}] {} 在外部被继续", job.index, job.command);
            self.background.push(job);
        }
    }
}
