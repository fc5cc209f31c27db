use std::io;

use log::debug;
use nix::sys::signal::{self, killpg, SigHandler, Signal};
use nix::unistd::{getpgrp, getpid, setpgid, tcgetpgrp, tcsetpgrp, Pid};

/// 交互模式下的控制终端，前台作业运行期间终端归它的进程组所有
#[derive(Debug, Clone, Copy)]
pub struct Terminal {
    shell_pgid: Pid,
}

impl Terminal {
    /// 让 shell 成为自己进程组的组长并占有 stdin 所在的终端
    pub fn acquire() -> nix::Result<Self> {
        // 在后台启动时先等到被放到前台
        while tcgetpgrp(io::stdin())? != getpgrp() {
            killpg(getpgrp(), Signal::SIGTTIN)?;
        }

        // 不再是前台组时调用 tcsetpgrp 会收到 SIGTTOU
        // SAFETY: 只把信号设为忽略，不涉及处理函数
        unsafe { signal::signal(Signal::SIGTTOU, SigHandler::SigIgn) }?;

        let pid = getpid();
        if getpgrp() != pid {
            // 会话组长不能再换组，EPERM 时沿用当前组
            if let Err(e) = setpgid(pid, pid) {
                debug!("shell 无法新建进程组: {}", e);
            }
        }

        let shell_pgid = getpgrp();
        tcsetpgrp(io::stdin(), shell_pgid)?;
        Ok(Self { shell_pgid })
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    pub fn give_to(&self, pgid: Pid) {
        if let Err(e) = tcsetpgrp(io::stdin(), pgid) {
            // 进程组已经全部退出时返回 ESRCH/EPERM
            debug!("tcsetpgrp({}) 失败: {}", pgid, e);
        }
    }

    pub fn reclaim(&self) {
        self.give_to(self.shell_pgid);
    }
}
