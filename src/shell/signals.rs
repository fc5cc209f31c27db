use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use nix::sys::signal::{self, killpg, SigHandler, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCHLD, SIGINT, SIGTSTP};
use signal_hook::SigId;

/// 信号处理函数与主流程共享的状态
///
/// 处理函数里只允许原子读写和 `killpg`，不分配内存、不加锁。
/// 复杂逻辑（回收子进程、打印通知）都由主流程轮询这里的标志完成。
#[derive(Debug, Default)]
pub struct SignalState {
    /// 前台进程组，0 表示没有前台作业
    foreground: AtomicI32,
    child_event: Arc<AtomicBool>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_foreground(&self, pgid: Option<Pid>) {
        let raw = pgid.map(Pid::as_raw).unwrap_or(0);
        self.foreground.store(raw, Ordering::SeqCst);
    }

    pub fn foreground(&self) -> Option<Pid> {
        match self.foreground.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    /// Ctrl-C：转发给前台进程组，没有前台作业时直接吞掉
    pub fn interrupt_foreground(&self) -> bool {
        self.forward(Signal::SIGINT)
    }

    /// Ctrl-Z：暂停整个前台进程组，入栈由等待方完成
    pub fn suspend_foreground(&self) -> bool {
        self.forward(Signal::SIGTSTP)
    }

    fn forward(&self, sig: Signal) -> bool {
        match self.foreground() {
            Some(pgid) => killpg(pgid, sig).is_ok(),
            None => false,
        }
    }

    /// 读取并清除 SIGCHLD 标志
    pub fn take_child_event(&self) -> bool {
        self.child_event.swap(false, Ordering::SeqCst)
    }
}

/// 引擎生命周期内安装的信号处理函数，drop 时注销
pub struct SignalCoordinator {
    ids: Vec<SigId>,
}

impl SignalCoordinator {
    pub fn install(state: &Arc<SignalState>) -> io::Result<Self> {
        let mut ids = Vec::with_capacity(3);

        let interrupt = Arc::clone(state);
        // SAFETY: 闭包只做原子读取和 killpg，都是 async-signal-safe 的
        ids.push(unsafe {
            signal_hook::low_level::register(SIGINT, move || {
                interrupt.interrupt_foreground();
            })
        }?);

        let suspend = Arc::clone(state);
        // SAFETY: 同上
        ids.push(unsafe {
            signal_hook::low_level::register(SIGTSTP, move || {
                suspend.suspend_foreground();
            })
        }?);

        ids.push(signal_hook::flag::register(SIGCHLD, Arc::clone(&state.child_event))?);

        debug!("已安装 SIGINT/SIGTSTP/SIGCHLD 处理函数");
        Ok(Self { ids })
    }
}

impl Drop for SignalCoordinator {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// fork 之后在子进程中调用，exec 出去的程序需要默认的信号行为
pub fn restore_defaults() {
    for sig in [
        Signal::SIGINT,
        Signal::SIGTSTP,
        Signal::SIGCHLD,
        Signal::SIGPIPE,
        Signal::SIGTTOU,
        Signal::SIGTTIN,
    ] {
        // SAFETY: 单线程的子进程里恢复默认处理，不涉及任何 Rust 闭包
        if let Err(e) = unsafe { signal::signal(sig, SigHandler::SigDfl) } {
            warn!("恢复信号 {} 默认处理失败: {}", sig, e);
        }
    }
}
