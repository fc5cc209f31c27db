use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use log::{debug, error};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use nix::libc::{STDERR_FILENO, STDOUT_FILENO};
use nix::unistd::{close, dup2};

use super::executor::Executor;
use super::process::flush_stdio;
use crate::shell::error::{ExecResult, ShellError};
use crate::shell::parser::ast::{Redirect, RedirectMode, BOTH_STREAMS};

/// 保存副本时使用的最小描述符，避开 0-2 以及常见的用户描述符
const SAVE_FLOOR: RawFd = 10;

fn dup_cloexec(fd: RawFd) -> nix::Result<OwnedFd> {
    let copy = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(SAVE_FLOOR))?;
    // SAFETY: fcntl 刚返回的新描述符，只有这里持有
    Ok(unsafe { OwnedFd::from_raw_fd(copy) })
}

/// 一个被覆盖的描述符槽位及其原内容的副本
struct SavedFd {
    slot: RawFd,
    /// 槽位原本是关闭的则为 None，恢复时重新关闭
    copy: Option<OwnedFd>,
}

impl SavedFd {
    fn save(slot: RawFd) -> Result<Self, ShellError> {
        match dup_cloexec(slot) {
            Ok(copy) => Ok(Self { slot, copy: Some(copy) }),
            Err(Errno::EBADF) => Ok(Self { slot, copy: None }),
            Err(e) => Err(ShellError::resource("dup", e)),
        }
    }

    fn restore(&mut self) -> nix::Result<()> {
        match self.copy.take() {
            // 副本随 OwnedFd 一起关闭，dup2 失败也不会泄漏
            Some(copy) => dup2(copy.as_raw_fd(), self.slot).map(drop),
            None => close(self.slot),
        }
    }
}

/// 安装重定向后的作用域，drop 时按相反顺序恢复所有槽位
pub(super) struct RedirectGuard {
    saved: Vec<SavedFd>,
}

impl RedirectGuard {
    pub(super) fn install(replacement: RawFd, slots: &[RawFd]) -> Result<Self, ShellError> {
        let mut guard = Self {
            saved: Vec::with_capacity(slots.len()),
        };
        for &slot in slots {
            guard.saved.push(SavedFd::save(slot)?);
            dup2(replacement, slot).map_err(|e| ShellError::resource("dup2", e))?;
        }
        Ok(guard)
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        flush_stdio();
        while let Some(mut saved) = self.saved.pop() {
            if let Err(e) = saved.restore() {
                error!("恢复描述符 {} 失败: {}", saved.slot, e);
                eprintln!("pgsh: restore fd {}: {}", saved.slot, e.desc());
            }
        }
    }
}

fn open_target(path: &str, mode: RedirectMode) -> io::Result<OwnedFd> {
    let mut options = OpenOptions::new();
    match mode {
        RedirectMode::Input => options.read(true),
        RedirectMode::Append => options.append(true).create(true),
        _ => options.write(true).create(true).truncate(true),
    };
    // std 打开的文件默认带 O_CLOEXEC，安装到槽位上的 dup2 副本则不带
    Ok(options.mode(0o666).open(path)?.into())
}

/// 打开将要放进槽位的描述符
fn open_replacement(redirect: &Redirect) -> Result<OwnedFd, ShellError> {
    if redirect.mode == RedirectMode::DuplicateFd {
        return dup_cloexec(redirect.dest_fd).map_err(|e| ShellError::resource("dup", e));
    }

    let path = redirect.target.as_deref().unwrap_or_default();
    let opened = match path.is_empty() {
        true => Err(io::Error::new(io::ErrorKind::InvalidInput, "missing redirection target")),
        false => open_target(path, redirect.mode),
    };
    opened.map_err(|source| ShellError::Open {
        path: path.to_string(),
        source,
    })
}

fn slots_for(redirect: &Redirect) -> Vec<RawFd> {
    if redirect.source_fd == BOTH_STREAMS {
        vec![STDOUT_FILENO, STDERR_FILENO]
    } else {
        vec![redirect.source_fd]
    }
}

impl Executor {
    pub(super) fn execute_redirect(&mut self, redirect: &Redirect) -> ExecResult {
        // 打不开目标时不执行子节点，也没有任何槽位被改动
        let replacement = open_replacement(redirect)?;
        let slots = slots_for(redirect);
        debug!("重定向 {:?} -> {:?}", slots, redirect.target);

        flush_stdio();
        let guard = RedirectGuard::install(replacement.as_raw_fd(), &slots)?;
        drop(replacement);

        self.execute(&redirect.child);

        drop(guard);
        Ok(self.last_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::job_manager::JobController;
    use crate::shell::parser::ast::Node;
    use crate::shell::signals::SignalState;
    use nix::libc::STDIN_FILENO;
    use nix::sys::stat::fstat;
    use serial_test::serial;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn executor() -> Executor {
        Executor::new(JobController::new(Arc::new(SignalState::new())))
    }

    /// 描述符当前指向的文件
    fn identity(fd: RawFd) -> Option<(u64, u64)> {
        fstat(fd).ok().map(|st| (st.st_dev as u64, st.st_ino as u64))
    }

    fn snapshot() -> Vec<Option<(u64, u64)>> {
        vec![identity(STDIN_FILENO), identity(STDOUT_FILENO), identity(STDERR_FILENO)]
    }

    #[allow(clippy::unwrap_used)]
    fn open_fd_count() -> usize {
        fs::read_dir("/proc/self/fd").unwrap().count()
    }

    fn redirect(child: Node, mode: RedirectMode, path: &Path, source_fd: RawFd) -> Node {
        Node::redirect(child, mode, Some(path.display().to_string()), source_fd, -1)
    }

    fn sh(script: &str) -> Node {
        Node::command(vec!["sh", "-c", script])
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_output_truncates_and_append_appends() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut executor = executor();

        executor.execute(&redirect(Node::command(vec!["echo", "a"]), RedirectMode::Output, &out, 1));
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\n");
        executor.execute(&redirect(Node::command(vec!["echo", "b"]), RedirectMode::Append, &out, 1));
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\n");
        executor.execute(&redirect(Node::command(vec!["echo", "c"]), RedirectMode::Output, &out, 1));
        assert_eq!(fs::read_to_string(&out).unwrap(), "c\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_every_mode_restores_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "input\n").unwrap();

        let cases = vec![
            redirect(Node::command(vec!["cat"]), RedirectMode::Input, &file, 0),
            redirect(Node::command(vec!["true"]), RedirectMode::Output, &file, 1),
            redirect(Node::command(vec!["true"]), RedirectMode::Append, &file, 1),
            Node::redirect(Node::command(vec!["true"]), RedirectMode::DuplicateFd, None, 2, 1),
            redirect(sh("echo out; echo err >&2"), RedirectMode::Output, &file, BOTH_STREAMS),
        ];

        let mut executor = executor();
        for node in cases {
            let before = snapshot();
            let fds = open_fd_count();
            // Input 用例的 cat 输出需要去处，整体再套一层到文件
            let wrapped = redirect(node, RedirectMode::Append, &dir.path().join("sink.txt"), 1);
            executor.execute(&wrapped);
            assert_eq!(snapshot(), before, "{}", wrapped);
            assert_eq!(open_fd_count(), fds, "{}", wrapped);
        }
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_combined_sends_both_streams_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("both.txt");
        let mut executor = executor();
        executor.execute(&redirect(sh("echo out; echo err >&2"), RedirectMode::Output, &out, BOTH_STREAMS));
        assert_eq!(fs::read_to_string(&out).unwrap(), "out\nerr\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_duplicate_fd_follows_redirection_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("log.txt");
        // cmd > log 2>&1
        let node = redirect(
            Node::redirect(sh("echo err >&2"), RedirectMode::DuplicateFd, None, 2, 1),
            RedirectMode::Output,
            &out,
            1,
        );
        let mut executor = executor();
        executor.execute(&node);
        assert_eq!(fs::read_to_string(&out).unwrap(), "err\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_missing_input_skips_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let missing = dir.path().join("missing.txt");
        let before = snapshot();
        let fds = open_fd_count();

        let mut executor = executor();
        let child = Node::command(vec!["touch".to_string(), marker.display().to_string()]);
        executor.execute(&redirect(child, RedirectMode::Input, &missing, 0));

        assert_eq!(executor.last_status(), 1);
        assert!(!marker.exists());
        assert_eq!(snapshot(), before);
        assert_eq!(open_fd_count(), fds);
    }

    #[test]
    #[serial]
    fn test_bad_duplicate_source_is_reported() {
        let mut executor = executor();
        executor.execute(&Node::redirect(Node::command(vec!["true"]), RedirectMode::DuplicateFd, None, 1, 250));
        assert_eq!(executor.last_status(), 1);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    #[serial]
    fn test_guard_restores_on_partial_install_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.txt");
        let before = snapshot();
        let fds = open_fd_count();
        {
            let replacement = open_target(file.to_str().unwrap(), RedirectMode::Output).unwrap();
            // 第二个槽位不合法，install 失败时第一个槽位必须已恢复
            let result = RedirectGuard::install(replacement.as_raw_fd(), &[STDOUT_FILENO, -5]);
            assert!(result.is_err());
        }
        assert_eq!(snapshot(), before);
        assert_eq!(open_fd_count(), fds);
    }
}
