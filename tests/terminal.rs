use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::pty::openpty;

/// 在新的伪终端上运行的交互式 pgsh，终端是它的控制终端
struct PtySession {
    child: Child,
    master: File,
    output: Option<JoinHandle<Vec<u8>>>,
    _home: tempfile::TempDir,
}

impl PtySession {
    #[allow(clippy::unwrap_used)]
    fn start() -> Self {
        let home = tempfile::tempdir().unwrap();
        let pty = openpty(None, None).unwrap();
        let slave = File::from(pty.slave);

        let mut command = Command::new(env!("CARGO_BIN_EXE_pgsh"));
        command
            .current_dir(home.path())
            .env("HOME", home.path())
            .env("PGSH_LOG_DIR", home.path().join("logs"))
            // dumb 终端下 rustyline 只读整行，不进 raw 模式
            .env("TERM", "dumb")
            .env_remove("PS1")
            .stdin(Stdio::from(slave.try_clone().unwrap()))
            .stdout(Stdio::from(slave.try_clone().unwrap()))
            .stderr(Stdio::from(slave));
        // SAFETY: pre_exec 里只调用 setsid 和 ioctl
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        // command 里的 slave 副本随 drop 关闭，子进程退出后 master 读到 EIO
        let child = command.spawn().unwrap();
        drop(command);

        let master = File::from(pty.master);
        let mut reader = master.try_clone().unwrap();
        let output = thread::spawn(move || {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while let Ok(n) = reader.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            buf
        });

        Self {
            child,
            master,
            output: Some(output),
            _home: home,
        }
    }

    #[allow(clippy::unwrap_used)]
    fn type_line(&mut self, bytes: &[u8]) {
        self.master.write_all(bytes).unwrap();
        thread::sleep(Duration::from_millis(500));
    }

    /// 等 pgsh 退出，返回退出码和终端上的全部输出
    #[allow(clippy::unwrap_used)]
    fn finish(mut self) -> (Option<i32>, String) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                break status.code();
            }
            if Instant::now() > deadline {
                let _ = self.child.kill();
                let _ = self.child.wait();
                break None;
            }
            thread::sleep(Duration::from_millis(20));
        };
        let output = self.output.take().unwrap().join().unwrap();
        (status, String::from_utf8_lossy(&output).into_owned())
    }
}

#[test]
fn test_foreground_job_reads_from_terminal() {
    let mut session = PtySession::start();
    session.type_line(b"cat\n");
    session.type_line(b"hello\n");
    // 行首的 ^D 让 cat 读到 EOF
    session.type_line(b"\x04");
    session.type_line(b"exit\n");

    let (status, output) = session.finish();
    // 终端回显一次，cat 再输出一次
    assert!(output.contains("hello\r\nhello\r\n"), "{:?}", output);
    assert!(!output.contains("Stopped"), "{:?}", output);
    assert!(!output.contains("No such file"), "{:?}", output);
    assert_eq!(status, Some(0));
}

#[test]
fn test_ctrl_c_interrupts_job_and_keeps_shell() {
    let start = Instant::now();
    let mut session = PtySession::start();
    session.type_line(b"sleep 5\n");
    session.type_line(b"\x03");
    session.type_line(b"echo al\"\"ive\n");
    session.type_line(b"exit\n");

    let (status, output) = session.finish();
    assert!(output.contains("alive\r\n"), "{:?}", output);
    // sleep 没被打断的话至少要 5 秒
    assert!(start.elapsed() < Duration::from_millis(4500), "{:?}", start.elapsed());
    assert_eq!(status, Some(0));
}
