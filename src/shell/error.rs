use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// pipe/fork/dup 等系统资源失败，只中止当前结构
    #[error("{context}: {}", .source.desc())]
    Resource {
        context: &'static str,
        #[source]
        source: Errno,
    },

    #[error("{path}: cannot open: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{program}: {}", .source.desc())]
    Exec {
        program: String,
        #[source]
        source: Errno,
    },

    #[error("cd: {}: {source}", .path.display())]
    Chdir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl ShellError {
    pub fn resource(context: &'static str, source: Errno) -> Self {
        ShellError::Resource { context, source }
    }

    /// 子进程中 exec 失败时的退出码
    pub fn exit_status(&self) -> i32 {
        match self {
            ShellError::Exec { source: Errno::ENOENT, .. } => 127,
            ShellError::Exec { .. } => 126,
            ShellError::Usage(_) => 2,
            _ => 1,
        }
    }
}

pub type ExecResult = Result<i32, ShellError>;
