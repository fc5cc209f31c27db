use std::fmt;
use std::os::fd::RawFd;

/// 同时重定向标准输出和标准错误
pub const BOTH_STREAMS: RawFd = -1;

/// 解析器产出的语法树，执行期间只读
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Sequence { first: Box<Node>, second: Box<Node> },
    Pipe(Vec<Node>),
    Redirect(Redirect),
    Command(Command),
    Subshell(Box<Node>),
    Detach(Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Input,        // <
    Output,       // >
    Append,       // >>
    DuplicateFd,  // N>&M
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub child: Box<Node>,
    pub mode: RedirectMode,
    /// DuplicateFd 时为 None
    pub target: Option<String>,
    /// 被替换的描述符，`BOTH_STREAMS` 表示 stdout 与 stderr
    pub source_fd: RawFd,
    /// DuplicateFd 时被复制的描述符
    pub dest_fd: RawFd,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub program: String,
    /// argv[0] 即 program
    pub argv: Vec<String>,
}

impl Command {
    pub fn new<S: Into<String>>(argv: Vec<S>) -> Self {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        Self {
            program: argv.first().cloned().unwrap_or_default(),
            argv,
        }
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

impl Node {
    pub fn command<S: Into<String>>(argv: Vec<S>) -> Node {
        Node::Command(Command::new(argv))
    }

    pub fn sequence(first: Node, second: Node) -> Node {
        Node::Sequence {
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    pub fn redirect(child: Node, mode: RedirectMode, target: Option<String>, source_fd: RawFd, dest_fd: RawFd) -> Node {
        Node::Redirect(Redirect {
            child: Box::new(child),
            mode,
            target,
            source_fd,
            dest_fd,
        })
    }
}

fn quote(word: &str) -> String {
    if !word.is_empty() && !word.chars().any(|c| c.is_whitespace() || "'\";<>|&()".contains(c)) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "\\'"))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = self.argv.iter().map(|w| quote(w)).collect();
        write!(f, "{}", words.join(" "))
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.target.as_deref().map(quote).unwrap_or_default();
        match (self.mode, self.source_fd) {
            (RedirectMode::Output, BOTH_STREAMS) => write!(f, "{} &> {}", self.child, target),
            (RedirectMode::Append, BOTH_STREAMS) => write!(f, "{} &>> {}", self.child, target),
            (RedirectMode::Input, 0) => write!(f, "{} < {}", self.child, target),
            (RedirectMode::Input, fd) => write!(f, "{} {}< {}", self.child, fd, target),
            (RedirectMode::Output, 1) => write!(f, "{} > {}", self.child, target),
            (RedirectMode::Output, fd) => write!(f, "{} {}> {}", self.child, fd, target),
            (RedirectMode::Append, 1) => write!(f, "{} >> {}", self.child, target),
            (RedirectMode::Append, fd) => write!(f, "{} {}>> {}", self.child, fd, target),
            (RedirectMode::DuplicateFd, fd) => write!(f, "{} {}>&{}", self.child, fd, self.dest_fd),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Sequence { first, second } => write!(f, "{}; {}", first, second),
            Node::Pipe(stages) => {
                let stages: Vec<String> = stages.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", stages.join(" | "))
            }
            Node::Redirect(redirect) => write!(f, "{}", redirect),
            Node::Command(command) => write!(f, "{}", command),
            Node::Subshell(child) => write!(f, "({})", child),
            Node::Detach(child) => write!(f, "{} &", child),
        }
    }
}
