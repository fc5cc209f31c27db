use std::os::fd::RawFd;

use super::ast::{Node, RedirectMode, BOTH_STREAMS};
use super::lexer::{Lexer, RedirectOp, Token};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
    /// 第一个词法错误，出现后后续输入都当作 EOF
    lex_error: Option<String>,
}

/// 尚未套到命令上的重定向
struct PendingRedirect {
    mode: RedirectMode,
    target: Option<String>,
    source_fd: RawFd,
    dest_fd: RawFd,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut parser = Parser {
            lexer: Lexer::new(input),
            current_token: Token::EOF,
            lex_error: None,
        };
        parser.next_token();
        parser
    }

    fn next_token(&mut self) {
        if self.lex_error.is_some() {
            return;
        }
        self.current_token = match self.lexer.next_token() {
            Token::Error(message) => {
                self.lex_error = Some(message);
                Token::EOF
            }
            token => token,
        };
    }

    /// 解析一整行，空行返回 None
    pub fn parse_line(&mut self) -> Result<Option<Node>, String> {
        if let Some(message) = self.lex_error.take() {
            return Err(message);
        }
        if self.current_token == Token::EOF {
            return Ok(None);
        }
        let parsed = self.parse_list();
        if let Some(message) = self.lex_error.take() {
            return Err(message);
        }
        let node = parsed?;
        match &self.current_token {
            Token::EOF => Ok(Some(node)),
            Token::RParen => Err("unexpected ')'".to_string()),
            token => Err(format!("unexpected token {:?}", token)),
        }
    }

    // list := job ((';' | '&') job)* [';' | '&']
    fn parse_list(&mut self) -> Result<Node, String> {
        let mut jobs = Vec::new();

        loop {
            let mut job = self.parse_pipeline()?;
            match self.current_token {
                Token::Background => {
                    job = Node::Detach(Box::new(job));
                    self.next_token();
                }
                Token::Semi => self.next_token(),
                _ => {
                    jobs.push(job);
                    break;
                }
            }
            jobs.push(job);
            if matches!(self.current_token, Token::EOF | Token::RParen) {
                break;
            }
        }

        // 右结合: a; b; c => Sequence(a, Sequence(b, c))
        let mut iter = jobs.into_iter().rev();
        let last = iter.next().ok_or_else(|| "expected command".to_string())?;
        Ok(iter.fold(last, |second, first| Node::sequence(first, second)))
    }

    fn parse_pipeline(&mut self) -> Result<Node, String> {
        let first = self.parse_redirected()?;
        if self.current_token != Token::Pipe {
            return Ok(first);
        }

        let mut stages = vec![first];
        while self.current_token == Token::Pipe {
            self.next_token();
            stages.push(self.parse_redirected()?);
        }
        Ok(Node::Pipe(stages))
    }

    fn parse_redirected(&mut self) -> Result<Node, String> {
        let mut redirections = Vec::new();

        let node = if self.current_token == Token::LParen {
            self.next_token();
            let inner = self.parse_list()?;
            if self.current_token != Token::RParen {
                return Err("expected ')'".to_string());
            }
            self.next_token();
            Node::Subshell(Box::new(inner))
        } else {
            self.parse_simple_command(&mut redirections)?
        };

        while let Some(redirection) = self.parse_redirection()? {
            redirections.push(redirection);
        }

        // 最左边的重定向最先生效，所以放在最外层
        Ok(redirections.into_iter().rev().fold(node, |child, r| {
            Node::redirect(child, r.mode, r.target, r.source_fd, r.dest_fd)
        }))
    }

    fn parse_simple_command(&mut self, redirections: &mut Vec<PendingRedirect>) -> Result<Node, String> {
        let mut argv = Vec::new();

        loop {
            if let Token::Word(word) = &self.current_token {
                argv.push(word.clone());
                self.next_token();
            } else if let Some(redirection) = self.parse_redirection()? {
                redirections.push(redirection);
            } else {
                break;
            }
        }

        if argv.is_empty() {
            return Err("expected command name".to_string());
        }
        Ok(Node::command(argv))
    }

    fn parse_redirection(&mut self) -> Result<Option<PendingRedirect>, String> {
        let redirection = match self.current_token.clone() {
            Token::DupFd(fd, dest_fd) => {
                self.next_token();
                PendingRedirect {
                    mode: RedirectMode::DuplicateFd,
                    target: None,
                    source_fd: fd.unwrap_or(1),
                    dest_fd,
                }
            }
            Token::Redirect(op, fd) => {
                self.next_token(); // 跳过重定向操作符
                let target = match &self.current_token {
                    Token::Word(filename) => filename.clone(),
                    _ => return Err("expected filename after redirection operator".to_string()),
                };
                self.next_token();
                let (mode, source_fd) = match op {
                    RedirectOp::Input => (RedirectMode::Input, fd.unwrap_or(0)),
                    RedirectOp::Output => (RedirectMode::Output, fd.unwrap_or(1)),
                    RedirectOp::Append => (RedirectMode::Append, fd.unwrap_or(1)),
                    RedirectOp::Both => (RedirectMode::Output, BOTH_STREAMS),
                    RedirectOp::BothAppend => (RedirectMode::Append, BOTH_STREAMS),
                };
                PendingRedirect {
                    mode,
                    target: Some(target),
                    source_fd,
                    dest_fd: -1,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(redirection))
    }
}

/// 解析一行输入
pub fn parse(line: &str) -> Result<Option<Node>, String> {
    Parser::new(line).parse_line()
}
