use std::iter::Peekable;
use std::os::fd::RawFd;
use std::str::Chars;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Word(String),
    Pipe,
    Redirect(RedirectOp, Option<RawFd>),
    DupFd(Option<RawFd>, RawFd),
    Background,
    Semi,
    LParen,
    RParen,
    /// 词法错误，解析器据此报告语法错误
    Error(String),
    EOF,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RedirectOp {
    Input,      // <
    Output,     // >
    Append,     // >>
    Both,       // &>
    BothAppend, // &>>
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        match self.peek_char() {
            None => Token::EOF,
            Some(c) => match c {
                '|' => {
                    self.read_char();
                    Token::Pipe
                }
                ';' => {
                    self.read_char();
                    Token::Semi
                }
                '(' => {
                    self.read_char();
                    Token::LParen
                }
                ')' => {
                    self.read_char();
                    Token::RParen
                }
                '&' => {
                    self.read_char();
                    if self.peek_char() == Some('>') {
                        self.read_char();
                        if self.peek_char() == Some('>') {
                            self.read_char();
                            Token::Redirect(RedirectOp::BothAppend, None)
                        } else {
                            Token::Redirect(RedirectOp::Both, None)
                        }
                    } else {
                        Token::Background
                    }
                }
                '<' | '>' => self.read_redirect(None),
                _ => self.read_word(),
            },
        }
    }

    fn read_char(&mut self) -> Option<char> {
        self.input.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.read_char();
        }
    }

    fn read_number(&mut self) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek_char() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            self.read_char();
        }
        digits
    }

    // 当前字符为 '<' 或 '>'
    fn read_redirect(&mut self, fd: Option<RawFd>) -> Token {
        match self.read_char() {
            Some('<') => Token::Redirect(RedirectOp::Input, fd),
            _ => match self.peek_char() {
                Some('>') => {
                    self.read_char();
                    Token::Redirect(RedirectOp::Append, fd)
                }
                Some('&') => {
                    self.read_char();
                    let digits = self.read_number();
                    match (digits.parse::<RawFd>(), fd) {
                        (Ok(target), _) => Token::DupFd(fd, target),
                        (Err(_), Some(fd)) if digits.is_empty() => {
                            Token::Error(format!("{}>&: expected a file descriptor", fd))
                        }
                        // `>&file` 与 `&>file` 等价
                        (Err(_), None) if digits.is_empty() => Token::Redirect(RedirectOp::Both, None),
                        (Err(_), _) => Token::Error(format!("{}: bad file descriptor", digits)),
                    }
                }
                _ => Token::Redirect(RedirectOp::Output, fd),
            },
        }
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();
        let mut quoted = false;

        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || ";<>|&()".contains(c) {
                break;
            }
            match c {
                '"' | '\'' => {
                    quoted = true;
                    if !self.read_quoted_string(&mut word) {
                        return Token::Error("unterminated quote".to_string());
                    }
                }
                '\\' => {
                    self.read_char();
                    if let Some(escaped) = self.read_char() {
                        word.push(escaped);
                    }
                    quoted = true;
                }
                _ => word.push(self.read_char().unwrap_or_default()),
            }
        }

        // `2>file`，数字紧跟重定向符时是描述符而不是参数
        if !quoted && !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
            if let Some('<' | '>') = self.peek_char() {
                if let Ok(fd) = word.parse::<RawFd>() {
                    return self.read_redirect(Some(fd));
                }
            }
        }

        Token::Word(word)
    }

    /// 读到闭合的引号返回 true
    fn read_quoted_string(&mut self, word: &mut String) -> bool {
        let quote = self.read_char().unwrap_or_default();
        let mut escaped = false;

        while let Some(c) = self.read_char() {
            match (escaped, c) {
                (true, _) => {
                    word.push(c);
                    escaped = false;
                }
                (false, '\\') if quote == '"' => escaped = true,
                (false, c) if c == quote => return true,
                (false, c) => word.push(c),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            if token == Token::EOF {
                break;
            }
            tokens.push(token);
        }
        tokens
    }

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn test_simple_command() {
        let mut lexer = Lexer::new("ls -l");
        assert_eq!(lexer.next_token(), word("ls"));
        assert_eq!(lexer.next_token(), word("-l"));
        assert_eq!(lexer.next_token(), Token::EOF);
    }

    #[test]
    fn test_pipe() {
        assert_eq!(
            tokens("ls | grep foo"),
            vec![word("ls"), Token::Pipe, word("grep"), word("foo")]
        );
    }

    #[test]
    fn test_redirections() {
        assert_eq!(
            tokens("echo hello > output.txt"),
            vec![
                word("echo"),
                word("hello"),
                Token::Redirect(RedirectOp::Output, None),
                word("output.txt"),
            ]
        );
        assert_eq!(
            tokens("cat<in >>out"),
            vec![
                word("cat"),
                Token::Redirect(RedirectOp::Input, None),
                word("in"),
                Token::Redirect(RedirectOp::Append, None),
                word("out"),
            ]
        );
    }

    #[test]
    fn test_descriptor_redirections() {
        assert_eq!(
            tokens("make 2>err 2>&1 &>all &>>more"),
            vec![
                word("make"),
                Token::Redirect(RedirectOp::Output, Some(2)),
                word("err"),
                Token::DupFd(Some(2), 1),
                Token::Redirect(RedirectOp::Both, None),
                word("all"),
                Token::Redirect(RedirectOp::BothAppend, None),
                word("more"),
            ]
        );
        // 带引号的数字仍是普通参数
        assert_eq!(
            tokens("echo '2'>x"),
            vec![word("echo"), word("2"), Token::Redirect(RedirectOp::Output, None), word("x")]
        );
    }

    #[test]
    fn test_malformed_descriptor_duplication() {
        assert_eq!(
            tokens("cmd 2>&file"),
            vec![word("cmd"), Token::Error("2>&: expected a file descriptor".to_string()), word("file")]
        );
        assert_eq!(
            tokens("cmd >&99999999999"),
            vec![word("cmd"), Token::Error("99999999999: bad file descriptor".to_string())]
        );
        assert_eq!(
            tokens("cmd >&out"),
            vec![word("cmd"), Token::Redirect(RedirectOp::Both, None), word("out")]
        );
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(
            tokens("echo 'abc"),
            vec![word("echo"), Token::Error("unterminated quote".to_string())]
        );
        assert_eq!(tokens(r#"echo "a\""#), vec![word("echo"), Token::Error("unterminated quote".to_string())]);
    }

    #[test]
    fn test_quoted_strings() {
        assert_eq!(
            tokens(r#"echo "hello world" 'foo bar' a"b c"d"#),
            vec![word("echo"), word("hello world"), word("foo bar"), word("ab cd")]
        );
        assert_eq!(tokens(r#"echo "a \"q\"" 'x\y'"#), vec![word("echo"), word("a \"q\""), word("x\\y")]);
    }

    #[test]
    fn test_sequences_and_groups() {
        assert_eq!(
            tokens("(cd /; ls) & pwd"),
            vec![
                Token::LParen,
                word("cd"),
                word("/"),
                Token::Semi,
                word("ls"),
                Token::RParen,
                Token::Background,
                word("pwd"),
            ]
        );
    }
}
