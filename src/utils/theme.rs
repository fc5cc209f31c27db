use colored::Colorize;

pub struct Theme {
    pub error_style: Box<dyn Fn(String) -> String>,
    pub notice_style: Box<dyn Fn(String) -> String>,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            error_style: Box::new(|s| s.bright_red().to_string()),
            notice_style: Box::new(|s| s.bright_magenta().to_string()),
        }
    }
}

impl Theme {
    /// 非交互模式下输出可能被其他程序读取，不带颜色
    pub fn plain() -> Self {
        Theme {
            error_style: Box::new(|s| s),
            notice_style: Box::new(|s| s),
        }
    }

    pub fn for_session(interactive: bool) -> Self {
        if interactive {
            Theme::default()
        } else {
            Theme::plain()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_theme_keeps_text() {
        let theme = Theme::for_session(false);
        assert_eq!((theme.error_style)("oops".to_string()), "oops");
        assert_eq!((theme.notice_style)("[1]  Done".to_string()), "[1]  Done");
    }
}
