use std::env;

use log::warn;
use nix::unistd::{gethostname, getuid, User};

use crate::utils::path;

pub const DEFAULT_PROMPT: &str = "pgsh$ ";

/// `PS1` 中可以引用的信息
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub user: String,
    pub host: String,
    pub cwd: String,
}

impl PromptContext {
    pub fn current() -> Self {
        let user = match User::from_uid(getuid()) {
            Ok(Some(user)) => user.name,
            Ok(None) => env::var("USER").unwrap_or_default(),
            Err(e) => {
                warn!("prompt: 查询用户失败: {}", e);
                env::var("USER").unwrap_or_default()
            }
        };
        let host = match gethostname() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("prompt: 查询主机名失败: {}", e);
                String::new()
            }
        };
        Self {
            user,
            host,
            cwd: path::current_dir(),
        }
    }
}

/// 展开 `\u` `\h` `\w`，其他字符原样保留
pub fn expand(template: &str, ctx: &PromptContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => out.push_str(&ctx.user),
            Some('h') => out.push_str(&ctx.host),
            Some('w') => out.push_str(&ctx.cwd),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub fn render() -> String {
    match env::var("PS1") {
        Ok(template) => expand(&template, &PromptContext::current()),
        Err(_) => DEFAULT_PROMPT.to_string(),
    }
}
