use std::env;
use std::path::PathBuf;

use log::error;

pub fn current_dir() -> String {
    let _current_dir = match env::current_dir() {
        Ok(x) => x,
        Err(e) => {
            error!("pgsh: PROMPT: env current_dir error: {}", e);
            return String::new();
        }
    };
    match _current_dir.to_str() {
        Some(x) => x.to_string(),
        None => {
            error!("pgsh: PROMPT: to_str error");
            String::new()
        }
    }
}

/// `cd` 的目标目录，无参数时回到 HOME
pub fn cd_target(arg: Option<&str>) -> PathBuf {
    match arg {
        Some(path) => PathBuf::from(shellexpand::tilde(path).as_ref()),
        None => match env::var("HOME") {
            Ok(home) => PathBuf::from(home),
            Err(_) => PathBuf::from("/"),
        },
    }
}
