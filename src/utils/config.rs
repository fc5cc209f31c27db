use dotenv::dotenv;
use rustyline::EditMode;
use std::env;
use std::fs;
use std::path::PathBuf;

pub struct Config {
    pub name: String,
    pub config_dir: PathBuf,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
}

impl Config {
    fn get_config_dir() -> PathBuf {
        if let Ok(home) = env::var("HOME") {
            PathBuf::from(home).join(".config/pgsh")
        } else {
            PathBuf::from("tmp")
        }
    }

    fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: String::from(env!("CARGO_PKG_NAME")),
            history_file: config_dir.join(".pgsh_history"),
            logger_dir: config_dir.join("logs"),
            config_dir,
            editor_mode: String::from("emacs"),
            logger_level: String::from("info"),
        }
    }

    pub fn new() -> Self {
        // 优先加载 .env 文件
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();

        if let Ok(editor) = env::var("PGSH_EDITOR") {
            config.editor_mode = editor;
        }

        if let Ok(history) = env::var("PGSH_HISTORY") {
            config.history_file = PathBuf::from(history);
        }

        if let Ok(level) = env::var("PGSH_LOG_LEVEL") {
            config.logger_level = level;
        }

        if let Ok(dir) = env::var("PGSH_LOG_DIR") {
            config.logger_dir = PathBuf::from(dir);
        }

        // 历史文件目录不存在时只能放弃持久化，不影响 shell 启动
        if let Some(parent) = config.history_file.parent() {
            let _ = fs::create_dir_all(parent);
        }

        config
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}
