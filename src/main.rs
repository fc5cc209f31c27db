use log::debug;
use shell::Shell;

use crate::utils::config::Config;
use crate::utils::log::init_logger;

mod shell;
mod utils;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new();
    if let Err(e) = init_logger(&config) {
        eprintln!("pgsh: 无法初始化日志 {}: {}", config.logger_dir.display(), e);
    }
    debug!("配置加载成功 {}", config.config_dir.display());

    let mut shell = Shell::new(&config)?;
    let status = shell.run()?;
    std::process::exit(status)
}
