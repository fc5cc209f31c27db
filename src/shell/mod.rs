mod engine;
mod error;
mod executor;
mod job_manager;
mod parser;
mod prompt;
mod readline;
mod shell;
mod signals;
mod terminal;

pub use shell::Shell;
