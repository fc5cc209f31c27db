mod builtins;
mod executor;
mod pipeline;
mod process;
mod redirect;

pub use executor::Executor;
