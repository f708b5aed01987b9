pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, RunMode};
pub use tracing_init::init_tracing;
