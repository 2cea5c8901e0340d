pub mod config;
pub mod env;
pub mod progress;
pub mod retry;

pub use config::{ServingConfig, TrainingConfig};
pub use retry::{RetryConfig, RetryExecutor};
