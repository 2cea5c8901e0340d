// src/lib.rs
pub mod error;
pub mod features;
pub mod models;
pub mod registry;
pub mod serving;
pub mod training;
pub mod utils;

pub use error::{LifecycleError, Result};
pub use serving::ServingEngine;
