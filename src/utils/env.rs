// src/utils/env.rs
use log::{info, warn};
use std::env;
use std::path::Path;
use std::str::FromStr;

const ENV_PATHS: [&str; 3] = [".env", ".env.local", "../.env"];

/// Loads the first env file found in `ENV_PATHS`. Variables already set in the process
/// environment win.
pub fn load_env() {
    for path in ENV_PATHS.iter() {
        if !Path::new(path).exists() {
            continue;
        }
        match dotenv::from_path(path) {
            Ok(()) => {
                info!("Loaded environment variables from {}", path);
                return;
            }
            Err(e) => warn!("Failed to load environment from {}: {}", path, e),
        }
    }
    info!("No .env file found, using process environment only");
}

/// Reads and parses an environment variable, falling back to `default` when it is
/// unset or unparsable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_parses_and_falls_back() {
        env::set_var("IRIS_TEST_ENV_OR_NUMBER", " 17 ");
        env::set_var("IRIS_TEST_ENV_OR_GARBAGE", "seventeen");

        assert_eq!(env_or("IRIS_TEST_ENV_OR_NUMBER", 3u32), 17);
        assert_eq!(env_or("IRIS_TEST_ENV_OR_GARBAGE", 3u32), 3);
        assert_eq!(env_or("IRIS_TEST_ENV_OR_MISSING", 0.25f64), 0.25);

        env::remove_var("IRIS_TEST_ENV_OR_NUMBER");
        env::remove_var("IRIS_TEST_ENV_OR_GARBAGE");
    }
}
