//! Helpers shared by the clipflow engine, transport, and CLI.

pub mod config;
pub mod path_processing;
pub mod retry;
pub mod slippage;

pub use config::{CONFIG_PATH_ENV, ConfigError, default_config_path, load_config, load_config_from_path, save_config_to_path, validate_config};
pub use path_processing::expand_tilde;
pub use retry::{Exhausted, retry_with_policy};
pub use slippage::{SLIPPAGE_PRECISION, SlippageError, direction, pad, slip};
