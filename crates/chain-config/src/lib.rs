//! Environment-variable configuration for every binary in this workspace,
//! built on [`figment`].
//!
//! ```rust,ignore
//! use chain_config::ChainConfig;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! #[serde(deny_unknown_fields)]
//! pub struct Config {
//!     pub log: String,
//! }
//!
//! impl ChainConfig for Config {
//!     const PREFIX: &'static str = "CHAIN_NODE_";
//! }
//!
//! let cfg: Config = chain_config::get_config().unwrap();
//! ```

mod config;

pub use config::{
    get_config,
    ChainConfig,
};
#[cfg(feature = "tests")]
pub use config_tests::{
    config_should_reject_unknown_var,
    example_env_config_is_up_to_date,
};
