use figment::{
    providers::Env,
    Figment,
};
use serde::de::DeserializeOwned;

/// A config that can be read from environment variables under a fixed
/// prefix. Implementors should derive `Deserialize` with
/// `#[serde(deny_unknown_fields)]` so a typo'd env var is a hard error
/// rather than silently ignored.
pub trait ChainConfig: DeserializeOwned {
    /// The environment variable prefix, including the trailing separator,
    /// e.g. `"CHAIN_NODE_"`.
    const PREFIX: &'static str;

    /// Reads `Self` from the environment under a caller-chosen prefix
    /// (normally [`Self::PREFIX`], overridden in tests to avoid clobbering
    /// the real process environment).
    ///
    /// # Errors
    /// Returns an error if a required variable is missing, a value fails to
    /// parse, or an unrecognized variable is set (when the config derives
    /// `#[serde(deny_unknown_fields)]`).
    fn from_environment(prefix: &str) -> figment::error::Result<Self> {
        Figment::new()
            .merge(Env::prefixed(prefix).split("__"))
            .extract()
    }
}

/// Reads `C` from the environment under [`ChainConfig::PREFIX`].
///
/// # Errors
/// See [`ChainConfig::from_environment`].
pub fn get_config<C: ChainConfig>() -> figment::error::Result<C> {
    C::from_environment(C::PREFIX)
}
