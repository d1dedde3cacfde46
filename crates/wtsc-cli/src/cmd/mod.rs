pub mod run;
pub mod validate;

use wtsc_core::logging::error_chain;
use wtsc_core::ConfigError;

/// Log a config failure as one structured line naming the bad keys.
pub fn log_config_error(e: &ConfigError) {
    match e {
        ConfigError::Invalid { path, keys } => {
            tracing::error!(path = %path.display(), keys = ?keys, "invalid configuration");
        }
        other => tracing::error!(error = %error_chain(other), "unable to load configuration"),
    }
}
