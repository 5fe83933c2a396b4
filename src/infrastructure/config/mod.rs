//! Layered configuration: compiled defaults, then a TOML file, then
//! `MIXER_`-prefixed environment variables.

use crate::foundation::{
    MixerError, Result, ANNOUNCE_RETRY_SECS, DEFAULT_TASK_TIMEOUT_SECS, GUEST_FEE_SATS, MAINNET_NETWORK, RECEIVED_BUFFER_CAP,
};
use crate::infrastructure::channel::channel_name;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const ENV_PREFIX: &str = "MIXER_";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MixerConfig {
    /// Network name; `bitcoin` selects the unsuffixed lobby channel.
    pub network: String,
    /// Fixed fee budgeted by the guest side on top of the announced amount.
    pub guest_fee_sats: u64,
    /// Seconds between announcement re-checks.
    pub announce_retry_secs: u64,
    /// Default task timeout when the task carries none.
    pub default_task_timeout_secs: u64,
    /// Cap on buffered candidate replies per announcing session.
    pub received_buffer_cap: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            network: MAINNET_NETWORK.to_string(),
            guest_fee_sats: GUEST_FEE_SATS,
            announce_retry_secs: ANNOUNCE_RETRY_SECS,
            default_task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            received_buffer_cap: RECEIVED_BUFFER_CAP,
        }
    }
}

impl MixerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(MixerConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: MixerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|err| MixerError::ConfigError(err.to_string()))?;
        config.validate()?;
        debug!(network = %config.network, guest_fee = config.guest_fee_sats, "mixer config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.trim().is_empty() {
            return Err(MixerError::ConfigError("network must not be empty".to_string()));
        }
        if self.announce_retry_secs == 0 {
            return Err(MixerError::ConfigError("announce_retry_secs must be positive".to_string()));
        }
        if self.default_task_timeout_secs == 0 {
            return Err(MixerError::ConfigError("default_task_timeout_secs must be positive".to_string()));
        }
        if self.received_buffer_cap == 0 {
            return Err(MixerError::ConfigError("received_buffer_cap must be positive".to_string()));
        }
        Ok(())
    }

    pub fn channel_name(&self) -> String {
        channel_name(&self.network)
    }
}
