use std::path::PathBuf;

use crate::codec::GroupDictionary;
use crate::error::{FixError, Result};

/// Tunables for a [`crate::session::Session`], per the external interface
/// contract (§6): heartbeat cadence, logon reset behavior, inbound idle
/// liveness multiplier, the directory holding persisted session state, and
/// the repeating-group dictionary (an explicit extension point beyond the
/// standard NoPartyIDs/NoOrders coverage).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval_secs: u32,
    pub reset_on_logon: bool,
    pub inbound_idle_multiplier: f64,
    pub store_dir: PathBuf,
    pub group_dictionary: GroupDictionary,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            reset_on_logon: false,
            inbound_idle_multiplier: 1.2,
            store_dir: PathBuf::from("."),
            group_dictionary: GroupDictionary::standard(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    heartbeat_interval_secs: Option<u32>,
    reset_on_logon: Option<bool>,
    inbound_idle_multiplier: Option<f64>,
    store_dir: Option<PathBuf>,
    group_dictionary: Option<GroupDictionary>,
}

impl SessionConfigBuilder {
    pub fn heartbeat_interval_secs(mut self, v: u32) -> Self {
        self.heartbeat_interval_secs = Some(v);
        self
    }

    pub fn reset_on_logon(mut self, v: bool) -> Self {
        self.reset_on_logon = Some(v);
        self
    }

    pub fn inbound_idle_multiplier(mut self, v: f64) -> Self {
        self.inbound_idle_multiplier = Some(v);
        self
    }

    pub fn store_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(v.into());
        self
    }

    pub fn group_dictionary(mut self, v: GroupDictionary) -> Self {
        self.group_dictionary = Some(v);
        self
    }

    pub fn build(self) -> Result<SessionConfig> {
        let heartbeat_interval_secs = self.heartbeat_interval_secs.unwrap_or(30);
        if heartbeat_interval_secs == 0 {
            return Err(FixError::InvalidConfig("heartbeat_interval_secs must be > 0".into()));
        }
        let inbound_idle_multiplier = self.inbound_idle_multiplier.unwrap_or(1.2);
        if inbound_idle_multiplier <= 1.0 {
            return Err(FixError::InvalidConfig("inbound_idle_multiplier must be > 1.0".into()));
        }
        Ok(SessionConfig {
            heartbeat_interval_secs,
            reset_on_logon: self.reset_on_logon.unwrap_or(false),
            inbound_idle_multiplier,
            store_dir: self.store_dir.unwrap_or_else(|| PathBuf::from(".")),
            group_dictionary: self.group_dictionary.unwrap_or_else(GroupDictionary::standard),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert!(!cfg.reset_on_logon);
        assert_eq!(cfg.inbound_idle_multiplier, 1.2);
    }

    #[test]
    fn builder_rejects_zero_heartbeat() {
        let err = SessionConfig::builder().heartbeat_interval_secs(0).build();
        assert!(err.is_err());
    }
}
