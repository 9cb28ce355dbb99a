use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Host configuration, layered as defaults < JSON file < `EXTHOST_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Forces debug mode on or off. Unset means "debug on localhost".
    pub debug: Option<bool>,
    /// How long a click keeps `open`/`close` unlocked.
    pub user_interaction_window_ms: u64,
    /// Delay before the background page fires `runtime.onInstalled`.
    pub install_settle_delay_ms: u64,
    /// Globals forwarded lazily from the page into every sandbox.
    pub lazy_globals: Vec<String>,
    /// Version tag of the prebuilt artifacts to look for.
    pub prebuilt_version: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            debug: None,
            user_interaction_window_ms: 3000,
            install_settle_delay_ms: 2000,
            lazy_globals: vec!["webkit".to_string()],
            prebuilt_version: exthost_transform::PREBUILT_VERSION,
        }
    }
}

impl HostConfig {
    pub const ENV_PREFIX: &'static str = "EXTHOST_";

    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(HostConfig::default()));
        let figment = match file {
            Some(file) => figment.merge(Json::file(file)),
            None => figment,
        };
        figment.merge(Env::prefixed(Self::ENV_PREFIX))
    }

    /// Loads the configuration, reading `file` when given.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(file).extract()?)
    }

    /// Whether a page on `hostname` runs in debug mode.
    pub fn is_debug(&self, hostname: Option<&str>) -> bool {
        self.debug.unwrap_or(hostname == Some("localhost"))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_browser_heuristics() {
        let config = HostConfig::default();

        assert_eq!(config.user_interaction_window_ms, 3000);
        assert_eq!(config.install_settle_delay_ms, 2000);
        assert_eq!(config.lazy_globals, vec!["webkit".to_string()]);
        assert!(config.is_debug(Some("localhost")));
        assert!(!config.is_debug(Some("example.com")));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "debug": false, "install_settle_delay_ms": 10 }}"#).unwrap();

        let config = HostConfig::figment(Some(file.path())).extract::<HostConfig>().unwrap();

        assert_eq!(config.install_settle_delay_ms, 10);
        assert_eq!(config.user_interaction_window_ms, 3000);
        assert!(!config.is_debug(Some("localhost")));
    }
}
