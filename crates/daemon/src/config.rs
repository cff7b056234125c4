//! Daemon configuration, resolved once at startup from `JOBHOST_*` variables.

use config::{Config, ConfigError, Environment};
use jobhost_api_rpc::server::{DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use jobhost_api_rpc::RateLimitConfig;
use jobhost_core::application::constants::DEFAULT_EVENT_BUFFER;
use jobhost_infra_system::DEFAULT_ENV_ALLOWLIST;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

const ENV_PREFIX: &str = "JOBHOST";
const DEFAULT_JOBS_DIR: &str = "~/.jobhost/jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub jobs_dir: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub event_buffer: usize,
    pub env_allowlist: Vec<String>,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// `vars` replaces the process environment (tests)
    fn load(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let rate_limit = RateLimitConfig::default();
        let env = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("env_allowlist")
            .source(vars);

        Config::builder()
            .set_default("jobs_dir", DEFAULT_JOBS_DIR)?
            .set_default("rpc_host", DEFAULT_RPC_HOST)?
            .set_default("rpc_port", DEFAULT_RPC_PORT as i64)?
            .set_default("event_buffer", DEFAULT_EVENT_BUFFER as i64)?
            .set_default("env_allowlist", DEFAULT_ENV_ALLOWLIST.to_vec())?
            .set_default("rate_limit_burst", rate_limit.burst as i64)?
            .set_default("rate_limit_rate", rate_limit.per_second as i64)?
            .set_default("log_format", "pretty")?
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn jobs_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.jobs_dir).into_owned())
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            burst: self.rate_limit_burst,
            per_second: self.rate_limit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::load(Some(HashMap::new())).unwrap();

        assert_eq!(config.rpc_host, "127.0.0.1");
        assert_eq!(config.rpc_port, 9637);
        assert_eq!(config.event_buffer, 1024);
        assert_eq!(config.env_allowlist, vec!["PATH", "HOME", "USER", "LANG"]);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.jobs_dir().starts_with("~"));
    }

    #[test]
    fn test_environment_overrides() {
        let config = DaemonConfig::load(Some(vars(&[
            ("JOBHOST_JOBS_DIR", "/srv/jobs"),
            ("JOBHOST_RPC_PORT", "0"),
            ("JOBHOST_ENV_ALLOWLIST", "PATH,TZ"),
            ("JOBHOST_RATE_LIMIT_BURST", "5"),
            ("JOBHOST_LOG_FORMAT", "json"),
        ])))
        .unwrap();

        assert_eq!(config.jobs_dir(), PathBuf::from("/srv/jobs"));
        assert_eq!(config.rpc_port, 0);
        assert_eq!(config.env_allowlist, vec!["PATH", "TZ"]);
        assert_eq!(config.rate_limit().burst, 5);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let result = DaemonConfig::load(Some(vars(&[("JOBHOST_RPC_PORT", "not-a-port")])));

        assert!(result.is_err());
    }
}
