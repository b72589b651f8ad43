use crate::orchestrator::{OrchestratorSettings, PollPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_PREFIX: &str = "SCANFLOW";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// `http` or `mock`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub mock: MockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_mock_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_true")]
    pub flag_executables: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub capacity: Option<usize>,
}

fn default_provider() -> String {
    "http".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_mock_latency_ms() -> u64 {
    1_500
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    1_500
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            mock: MockConfig::default(),
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_mock_latency_ms(),
            flag_executables: true,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            deadline_ms: None,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let poll = &self.orchestrator.poll;
        OrchestratorSettings {
            poll: PollPolicy {
                max_attempts: poll.max_attempts.max(1),
                interval: Duration::from_millis(poll.interval_ms),
                deadline: poll.deadline_ms.map(Duration::from_millis),
            },
            max_in_flight: self.orchestrator.max_in_flight,
            registry_capacity: self.registry.capacity,
        }
    }
}

/// Loads configuration from `path` (or `config/default` if present) and
/// `SCANFLOW__SECTION__KEY` environment variables, in that order.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_single_shot_and_unbounded() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.backend.provider, "http");
        assert_eq!(cfg.backend.timeout(), Duration::from_secs(30));
        let settings = cfg.orchestrator_settings();
        assert_eq!(settings.poll.max_attempts, 1);
        assert_eq!(settings.poll.deadline, None);
        assert_eq!(settings.max_in_flight, None);
        assert_eq!(settings.registry_capacity, None);
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[backend]
provider = "mock"
timeout_ms = 250

[backend.mock]
latency_ms = 10

[orchestrator]
max_in_flight = 4

[orchestrator.poll]
max_attempts = 5
interval_ms = 20
deadline_ms = 1000

[registry]
capacity = 50
"#
        )
        .unwrap();

        let cfg = load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(cfg.backend.provider, "mock");
        assert_eq!(cfg.backend.base_url, "http://localhost:8000");
        assert_eq!(cfg.backend.mock.latency_ms, 10);
        assert!(cfg.backend.mock.flag_executables);

        let settings = cfg.orchestrator_settings();
        assert_eq!(settings.max_in_flight, Some(4));
        assert_eq!(settings.registry_capacity, Some(50));
        assert_eq!(
            settings.poll,
            PollPolicy {
                max_attempts: 5,
                interval: Duration::from_millis(20),
                deadline: Some(Duration::from_secs(1)),
            }
        );
    }

    #[test]
    fn zero_attempts_still_resolves_once() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.poll.max_attempts = 0;
        assert_eq!(cfg.orchestrator_settings().poll.max_attempts, 1);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load(Some("/definitely/not/here/scanflow.toml")).is_err());
    }
}
