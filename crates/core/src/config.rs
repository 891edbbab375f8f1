use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Key lookup with profile prefixing: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
struct EnvSource<'a> {
    profile: &'a str,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvSource<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.opt(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.opt(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("expected a boolean, got '{other}'"),
                }),
            },
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Clone, Serialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Shared credential required on every tool call. Never serialized or logged.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub server: ServerConfig,
    pub command: CommandConfig,
    pub docker: DockerConfig,
    pub schedule: ScheduleConfig,
    pub network: NetworkConfig,
    pub files: FilesConfig,
    pub system: SystemConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `HOSTGATE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    ///
    /// Fails when no API key is configured: the gateway never runs open.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| env::var(key).ok();
        let profile = lookup("HOSTGATE_PROFILE").unwrap_or_default();
        Self::from_lookup(&profile, &lookup)
    }

    /// Build config for a named profile from an arbitrary key lookup.
    pub fn from_lookup(
        profile: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let src = EnvSource {
            profile: &p,
            lookup,
        };
        let api_key = src.opt("HOSTGATE_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(Self {
            profile: p.clone(),
            api_key,
            server: ServerConfig::from_source(&src)?,
            command: CommandConfig::from_source(&src)?,
            docker: DockerConfig::from_source(&src)?,
            schedule: ScheduleConfig::from_source(&src)?,
            network: NetworkConfig::from_source(&src),
            files: FilesConfig::from_source(&src),
            system: SystemConfig::from_source(&src)?,
        })
    }

    /// Defaults for everything except the credential. Handy for tests and embedding.
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        let lookup = move |key: &str| (key == "HOSTGATE_API_KEY").then(|| api_key.clone());
        Self::from_lookup("", &lookup)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  command:   mode={}, timeout={}s (max {}s), cap={}B",
            self.command.mode,
            self.command.default_timeout_secs,
            self.command.max_timeout_secs,
            self.command.output_cap_bytes
        );
        tracing::info!(
            "  docker:    host={}",
            self.docker.host.as_deref().unwrap_or("(local defaults)")
        );
        tracing::info!(
            "  schedule:  crontab={}, strict={}",
            self.schedule.crontab_bin,
            self.schedule.strict
        );
        tracing::info!(
            "  network:   ip={}, iptables={}, ping={}",
            self.network.ip_bin,
            self.network.iptables_bin,
            self.network.ping_bin
        );
        tracing::info!("  files:     default_folder={}", self.files.default_folder.display());
        tracing::debug!(config = %self.redacted_summary(), "effective configuration");
    }

    /// Redacted JSON view (no secrets), logged at debug level on startup.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("profile", &self.profile)
            .field("api_key", &"<redacted>")
            .field("server", &self.server)
            .field("command", &self.command)
            .field("docker", &self.docker)
            .field("schedule", &self.schedule)
            .field("network", &self.network)
            .field("files", &self.files)
            .field("system", &self.system)
            .finish()
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_source(src: &EnvSource<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: src.or("HOST", "0.0.0.0"),
            port: src.parsed("PORT", 8080u16)?,
        })
    }
}

// ── Command execution ─────────────────────────────────────────

/// How `execute_system_command` treats its `command` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    /// Free-form shell command (high privilege).
    Open,
    /// Only named templates from the allowlist.
    Allowlist,
}

impl std::str::FromStr for CommandMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(CommandMode::Open),
            "allowlist" => Ok(CommandMode::Allowlist),
            other => Err(format!("expected 'open' or 'allowlist', got '{other}'")),
        }
    }
}

impl std::fmt::Display for CommandMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandMode::Open => f.write_str("open"),
            CommandMode::Allowlist => f.write_str("allowlist"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub output_cap_bytes: usize,
    pub mode: CommandMode,
    pub allowlist_file: Option<PathBuf>,
}

impl CommandConfig {
    fn from_source(src: &EnvSource<'_>) -> Result<Self, ConfigError> {
        let default_timeout_secs = src.parsed("COMMAND_TIMEOUT_SECS", 30u64)?;
        let max_timeout_secs = src.parsed("COMMAND_MAX_TIMEOUT_SECS", 300u64)?;
        if default_timeout_secs == 0 || max_timeout_secs < default_timeout_secs {
            return Err(ConfigError::InvalidValue {
                key: "COMMAND_TIMEOUT_SECS".to_string(),
                reason: format!(
                    "default {default_timeout_secs}s must be > 0 and <= max {max_timeout_secs}s"
                ),
            });
        }
        Ok(Self {
            default_timeout_secs,
            max_timeout_secs,
            output_cap_bytes: src.parsed("COMMAND_OUTPUT_CAP_BYTES", 1024 * 1024usize)?,
            mode: src.parsed("COMMAND_MODE", CommandMode::Open)?,
            allowlist_file: src.opt("COMMAND_ALLOWLIST_FILE").map(PathBuf::from),
        })
    }
}

// ── Docker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// `unix:///path` or `tcp://host:port`; `None` uses the client's local defaults.
    pub host: Option<String>,
    pub wait_timeout_secs: u64,
}

impl DockerConfig {
    fn from_source(src: &EnvSource<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: src.opt("DOCKER_HOST"),
            wait_timeout_secs: src.parsed("CONTAINER_WAIT_TIMEOUT_SECS", 300u64)?,
        })
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub crontab_bin: String,
    /// Reject schedules that are not valid five-field cron expressions.
    pub strict: bool,
}

impl ScheduleConfig {
    fn from_source(src: &EnvSource<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            crontab_bin: src.or("CRONTAB_BIN", "crontab"),
            strict: src.flag("CRON_STRICT")?,
        })
    }
}

// ── Network tools ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ip_bin: String,
    pub iptables_bin: String,
    pub ping_bin: String,
}

impl NetworkConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            ip_bin: src.or("IP_BIN", "ip"),
            iptables_bin: src.or("IPTABLES_BIN", "iptables"),
            ping_bin: src.or("PING_BIN", "ping"),
        }
    }
}

// ── Files ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub default_folder: PathBuf,
}

impl FilesConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            default_folder: PathBuf::from(src.or("FILES_DEFAULT_FOLDER", "/mnt/media")),
        }
    }
}

// ── System probe ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub cpu_sample_ms: u64,
}

impl SystemConfig {
    fn from_source(src: &EnvSource<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            cpu_sample_ms: src.parsed("CPU_SAMPLE_MS", 200u64)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_fails_closed() {
        let lookup = lookup_from(&[("PORT", "9000")]);
        assert!(matches!(
            Config::from_lookup("", &lookup),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn defaults_applied() {
        let config = Config::with_api_key("k").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.command.default_timeout_secs, 30);
        assert_eq!(config.command.mode, CommandMode::Open);
        assert_eq!(config.schedule.crontab_bin, "crontab");
        assert!(!config.schedule.strict);
        assert_eq!(config.files.default_folder, PathBuf::from("/mnt/media"));
        assert_eq!(config.system.cpu_sample_ms, 200);
    }

    #[test]
    fn profile_prefix_wins() {
        let lookup = lookup_from(&[
            ("HOSTGATE_API_KEY", "base"),
            ("PROD_HOSTGATE_API_KEY", "prod"),
            ("PORT", "9000"),
            ("PROD_COMMAND_MODE", "allowlist"),
        ]);
        let config = Config::from_lookup("prod", &lookup).unwrap();
        assert_eq!(config.profile_label(), "PROD");
        assert_eq!(config.api_key, "prod");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.command.mode, CommandMode::Allowlist);
    }

    #[test]
    fn invalid_values_are_reported() {
        let lookup = lookup_from(&[("HOSTGATE_API_KEY", "k"), ("PORT", "not-a-port")]);
        let err = Config::from_lookup("", &lookup).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let lookup = lookup_from(&[("HOSTGATE_API_KEY", "k"), ("CRON_STRICT", "maybe")]);
        assert!(Config::from_lookup("", &lookup).is_err());

        let lookup = lookup_from(&[
            ("HOSTGATE_API_KEY", "k"),
            ("COMMAND_TIMEOUT_SECS", "600"),
            ("COMMAND_MAX_TIMEOUT_SECS", "60"),
        ]);
        assert!(Config::from_lookup("", &lookup).is_err());
    }

    #[test]
    fn secret_never_leaks() {
        let config = Config::with_api_key("super-secret").unwrap();
        assert!(!format!("{config:?}").contains("super-secret"));
        assert!(!config.redacted_summary().to_string().contains("super-secret"));
    }

    #[test]
    fn redacted_summary_carries_settings() {
        let config = Config::with_api_key("k").unwrap();
        let summary = config.redacted_summary();
        assert_eq!(summary["server"]["port"], 8080);
        assert_eq!(summary["schedule"]["strict"], false);
        assert!(summary.get("api_key").is_none());
    }
}
