use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Built-in secrets. Only acceptable with `basic.allow_default_secrets`.
pub const DEFAULT_JWT_SECRET: &str = "change-me";
pub const DEFAULT_VAULT_KEY: &str = "12345678901234567890123456789012";

/// Process-wide configuration for the binary. Library components take their
/// sections by value so tests can build their own `Config`.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| panic!("FATAL: invalid configuration: {e}"))
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub auth: AuthConfig,
    pub vault: VaultConfig,
    pub pool: PoolConfig,
    pub oracle: OracleConfig,
    pub safety: SafetyConfig,
}

impl Config {
    /// defaults <- config.toml <- HUB_* env (`HUB_POOL__MAX_CONNECTIONS=8`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("HUB_").split("__"))
            .extract()
    }

    /// Names of secrets still set to their public built-in values.
    pub fn default_secrets(&self) -> Vec<&'static str> {
        let mut found = Vec::new();
        if self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            found.push("auth.jwt_secret");
        }
        if self.vault.key == DEFAULT_VAULT_KEY {
            found.push("vault.key");
        }
        found
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    /// Seeded on startup when both are set and the email is unknown.
    pub admin_email: Option<String>,
    pub admin_key: Option<String>,
    /// Start even when a secret is still the built-in default. Development only.
    pub allow_default_secrets: bool,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            database_url: "sqlite://nl2sql-hub.sqlite".to_string(),
            loglevel: "info".to_string(),
            admin_email: None,
            admin_key: None,
            allow_default_secrets: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// 64 hex characters, or exactly 32 raw bytes.
    pub key: String,
    /// Pass through stored passwords that do not authenticate as ciphertext.
    pub allow_legacy_plaintext: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_VAULT_KEY.to_string(),
            allow_legacy_plaintext: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub introspect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub connect_retries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 10,
            connect_timeout_secs: 15,
            introspect_timeout_secs: 30,
            idle_timeout_secs: 300,
            connect_retries: 3,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn introspect_timeout(&self) -> Duration {
        Duration::from_secs(self.introspect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Url,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    pub proxy: Option<Url>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            base_url: Url::parse(GEMINI_BASE_URL).expect("valid default gemini url"),
            timeout_secs: 60,
            requests_per_minute: 60,
            proxy: None,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Ask the oracle for a second opinion once the rule engine passes.
    pub use_oracle: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self { use_oracle: true }
    }
}
