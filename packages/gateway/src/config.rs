//! Gateway configuration, populated from environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Errors raised while reading configuration at start-up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Mode / OriginPolicy
// ---------------------------------------------------------------------------

/// Run mode. Several protections relax outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        self == Mode::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(format!("expected development or production, got {other:?}")),
        }
    }
}

/// What the origin gate does with a disallowed `Origin`/`Referer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Log the mismatch and let the request through.
    Audit,
    /// Reject the request with 403.
    Enforce,
}

impl FromStr for OriginPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audit" => Ok(OriginPolicy::Audit),
            "enforce" => Ok(OriginPolicy::Enforce),
            other => Err(format!("expected audit or enforce, got {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Window length and request cap for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub window: Duration,
    /// `0` disables the limiter for this class.
    pub max: u32,
}

impl WindowLimit {
    pub const fn new(window_secs: u64, max: u32) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max,
        }
    }
}

/// Per-class limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub general: WindowLimit,
    pub proxy: WindowLimit,
    pub auth: WindowLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: WindowLimit::new(15 * 60, 100),
            proxy: WindowLimit::new(5 * 60, 50),
            auth: WindowLimit::new(60 * 60, 5),
        }
    }
}

/// Where the blocklist is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlocklistBackend {
    /// JSON array of addresses in a flat file.
    File(PathBuf),
    /// Single-table SQLite database.
    Sqlite(PathBuf),
    /// Not persisted. Used by tests.
    Memory,
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for the gateway.
///
/// Read once at process start; there is no hot reload.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `EDGEWARD_BIND` | `0.0.0.0:8080` | TCP socket address to listen on |
/// | `EDGEWARD_MODE` | `development` | `development` or `production` |
/// | `EDGEWARD_UPSTREAM_URL` | (required) | Base URL of the external API |
/// | `EDGEWARD_UPSTREAM_TOKEN` | (required) | Secret sent as `Authorization: ApiKey <token>` |
/// | `EDGEWARD_UPSTREAM_TIMEOUT_SECS` | `5` | Upstream request timeout |
/// | `EDGEWARD_API_KEY` | (absent) | Shared secret for admin routes |
/// | `EDGEWARD_ALLOWED_ORIGINS` | (empty) | Comma-separated origin allow-list |
/// | `EDGEWARD_ORIGIN_POLICY` | `audit` | `audit` or `enforce` |
/// | `EDGEWARD_REQUIRE_ORIGIN` | `false` | Under `enforce`, reject mutations lacking Origin/Referer |
/// | `EDGEWARD_TRUST_PROXY` | `false` | Read client address from `X-Forwarded-For` / `X-Real-IP` |
/// | `EDGEWARD_BLOCKING` | `true` | Escalate repeat offenders to the blocklist |
/// | `EDGEWARD_BLOCKLIST_PATH` | `./data/blocked_ips.json` | Flat-file blocklist store |
/// | `EDGEWARD_BLOCKLIST_DB` | (absent) | SQLite blocklist store; overrides the flat file |
/// | `EDGEWARD_GENERAL_WINDOW_SECS` / `_MAX` | `900` / `100` | General limiter |
/// | `EDGEWARD_PROXY_WINDOW_SECS` / `_MAX` | `300` / `50` | Proxy limiter |
/// | `EDGEWARD_AUTH_WINDOW_SECS` / `_MAX` | `3600` / `5` | Auth limiter |
/// | `EDGEWARD_CACHE_TTL_SECS` | `300` | Response cache TTL |
#[derive(Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub mode: Mode,

    /// Base URL of the external API, without a trailing slash.
    pub upstream_url: String,
    /// Secret attached to every upstream call. Never logged.
    pub upstream_token: String,
    pub upstream_timeout: Duration,

    /// Shared secret for API-key-gated routes. Never logged.
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub origin_policy: OriginPolicy,
    pub require_origin: bool,

    pub trust_proxy: bool,
    pub blocking_enabled: bool,
    pub blocklist: BlocklistBackend,

    pub rate_limits: RateLimitConfig,
    pub cache_ttl: Duration,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("mode", &self.mode)
            .field("upstream_url", &self.upstream_url)
            .field("upstream_token", &"<redacted>")
            .field("upstream_timeout", &self.upstream_timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("allowed_origins", &self.allowed_origins)
            .field("origin_policy", &self.origin_policy)
            .field("require_origin", &self.require_origin)
            .field("trust_proxy", &self.trust_proxy)
            .field("blocking_enabled", &self.blocking_enabled)
            .field("blocklist", &self.blocklist)
            .field("rate_limits", &self.rate_limits)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl GatewayConfig {
    /// A development-mode config pointing at `upstream_url`, with an
    /// in-memory blocklist and default limits.
    pub fn new(upstream_url: impl Into<String>, upstream_token: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            mode: Mode::Development,
            upstream_url: upstream_url.into().trim_end_matches('/').to_string(),
            upstream_token: upstream_token.into(),
            upstream_timeout: Duration::from_secs(5),
            api_key: None,
            allowed_origins: Vec::new(),
            origin_policy: OriginPolicy::Audit,
            require_origin: false,
            trust_proxy: false,
            blocking_enabled: true,
            blocklist: BlocklistBackend::Memory,
            rate_limits: RateLimitConfig::default(),
            cache_ttl: Duration::from_secs(300),
        }
    }

    /// Populate config from environment variables, applying defaults where absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through `get`.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upstream_url = get("EDGEWARD_UPSTREAM_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("EDGEWARD_UPSTREAM_URL"))?;
        if !(upstream_url.starts_with("http://") || upstream_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "EDGEWARD_UPSTREAM_URL",
                reason: "must start with http:// or https://".into(),
            });
        }
        let upstream_token = get("EDGEWARD_UPSTREAM_TOKEN")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("EDGEWARD_UPSTREAM_TOKEN"))?;
        if !upstream_token.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ConfigError::Invalid {
                var: "EDGEWARD_UPSTREAM_TOKEN",
                reason: "must be printable ASCII without whitespace".into(),
            });
        }

        let mut config = Self::new(upstream_url, upstream_token);

        config.bind_addr = parsed(&get, "EDGEWARD_BIND")?.unwrap_or(config.bind_addr);
        config.mode = parsed(&get, "EDGEWARD_MODE")?.unwrap_or(config.mode);
        config.upstream_timeout = parsed::<u64, _>(&get, "EDGEWARD_UPSTREAM_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(config.upstream_timeout);

        config.api_key = get("EDGEWARD_API_KEY").filter(|v| !v.is_empty());
        config.allowed_origins = get("EDGEWARD_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        config.origin_policy =
            parsed(&get, "EDGEWARD_ORIGIN_POLICY")?.unwrap_or(config.origin_policy);
        config.require_origin = flag(&get, "EDGEWARD_REQUIRE_ORIGIN")?.unwrap_or(false);

        config.trust_proxy = flag(&get, "EDGEWARD_TRUST_PROXY")?.unwrap_or(false);
        config.blocking_enabled = flag(&get, "EDGEWARD_BLOCKING")?.unwrap_or(true);
        config.blocklist = match get("EDGEWARD_BLOCKLIST_DB").filter(|v| !v.is_empty()) {
            Some(db) => BlocklistBackend::Sqlite(PathBuf::from(db)),
            None => BlocklistBackend::File(PathBuf::from(
                get("EDGEWARD_BLOCKLIST_PATH").unwrap_or_else(|| "./data/blocked_ips.json".into()),
            )),
        };

        let defaults = RateLimitConfig::default();
        config.rate_limits = RateLimitConfig {
            general: window(&get, "EDGEWARD_GENERAL", defaults.general)?,
            proxy: window(&get, "EDGEWARD_PROXY", defaults.proxy)?,
            auth: window(&get, "EDGEWARD_AUTH", defaults.auth)?,
        };
        config.cache_ttl = parsed::<u64, _>(&get, "EDGEWARD_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(config.cache_ttl);

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parsed<T, F>(get: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
    }
}

fn flag<F>(get: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a boolean, got {v:?}"),
            }),
        },
    }
}

fn window<F>(
    get: &F,
    prefix: &'static str,
    default: WindowLimit,
) -> Result<WindowLimit, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // The variable names are built at runtime, so errors report the prefix.
    let secs = match get(&format!("{prefix}_WINDOW_SECS")) {
        None => default.window,
        Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|e| {
            ConfigError::Invalid {
                var: prefix,
                reason: format!("window seconds: {e}"),
            }
        })?),
    };
    let max = match get(&format!("{prefix}_MAX")) {
        None => default.max,
        Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
            var: prefix,
            reason: format!("max requests: {e}"),
        })?,
    };
    if secs.is_zero() {
        return Err(ConfigError::Invalid {
            var: prefix,
            reason: "window must be at least one second".into(),
        });
    }
    Ok(WindowLimit { window: secs, max })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("EDGEWARD_UPSTREAM_URL", "https://api.example.com/v2/"),
        ("EDGEWARD_UPSTREAM_TOKEN", "s3cret"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_set() {
        let config = GatewayConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.upstream_url, "https://api.example.com/v2");
        assert_eq!(config.mode, Mode::Development);
        assert_eq!(config.origin_policy, OriginPolicy::Audit);
        assert_eq!(config.rate_limits, RateLimitConfig::default());
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(config.blocking_enabled);
        assert_eq!(
            config.blocklist,
            BlocklistBackend::File(PathBuf::from("./data/blocked_ips.json"))
        );
    }

    #[test]
    fn missing_upstream_is_an_error() {
        let err = GatewayConfig::from_lookup(lookup(&[("EDGEWARD_UPSTREAM_TOKEN", "x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("EDGEWARD_UPSTREAM_URL")));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("EDGEWARD_MODE", "production"),
            ("EDGEWARD_ORIGIN_POLICY", "enforce"),
            ("EDGEWARD_ALLOWED_ORIGINS", "https://shop.example.com/, https://admin.example.com"),
            ("EDGEWARD_AUTH_WINDOW_SECS", "60"),
            ("EDGEWARD_AUTH_MAX", "3"),
            ("EDGEWARD_BLOCKLIST_DB", "/var/lib/edgeward/blocklist.db"),
            ("EDGEWARD_TRUST_PROXY", "yes"),
        ]);
        let config = GatewayConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(config.mode.is_production());
        assert_eq!(config.origin_policy, OriginPolicy::Enforce);
        assert_eq!(
            config.allowed_origins,
            vec!["https://shop.example.com", "https://admin.example.com"]
        );
        assert_eq!(config.rate_limits.auth, WindowLimit::new(60, 3));
        assert_eq!(
            config.blocklist,
            BlocklistBackend::Sqlite(PathBuf::from("/var/lib/edgeward/blocklist.db"))
        );
        assert!(config.trust_proxy);
    }

    #[test]
    fn token_with_whitespace_or_control_chars_is_rejected() {
        for token in ["s3cret\n", " s3cret", "s3 cret", "s3cr\u{e9}t"] {
            let vars = [REQUIRED[0], ("EDGEWARD_UPSTREAM_TOKEN", token)];
            let err = GatewayConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: "EDGEWARD_UPSTREAM_TOKEN", .. }),
                "{token:?} should be rejected"
            );
        }
    }

    #[test]
    fn bad_mode_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("EDGEWARD_MODE", "staging"));
        let err = GatewayConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "EDGEWARD_MODE", .. }));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = GatewayConfig::new("http://upstream", "tok-123");
        config.api_key = Some("key-456".into());
        let printed = format!("{config:?}");
        assert!(!printed.contains("tok-123"));
        assert!(!printed.contains("key-456"));
    }
}
