use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read once at startup from `FLEETBOOK_*` variables.
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub max_in_flight: usize,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub session_secret: Option<String>,
    pub session_ttl: Duration,
    pub admin: Option<Credentials>,
    pub demo_user: Option<Credentials>,
    pub seed_demo: bool,
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str| text(key).and_then(|v| v.parse::<u64>().ok());
        let credentials = |email: &str, password: &str| match (text(email), text(password)) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        };

        Self {
            bind: text("FLEETBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: text("FLEETBOOK_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            data_dir: PathBuf::from(text("FLEETBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: text("FLEETBOOK_METRICS_PORT").and_then(|v| v.parse().ok()),
            max_in_flight: number("FLEETBOOK_MAX_IN_FLIGHT")
                .map(|n| n.max(1) as usize)
                .unwrap_or(256),
            compact_threshold: number("FLEETBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            compact_interval: Duration::from_secs(
                number("FLEETBOOK_COMPACT_INTERVAL_SECS").unwrap_or(30).max(1),
            ),
            session_secret: text("FLEETBOOK_SESSION_SECRET"),
            session_ttl: Duration::from_secs(
                number("FLEETBOOK_SESSION_TTL_SECS").unwrap_or(86_400),
            ),
            admin: credentials("FLEETBOOK_ADMIN_EMAIL", "FLEETBOOK_ADMIN_PASSWORD"),
            demo_user: credentials("FLEETBOOK_DEMO_USER_EMAIL", "FLEETBOOK_DEMO_USER_PASSWORD"),
            seed_demo: text("FLEETBOOK_SEED_DEMO")
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetbook.wal")
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
