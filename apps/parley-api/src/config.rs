/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// How many messages a history load returns by default.
    pub history_limit: usize,
    /// Maximum accepted message length, in characters.
    pub max_message_len: usize,
}

impl Config {
    /// Load configuration from environment variables. Every variable has a
    /// default, so an empty environment works out of the box.
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 4010),
            history_limit: env_or("HISTORY_LIMIT", 50),
            max_message_len: env_or("MAX_MESSAGE_LEN", 5000),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
