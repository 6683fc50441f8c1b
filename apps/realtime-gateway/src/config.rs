/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// HMAC secret used to verify realtime capability tokens.
    pub token_secret: String,
}

/// Development fallback secret. Never rely on it outside local setups.
const INSECURE_DEV_SECRET: &str = "insecure-access-secret";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `REALTIME_TOKEN_SECRET` takes precedence over `ACCESS_TOKEN_SECRET`;
    /// if neither is set, a well-known development secret is used and a
    /// warning is logged.
    pub fn from_env() -> Self {
        let token_secret = std::env::var("REALTIME_TOKEN_SECRET")
            .or_else(|_| std::env::var("ACCESS_TOKEN_SECRET"))
            .unwrap_or_else(|_| {
                tracing::warn!("no token secret configured, using the insecure dev secret");
                INSECURE_DEV_SECRET.to_string()
            });

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4001),
            token_secret,
        }
    }
}
