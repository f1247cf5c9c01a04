/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secret used to verify bearer credentials (HS256).
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Allowed browser origin (`*` for any). Applied as the CORS origin and
    /// checked against the `Origin` header on WebSocket upgrades; requests
    /// without the header (non-browser clients) pass.
    pub allowed_origin: String,
    /// Interval between server-initiated pings (seconds).
    pub heartbeat_interval_secs: u64,
    /// Connections with no pong for longer than this are evicted (seconds).
    pub heartbeat_timeout_secs: u64,
    /// Interval between liveness/cleanup sweeps (seconds).
    pub sweep_interval_secs: u64,
    /// Max new connection attempts per origin within one window.
    pub conn_rate_limit: u32,
    /// Rate-limit window length (seconds).
    pub conn_rate_window_secs: u64,
    /// Max size of a single inbound frame (bytes).
    pub max_payload_bytes: usize,
    /// When false, a new connection for an already-online user evicts the
    /// previous one. When true, the old connection stays open and the user's
    /// routable connection becomes the newest (last-connected-wins).
    pub allow_multiple_sessions: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("GATEWAY_JWT_SECRET"),
            port: parsed_var("PORT", 4010),
            allowed_origin: std::env::var("GATEWAY_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "*".to_string()),
            heartbeat_interval_secs: parsed_var("HEARTBEAT_INTERVAL_SECS", 25),
            heartbeat_timeout_secs: parsed_var("HEARTBEAT_TIMEOUT_SECS", 120),
            sweep_interval_secs: parsed_var("SWEEP_INTERVAL_SECS", 60),
            conn_rate_limit: parsed_var("CONN_RATE_LIMIT", 100),
            conn_rate_window_secs: parsed_var("CONN_RATE_WINDOW_SECS", 60),
            max_payload_bytes: parsed_var("MAX_PAYLOAD_BYTES", 65536),
            allow_multiple_sessions: std::env::var("ALLOW_MULTIPLE_SESSIONS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
