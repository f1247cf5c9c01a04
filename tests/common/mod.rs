//! Shared helpers for gateway integration tests.

use std::net::SocketAddr;

use jsonwebtoken::{encode, EncodingKey, Header};

use storefront_gateway::config::Config;
use storefront_gateway::Gateway;

pub const TEST_SECRET: &str = "gateway-test-secret";

pub fn test_config() -> Config {
    Config {
        jwt_secret: TEST_SECRET.to_string(),
        port: 0,
        allowed_origin: "*".to_string(),
        heartbeat_interval_secs: 25,
        heartbeat_timeout_secs: 120,
        sweep_interval_secs: 60,
        // High enough that ordinary tests never trip it.
        conn_rate_limit: 1000,
        conn_rate_window_secs: 60,
        max_payload_bytes: 65536,
        allow_multiple_sessions: false,
    }
}

/// Start a gateway on an ephemeral port. The server runs in the background.
pub async fn start_server(config: Config) -> (SocketAddr, Gateway) {
    let gateway = Gateway::new(config);
    let app = gateway.router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, gateway)
}

/// Mint a valid HS256 bearer token for a test user.
pub fn mint_token(user_id: &str) -> String {
    let claims = serde_json::json!({
        "sub": user_id,
        "exp": chrono::Utc::now().timestamp() + 300,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint token")
}
