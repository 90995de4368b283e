use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::client::config::Config;

/// The endpoint authenticates with a `key` query parameter rather than a
/// header.
pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    format!(
        "{}?key={}",
        config.base_url(),
        config.api_key().expose_secret()
    )
    .into_client_request()
}
