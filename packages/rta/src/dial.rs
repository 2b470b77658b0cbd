use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tracing::info;

use crate::config::RtaConfig;
use crate::conn::Conn;
use crate::error::Error;
use crate::token::TokenSource;

/// Establishes [`Conn`]s with the real-time activity service.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    pub config: RtaConfig,
}

impl Dialer {
    pub fn new(config: RtaConfig) -> Self {
        Self { config }
    }

    /// Dial, giving up after the configured dial timeout.
    pub async fn dial(&self, src: &dyn TokenSource) -> Result<Conn, Error> {
        let timeout = self.config.dial_timeout();
        tokio::time::timeout(timeout, self.dial_inner(src))
            .await
            .map_err(|_| Error::DialTimeout(timeout))?
    }

    async fn dial_inner(&self, src: &dyn TokenSource) -> Result<Conn, Error> {
        let token = src.token()?;

        let mut request = self
            .config
            .connect_url
            .as_str()
            .into_client_request()
            .map_err(Error::Dial)?;
        let headers = request.headers_mut();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(&self.config.subprotocol)?,
        );
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&token.authorization())?);

        // The handshake itself fails unless the server echoes the subprotocol.
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(Error::from_dial)?;

        info!(url = %self.config.connect_url, "rta connection established");
        Ok(Conn::from_stream(ws, &self.config))
    }
}
