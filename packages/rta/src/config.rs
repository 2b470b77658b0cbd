use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Connection tunables (figment-deserialized from defaults / rta.toml / env vars)
// =============================================================================
//
//   rta.toml:   handshake_timeout_secs = 10
//
//   env var:    RTA_HANDSHAKE_TIMEOUT_SECS=10

pub const DEFAULT_CONNECT_URL: &str = "wss://rta.xboxlive.com/connect";
pub const DEFAULT_SUBPROTOCOL: &str = "rta.xboxlive.com.V2";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtaConfig {
    #[serde(default = "default_connect_url")]
    pub connect_url: String,
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
    /// Upper bound on establishing the WebSocket, token lookup included.
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    /// How long subscribe/unsubscribe wait for a reply when the caller did
    /// not bring its own cancellation token.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for RtaConfig {
    fn default() -> Self {
        Self {
            connect_url: default_connect_url(),
            subprotocol: default_subprotocol(),
            dial_timeout_secs: default_dial_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl RtaConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn default_connect_url() -> String {
    DEFAULT_CONNECT_URL.to_string()
}

fn default_subprotocol() -> String {
    DEFAULT_SUBPROTOCOL.to_string()
}

fn default_dial_timeout_secs() -> u64 {
    15
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

/// Build a figment that layers: defaults → optional TOML file → RTA_* env vars.
///
/// Extract with `load_config(path).extract::<RtaConfig>()`.
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(RtaConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("RTA_").split("__"))
}
