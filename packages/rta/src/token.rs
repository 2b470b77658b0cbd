//! Credentials used to authenticate the WebSocket upgrade.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("token unavailable: {0}")]
    Unavailable(String),

    #[error("token expired")]
    Expired,
}

/// Claims describing the user a [`Token`] was issued for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayClaims {
    #[serde(rename = "gtg", default)]
    pub gamer_tag: String,
    #[serde(rename = "xid", default)]
    pub xuid: String,
    #[serde(rename = "uhs", default)]
    pub user_hash: String,
}

/// An opaque bearer credential plus the claims it was issued with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token: String,
    pub display_claims: DisplayClaims,
}

impl Token {
    pub fn new(token: impl Into<String>, display_claims: DisplayClaims) -> Self {
        Self {
            token: token.into(),
            display_claims,
        }
    }

    /// Value of the `Authorization` header, `XBL3.0 x=<user hash>;<token>`.
    pub fn authorization(&self) -> String {
        format!("XBL3.0 x={};{}", self.display_claims.user_hash, self.token)
    }
}

/// Supplies tokens on demand. Consulted once per dial and once per HTTP
/// request by the session layer.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<Token, TokenError>;
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn token(&self) -> Result<Token, TokenError> {
        (**self).token()
    }
}

/// Hands out the same pre-acquired token every time.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(Token);

impl StaticTokenSource {
    pub fn new(token: Token) -> Self {
        Self(token)
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self) -> Result<Token, TokenError> {
        Ok(self.0.clone())
    }
}
