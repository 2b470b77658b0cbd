//! Error types for the RTA connection and its handshakes.

use std::time::Duration;

use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::{ProtocolError as WsProtocolError, SubProtocolError};

use crate::protocol::{ProtocolError, RequestKind, Status};
use crate::token::TokenError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rta service is unavailable")]
    Unavailable,

    #[error("dial rta: {0}")]
    Dial(#[source] tungstenite::Error),

    #[error("dial rta: timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("request token: {0}")]
    Token(#[from] TokenError),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] tungstenite::http::header::InvalidHeaderValue),

    #[error("server did not negotiate the rta subprotocol: {0}")]
    SubprotocolNotNegotiated(SubProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("write frame: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("{kind} rejected: {status}{}", message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    Rejected {
        kind: RequestKind,
        status: Status,
        message: Option<String>,
    },

    #[error("subscription {0} is not active on this connection")]
    NotSubscribed(u32),

    #[error("request cancelled")]
    Cancelled,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl Error {
    /// Classify a dial failure. Refused and reset connections mean the
    /// service is unreachable rather than misbehaving.
    pub fn from_dial(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable
            }
            tungstenite::Error::Protocol(WsProtocolError::SecWebSocketSubProtocolError(e)) => {
                Self::SubprotocolNotNegotiated(e)
            }
            err => Self::Dial(err),
        }
    }

    /// The server answered the handshake with a non-success status.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::NotSubscribed(_))
    }

    /// The connection itself failed; every outstanding request sees this.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::Dial(_)
                | Self::DialTimeout(_)
                | Self::ConnectionClosed
                | Self::Send(_)
                | Self::SubprotocolNotNegotiated(_)
        )
    }

    /// The caller gave up before a reply arrived.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout(_))
    }
}
