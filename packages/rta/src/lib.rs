//! RTA - client for real-time activity services
//!
//! A single WebSocket carries many independent exchanges: subscribe and
//! unsubscribe handshakes correlated by sequence number, and change events
//! pushed by the server for each live subscription.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rta::{DisplayClaims, Dialer, StaticTokenSource, Token, Uuid};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rta::Error> {
//!     let src = StaticTokenSource::new(Token::new("token", DisplayClaims::default()));
//!     let conn = Dialer::default().dial(&src).await?;
//!
//!     let sub = conn
//!         .subscribe(
//!             "https://sessiondirectory.xboxlive.com/connections/",
//!             Arc::new(|resource: &str, _branch: Uuid, change_number: u64| {
//!                 println!("{resource} changed ({change_number})");
//!             }),
//!         )
//!         .await?;
//!
//!     conn.unsubscribe(&sub).await?;
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
mod conn;
mod dial;
mod error;
mod pending;
pub mod protocol;
mod subscription;
pub mod token;

pub use config::{RtaConfig, load_config};
pub use conn::Conn;
pub use dial::Dialer;
pub use error::Error;
pub use protocol::{RequestKind, ShoulderTap, Status};
pub use subscription::{NopHandler, Subscription, SubscriptionHandler};
pub use token::{DisplayClaims, StaticTokenSource, Token, TokenError, TokenSource};
pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;
