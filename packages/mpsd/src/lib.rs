//! MPSD - multiplayer session directory client
//!
//! Publishes a session through the directory's HTTPS API and routes its
//! change notifications, delivered over an [`rta::Conn`], to a replaceable
//! [`Handler`]. Published sessions are announced as activity handles, which
//! [`ActivityFilter`] searches and [`JoinConfig`] joins.

mod activity;
mod description;
mod error;
mod handler;
mod join;
mod reference;
mod session;
mod store;

pub use activity::{
    ActivityFilter, ActivityHandle, ActivityHandleRelatedInfo, HANDLE_TYPE_ACTIVITY,
    SOCIAL_GROUP_PEOPLE,
};
pub use description::{
    CHANGE_TYPE_EVERYTHING, Commit, MemberDescription, MemberProperties, MemberPropertiesSystem,
    MemberSubscription, SessionDescription,
};
pub use error::Error;
pub use handler::{Handler, NopHandler};
pub use join::JoinConfig;
pub use reference::{DEFAULT_BASE_URL, SessionReference};
pub use session::{CONNECTIONS_RESOURCE, PublishConfig, Session};
pub use store::SessionStore;
