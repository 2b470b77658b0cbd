//! Session documents exchanged with the directory.
//!
//! Only the fields this crate reads or writes are typed; everything else
//! travels as raw JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Change types a member asks to be notified about.
pub const CHANGE_TYPE_EVERYTHING: &str = "everything";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constants: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_types: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    /// A `None` member serializes as `null`, which removes that member.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub members: BTreeMap<String, Option<MemberDescription>>,
}

impl SessionDescription {
    /// The description that removes the calling member from the session.
    pub fn leave() -> Self {
        Self {
            members: BTreeMap::from([("me".to_string(), None)]),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constants: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<MemberProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<MemberPropertiesSystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPropertiesSystem {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ready: bool,
    /// RTA connection id the directory uses to deliver change notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<MemberSubscription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSubscription {
    pub id: String,
    #[serde(default)]
    pub change_types: Vec<String>,
}

/// A session document as returned by the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    #[serde(default)]
    pub contract_version: u32,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub branch: Option<Uuid>,
    #[serde(default)]
    pub change_number: u64,
    #[serde(flatten)]
    pub description: SessionDescription,
}
