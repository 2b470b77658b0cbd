//! Activity handles, the directory's index of sessions others can join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::Error;
use crate::reference::SessionReference;
use crate::store::SessionStore;

/// Social group covering the people a user follows.
pub const SOCIAL_GROUP_PEOPLE: &str = "people";

pub const HANDLE_TYPE_ACTIVITY: &str = "activity";

/// A published activity pointing at a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityHandle {
    #[serde(rename = "type", default)]
    pub handle_type: String,
    #[serde(rename = "sessionRef", default)]
    pub session_reference: SessionReference,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_xuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_types: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub invite_protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_info: Option<ActivityHandleRelatedInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_id: String,
}

impl ActivityHandle {
    /// The body that announces `reference` as the caller's current activity.
    pub fn new(reference: SessionReference) -> Self {
        Self {
            handle_type: HANDLE_TYPE_ACTIVITY.to_string(),
            session_reference: reference,
            version: 1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityHandleRelatedInfo {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub closed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub invite_protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub join_restriction: String,
    #[serde(default)]
    pub max_members_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub visibility: String,
}

/// Narrows an activity search to the handles visible through a social group.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub social_group: Option<String>,
    /// Whose social group to search. Defaults to the caller's own XUID.
    pub social_group_xuid: Option<String>,
}

impl ActivityFilter {
    pub fn social_group(group: impl Into<String>) -> Self {
        Self {
            social_group: Some(group.into()),
            social_group_xuid: None,
        }
    }

    /// Activities published under `service_config_id` that match the filter.
    pub async fn search(
        &self,
        store: &SessionStore,
        service_config_id: Uuid,
    ) -> Result<Vec<ActivityHandle>, Error> {
        let mut owners = Map::new();
        if let Some(group) = &self.social_group {
            let xuid = match &self.social_group_xuid {
                Some(xuid) => xuid.clone(),
                None => store.token()?.display_claims.xuid,
            };
            owners.insert(
                SOCIAL_GROUP_PEOPLE.to_string(),
                json!({"moniker": group, "monikerXuid": xuid}),
            );
        }
        let query = json!({
            "type": HANDLE_TYPE_ACTIVITY,
            "scid": service_config_id,
            "owners": owners,
        });
        store.search_handles(&query).await
    }
}
