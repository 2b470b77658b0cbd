use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

pub const DEFAULT_BASE_URL: &str = "https://sessiondirectory.xboxlive.com";

/// Points at one session in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionReference {
    #[serde(rename = "scid", default)]
    pub service_config_id: Uuid,
    #[serde(rename = "templateName", default)]
    pub template_name: String,
    #[serde(default)]
    pub name: String,
}

impl SessionReference {
    pub fn new(
        service_config_id: Uuid,
        template_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            service_config_id,
            template_name: template_name.into(),
            name: name.into(),
        }
    }

    /// Path of the session document relative to the directory root.
    pub fn path(&self) -> String {
        format!(
            "/serviceconfigs/{}/sessionTemplates/{}/sessions/{}",
            self.service_config_id, self.template_name, self.name
        )
    }

    pub fn url(&self) -> String {
        format!("{DEFAULT_BASE_URL}{}", self.path())
    }

    /// The `scid~template~name` form used by change notifications.
    pub fn resource(&self) -> String {
        format!(
            "{}~{}~{}",
            self.service_config_id, self.template_name, self.name
        )
    }

    /// Session template and name compare case-insensitively in the
    /// directory.
    pub fn matches(&self, other: &SessionReference) -> bool {
        self.service_config_id == other.service_config_id
            && self.template_name.eq_ignore_ascii_case(&other.template_name)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl FromStr for SessionReference {
    type Err = Error;

    fn from_str(resource: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidResource(resource.to_string());
        let mut parts = resource.split('~');
        let (Some(scid), Some(template), Some(name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if template.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            service_config_id: scid.parse().map_err(|_| invalid())?,
            template_name: template.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for SessionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource())
    }
}
