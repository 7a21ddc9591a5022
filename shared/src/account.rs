use serde::{Deserialize, Serialize};

use crate::location::LocationSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Child,
    Parent,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub consent_given: Option<bool>,
    #[serde(default)]
    pub consent_at: Option<String>,
    #[serde(default)]
    pub consent_text_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: ApiUser,
}

/// A child linked to the signed-in parent, with its last known fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedChild {
    pub id: String,
    pub name: String,
    pub email: String,
    pub consent_given: bool,
    #[serde(default)]
    pub last_location: Option<LocationSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildrenResponse {
    #[serde(default)]
    pub children: Vec<LinkedChild>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
    #[serde(other)]
    Unknown,
}

/// The other party of a link, as embedded by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkParty {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<LinkParty>,
    #[serde(default)]
    pub child_id: Option<LinkParty>,
    #[serde(default = "unknown_status")]
    pub status: LinkStatus,
}

fn unknown_status() -> LinkStatus {
    LinkStatus::Unknown
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinksResponse {
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}
