use serde::{Deserialize, Serialize};

use crate::location::{LocationSample, SubjectId};

/// Frames the client emits on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Subscribe {
        #[serde(rename = "subjectId")]
        subject_id: SubjectId,
    },
}

/// Frames the push origin sends to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Push(LocationSample),
}

/// Body of the anti-forgery token endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    #[serde(rename = "csrfToken", default)]
    pub csrf_token: Option<String>,
}
