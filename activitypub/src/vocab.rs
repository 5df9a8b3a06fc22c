use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// The ActivityStreams "to everyone" audience.
pub const PUBLIC_IRI: &str = "https://www.w3.org/ns/activitystreams#Public";

const ACTIVITY_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Create,
    Announce,
    Offer,
    Accept,
    Reject,
    Follow,
    Invite,
    Undo,
    Like,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An ActivityPub activity. The `object` is kept as raw JSON; each handler
/// interprets the payload it expects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: Url,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub actor: Url,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

impl Activity {
    /// A new activity authored by `actor`, with a fresh id minted under the
    /// actor's IRI.
    pub fn new(activity_type: ActivityType, actor: &Url, object: Value, to: Vec<String>) -> Self {
        let id = actor
            .join(&format!("{}/activities/{}", actor.path(), Uuid::new_v4()))
            .unwrap_or_else(|_| actor.clone());
        Self {
            context: Some(Value::String(ACTIVITY_CONTEXT.to_string())),
            id,
            activity_type,
            actor: actor.clone(),
            to,
            object: Some(object),
            target: None,
            published: Some(Utc::now()),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }

    /// The activity embedded in this one's object (e.g. the Follow inside
    /// an Undo, or the Offer inside an Accept).
    pub fn embedded(&self) -> Option<Activity> {
        self.object
            .as_ref()
            .and_then(|o| serde_json::from_value(o.clone()).ok())
    }

    /// The object interpreted as a plain IRI.
    pub fn object_iri(&self) -> Option<Url> {
        match self.object.as_ref()? {
            Value::String(s) => s.parse().ok(),
            Value::Object(map) => map
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
            _ => None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.published.map(|p| now - p)
    }
}
