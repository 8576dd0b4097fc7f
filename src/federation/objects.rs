//! ActivityPub wire objects
//!
//! Typed records for the vocabulary this server speaks: Person (user),
//! Organization (guild), Group (channel), Note (message) and Announce
//! (message distribution). Inbound JSON goes through [`decode`] or
//! [`ApObject::from_value`], which check `type` and the required fields
//! before serde sees the payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::FederationError;

pub const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// `@context` for actor documents
pub fn actor_context() -> Value {
    serde_json::json!([ACTIVITYSTREAMS_CONTEXT, SECURITY_CONTEXT])
}

/// `@context` for plain objects and activities
pub fn object_context() -> Value {
    Value::String(ACTIVITYSTREAMS_CONTEXT.to_string())
}

macro_rules! object_kind {
    ($name:ident, $term:ident) => {
        #[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
        pub enum $name {
            #[default]
            $term,
        }
    };
}

object_kind!(PersonType, Person);
object_kind!(OrganizationType, Organization);
object_kind!(GroupType, Group);
object_kind!(NoteType, Note);
object_kind!(AnnounceType, Announce);

/// A single value or a list of values
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn first(&self) -> Option<&T> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.first(),
        }
    }
}

/// Reference to another object: either its URL or the embedded object
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ApReference {
    Link(String),
    Object(Box<Value>),
}

impl ApReference {
    /// URL of the referenced object, if known without resolving it
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Link(url) => Some(url),
            Self::Object(object) => object.get("id").and_then(Value::as_str),
        }
    }
}

/// `Image` object used for icons
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApImage {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Icons arrive as a bare URL, an Image object or a list of either
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ApIcon {
    Link(String),
    Image(ApImage),
    List(Vec<ApIcon>),
}

impl ApIcon {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Link(url) => Some(url),
            Self::Image(image) => Some(&image.url),
            Self::List(icons) => icons.iter().find_map(ApIcon::url),
        }
    }
}

/// `publicKey` block of an actor
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApPublicKey {
    pub id: String,
    pub owner: String,
    pub public_key_pem: String,
}

/// Person actor (user)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApPerson {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type")]
    pub kind: PersonType,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<ApIcon>,
    pub inbox: String,
    pub outbox: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    pub public_key: ApPublicKey,
}

/// Organization actor (guild)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApOrganization {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type")]
    pub kind: OrganizationType,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<ApIcon>,
    /// Owner's Person URL
    pub attributed_to: String,
    pub inbox: String,
    pub outbox: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    pub public_key: ApPublicKey,
}

/// Group actor (channel)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApGroup {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Channel topic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<ApIcon>,
    /// Organization the channel belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributed_to: Option<String>,
    pub inbox: String,
    pub outbox: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    pub public_key: ApPublicKey,
}

/// `inReplyTo` of a Note: nested when rendered locally, often a bare URL remotely
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ApReply {
    Note(Box<ApNote>),
    Link(String),
}

/// Note object (message)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApNote {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type")]
    pub kind: NoteType,
    pub id: String,
    /// HTML content
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<ApReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    pub attributed_to: OneOrMany<ApReference>,
    pub to: OneOrMany<String>,
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub attachment: Vec<Value>,
}

/// Announce activity wrapping a Note for distribution
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApAnnounce {
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type")]
    pub kind: AnnounceType,
    pub id: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    pub to: Vec<String>,
    pub object: ApNote,
}

/// Vocabulary term and required fields of a wire object
pub trait ApKind: DeserializeOwned {
    const KIND: &'static str;
    const REQUIRED: &'static [&'static str];
}

impl ApKind for ApPerson {
    const KIND: &'static str = "Person";
    const REQUIRED: &'static [&'static str] = &["id", "inbox", "outbox", "publicKey"];
}

impl ApKind for ApOrganization {
    const KIND: &'static str = "Organization";
    const REQUIRED: &'static [&'static str] =
        &["id", "publicKey", "attributedTo", "inbox", "outbox"];
}

impl ApKind for ApGroup {
    const KIND: &'static str = "Group";
    const REQUIRED: &'static [&'static str] = &["id", "publicKey", "inbox", "outbox"];
}

impl ApKind for ApNote {
    const KIND: &'static str = "Note";
    const REQUIRED: &'static [&'static str] = &["id", "attributedTo", "to"];
}

impl ApKind for ApAnnounce {
    const KIND: &'static str = "Announce";
    const REQUIRED: &'static [&'static str] = &["id", "actor", "object"];
}

fn object_type(value: &Value) -> Result<&str, FederationError> {
    if !value.is_object() {
        return Err(FederationError::ResolutionFailure(
            "expected a JSON object".to_string(),
        ));
    }

    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FederationError::MissingRequiredField("type"))
}

/// Validate and decode a wire object of a known type
///
/// Checks, in order: `type` matches, required fields are present and
/// non-null, then deserializes the typed record.
pub fn decode<T: ApKind>(value: Value) -> Result<T, FederationError> {
    let kind = object_type(&value)?;
    if kind != T::KIND {
        return Err(FederationError::type_mismatch(T::KIND, kind));
    }

    for field in T::REQUIRED {
        if value.get(*field).map_or(true, Value::is_null) {
            return Err(FederationError::MissingRequiredField(field));
        }
    }

    serde_json::from_value(value).map_err(|e| {
        FederationError::ResolutionFailure(format!("malformed {} object: {}", T::KIND, e))
    })
}

/// Any object the resolver can hand back
#[derive(Clone, Debug, PartialEq)]
pub enum ApObject {
    Person(ApPerson),
    Organization(ApOrganization),
    Group(ApGroup),
    Note(ApNote),
    Announce(ApAnnounce),
}

impl ApObject {
    /// Decode a JSON document by dispatching on its `type`
    pub fn from_value(value: Value) -> Result<Self, FederationError> {
        let kind = object_type(&value)?.to_string();
        match kind.as_str() {
            ApPerson::KIND => decode(value).map(Self::Person),
            ApOrganization::KIND => decode(value).map(Self::Organization),
            ApGroup::KIND => decode(value).map(Self::Group),
            ApNote::KIND => decode(value).map(Self::Note),
            ApAnnounce::KIND => decode(value).map(Self::Announce),
            _ => Err(FederationError::type_mismatch(
                "Person, Organization, Group, Note or Announce",
                kind,
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Person(_) => ApPerson::KIND,
            Self::Organization(_) => ApOrganization::KIND,
            Self::Group(_) => ApGroup::KIND,
            Self::Note(_) => ApNote::KIND,
            Self::Announce(_) => ApAnnounce::KIND,
        }
    }

    pub fn into_person(self) -> Result<ApPerson, FederationError> {
        match self {
            Self::Person(person) => Ok(person),
            other => Err(FederationError::type_mismatch(ApPerson::KIND, other.kind())),
        }
    }
}
