//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Federation identity
// =============================================================================

/// Kind of local entity that owns a federation identity.
///
/// The serialized value doubles as the URL path segment
/// (`/federation/{type}/{id}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ActorType {
    Users,
    Channels,
    Guilds,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Channels => "channels",
            Self::Guilds => "guilds",
        }
    }
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Federation identity of a user, channel or guild
///
/// Local actors carry a private key; cached remote actors never do.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FederationKey {
    /// ID of the owning local entity
    pub actor_id: String,
    pub actor_type: ActorType,
    /// Account domain for local actors, remote hostname otherwise
    pub domain: String,
    /// Preferred username of remote actors (null for local ones)
    pub username: Option<String>,
    /// Canonical actor URL
    pub federated_id: String,
    pub inbox: Option<String>,
    pub outbox: Option<String>,
    pub followers: Option<String>,
    pub following: Option<String>,
    /// RSA public key (SPKI PEM)
    pub public_key: String,
    /// RSA private key (PKCS8 PEM)
    pub private_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FederationKey {
    /// Whether this identity is owned by this instance
    pub fn is_local(&self) -> bool {
        self.private_key.is_some()
    }

    /// Inbox URL, falling back to `<federated_id>/inbox` when unset
    pub fn inbox_or_default(&self) -> String {
        match self.inbox.as_deref() {
            Some(inbox) if !inbox.is_empty() => inbox.to_string(),
            _ => format!("{}/inbox", self.federated_id),
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// A chat user, either local or a shadow of a remote Person
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Four digit tag for local users, remote hostname for shadows
    pub discriminator: String,
    pub bio: String,
    /// Avatar hash for local users, absolute icon URL for shadows
    pub avatar: Option<String>,
    pub email: Option<String>,
    pub premium: bool,
    pub premium_type: i32,
    pub verified: bool,
    /// Rights bitmask as a decimal string
    pub rights: String,
    /// Serialized user settings (JSON)
    pub settings: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Guilds
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Guild role
///
/// The `@everyone` role shares its id with the guild.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub color: i64,
    pub hoist: bool,
    pub managed: bool,
    pub mentionable: bool,
    /// Permission bitmask as a decimal string
    pub permissions: String,
    pub position: i64,
    pub flags: i64,
}

/// Guild membership
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub user_id: String,
    pub guild_id: String,
    pub joined_at: DateTime<Utc>,
}

/// Invite to a guild
///
/// Only ever produced as a projection of a federated Organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub code: String,
    pub temporary: bool,
    pub uses: i64,
    pub max_uses: i64,
    pub max_age: i64,
    pub created_at: DateTime<Utc>,
    pub flags: i64,
    pub guild_id: String,
    pub inviter_id: Option<String>,
}

// =============================================================================
// Channels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum ChannelType {
    GuildText = 0,
    Dm = 1,
    GuildVoice = 2,
    GroupDm = 3,
    GuildCategory = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: String,
    pub channel_type: ChannelType,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub guild_id: Option<String>,
    pub owner_id: Option<String>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Direct message channels (one-to-one or group)
    pub fn is_dm(&self) -> bool {
        matches!(self.channel_type, ChannelType::Dm | ChannelType::GroupDm)
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    /// Markdown content
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Client nonce; the source Note id for federated messages
    pub nonce: Option<String>,
    pub message_type: i32,
    /// Message this one replies to
    pub message_reference_id: Option<String>,
}
