//! Conversion between local entities and ActivityPub objects
//!
//! Local → wire transforms read the identity record of the entity they
//! render. Wire → local transforms are idempotent by `federated_id`: a
//! remote actor seen twice maps to the same shadow entity, and a writer that
//! loses an insert race reuses the winner's record.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::FederationError;
use super::keys::{ActorKeyStore, RemoteActor, host_of};
use super::markup::{html_to_markdown, markdown_to_html};
use super::objects::*;
use super::resolver::{ObjectResolver, resolve_reference};
use crate::config::{FederationContext, UserDefaults};
use crate::data::{
    ActorType, Channel, ChannelType, Database, FederationKey, Guild, Invite, Message, Role, User,
};
use crate::error::AppError;
use crate::metrics::{FEDERATION_OBJECTS_INGESTED, FEDERATION_OBJECTS_RENDERED};

/// Longest reply chain rendered into nested `inReplyTo` objects
pub const MAX_REPLY_DEPTH: usize = 32;

/// Permissions of the `@everyone` role created for federated guilds
const EVERYONE_PERMISSIONS: &str = "2251804225";

/// Bidirectional mapping between local entities and ActivityPub objects
pub struct Federation {
    db: Arc<Database>,
    keys: Arc<ActorKeyStore>,
    resolver: Arc<dyn ObjectResolver>,
    user_defaults: UserDefaults,
    default_rights: String,
}

impl Federation {
    pub fn new(
        db: Arc<Database>,
        keys: Arc<ActorKeyStore>,
        resolver: Arc<dyn ObjectResolver>,
        user_defaults: UserDefaults,
        default_rights: String,
    ) -> Self {
        Self {
            db,
            keys,
            resolver,
            user_defaults,
            default_rights,
        }
    }

    pub fn keys(&self) -> &ActorKeyStore {
        &self.keys
    }

    // =========================================================================
    // Local → wire
    // =========================================================================

    /// Render a user as a Person actor
    ///
    /// # Errors
    /// `IdentityNotFound` if the user has no identity record
    pub async fn user_to_person(
        &self,
        ctx: &FederationContext,
        user: &User,
    ) -> Result<ApPerson, AppError> {
        let key = self
            .keys
            .find_by_actor(&user.id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(user.id.clone()))?;

        let actor_url = ctx.actor_url(ActorType::Users, &user.id);
        let icon = user.avatar.as_deref().map(|avatar| {
            let url = if avatar.starts_with("http") {
                avatar.to_string()
            } else {
                ctx.cdn_url(&format!("avatars/{}/{}", user.id, avatar))
            };
            ApIcon::List(vec![ApIcon::Link(url)])
        });

        FEDERATION_OBJECTS_RENDERED
            .with_label_values(&[ApPerson::KIND])
            .inc();

        Ok(ApPerson {
            context: Some(actor_context()),
            kind: PersonType::Person,
            name: Some(user.username.clone()),
            preferred_username: Some(user.id.clone()),
            summary: Some(user.bio.clone()),
            icon,
            inbox: key.inbox_or_default(),
            outbox: key
                .outbox
                .clone()
                .unwrap_or_else(|| format!("{}/outbox", key.federated_id)),
            followers: key.followers.clone(),
            following: key.following.clone(),
            public_key: ApPublicKey {
                id: format!("{}#main-key", actor_url),
                owner: actor_url,
                public_key_pem: key.public_key.clone(),
            },
            id: key.federated_id,
        })
    }

    /// Render a local guild as an Organization actor
    pub async fn guild_to_organization(
        &self,
        ctx: &FederationContext,
        guild: &Guild,
    ) -> Result<ApOrganization, AppError> {
        let key = self.keys.require_local(&guild.id).await?;
        let id = ctx.actor_url(ActorType::Guilds, &guild.id);

        FEDERATION_OBJECTS_RENDERED
            .with_label_values(&[ApOrganization::KIND])
            .inc();

        Ok(ApOrganization {
            context: Some(actor_context()),
            kind: OrganizationType::Organization,
            name: guild.name.clone(),
            preferred_username: Some(guild.id.clone()),
            icon: guild
                .icon
                .as_deref()
                .map(|icon| ApIcon::Link(ctx.cdn_url(&format!("icons/{}", icon)))),
            attributed_to: ctx.actor_url(ActorType::Users, &guild.owner_id),
            inbox: format!("{}/inbox", id),
            outbox: format!("{}/outbox", id),
            followers: Some(format!("{}/followers", id)),
            following: Some(format!("{}/following", id)),
            public_key: ApPublicKey {
                id: format!("{}#main-key", id),
                owner: id.clone(),
                public_key_pem: key.public_key,
            },
            id,
        })
    }

    /// Render a local channel as a Group actor
    pub async fn channel_to_group(
        &self,
        ctx: &FederationContext,
        channel: &Channel,
    ) -> Result<ApGroup, AppError> {
        let key = self.keys.require_local(&channel.id).await?;
        let id = ctx.actor_url(ActorType::Channels, &channel.id);

        FEDERATION_OBJECTS_RENDERED
            .with_label_values(&[ApGroup::KIND])
            .inc();

        Ok(ApGroup {
            context: Some(object_context()),
            kind: GroupType::Group,
            name: channel.name.clone(),
            preferred_username: Some(channel.id.clone()),
            summary: channel.topic.clone(),
            icon: None,
            attributed_to: channel
                .guild_id
                .as_deref()
                .map(|guild_id| ctx.actor_url(ActorType::Guilds, guild_id)),
            inbox: format!("{}/inbox", id),
            outbox: format!("{}/outbox", id),
            followers: Some(format!("{}/followers", id)),
            following: None,
            public_key: ApPublicKey {
                id: format!("{}#main-key", id),
                owner: id.clone(),
                public_key_pem: key.public_key,
            },
            id,
        })
    }

    /// Render a message as a Note, nesting the messages it replies to
    ///
    /// The reply chain stops at a missing message, at a message already
    /// seen in this chain, or after [`MAX_REPLY_DEPTH`] levels.
    pub async fn message_to_note(
        &self,
        ctx: &FederationContext,
        message: &Message,
    ) -> Result<ApNote, AppError> {
        let mut chain = vec![message.clone()];
        let mut seen = HashSet::from([message.id.clone()]);

        while chain.len() <= MAX_REPLY_DEPTH {
            let Some(reference_id) = chain
                .last()
                .and_then(|current| current.message_reference_id.clone())
            else {
                break;
            };
            if !seen.insert(reference_id.clone()) {
                tracing::debug!(message_id = %message.id, %reference_id, "Reply chain loops");
                break;
            }
            match self.db.get_message(&reference_id).await? {
                Some(referenced) => chain.push(referenced),
                None => break,
            }
        }

        let mut note: Option<ApNote> = None;
        for current in chain.iter().rev() {
            let mut rendered = self.render_note(ctx, current).await?;
            rendered.in_reply_to = note.take().map(|reply| ApReply::Note(Box::new(reply)));
            note = Some(rendered);
        }

        FEDERATION_OBJECTS_RENDERED
            .with_label_values(&[ApNote::KIND])
            .inc();

        let mut note =
            note.ok_or_else(|| FederationError::IdentityNotFound(message.id.clone()))?;
        note.context = Some(object_context());
        Ok(note)
    }

    async fn render_note(
        &self,
        ctx: &FederationContext,
        message: &Message,
    ) -> Result<ApNote, AppError> {
        let mention_ids = self.db.get_message_mention_ids(&message.id).await?;
        let mut actor_ids = mention_ids.clone();
        actor_ids.push(message.author_id.clone());
        let urls = self.actor_urls(ctx, &actor_ids).await?;

        let actor_url = |id: &String| {
            urls.get(id)
                .cloned()
                .unwrap_or_else(|| ctx.actor_url(ActorType::Users, id))
        };

        Ok(ApNote {
            context: None,
            kind: NoteType::Note,
            id: format!("{}/messages/{}", ctx.federation_url(), message.id),
            content: markdown_to_html(&message.content),
            in_reply_to: None,
            published: Some(message.timestamp),
            attributed_to: OneOrMany::One(ApReference::Link(actor_url(&message.author_id))),
            to: OneOrMany::One(format!(
                "{}/followers",
                ctx.actor_url(ActorType::Channels, &message.channel_id)
            )),
            tag: mention_ids.iter().map(actor_url).collect(),
            attachment: Vec::new(),
        })
    }

    /// Canonical URLs of the given users, keyed by user id
    ///
    /// Users with an identity record (including remote shadows) use its
    /// `federated_id`.
    async fn actor_urls(
        &self,
        ctx: &FederationContext,
        user_ids: &[String],
    ) -> Result<HashMap<String, String>, AppError> {
        let keys = self.db.get_federation_keys_for_actors(user_ids).await?;
        let mut urls: HashMap<String, String> = keys
            .into_iter()
            .map(|key| (key.actor_id, key.federated_id))
            .collect();
        for id in user_ids {
            urls.entry(id.clone())
                .or_insert_with(|| ctx.actor_url(ActorType::Users, id));
        }
        Ok(urls)
    }

    /// Wrap a message in an Announce addressed to its audience
    ///
    /// DM messages go to the inbox of every recipient except the author.
    /// Guild channel messages are addressed to the public collection.
    pub async fn message_to_announce(
        &self,
        ctx: &FederationContext,
        message: &Message,
    ) -> Result<ApAnnounce, AppError> {
        let channel = self
            .db
            .get_channel(&message.channel_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let to = if channel.is_dm() {
            let others: Vec<String> = self
                .db
                .get_channel_recipient_ids(&channel.id)
                .await?
                .into_iter()
                .filter(|id| *id != message.author_id)
                .collect();
            self.db
                .get_federation_keys_for_actors(&others)
                .await?
                .iter()
                .map(FederationKey::inbox_or_default)
                .collect()
        } else {
            // Channel followers are not tracked yet; guild messages stay public.
            vec![PUBLIC_COLLECTION.to_string()]
        };

        let mut object = self.message_to_note(ctx, message).await?;
        object.context = None;

        FEDERATION_OBJECTS_RENDERED
            .with_label_values(&[ApAnnounce::KIND])
            .inc();

        Ok(ApAnnounce {
            context: Some(object_context()),
            kind: AnnounceType::Announce,
            id: format!(
                "{}/messages/{}",
                ctx.actor_url(ActorType::Channels, &message.channel_id),
                message.id
            ),
            actor: ctx.actor_url(ActorType::Users, &message.author_id),
            published: Some(message.timestamp),
            to,
            object,
        })
    }

    // =========================================================================
    // Wire → local
    // =========================================================================

    /// Remote actor URLs on our own host must already have an identity record
    fn reject_unknown_local(ctx: &FederationContext, federated_id: &str) -> Result<(), AppError> {
        if host_of(federated_id)? == ctx.host {
            return Err(FederationError::IdentityNotFound(federated_id.to_string()).into());
        }
        Ok(())
    }

    /// Map a Person to a user, creating its shadow on first sight
    pub async fn person_to_user(
        &self,
        ctx: &FederationContext,
        person: &ApPerson,
    ) -> Result<User, AppError> {
        if let Some(key) = self.keys.find_by_federated_id(&person.id).await? {
            tracing::trace!(federated_id = %person.id, "Person already known");
            FEDERATION_OBJECTS_INGESTED
                .with_label_values(&[ApPerson::KIND, "cached"])
                .inc();
            return self.user_for_key(&key).await;
        }
        Self::reject_unknown_local(ctx, &person.id)?;

        let key = self.keys.remote_record(
            &person.id,
            RemoteActor {
                actor_type: ActorType::Users,
                username: person.name.clone().or_else(|| person.preferred_username.clone()),
                public_key_pem: person.public_key.public_key_pem.clone(),
                inbox: Some(person.inbox.clone()),
                outbox: Some(person.outbox.clone()),
                followers: person.followers.clone(),
                following: person.following.clone(),
            },
        )?;

        let last_segment = last_path_segment(&person.id);
        let user = User {
            id: key.actor_id.clone(),
            username: person
                .name
                .clone()
                .or_else(|| person.preferred_username.clone())
                .unwrap_or_else(|| last_segment.to_string()),
            discriminator: key.domain.clone(),
            bio: person
                .summary
                .as_deref()
                .map(html_to_markdown)
                .unwrap_or_default(),
            avatar: person.icon.as_ref().and_then(ApIcon::url).map(str::to_string),
            email: Some(format!("{}@{}", last_segment, key.domain)),
            premium: self.user_defaults.premium,
            premium_type: self.user_defaults.premium_type,
            verified: self.user_defaults.verified,
            rights: self.default_rights.clone(),
            settings: "{}".to_string(),
            created_at: Utc::now(),
        };

        if self.db.insert_remote_user(&key, &user).await? {
            tracing::info!(federated_id = %person.id, user_id = %user.id, "Created shadow user");
            FEDERATION_OBJECTS_INGESTED
                .with_label_values(&[ApPerson::KIND, "created"])
                .inc();
            return Ok(user);
        }

        tracing::debug!(federated_id = %person.id, "Lost shadow user race, reusing winner");
        FEDERATION_OBJECTS_INGESTED
            .with_label_values(&[ApPerson::KIND, "race_lost"])
            .inc();
        let winner = self
            .keys
            .find_by_federated_id(&person.id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(person.id.clone()))?;
        self.user_for_key(&winner).await
    }

    async fn user_for_key(&self, key: &FederationKey) -> Result<User, AppError> {
        self.db
            .get_user(&key.actor_id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(key.federated_id.clone()).into())
    }

    /// Resolve a Person by URL and map it to a user
    pub async fn fetch_federated_user(
        &self,
        ctx: &FederationContext,
        url: &str,
    ) -> Result<(ApPerson, User), AppError> {
        let person = self.resolver.resolve(url).await?.into_person()?;
        let user = self.person_to_user(ctx, &person).await?;
        Ok((person, user))
    }

    /// Map an inbound Note to an unsaved message
    ///
    /// A `to` URL naming a user addresses the DM channel between that user
    /// and the author, created on demand. Any other `to` names a guild
    /// channel by its last path segment; the author must be a member of
    /// the guild.
    pub async fn note_to_message(
        &self,
        ctx: &FederationContext,
        value: Value,
    ) -> Result<Message, AppError> {
        let note: ApNote = decode(value)?;

        let author_ref = note
            .attributed_to
            .first()
            .ok_or(FederationError::MissingRequiredField("attributedTo"))?;
        let author = resolve_reference(self.resolver.as_ref(), author_ref)
            .await?
            .into_person()?;
        let author = self.person_to_user(ctx, &author).await?;

        let to = note
            .to
            .first()
            .ok_or(FederationError::MissingRequiredField("to"))?;
        let to_id = last_path_segment(to.trim_end_matches('/').trim_end_matches("/followers"));
        let to_path = url::Url::parse(to)
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| to.clone());

        let (channel, guild_id) = if to_path.contains("user") {
            let recipient = self.db.get_user(to_id).await?.ok_or(AppError::NotFound)?;
            let recipients = [recipient.id.clone(), author.id.clone()];
            let channel = self
                .db
                .find_or_create_dm_channel(&recipients, &recipient.id)
                .await?;
            (channel, None)
        } else {
            let channel = self.db.get_channel(to_id).await?.ok_or(AppError::NotFound)?;
            match channel.guild_id.clone() {
                Some(guild_id) => {
                    self.db
                        .get_member(&author.id, &guild_id)
                        .await?
                        .ok_or(AppError::NotFound)?;
                    (channel, Some(guild_id))
                }
                None => {
                    let recipients = self.db.get_channel_recipient_ids(&channel.id).await?;
                    if !recipients.contains(&author.id) {
                        return Err(AppError::NotFound);
                    }
                    (channel, None)
                }
            }
        };

        FEDERATION_OBJECTS_INGESTED
            .with_label_values(&[ApNote::KIND, "created"])
            .inc();

        Ok(Message {
            id: crate::data::EntityId::new().0,
            channel_id: channel.id,
            guild_id,
            author_id: author.id,
            content: html_to_markdown(&note.content),
            timestamp: note.published.unwrap_or_else(Utc::now),
            nonce: Some(note.id),
            message_type: 0,
            message_reference_id: None,
        })
    }

    /// Map an Organization to a guild, creating the shadow guild and its
    /// `@everyone` role on first sight
    pub async fn organization_to_guild(
        &self,
        ctx: &FederationContext,
        org: &ApOrganization,
    ) -> Result<Guild, AppError> {
        if let Some(key) = self.keys.find_by_federated_id(&org.id).await? {
            FEDERATION_OBJECTS_INGESTED
                .with_label_values(&[ApOrganization::KIND, "cached"])
                .inc();
            return self.guild_for_key(&key).await;
        }
        Self::reject_unknown_local(ctx, &org.id)?;

        let (_, owner) = self.fetch_federated_user(ctx, &org.attributed_to).await?;

        let key = self.keys.remote_record(
            &org.id,
            RemoteActor {
                actor_type: ActorType::Guilds,
                username: Some(org.name.clone()),
                public_key_pem: org.public_key.public_key_pem.clone(),
                inbox: Some(org.inbox.clone()),
                outbox: Some(org.outbox.clone()),
                followers: org.followers.clone(),
                following: org.following.clone(),
            },
        )?;

        let guild = Guild {
            id: key.actor_id.clone(),
            name: org.name.clone(),
            icon: org.icon.as_ref().and_then(ApIcon::url).map(str::to_string),
            owner_id: owner.id,
            created_at: Utc::now(),
        };
        let everyone = Role {
            id: guild.id.clone(),
            guild_id: guild.id.clone(),
            name: "@everyone".to_string(),
            color: 0,
            hoist: false,
            managed: false,
            mentionable: false,
            permissions: EVERYONE_PERMISSIONS.to_string(),
            position: 0,
            flags: 0,
        };

        if self.db.insert_remote_guild(&key, &guild, &everyone).await? {
            tracing::info!(federated_id = %org.id, guild_id = %guild.id, "Created shadow guild");
            FEDERATION_OBJECTS_INGESTED
                .with_label_values(&[ApOrganization::KIND, "created"])
                .inc();
            return Ok(guild);
        }

        tracing::debug!(federated_id = %org.id, "Lost shadow guild race, reusing winner");
        FEDERATION_OBJECTS_INGESTED
            .with_label_values(&[ApOrganization::KIND, "race_lost"])
            .inc();
        let winner = self
            .keys
            .find_by_federated_id(&org.id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(org.id.clone()))?;
        self.guild_for_key(&winner).await
    }

    async fn guild_for_key(&self, key: &FederationKey) -> Result<Guild, AppError> {
        self.db
            .get_guild(&key.actor_id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(key.federated_id.clone()).into())
    }

    /// Project an invite for the guild behind an Organization
    pub async fn organization_to_invite(
        &self,
        ctx: &FederationContext,
        code: &str,
        org: &ApOrganization,
    ) -> Result<Invite, AppError> {
        let guild = self.organization_to_guild(ctx, org).await?;

        Ok(Invite {
            code: code.to_string(),
            temporary: false,
            uses: -1,
            max_uses: 0,
            max_age: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            flags: 0,
            guild_id: guild.id,
            inviter_id: Some(guild.owner_id),
        })
    }

    /// Map a Group to a text channel of `guild_id`
    pub async fn group_to_channel(
        &self,
        ctx: &FederationContext,
        group: &ApGroup,
        guild_id: &str,
    ) -> Result<Channel, AppError> {
        if let Some(key) = self.keys.find_by_federated_id(&group.id).await? {
            FEDERATION_OBJECTS_INGESTED
                .with_label_values(&[ApGroup::KIND, "cached"])
                .inc();
            return self.channel_for_key(&key).await;
        }
        Self::reject_unknown_local(ctx, &group.id)?;

        self.db.get_guild(guild_id).await?.ok_or(AppError::NotFound)?;

        let key = self.keys.remote_record(
            &group.id,
            RemoteActor {
                actor_type: ActorType::Channels,
                username: group.name.clone(),
                public_key_pem: group.public_key.public_key_pem.clone(),
                inbox: Some(group.inbox.clone()),
                outbox: Some(group.outbox.clone()),
                followers: group.followers.clone(),
                following: group.following.clone(),
            },
        )?;

        let channel = Channel {
            id: key.actor_id.clone(),
            channel_type: ChannelType::GuildText,
            name: group.name.clone(),
            topic: group.summary.clone(),
            guild_id: Some(guild_id.to_string()),
            owner_id: None,
            position: 0,
            created_at: Utc::now(),
        };

        if self.db.insert_remote_channel(&key, &channel).await? {
            tracing::info!(federated_id = %group.id, channel_id = %channel.id, "Created shadow channel");
            FEDERATION_OBJECTS_INGESTED
                .with_label_values(&[ApGroup::KIND, "created"])
                .inc();
            return Ok(channel);
        }

        FEDERATION_OBJECTS_INGESTED
            .with_label_values(&[ApGroup::KIND, "race_lost"])
            .inc();
        let winner = self
            .keys
            .find_by_federated_id(&group.id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(group.id.clone()))?;
        self.channel_for_key(&winner).await
    }

    async fn channel_for_key(&self, key: &FederationKey) -> Result<Channel, AppError> {
        self.db
            .get_channel(&key.actor_id)
            .await?
            .ok_or_else(|| FederationError::IdentityNotFound(key.federated_id.clone()).into())
    }
}

/// Last non-empty path segment of a URL (`.../users/42/` → `42`)
fn last_path_segment(url: &str) -> &str {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
}
