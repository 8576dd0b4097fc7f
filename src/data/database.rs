//! SQLite database operations
//!
//! All database access goes through this module.
//! Inserts that can race between concurrent federation requests run inside
//! `BEGIN IMMEDIATE` transactions and resolve conflicts against the
//! `federation_keys.federated_id` UNIQUE constraint. Federated messages are
//! deduplicated by `(channel_id, nonce)`.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};

use super::models::*;
use crate::error::AppError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 8;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

/// A pooled connection inside `BEGIN IMMEDIATE`.
///
/// sqlx 0.7 cannot open IMMEDIATE transactions itself, so this stands in for
/// `sqlx::Transaction`. If it is dropped before `finish` (the request future
/// was cancelled), the connection is detached from the pool and closed,
/// which rolls the transaction back and releases the write lock.
struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTx {
    async fn begin(pool: &Pool<Sqlite>) -> Result<Self, AppError> {
        let mut tx = Self {
            conn: Some(pool.acquire().await?),
        };
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut **tx.conn()?)
            .await?;
        Ok(tx)
    }

    fn conn(&mut self) -> Result<&mut PoolConnection<Sqlite>, AppError> {
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transaction already finished")))
    }

    /// Commit on `Ok`, roll back on `Err`
    async fn finish<T>(mut self, result: Result<T, AppError>) -> Result<T, AppError> {
        let statement = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        let ended = sqlx::query(statement).execute(&mut **self.conn()?).await;

        if ended.is_ok() {
            // Back to the pool with no transaction open
            self.conn.take();
        }

        match (result, ended) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), _) => Err(error),
        }
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Write transaction abandoned; closing its connection");
            drop(conn.detach());
        }
    }
}

/// Insert an identity record unless its actor id or federated id is taken.
///
/// # Returns
/// `true` if the row was written.
async fn insert_key_on(
    conn: &mut PoolConnection<Sqlite>,
    key: &FederationKey,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO federation_keys (
            actor_id, actor_type, domain, username, federated_id,
            inbox, outbox, followers, following,
            public_key, private_key, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&key.actor_id)
    .bind(key.actor_type)
    .bind(&key.domain)
    .bind(&key.username)
    .bind(&key.federated_id)
    .bind(&key.inbox)
    .bind(&key.outbox)
    .bind(&key.followers)
    .bind(&key.following)
    .bind(&key.public_key)
    .bind(&key.private_key)
    .bind(key.created_at)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn insert_user_on(conn: &mut PoolConnection<Sqlite>, user: &User) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO users (
            id, username, discriminator, bio, avatar, email,
            premium, premium_type, verified, rights, settings, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.discriminator)
    .bind(&user.bio)
    .bind(&user.avatar)
    .bind(&user.email)
    .bind(user.premium)
    .bind(user.premium_type)
    .bind(user.verified)
    .bind(&user.rights)
    .bind(&user.settings)
    .bind(user.created_at)
    .execute(&mut **conn)
    .await?;

    Ok(())
}

async fn insert_channel_on(
    conn: &mut PoolConnection<Sqlite>,
    channel: &Channel,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO channels (
            id, channel_type, name, topic, guild_id, owner_id, position, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&channel.id)
    .bind(channel.channel_type)
    .bind(&channel.name)
    .bind(&channel.topic)
    .bind(&channel.guild_id)
    .bind(&channel.owner_id)
    .bind(channel.position)
    .bind(channel.created_at)
    .execute(&mut **conn)
    .await?;

    Ok(())
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Federation keys
    // =========================================================================

    /// Get the identity record owned by a local entity
    pub async fn get_federation_key(
        &self,
        actor_id: &str,
    ) -> Result<Option<FederationKey>, AppError> {
        let key = sqlx::query_as::<_, FederationKey>(
            "SELECT * FROM federation_keys WHERE actor_id = ?",
        )
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Get the identity record owned by a local entity on a given domain
    pub async fn get_federation_key_on_domain(
        &self,
        actor_id: &str,
        domain: &str,
    ) -> Result<Option<FederationKey>, AppError> {
        let key = sqlx::query_as::<_, FederationKey>(
            "SELECT * FROM federation_keys WHERE actor_id = ? AND domain = ?",
        )
        .bind(actor_id)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Get an identity record by its canonical actor URL
    pub async fn get_federation_key_by_federated_id(
        &self,
        federated_id: &str,
    ) -> Result<Option<FederationKey>, AppError> {
        let key = sqlx::query_as::<_, FederationKey>(
            "SELECT * FROM federation_keys WHERE federated_id = ?",
        )
        .bind(federated_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Get identity records for a batch of actors
    ///
    /// Actors without a record are skipped. Results follow actor id order.
    pub async fn get_federation_keys_for_actors(
        &self,
        actor_ids: &[String],
    ) -> Result<Vec<FederationKey>, AppError> {
        if actor_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM federation_keys WHERE actor_id IN (");
        let mut separated = builder.separated(", ");
        for actor_id in actor_ids {
            separated.push_bind(actor_id);
        }
        separated.push_unseparated(") ORDER BY actor_id");

        let keys = builder
            .build_query_as::<FederationKey>()
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }

    /// Insert an identity record if neither its actor id nor its federated id
    /// exists yet.
    ///
    /// # Returns
    /// `true` if inserted, `false` if a conflicting record already existed.
    pub async fn insert_federation_key_if_absent(
        &self,
        key: &FederationKey,
    ) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_key_on(&mut conn, key).await
    }

    /// Count identity records (all actor types)
    pub async fn count_federation_keys(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM federation_keys")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Remote shadows
    // =========================================================================

    /// Persist a remote Person's identity record together with its shadow user.
    ///
    /// Uses an IMMEDIATE transaction so the identity insert and the user
    /// insert are atomic.
    ///
    /// # Returns
    /// `true` if inserted, `false` if another writer already cached the same
    /// `federated_id` (nothing is written in that case).
    pub async fn insert_remote_user(
        &self,
        key: &FederationKey,
        user: &User,
    ) -> Result<bool, AppError> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let result: Result<bool, AppError> = async {
            let conn = tx.conn()?;
            if !insert_key_on(conn, key).await? {
                return Ok(false);
            }
            insert_user_on(conn, user).await?;
            Ok(true)
        }
        .await;

        tx.finish(result).await
    }

    /// Persist a remote Organization's identity record, its shadow guild and
    /// the guild's `@everyone` role atomically.
    ///
    /// # Returns
    /// `true` if inserted, `false` if the `federated_id` was already cached.
    pub async fn insert_remote_guild(
        &self,
        key: &FederationKey,
        guild: &Guild,
        everyone: &Role,
    ) -> Result<bool, AppError> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let result: Result<bool, AppError> = async {
            let conn = tx.conn()?;
            if !insert_key_on(conn, key).await? {
                return Ok(false);
            }

            sqlx::query(
                "INSERT INTO guilds (id, name, icon, owner_id, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&guild.id)
            .bind(&guild.name)
            .bind(&guild.icon)
            .bind(&guild.owner_id)
            .bind(guild.created_at)
            .execute(&mut **conn)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO roles (
                    id, guild_id, name, color, hoist, managed, mentionable,
                    permissions, position, flags
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&everyone.id)
            .bind(&everyone.guild_id)
            .bind(&everyone.name)
            .bind(everyone.color)
            .bind(everyone.hoist)
            .bind(everyone.managed)
            .bind(everyone.mentionable)
            .bind(&everyone.permissions)
            .bind(everyone.position)
            .bind(everyone.flags)
            .execute(&mut **conn)
            .await?;

            Ok(true)
        }
        .await;

        tx.finish(result).await
    }

    /// Persist a remote Group's identity record together with its shadow
    /// channel.
    ///
    /// # Returns
    /// `true` if inserted, `false` if the `federated_id` was already cached.
    pub async fn insert_remote_channel(
        &self,
        key: &FederationKey,
        channel: &Channel,
    ) -> Result<bool, AppError> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let result: Result<bool, AppError> = async {
            let conn = tx.conn()?;
            if !insert_key_on(conn, key).await? {
                return Ok(false);
            }
            insert_channel_on(conn, channel).await?;
            Ok(true)
        }
        .await;

        tx.finish(result).await
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_user_on(&mut conn, user).await
    }

    pub async fn count_users(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Guilds, roles and members
    // =========================================================================

    pub async fn get_guild(&self, id: &str) -> Result<Option<Guild>, AppError> {
        let guild = sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(guild)
    }

    pub async fn insert_guild(&self, guild: &Guild) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO guilds (id, name, icon, owner_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&guild.id)
        .bind(&guild.name)
        .bind(&guild.icon)
        .bind(&guild.owner_id)
        .bind(guild.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_role(&self, id: &str) -> Result<Option<Role>, AppError> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(role)
    }

    pub async fn get_member(
        &self,
        user_id: &str,
        guild_id: &str,
    ) -> Result<Option<Member>, AppError> {
        let member = sqlx::query_as::<_, Member>(
            "SELECT * FROM members WHERE user_id = ? AND guild_id = ?",
        )
        .bind(user_id)
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    pub async fn insert_member(&self, member: &Member) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR IGNORE INTO members (user_id, guild_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(&member.user_id)
        .bind(&member.guild_id)
        .bind(member.joined_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub async fn get_channel(&self, id: &str) -> Result<Option<Channel>, AppError> {
        let channel = sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(channel)
    }

    pub async fn insert_channel(&self, channel: &Channel) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_channel_on(&mut conn, channel).await
    }

    /// Get the user ids of every recipient of a channel
    pub async fn get_channel_recipient_ids(
        &self,
        channel_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM channel_recipients WHERE channel_id = ? ORDER BY user_id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Find the DM channel whose recipients are exactly `recipient_ids`,
    /// creating it when none exists.
    ///
    /// Two recipients produce a `Dm` channel, more produce a `GroupDm`.
    /// Uses an IMMEDIATE transaction so concurrent callers for the same
    /// recipient set end up in the same channel.
    pub async fn find_or_create_dm_channel(
        &self,
        recipient_ids: &[String],
        owner_id: &str,
    ) -> Result<Channel, AppError> {
        let recipients: BTreeSet<&str> = recipient_ids.iter().map(String::as_str).collect();
        if recipients.is_empty() {
            return Err(AppError::Validation(
                "DM channel needs at least one recipient".to_string(),
            ));
        }

        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let result: Result<Channel, AppError> = async {
            let conn = tx.conn()?;
            let mut builder = QueryBuilder::<Sqlite>::new(
                r#"
                SELECT c.* FROM channels c
                WHERE c.channel_type IN (1, 3)
                AND (SELECT COUNT(*) FROM channel_recipients r WHERE r.channel_id = c.id) =
                "#,
            );
            builder.push_bind(recipients.len() as i64);
            builder.push(
                " AND (SELECT COUNT(*) FROM channel_recipients r WHERE r.channel_id = c.id AND r.user_id IN (",
            );
            let mut separated = builder.separated(", ");
            for recipient in &recipients {
                separated.push_bind(*recipient);
            }
            separated.push_unseparated(")) = ");
            builder.push_bind(recipients.len() as i64);
            builder.push(" LIMIT 1");

            if let Some(existing) = builder
                .build_query_as::<Channel>()
                .fetch_optional(&mut **conn)
                .await?
            {
                return Ok(existing);
            }

            let channel = Channel {
                id: EntityId::new().0,
                channel_type: if recipients.len() > 2 {
                    ChannelType::GroupDm
                } else {
                    ChannelType::Dm
                },
                name: None,
                topic: None,
                guild_id: None,
                owner_id: Some(owner_id.to_string()),
                position: 0,
                created_at: chrono::Utc::now(),
            };
            insert_channel_on(conn, &channel).await?;

            for recipient in &recipients {
                sqlx::query("INSERT INTO channel_recipients (channel_id, user_id) VALUES (?, ?)")
                    .bind(&channel.id)
                    .bind(*recipient)
                    .execute(&mut **conn)
                    .await?;
            }

            tracing::debug!(
                channel_id = %channel.id,
                recipients = recipients.len(),
                "Created DM channel"
            );
            Ok(channel)
        }
        .await;

        tx.finish(result).await
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    /// Insert a message and its mentioned user ids
    pub async fn insert_message(
        &self,
        message: &Message,
        mention_ids: &[String],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, channel_id, guild_id, author_id, content, timestamp,
                nonce, message_type, message_reference_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.channel_id)
        .bind(&message.guild_id)
        .bind(&message.author_id)
        .bind(&message.content)
        .bind(message.timestamp)
        .bind(&message.nonce)
        .bind(message.message_type)
        .bind(&message.message_reference_id)
        .execute(&mut *tx)
        .await?;

        for user_id in mention_ids {
            sqlx::query("INSERT OR IGNORE INTO message_mentions (message_id, user_id) VALUES (?, ?)")
                .bind(&message.id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get a message by the nonce it was stored with in a channel
    pub async fn get_message_by_nonce(
        &self,
        channel_id: &str,
        nonce: &str,
    ) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE channel_id = ? AND nonce = ?",
        )
        .bind(channel_id)
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Insert a message unless its channel already holds one with the same
    /// nonce.
    ///
    /// # Returns
    /// The stored message and whether it was written now. On a repeated nonce
    /// the earlier message is returned.
    pub async fn insert_message_if_absent(
        &self,
        message: &Message,
    ) -> Result<(Message, bool), AppError> {
        let Some(nonce) = message.nonce.as_deref() else {
            self.insert_message(message, &[]).await?;
            return Ok((message.clone(), true));
        };

        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                id, channel_id, guild_id, author_id, content, timestamp,
                nonce, message_type, message_reference_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (channel_id, nonce) DO NOTHING
            "#,
        )
        .bind(&message.id)
        .bind(&message.channel_id)
        .bind(&message.guild_id)
        .bind(&message.author_id)
        .bind(&message.content)
        .bind(message.timestamp)
        .bind(nonce)
        .bind(message.message_type)
        .bind(&message.message_reference_id)
        .execute(&self.pool)
        .await?;
        let inserted = result.rows_affected() == 1;

        let stored = self
            .get_message_by_nonce(&message.channel_id, nonce)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok((stored, inserted))
    }

    /// Get the ids of users mentioned by a message
    pub async fn get_message_mention_ids(&self, message_id: &str) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM message_mentions WHERE message_id = ? ORDER BY user_id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    pub async fn count_messages(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
