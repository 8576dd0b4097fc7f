//! Common test utilities for E2E tests

#![allow(dead_code)]

pub mod schema_validator;

use chatfed::config::{self, MIN_KEY_BITS};
use chatfed::data::{
    ActorType, Channel, ChannelType, FederationKey, Guild, Member, Message, User,
};
use chatfed::AppState;
use chrono::Utc;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const HOST: &str = "chat.test.example.com";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_log_requests(None).await
    }

    pub async fn with_log_requests(log_requests: Option<&str>) -> Self {
        chatfed::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            database: config::DatabaseConfig { path: db_path },
            federation: config::FederationConfig {
                enabled: true,
                host: HOST.to_string(),
                account_domain: "test.example.com".to_string(),
                key_bits: MIN_KEY_BITS,
            },
            cdn: config::CdnConfig {
                endpoint_public: "https://cdn.test.example.com".to_string(),
            },
            register: config::RegisterConfig {
                disabled: false,
                default_rights: "875069521787904".to_string(),
            },
            defaults: config::DefaultsConfig {
                user: config::UserDefaults {
                    premium: true,
                    premium_type: 2,
                    verified: true,
                },
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                log_requests: log_requests.map(str::to_string),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = chatfed::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Public federation URL of a local actor
    pub fn actor_url(&self, actor_type: ActorType, id: &str) -> String {
        self.state.federation_context.actor_url(actor_type, id)
    }

    /// Create a local user
    pub async fn create_user(&self, id: &str, username: &str) -> User {
        let user = User {
            id: id.to_string(),
            username: username.to_string(),
            discriminator: "0001".to_string(),
            bio: String::new(),
            avatar: None,
            email: None,
            premium: false,
            premium_type: 0,
            verified: true,
            rights: "0".to_string(),
            settings: "{}".to_string(),
            created_at: Utc::now(),
        };
        self.state.db.insert_user(&user).await.unwrap();
        user
    }

    /// Store an identity record for a local actor with placeholder key
    /// material, so tests do not pay for RSA generation
    pub async fn seed_identity(&self, actor_type: ActorType, id: &str) -> FederationKey {
        let federated_id = self.actor_url(actor_type, id);
        let key = FederationKey {
            actor_id: id.to_string(),
            actor_type,
            domain: self.state.config.federation.account_domain.clone(),
            username: None,
            inbox: Some(format!("{}/inbox", federated_id)),
            outbox: Some(format!("{}/outbox", federated_id)),
            followers: Some(format!("{}/followers", federated_id)),
            following: Some(format!("{}/following", federated_id)),
            federated_id,
            public_key: "-----BEGIN PUBLIC KEY-----\ntest\n-----END PUBLIC KEY-----\n"
                .to_string(),
            private_key: Some("test-private-key".to_string()),
            created_at: Utc::now(),
        };
        self.state
            .db
            .insert_federation_key_if_absent(&key)
            .await
            .unwrap();
        key
    }

    /// Create a guild owned by `owner_id` with a single text channel
    pub async fn create_guild_with_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
        owner_id: &str,
    ) -> (Guild, Channel) {
        let guild = Guild {
            id: guild_id.to_string(),
            name: "Test Guild".to_string(),
            icon: None,
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };
        self.state.db.insert_guild(&guild).await.unwrap();
        self.add_member(owner_id, guild_id).await;

        let channel = Channel {
            id: channel_id.to_string(),
            channel_type: ChannelType::GuildText,
            name: Some("general".to_string()),
            topic: None,
            guild_id: Some(guild_id.to_string()),
            owner_id: None,
            position: 0,
            created_at: Utc::now(),
        };
        self.state.db.insert_channel(&channel).await.unwrap();
        (guild, channel)
    }

    pub async fn add_member(&self, user_id: &str, guild_id: &str) {
        self.state
            .db
            .insert_member(&Member {
                user_id: user_id.to_string(),
                guild_id: guild_id.to_string(),
                joined_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    /// Store a message in `channel_id`
    pub async fn create_message(&self, id: &str, channel: &Channel, author_id: &str) -> Message {
        let message = Message {
            id: id.to_string(),
            channel_id: channel.id.clone(),
            guild_id: channel.guild_id.clone(),
            author_id: author_id.to_string(),
            content: "hello **world**".to_string(),
            timestamp: Utc::now(),
            nonce: None,
            message_type: 0,
            message_reference_id: None,
        };
        self.state.db.insert_message(&message, &[]).await.unwrap();
        message
    }
}

/// A remote Person document
pub fn remote_person(id: &str) -> serde_json::Value {
    serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Person",
        "id": id,
        "name": "remote",
        "preferredUsername": "remote",
        "summary": "<p>from <em>elsewhere</em></p>",
        "inbox": format!("{}/inbox", id),
        "outbox": format!("{}/outbox", id),
        "publicKey": {
            "id": format!("{}#main-key", id),
            "owner": id,
            "publicKeyPem": "-----BEGIN PUBLIC KEY-----\nremote\n-----END PUBLIC KEY-----\n"
        }
    })
}

/// A Create activity wrapping a Note whose author is embedded
pub fn create_note(note_id: &str, author: serde_json::Value, to: &str) -> serde_json::Value {
    serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Create",
        "id": format!("{}/activity", note_id),
        "actor": author["id"].clone(),
        "object": {
            "type": "Note",
            "id": note_id,
            "content": "<p>hi from <strong>afar</strong></p>",
            "published": "2025-03-04T05:06:07Z",
            "attributedTo": author,
            "to": [to]
        }
    })
}
