//! Database tests

use super::*;
use chrono::Utc;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn test_user(id: &str) -> User {
    User {
        id: id.to_string(),
        username: format!("user{}", id),
        discriminator: "0001".to_string(),
        bio: String::new(),
        avatar: None,
        email: None,
        premium: false,
        premium_type: 0,
        verified: false,
        rights: "0".to_string(),
        settings: "{}".to_string(),
        created_at: Utc::now(),
    }
}

fn test_key(actor_id: &str, federated_id: &str) -> FederationKey {
    FederationKey {
        actor_id: actor_id.to_string(),
        actor_type: ActorType::Users,
        domain: "remote.example".to_string(),
        username: Some("bob".to_string()),
        federated_id: federated_id.to_string(),
        inbox: None,
        outbox: None,
        followers: None,
        following: None,
        public_key: "PEM".to_string(),
        private_key: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (db, _temp_dir) = create_test_db().await;
    assert_eq!(db.count_users().await.unwrap(), 0);
    assert_eq!(db.count_federation_keys().await.unwrap(), 0);
}

#[tokio::test]
async fn test_federation_key_conflicts_are_ignored() {
    let (db, _temp_dir) = create_test_db().await;
    let url = "https://remote.example/users/bob";

    assert!(db.insert_federation_key_if_absent(&test_key("a", url)).await.unwrap());
    // same federated_id under another actor id
    assert!(!db.insert_federation_key_if_absent(&test_key("b", url)).await.unwrap());
    // same actor id under another federated_id
    assert!(
        !db.insert_federation_key_if_absent(&test_key("a", "https://remote.example/users/eve"))
            .await
            .unwrap()
    );

    let key = db.get_federation_key_by_federated_id(url).await.unwrap().unwrap();
    assert_eq!(key.actor_id, "a");
    assert_eq!(key.actor_type, ActorType::Users);
    assert_eq!(key.inbox_or_default(), "https://remote.example/users/bob/inbox");
    assert!(!key.is_local());
    assert!(db.get_federation_key("b").await.unwrap().is_none());
    assert!(
        db.get_federation_key_on_domain("a", "example.com")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_federation_keys_for_actors() {
    let (db, _temp_dir) = create_test_db().await;
    db.insert_federation_key_if_absent(&test_key("b", "https://r/b"))
        .await
        .unwrap();
    db.insert_federation_key_if_absent(&test_key("a", "https://r/a"))
        .await
        .unwrap();

    let keys = db
        .get_federation_keys_for_actors(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .unwrap();
    let ids: Vec<&str> = keys.iter().map(|k| k.actor_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert!(db.get_federation_keys_for_actors(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_user_insert_is_atomic() {
    let (db, _temp_dir) = create_test_db().await;
    let url = "https://remote.example/users/bob";

    assert!(db.insert_remote_user(&test_key("a", url), &test_user("a")).await.unwrap());
    assert!(!db.insert_remote_user(&test_key("b", url), &test_user("b")).await.unwrap());

    assert!(db.get_user("a").await.unwrap().is_some());
    assert!(db.get_user("b").await.unwrap().is_none());
    assert_eq!(db.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_remote_guild_insert_creates_role() {
    let (db, _temp_dir) = create_test_db().await;
    db.insert_user(&test_user("owner")).await.unwrap();

    let mut key = test_key("g", "https://remote.example/guilds/1");
    key.actor_type = ActorType::Guilds;
    let guild = Guild {
        id: "g".to_string(),
        name: "Guild".to_string(),
        icon: None,
        owner_id: "owner".to_string(),
        created_at: Utc::now(),
    };
    let role = Role {
        id: "g".to_string(),
        guild_id: "g".to_string(),
        name: "@everyone".to_string(),
        color: 0,
        hoist: false,
        managed: false,
        mentionable: false,
        permissions: "2251804225".to_string(),
        position: 0,
        flags: 0,
    };

    assert!(db.insert_remote_guild(&key, &guild, &role).await.unwrap());
    assert_eq!(db.get_guild("g").await.unwrap().unwrap().owner_id, "owner");
    assert_eq!(db.get_role("g").await.unwrap().unwrap().permissions, "2251804225");
}

#[tokio::test]
async fn test_failed_remote_insert_rolls_back() {
    let (db, _temp_dir) = create_test_db().await;

    let key = test_key("g", "https://remote.example/guilds/1");
    let guild = Guild {
        id: "g".to_string(),
        name: "Orphan".to_string(),
        icon: None,
        owner_id: "nobody".to_string(),
        created_at: Utc::now(),
    };
    let role = Role {
        id: "g".to_string(),
        guild_id: "g".to_string(),
        name: "@everyone".to_string(),
        color: 0,
        hoist: false,
        managed: false,
        mentionable: false,
        permissions: "0".to_string(),
        position: 0,
        flags: 0,
    };

    // owner_id violates the users foreign key
    assert!(db.insert_remote_guild(&key, &guild, &role).await.is_err());
    assert_eq!(db.count_federation_keys().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dm_channel_is_reused_for_same_recipients() {
    let (db, _temp_dir) = create_test_db().await;
    for id in ["1", "2", "3"] {
        db.insert_user(&test_user(id)).await.unwrap();
    }

    let pair = ["1".to_string(), "2".to_string()];
    let first = db.find_or_create_dm_channel(&pair, "1").await.unwrap();
    let reversed = ["2".to_string(), "1".to_string()];
    let second = db.find_or_create_dm_channel(&reversed, "2").await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.channel_type, ChannelType::Dm);
    assert!(first.is_dm());

    let trio = ["1".to_string(), "2".to_string(), "3".to_string()];
    let group = db.find_or_create_dm_channel(&trio, "1").await.unwrap();
    assert_ne!(group.id, first.id);
    assert_eq!(group.channel_type, ChannelType::GroupDm);
    assert_eq!(
        db.get_channel_recipient_ids(&group.id).await.unwrap(),
        vec!["1", "2", "3"]
    );

    assert!(db.find_or_create_dm_channel(&[], "1").await.is_err());
}

#[tokio::test]
async fn test_message_with_mentions() {
    let (db, _temp_dir) = create_test_db().await;
    db.insert_user(&test_user("1")).await.unwrap();
    let channel = db
        .find_or_create_dm_channel(&["1".to_string()], "1")
        .await
        .unwrap();

    let message = Message {
        id: EntityId::new().0,
        channel_id: channel.id.clone(),
        guild_id: None,
        author_id: "1".to_string(),
        content: "hi".to_string(),
        timestamp: Utc::now(),
        nonce: Some("https://remote.example/notes/1".to_string()),
        message_type: 0,
        message_reference_id: None,
    };
    db.insert_message(&message, &["2".to_string(), "3".to_string()])
        .await
        .unwrap();

    let stored = db.get_message(&message.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "hi");
    assert_eq!(stored.nonce, message.nonce);
    assert_eq!(
        db.get_message_mention_ids(&message.id).await.unwrap(),
        vec!["2", "3"]
    );
    assert_eq!(db.count_messages().await.unwrap(), 1);
}

#[tokio::test]
async fn test_redelivered_message_is_stored_once() {
    let (db, _temp_dir) = create_test_db().await;
    db.insert_user(&test_user("1")).await.unwrap();
    db.insert_user(&test_user("2")).await.unwrap();
    let channel = db
        .find_or_create_dm_channel(&["1".to_string(), "2".to_string()], "1")
        .await
        .unwrap();

    let delivery = |content: &str| Message {
        id: EntityId::new().0,
        channel_id: channel.id.clone(),
        guild_id: None,
        author_id: "2".to_string(),
        content: content.to_string(),
        timestamp: Utc::now(),
        nonce: Some("https://remote.example/notes/7".to_string()),
        message_type: 0,
        message_reference_id: None,
    };

    let first = delivery("first");
    let (stored, inserted) = db.insert_message_if_absent(&first).await.unwrap();
    assert!(inserted);
    assert_eq!(stored.id, first.id);

    let (again, inserted) = db.insert_message_if_absent(&delivery("second")).await.unwrap();
    assert!(!inserted);
    assert_eq!(again.id, first.id);
    assert_eq!(again.content, "first");
    assert_eq!(db.count_messages().await.unwrap(), 1);

    // Messages without a nonce are never deduplicated
    let mut local = delivery("local");
    local.nonce = None;
    db.insert_message_if_absent(&local).await.unwrap();
    local.id = EntityId::new().0;
    db.insert_message_if_absent(&local).await.unwrap();
    assert_eq!(db.count_messages().await.unwrap(), 3);
}
