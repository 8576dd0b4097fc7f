//! ActivityPub endpoints
//!
//! Mounted under `/federation`:
//! - Actor documents for users, guilds and channels
//! - Notes and Announces for messages
//! - Shared inbox
//!
//! Every response carries `application/activity+json; charset=utf-8`.

use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use http::{HeaderValue, StatusCode, header};
use serde_json::Value;

use crate::AppState;
use crate::data::ActorType;
use crate::error::AppError;
use crate::federation::{ApKind, ApNote, FederationError};
use crate::metrics::FEDERATION_OBJECTS_INGESTED;

/// Create federation router
///
/// Routes:
/// - GET /users/:id - Person
/// - GET /guilds/:id - Organization
/// - GET /channels/:id - Group
/// - GET /messages/:id - Note
/// - GET /channels/:channel_id/messages/:id - Announce
/// - POST /inbox - Shared inbox
pub fn federation_router() -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(user_actor))
        .route("/guilds/:id", get(guild_actor))
        .route("/channels/:id", get(channel_actor))
        .route("/messages/:id", get(message_note))
        .route("/channels/:channel_id/messages/:id", get(message_announce))
        .route("/inbox", post(inbox))
        .fallback(not_found)
        .layer(axum::middleware::map_response(activity_content_type))
}

const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json; charset=utf-8";

async fn activity_content_type(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ACTIVITY_CONTENT_TYPE),
    );
    response
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "message": "404 endpoint not found",
            "code": 0,
        })),
    )
}

/// GET /federation/users/:id
///
/// Local users get their identity generated on first request.
async fn user_actor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.db.get_user(&id).await?.ok_or(AppError::NotFound)?;
    let key = state.keys.get_or_create_local(&user.id, ActorType::Users).await?;
    if !key.is_local() {
        return Err(AppError::NotFound);
    }

    let person = state
        .federation
        .user_to_person(&state.federation_context, &user)
        .await?;
    Ok(Json(person))
}

/// GET /federation/guilds/:id
async fn guild_actor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let guild = state.db.get_guild(&id).await?.ok_or(AppError::NotFound)?;
    let key = state.keys.get_or_create_local(&guild.id, ActorType::Guilds).await?;
    if !key.is_local() {
        return Err(AppError::NotFound);
    }

    let organization = state
        .federation
        .guild_to_organization(&state.federation_context, &guild)
        .await?;
    Ok(Json(organization))
}

/// GET /federation/channels/:id
async fn channel_actor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let channel = state.db.get_channel(&id).await?.ok_or(AppError::NotFound)?;
    let key = state
        .keys
        .get_or_create_local(&channel.id, ActorType::Channels)
        .await?;
    if !key.is_local() {
        return Err(AppError::NotFound);
    }

    let group = state
        .federation
        .channel_to_group(&state.federation_context, &channel)
        .await?;
    Ok(Json(group))
}

/// GET /federation/messages/:id
async fn message_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.db.get_message(&id).await?.ok_or(AppError::NotFound)?;
    let note = state
        .federation
        .message_to_note(&state.federation_context, &message)
        .await?;
    Ok(Json(note))
}

/// GET /federation/channels/:channel_id/messages/:id
async fn message_announce(
    State(state): State<AppState>,
    Path((channel_id, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let message = state
        .db
        .get_message(&id)
        .await?
        .filter(|message| message.channel_id == channel_id)
        .ok_or(AppError::NotFound)?;

    let announce = state
        .federation
        .message_to_announce(&state.federation_context, &message)
        .await?;
    Ok(Json(announce))
}

/// POST /federation/inbox
///
/// Accepts a Note, or a Create activity wrapping one, and stores the
/// resulting message. Redelivering a Note answers with the message stored
/// the first time.
async fn inbox(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    // Remote servers post `application/activity+json`, which the Json
    // extractor would reject
    let activity: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid JSON body: {}", e)))?;
    let is_create = activity.get("type").and_then(Value::as_str) == Some("Create");
    let note = if is_create {
        match activity.get("object") {
            Some(object) if object.is_object() => object.clone(),
            Some(_) => {
                return Err(AppError::Validation(
                    "Create must embed its object".to_string(),
                ));
            }
            None => return Err(FederationError::MissingRequiredField("object").into()),
        }
    } else {
        activity
    };

    let message = state
        .federation
        .note_to_message(&state.federation_context, note)
        .await?;
    let (stored, inserted) = state.db.insert_message_if_absent(&message).await?;

    if inserted {
        tracing::info!(
            message_id = %stored.id,
            channel_id = %stored.channel_id,
            nonce = ?stored.nonce,
            "Stored federated message"
        );
    } else {
        FEDERATION_OBJECTS_INGESTED
            .with_label_values(&[ApNote::KIND, "redelivered"])
            .inc();
        tracing::debug!(
            message_id = %stored.id,
            nonce = ?stored.nonce,
            "Note already stored, ignoring redelivery"
        );
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": stored.id })),
    ))
}
