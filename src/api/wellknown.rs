//! Well-known endpoints
//!
//! - /.well-known/nodeinfo
//! - /nodeinfo/2.0.json

use axum::{Router, extract::State, response::Json, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;
use crate::metrics::FEDERATION_IDENTITIES;

const NODEINFO_SCHEMA: &str = "http://nodeinfo.diaspora.software/ns/schema/2.0";

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/nodeinfo
/// - GET /nodeinfo/2.0.json
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/nodeinfo", get(nodeinfo_links))
        .route("/nodeinfo/2.0.json", get(nodeinfo))
}

/// NodeInfo 2.0 document
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: &'static str,
    pub software: NodeInfoSoftware,
    pub protocols: Vec<&'static str>,
    pub usage: NodeInfoUsage,
    pub open_registrations: bool,
}

#[derive(Debug, Serialize)]
pub struct NodeInfoSoftware {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoUsage {
    pub users: NodeInfoUsers,
    pub local_posts: i64,
    pub local_comments: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoUsers {
    pub total: i64,
    /// Not tracked
    pub active_halfyear: i64,
    /// Not tracked
    pub active_month: i64,
}

/// GET /.well-known/nodeinfo
///
/// Returns links to nodeinfo documents.
async fn nodeinfo_links(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "links": [
            {
                "rel": NODEINFO_SCHEMA,
                "href": format!("https://{}/nodeinfo/2.0.json", state.config.federation.host)
            }
        ]
    }))
}

/// GET /nodeinfo/2.0.json
///
/// Returns NodeInfo 2.0 document.
async fn nodeinfo(State(state): State<AppState>) -> Result<Json<NodeInfo>, AppError> {
    let users = state.db.count_users().await?;
    let local_posts = state.db.count_messages().await?;
    FEDERATION_IDENTITIES.set(state.db.count_federation_keys().await?);

    Ok(Json(NodeInfo {
        version: "2.0",
        software: NodeInfoSoftware {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
        protocols: vec!["activitypub"],
        usage: NodeInfoUsage {
            users: NodeInfoUsers {
                total: users,
                active_halfyear: -1,
                active_month: -1,
            },
            local_posts,
            local_comments: 0,
        },
        open_registrations: !state.config.register.disabled,
    }))
}
