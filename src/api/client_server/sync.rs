// =============================================================================
// Matrixon Matrix NextServer - Sync Route
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use std::str::FromStr;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use ruma::OwnedUserId;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    api::{AppState, AuthenticatedUser},
    config::SyncConfig,
    service::sync::{StreamPosition, SyncRequest, SyncResponse},
    Error, Result,
};

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    pub since: Option<String>,
    /// Milliseconds
    pub timeout: Option<u64>,
    pub limit: Option<usize>,
}

/// # `GET /_matrix/client/r0/sync`
///
/// Synchronize the client's state with the latest state on the server.
///
/// - Without `since` (or with `since=0`) the whole state of every joined room is returned
/// - Otherwise only what happened after `since`, waiting up to `timeout` for
///   something to happen
///
/// The wait runs on its own task. If the client goes away this handler is
/// dropped, which cancels the wait and frees its listener.
pub async fn sync_events_route(
    State(services): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    query: Result<Query<SyncQuery>, QueryRejection>,
) -> Result<Json<SyncResponse>> {
    let Query(query) = query.map_err(|e| Error::BadRequest(e.body_text()))?;
    let request = sync_request(&services.config.sync, user_id, query)?;

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn(async move { services.sync.sync_events(request, cancel).await });

    let response = task
        .await
        .map_err(|e| Error::Internal(format!("Sync task failed: {e}")))??;
    guard.disarm();
    Ok(Json(response))
}

fn sync_request(config: &SyncConfig, user_id: OwnedUserId, query: SyncQuery) -> Result<SyncRequest> {
    let since = match query.since.as_deref() {
        None | Some("") => StreamPosition::ZERO,
        Some(since) => StreamPosition::from_str(since)?,
    };
    let limit = match query.limit {
        Some(0) => return Err(Error::BadRequest("limit must be positive".to_owned())),
        Some(limit) => limit,
        None => config.default_limit,
    };
    let timeout = config.timeout(query.timeout);
    debug!("🔧 Sync query resolved: since={} timeout={:?} limit={}", since, timeout, limit);

    Ok(SyncRequest {
        user_id,
        since,
        timeout,
        limit,
    })
}
