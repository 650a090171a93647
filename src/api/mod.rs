// =============================================================================
// Matrixon Matrix NextServer - API Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   HTTP surface: client-server routes behind a bearer token layer and
//   server-server routes keyed by the `X-Matrix` origin.
//
// =============================================================================

pub mod client_server;
pub mod server_server;

use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, MatchedPath, State},
    http::{header::AUTHORIZATION, request::Parts, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use ruma::{OwnedServerName, OwnedUserId, ServerName};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::{service::Services, Error, Result};

pub type AppState = Arc<Services>;

/// The user a client request was authenticated as.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser(pub OwnedUserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| Error::Unauthorized("Missing access token".to_owned()))
    }
}

/// The server a federation request claims to come from.
///
/// Only the `origin` parameter of the `X-Matrix` authorization is read here;
/// the request signature is checked by the transport in front of us.
#[derive(Clone, Debug)]
pub struct XMatrix {
    pub origin: OwnedServerName,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for XMatrix {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Unauthorized("Missing X-Matrix authorization".to_owned()))?;
        parse_x_matrix(header)
    }
}

fn parse_x_matrix(header: &str) -> Result<XMatrix> {
    let params = header
        .strip_prefix("X-Matrix ")
        .ok_or_else(|| Error::Unauthorized("Authorization is not X-Matrix".to_owned()))?;

    let origin = params
        .split(',')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| *name == "origin")
        .map(|(_, value)| value.trim_matches('"'))
        .ok_or_else(|| Error::Unauthorized("X-Matrix authorization has no origin".to_owned()))?;

    let origin = <&ServerName>::try_from(origin)
        .map_err(|_| Error::Unauthorized("X-Matrix origin is not a server name".to_owned()))?;
    Ok(XMatrix {
        origin: origin.to_owned(),
    })
}

/// Resolves `Authorization: Bearer` (or `?access_token=`) against the
/// configured tokens.
async fn authenticate(
    State(services): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
        .or_else(|| {
            req.uri().query().and_then(|query| {
                query
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .find(|(name, _)| *name == "access_token")
                    .map(|(_, token)| token.to_owned())
            })
        })
        .ok_or_else(|| Error::Unauthorized("Missing access token".to_owned()))?;

    let user_id = services
        .config
        .access_tokens
        .get(&token)
        .cloned()
        .ok_or_else(|| Error::Unauthorized("Unknown access token".to_owned()))?;

    debug!("🔑 Request authenticated as {}", user_id);
    req.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(req).await)
}

async fn unrecognized_method(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let inner = next.run(req).await;
    if inner.status() == StatusCode::METHOD_NOT_ALLOWED {
        warn!("Method not allowed: {method} {uri}");
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({
                "errcode": "M_UNRECOGNIZED",
                "error": "Unrecognized request"
            })),
        )
            .into_response();
    }
    inner
}

pub fn router(services: AppState) -> Router {
    let client = Router::new()
        .route("/_matrix/client/r0/sync", get(client_server::sync_events_route))
        .route(
            "/_matrix/client/r0/rooms/:room_id/state",
            get(client_server::get_state_events_route),
        )
        .route(
            "/_matrix/client/r0/rooms/:room_id/state/:event_type/:state_key",
            get(client_server::get_state_events_for_key_route),
        )
        // state_key is optional
        .route(
            "/_matrix/client/r0/rooms/:room_id/state/:event_type",
            get(client_server::get_state_events_for_empty_key_route),
        )
        .route(
            "/_matrix/client/r0/user/:user_id/account_data/:event_type",
            put(client_server::set_global_account_data_route),
        )
        .route(
            "/_matrix/client/r0/user/:user_id/rooms/:room_id/account_data/:event_type",
            put(client_server::set_room_account_data_route),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&services),
            authenticate,
        ));

    let federation = Router::new()
        .route(
            "/_matrix/federation/v1/make_join/:room_id/:user_id",
            get(server_server::create_join_event_template_route),
        )
        .route(
            "/_matrix/federation/v1/send_join/:room_id/:event_id",
            put(server_server::create_join_event_v1_route),
        );

    client
        .merge(federation)
        .layer(middleware::from_fn(unrecognized_method))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let path = match request.extensions().get::<MatchedPath>() {
                    Some(path) => path.as_str(),
                    None => request.uri().path(),
                };
                tracing::info_span!("http_request", method = %request.method(), %path)
            }),
        )
        .with_state(services)
}
