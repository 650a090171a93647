// =============================================================================
// Matrixon Matrix NextServer - Integration Test Helpers
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use matrixon_stream::{
    api,
    database::MemoryDatabase,
    service::{
        federation::keyring::KeyRing,
        pdu::PduBuilder,
        Services,
    },
    utils, Config,
};
use ruma::{
    room_id, server_name, signatures::Ed25519KeyPair, user_id, OwnedRoomId, RoomVersionId,
    UserId,
};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

pub const ALICE_TOKEN: &str = "alice_token";
pub const BOB_TOKEN: &str = "bob_token";

/// `hs1` served over HTTP, with `!room:hs1` created by @alice:hs1.
pub struct TestServer {
    pub services: Arc<Services>,
    pub db: Arc<MemoryDatabase>,
    pub router: Router,
    pub room_id: OwnedRoomId,
}

impl TestServer {
    pub fn new() -> Self {
        let mut config = Config::new(server_name!("hs1").to_owned());
        config
            .access_tokens
            .insert(ALICE_TOKEN.to_owned(), user_id!("@alice:hs1").to_owned());
        config
            .access_tokens
            .insert(BOB_TOKEN.to_owned(), user_id!("@bob:hs1").to_owned());

        let db = Arc::new(MemoryDatabase::new());
        let keyring: Arc<dyn KeyRing> = db.clone();
        let services = Services::build(Arc::clone(&db), keyring, config).unwrap();
        let router = api::router(Arc::clone(&services));

        let server = Self {
            services,
            db,
            router,
            room_id: room_id!("!room:hs1").to_owned(),
        };
        let alice = user_id!("@alice:hs1");
        server.send(alice, PduBuilder::state("m.room.create", "", json!({ "creator": alice })));
        server.send(alice, PduBuilder::state("m.room.member", alice.as_str(), json!({ "membership": "join" })));
        server.send(alice, PduBuilder::state("m.room.power_levels", "", json!({ "users": { "@alice:hs1": 100 } })));
        server.send(alice, PduBuilder::state("m.room.join_rules", "", json!({ "join_rule": "public" })));
        server
    }

    pub fn send(&self, sender: &UserId, builder: PduBuilder) -> String {
        let (pdu, _) = self
            .services
            .rooms
            .timeline
            .build_and_append_pdu(builder, sender, &self.room_id)
            .unwrap();
        pdu.event_id.to_string()
    }

    pub fn send_message(&self, body: &str) -> String {
        self.send(
            user_id!("@alice:hs1"),
            PduBuilder::new("m.room.message", json!({ "msgtype": "m.text", "body": body })),
        )
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        authorization: Option<&str>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(authorization) = authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn client_get(&self, uri: &str, token: &str) -> (StatusCode, JsonValue) {
        self.request(Method::GET, uri, Some(&format!("Bearer {token}")), None)
            .await
    }

    pub async fn client_put(&self, uri: &str, token: &str, body: JsonValue) -> (StatusCode, JsonValue) {
        self.request(Method::PUT, uri, Some(&format!("Bearer {token}")), Some(body))
            .await
    }
}

/// A remote server `hs2` whose key `hs1` has pinned.
pub struct Remote {
    key_pair: Ed25519KeyPair,
}

impl Remote {
    pub const NAME: &'static str = "hs2";
    pub const KEY_ID: &'static str = "ed25519:auto";

    pub fn new(server: &TestServer) -> Self {
        let document = Ed25519KeyPair::generate().unwrap();
        let key_pair = Ed25519KeyPair::from_der(&document, "auto".to_owned()).unwrap();
        server.db.add_signing_key(
            server_name!("hs2"),
            Self::KEY_ID,
            key_pair.public_key().to_vec(),
            u64::MAX,
        );
        Self { key_pair }
    }

    pub fn authorization(&self) -> String {
        format!(r#"X-Matrix origin={},key="{}",sig="unchecked""#, Self::NAME, Self::KEY_ID)
    }

    pub fn sign(&self, event: JsonValue) -> JsonValue {
        let mut object = utils::to_canonical_object(&event).unwrap();
        ruma::signatures::hash_and_sign_event(
            Self::NAME,
            &self.key_pair,
            &mut object,
            &RoomVersionId::V1,
        )
        .unwrap();
        serde_json::to_value(object).unwrap()
    }
}
