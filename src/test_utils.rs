// =============================================================================
// Matrixon Matrix NextServer - Test Utils Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Fixtures for unit tests: an in-memory server `hs1` with a public room
//   created by @alice:hs1, and a simulated remote server holding a real
//   ed25519 key.
//
// =============================================================================

use std::sync::Arc;

use ruma::{
    room_id, serde::Base64, server_name, signatures::Ed25519KeyPair, user_id, OwnedEventId,
    OwnedRoomId, OwnedServerName, RoomVersionId, ServerName, UserId,
};
use serde_json::{json, Value as JsonValue};

use crate::{
    database::MemoryDatabase,
    service::{
        federation::keyring::{KeyRing, VerifyKeys},
        pdu::{
            PduBuilder, CREATE_EVENT_TYPE, JOIN_RULES_EVENT_TYPE, MEMBER_EVENT_TYPE,
            POWER_LEVELS_EVENT_TYPE,
        },
        sync::StreamPosition,
        Services,
    },
    utils, Config,
};

pub struct Fixture {
    pub services: Arc<Services>,
    pub db: Arc<MemoryDatabase>,
    pub keyring: Arc<dyn KeyRing>,
    pub room_id: OwnedRoomId,
}

impl Fixture {
    pub fn with_public_room() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::new(server_name!("hs1").to_owned());
        configure(&mut config);

        let db = Arc::new(MemoryDatabase::new());
        let keyring: Arc<dyn KeyRing> = db.clone();
        let services = Services::build(Arc::clone(&db), Arc::clone(&keyring), config).unwrap();

        let fixture = Self {
            services,
            db,
            keyring,
            room_id: room_id!("!room:hs1").to_owned(),
        };
        fixture.create_room();
        fixture
    }

    fn create_room(&self) {
        let alice = self.alice();
        self.send(
            PduBuilder::state(CREATE_EVENT_TYPE, "", json!({ "creator": alice })),
            alice,
        );
        self.join(alice);
        self.send(
            PduBuilder::state(
                POWER_LEVELS_EVENT_TYPE,
                "",
                json!({ "users": { alice.as_str(): 100 } }),
            ),
            alice,
        );
        self.set_join_rule("public");
    }

    pub fn alice(&self) -> &'static UserId {
        user_id!("@alice:hs1")
    }

    pub fn position(&self) -> StreamPosition {
        self.services.sync.notifier().current_position()
    }

    fn send(&self, builder: PduBuilder, sender: &UserId) -> OwnedEventId {
        let (pdu, _) = self
            .services
            .rooms
            .timeline
            .build_and_append_pdu(builder, sender, &self.room_id)
            .unwrap();
        pdu.event_id
    }

    pub fn send_message(&self, body: &str) -> OwnedEventId {
        self.send(
            PduBuilder::new("m.room.message", json!({ "msgtype": "m.text", "body": body })),
            self.alice(),
        )
    }

    pub fn join(&self, user_id: &UserId) -> OwnedEventId {
        self.membership(user_id, user_id, "join")
    }

    pub fn leave(&self, user_id: &UserId) -> OwnedEventId {
        self.membership(user_id, user_id, "leave")
    }

    pub fn invite(&self, user_id: &UserId) -> OwnedEventId {
        self.membership(self.alice(), user_id, "invite")
    }

    pub fn set_join_rule(&self, rule: &str) -> OwnedEventId {
        self.send(
            PduBuilder::state(JOIN_RULES_EVENT_TYPE, "", json!({ "join_rule": rule })),
            self.alice(),
        )
    }

    fn membership(&self, sender: &UserId, target: &UserId, membership: &str) -> OwnedEventId {
        self.send(
            PduBuilder::state(
                MEMBER_EVENT_TYPE,
                target.as_str(),
                json!({ "membership": membership }),
            ),
            sender,
        )
    }
}

/// A remote homeserver whose verify key is known to the fixture's key ring.
pub struct RemoteServer {
    name: OwnedServerName,
    key_pair: Ed25519KeyPair,
}

impl RemoteServer {
    pub const KEY_ID: &'static str = "ed25519:1";

    pub fn new(fixture: &Fixture, name: &str) -> Self {
        let document = Ed25519KeyPair::generate().unwrap();
        let key_pair = Ed25519KeyPair::from_der(&document, "1".to_owned()).unwrap();
        let name = <&ServerName>::try_from(name).unwrap().to_owned();

        fixture
            .db
            .add_signing_key(&name, Self::KEY_ID, key_pair.public_key().to_vec(), u64::MAX);
        Self { name, key_pair }
    }

    pub fn name(&self) -> &ServerName {
        &self.name
    }

    pub fn verify_keys(&self) -> VerifyKeys {
        VerifyKeys::from([(
            Self::KEY_ID.to_owned(),
            Base64::new(self.key_pair.public_key().to_vec()),
        )])
    }

    /// What a remote does with a make_join template before send_join: hash
    /// it and sign the redacted form.
    pub fn sign_template(&self, event: JsonValue) -> JsonValue {
        let mut object = utils::to_canonical_object(&event).unwrap();
        ruma::signatures::hash_and_sign_event(
            self.name.as_str(),
            &self.key_pair,
            &mut object,
            &RoomVersionId::V1,
        )
        .unwrap();
        serde_json::to_value(object).unwrap()
    }
}
