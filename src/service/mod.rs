// =============================================================================
// Matrixon Matrix NextServer - Services Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

pub mod account_data;
pub mod federation;
pub mod pdu;
pub mod rooms;
pub mod sync;

use std::{sync::Arc, time::Instant};

use tracing::{debug, info, instrument};

use self::{
    federation::keyring::KeyRing,
    rooms::event_auth::{AuthRules, MembershipRules},
    sync::StreamNotifier,
};
use crate::{utils, Config, Result};

/// Every service of the server, wired to one storage backend and one
/// stream notifier.
pub struct Services {
    pub config: Arc<Config>,
    pub account_data: Arc<account_data::Service>,
    pub rooms: Arc<rooms::Service>,
    pub sync: sync::Service,
    pub federation: federation::Service,
}

impl Services {
    /// Builds the services in dependency order. The notifier starts at the
    /// storage's current position so tokens handed out before a restart keep
    /// their meaning.
    #[instrument(level = "info", skip_all, fields(server_name = %config.server_name))]
    pub fn build<D>(db: Arc<D>, keyring: Arc<dyn KeyRing>, config: Config) -> Result<Arc<Self>>
    where
        D: account_data::Data + rooms::Data + sync::Data + 'static,
    {
        let start = Instant::now();
        info!("🚀 Initializing matrixon stream services");

        let position = sync::Data::current_position(&*db)?;
        let notifier = StreamNotifier::new(position);
        debug!("✅ Stream notifier starts at {}", position);

        let account_data = Arc::new(account_data::Service::new(db.clone(), Arc::clone(&notifier)));

        // Storage is in memory, so the signing key lives as long as the process.
        let keypair = Arc::new(utils::generate_keypair()?);
        info!("🔑 Signing events as {} with ed25519:{}", config.server_name, keypair.version());

        let event_auth: Arc<dyn AuthRules> = Arc::new(MembershipRules);
        let state = Arc::new(rooms::state::Service { db: db.clone() });
        let rooms = Arc::new(rooms::Service {
            auth_chain: rooms::auth_chain::Service::new(db.clone()),
            event_auth: Arc::clone(&event_auth),
            state: Arc::clone(&state),
            timeline: rooms::timeline::Service {
                db: db.clone(),
                state,
                event_auth,
                notifier: Arc::clone(&notifier),
                server_name: config.server_name.clone(),
                keypair,
            },
        });
        debug!("✅ Room services initialized");

        let sync = sync::Service::new(db, Arc::clone(&account_data), notifier);
        let federation = federation::Service::new(
            config.server_name.clone(),
            config.federation.allow_federation,
            Arc::clone(&rooms),
            keyring,
        );

        info!("✅ Services ready in {:?}", start.elapsed());
        Ok(Arc::new(Self {
            config: Arc::new(config),
            account_data,
            rooms,
            sync,
            federation,
        }))
    }
}
