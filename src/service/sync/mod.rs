// =============================================================================
// Matrixon Matrix NextServer - Sync Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Long-poll `/sync`. A request either answers right away (initial sync or
//   zero timeout) or parks on a stream listener until data for the user
//   lands, the timeout fires, or the caller goes away.
//
// =============================================================================

mod data;
pub mod notifier;
pub mod response;
pub mod snapshot;

use std::{sync::Arc, time::Duration, time::Instant};

pub use data::{Data, MembershipChange, TimelineSlice};
pub use notifier::{Listener, StreamNotifier, StreamPosition};
pub use response::SyncResponse;
use ruma::{OwnedUserId, RoomId};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use self::snapshot::SnapshotAssembler;
use crate::{service::account_data, Error, Result};

#[derive(Clone, Debug)]
pub struct SyncRequest {
    pub user_id: OwnedUserId,
    pub since: StreamPosition,
    pub timeout: Duration,
    pub limit: usize,
}

pub struct Service {
    db: Arc<dyn Data>,
    account_data: Arc<account_data::Service>,
    notifier: Arc<StreamNotifier>,
    snapshot: SnapshotAssembler,
}

impl Service {
    pub fn new(
        db: Arc<dyn Data>,
        account_data: Arc<account_data::Service>,
        notifier: Arc<StreamNotifier>,
    ) -> Self {
        Self {
            snapshot: SnapshotAssembler::new(Arc::clone(&db)),
            db,
            account_data,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<StreamNotifier> {
        &self.notifier
    }

    /// Answers one `/sync` request. Resolves with an empty response echoing
    /// `since` when the timeout passes without new data, and with
    /// [`Error::Cancelled`] when `cancel` fires first.
    #[instrument(level = "debug", skip(self, cancel), fields(user_id = %request.user_id))]
    pub async fn sync_events(
        &self,
        request: SyncRequest,
        cancel: CancellationToken,
    ) -> Result<SyncResponse> {
        let start = Instant::now();
        info!(
            "🔄 Incoming /sync request: since={} timeout={:?} limit={}",
            request.since, request.timeout, request.limit
        );

        if request.since == StreamPosition::ZERO || request.timeout.is_zero() {
            let current = self.notifier.current_position();
            let response = self.current_sync_for_user(&request, current)?;
            info!(
                "✅ Immediate sync for {} at {} in {:?}",
                request.user_id,
                current,
                start.elapsed()
            );
            return Ok(response);
        }

        let mut listener = self.notifier.subscribe(&request.user_id);
        let result = self.listen(&request, &mut listener, &cancel).await;
        listener.release();

        match &result {
            Ok(response) => info!(
                "✅ Sync for {} answered with next_batch {} in {:?}",
                request.user_id,
                response.next_batch,
                start.elapsed()
            ),
            Err(e) => debug!("❌ Sync for {} ended: {}", request.user_id, e),
        }
        result
    }

    async fn listen(
        &self,
        request: &SyncRequest,
        listener: &mut Listener,
        cancel: &CancellationToken,
    ) -> Result<SyncResponse> {
        let timer = tokio::time::sleep(request.timeout);
        tokio::pin!(timer);

        let mut known = request.since;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled);
                }
                woken = listener.wait(known) => {
                    let current = woken?.max(self.notifier.current_position());
                    let response = self.current_sync_for_user(request, current)?;
                    if !response.is_empty() {
                        return Ok(response);
                    }
                    debug!("🔧 Woken at {} with nothing new for {}", current, request.user_id);
                    known = current;
                }
                _ = &mut timer => {
                    debug!("⏰ Sync timeout for {}", request.user_id);
                    return Ok(SyncResponse::new(request.since));
                }
            }
        }
    }

    /// Snapshot for the request as of `current`, account data included.
    pub fn current_sync_for_user(
        &self,
        request: &SyncRequest,
        current: StreamPosition,
    ) -> Result<SyncResponse> {
        let mut response = if request.since == StreamPosition::ZERO {
            self.snapshot
                .complete_sync(&request.user_id, current, request.limit)?
        } else {
            self.snapshot
                .incremental_sync(&request.user_id, request.since, current, request.limit)?
        };
        self.append_account_data(&mut response, request, current)?;
        Ok(response)
    }

    /// Initial syncs carry every account data entry; incremental syncs carry
    /// the current value of each type changed in the window. A type changed
    /// again before the client's next request may be delivered twice.
    fn append_account_data(
        &self,
        response: &mut SyncResponse,
        request: &SyncRequest,
        current: StreamPosition,
    ) -> Result<()> {
        let user_id = &request.user_id;

        if request.since == StreamPosition::ZERO {
            let all = self.account_data.all(user_id)?;
            response.account_data.events = all.global;
            for (room_id, events) in all.rooms {
                if let Some(room) = response.rooms.join.get_mut(&room_id) {
                    room.account_data.events = events;
                }
            }
            return Ok(());
        }

        let changes = self
            .account_data
            .changes_in_range(user_id, request.since, current)?;
        for kind in &changes.global {
            if let Some(event) = self.account_data.get(None, user_id, kind)? {
                response.account_data.events.push(event);
            }
        }
        for (room_id, kinds) in &changes.rooms {
            for kind in kinds {
                if let Some(event) = self.account_data.get(Some(room_id), user_id, kind)? {
                    response
                        .rooms
                        .join
                        .entry(room_id.clone())
                        .or_default()
                        .account_data
                        .events
                        .push(event);
                }
            }
        }
        Ok(())
    }

    /// Every current state event of the room in client format.
    #[instrument(level = "debug", skip(self))]
    pub fn room_state(&self, room_id: &RoomId) -> Result<Vec<JsonValue>> {
        self.db
            .current_state_events(room_id)?
            .iter()
            .map(|pdu| pdu.to_state_event_response())
            .collect()
    }

    /// Content of one current state event.
    #[instrument(level = "debug", skip(self))]
    pub fn room_state_event(
        &self,
        room_id: &RoomId,
        kind: &str,
        state_key: &str,
    ) -> Result<JsonValue> {
        self.db
            .current_state_event(room_id, kind, state_key)?
            .map(|pdu| pdu.content)
            .ok_or_else(|| Error::NotFound("cannot find state".to_owned()))
    }
}
