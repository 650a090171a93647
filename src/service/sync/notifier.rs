// =============================================================================
// Matrixon Matrix NextServer - Stream Notifier Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Position-keyed wake-up registry for long-polling sync requests. Each user
// with at least one waiting request owns a `watch` channel carrying the last
// stream position that touched them; listeners wait on that channel.
//
// =============================================================================

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    str::FromStr,
    sync::Arc,
};

use parking_lot::Mutex;
use ruma::{OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::{Error, Result};

/// Ordinal in the global event log. Strictly increasing, never rolled back.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamPosition(pub u64);

impl StreamPosition {
    /// "From the beginning" - an initial sync.
    pub const ZERO: Self = Self(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| Error::BadRequest(format!("Invalid stream token: {s}")))
    }
}

struct UserStream {
    sender: watch::Sender<StreamPosition>,
    listeners: usize,
}

struct Registry {
    position: StreamPosition,
    streams: HashMap<OwnedUserId, UserStream>,
}

/// Wakes waiting sync requests when new data is committed.
///
/// The registry lock covers both the global high-water mark and the per-user
/// streams, so a subscription either sees an advance in its initial value or
/// is registered before the advance runs. Neither order can lose a wakeup.
pub struct StreamNotifier {
    registry: Mutex<Registry>,
}

impl StreamNotifier {
    pub fn new(position: StreamPosition) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry {
                position,
                streams: HashMap::new(),
            }),
        })
    }

    /// The global high-water mark.
    pub fn current_position(&self) -> StreamPosition {
        self.registry.lock().position
    }

    /// Registers interest in `user_id`. The listener must be released, which
    /// dropping it also does.
    #[instrument(level = "debug", skip(self))]
    pub fn subscribe(self: &Arc<Self>, user_id: &UserId) -> Listener {
        let mut registry = self.registry.lock();
        let global = registry.position;

        let stream = registry
            .streams
            .entry(user_id.to_owned())
            .or_insert_with(|| UserStream {
                sender: watch::Sender::new(global),
                listeners: 0,
            });
        stream.listeners += 1;
        let receiver = stream.sender.subscribe();
        let position = *receiver.borrow();

        debug!("🔔 Listener registered for {} at {}", user_id, position);
        Listener {
            notifier: Arc::clone(self),
            user_id: user_id.to_owned(),
            receiver,
            position,
            released: false,
        }
    }

    /// Records a commit at `position` and wakes the listeners of `users`.
    #[instrument(level = "debug", skip(self, users))]
    pub fn advance<'a, I>(&self, position: StreamPosition, users: I)
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let mut registry = self.registry.lock();
        registry.position = registry.position.max(position);

        let mut woken = 0usize;
        for user_id in users {
            if let Some(stream) = registry.streams.get(user_id) {
                if raise(&stream.sender, position) {
                    woken += 1;
                }
            }
        }
        trace!("📣 Advanced to {}, woke {} user streams", position, woken);
    }

    /// Conservative variant of [`advance`](Self::advance) waking every
    /// listener.
    pub fn wake_all(&self, position: StreamPosition) {
        let mut registry = self.registry.lock();
        registry.position = registry.position.max(position);
        for stream in registry.streams.values() {
            raise(&stream.sender, position);
        }
    }

    /// Number of live listeners across all users.
    pub fn listener_count(&self) -> usize {
        self.registry.lock().streams.values().map(|s| s.listeners).sum()
    }

    fn release(&self, user_id: &UserId) {
        let mut registry = self.registry.lock();
        if let Entry::Occupied(mut entry) = registry.streams.entry(user_id.to_owned()) {
            entry.get_mut().listeners -= 1;
            if entry.get().listeners == 0 {
                entry.remove();
            }
        }
    }
}

fn raise(sender: &watch::Sender<StreamPosition>, position: StreamPosition) -> bool {
    sender.send_if_modified(|current| {
        if position > *current {
            *current = position;
            true
        } else {
            false
        }
    })
}

/// A single request's subscription to position advances for one user.
pub struct Listener {
    notifier: Arc<StreamNotifier>,
    user_id: OwnedUserId,
    receiver: watch::Receiver<StreamPosition>,
    position: StreamPosition,
    released: bool,
}

impl Listener {
    /// Resolves once the user's stream has moved past `since`, immediately if
    /// it already has.
    pub async fn wait(&mut self, since: StreamPosition) -> Result<StreamPosition> {
        if self.released {
            return Err(Error::Internal("Wait on a released listener".to_owned()));
        }

        let position = *self
            .receiver
            .wait_for(|position| *position > since)
            .await
            .map_err(|_| Error::Internal("Notifier stream closed".to_owned()))?;
        self.position = position;
        Ok(position)
    }

    /// Position observed at the last wake.
    pub fn position(&self) -> StreamPosition {
        self.position
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Removes the listener from the registry. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.notifier.release(&self.user_id);
            debug!("🔕 Listener released for {}", self.user_id);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.release();
    }
}
