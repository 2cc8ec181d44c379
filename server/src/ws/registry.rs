//! Connection Registry: which users are reachable, and over which handle.
//!
//! All reads and writes go through one mutex, and presence snapshots are
//! queued while it is held, so every client observes snapshots in mutation
//! order. Queueing is a non-blocking channel send; no I/O happens under the lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectionHandle, ServerEvent};
use crate::chat::presence;

/// How many live connections a user may hold at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPolicy {
    /// A new connection supersedes the previous one.
    #[default]
    Single,
    /// Every connection stays registered; pushes fan out to all of them.
    Multi,
}

pub(crate) type PresenceEntries = HashMap<String, Vec<ConnectionHandle>>;

#[derive(Clone)]
pub struct ConnectionRegistry {
    entries: Arc<Mutex<PresenceEntries>>,
    policy: ConnectionPolicy,
}

impl ConnectionRegistry {
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    /// Install `handle` as a live channel for its user and announce presence.
    ///
    /// Returns the handles this registration superseded. They are not closed
    /// here; that is up to the transport.
    pub fn register(&self, handle: ConnectionHandle) -> Vec<ConnectionHandle> {
        let mut entries = self.entries.lock();
        let user_id = handle.user_id().to_string();
        let was_online = entries.contains_key(&user_id);

        let superseded = match self.policy {
            ConnectionPolicy::Single => entries
                .insert(user_id.clone(), vec![handle.clone()])
                .unwrap_or_default()
                .into_iter()
                .filter(|old| *old != handle)
                .collect(),
            ConnectionPolicy::Multi => {
                let handles = entries.entry(user_id.clone()).or_default();
                if !handles.contains(&handle) {
                    handles.push(handle.clone());
                }
                Vec::new()
            }
        };

        if was_online {
            // Online set unchanged; only the new connection needs a view of it
            presence::send_snapshot(&entries, &handle);
        } else {
            presence::broadcast_snapshot(&entries);
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = handle.id(),
            superseded = superseded.len(),
            "Connection registered"
        );
        superseded
    }

    /// Remove `handle`. A handle that is no longer current (superseded, or
    /// never registered) is ignored and the user's presence is untouched.
    /// Returns whether a handle was removed.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut entries = self.entries.lock();
        let user_id = handle.user_id();

        let Some(handles) = entries.get_mut(user_id) else {
            return false;
        };
        let before = handles.len();
        handles.retain(|h| h != handle);
        if handles.len() == before {
            tracing::debug!(
                user_id = %user_id,
                connection_id = handle.id(),
                "Ignoring unregister of superseded connection"
            );
            return false;
        }

        if handles.is_empty() {
            entries.remove(user_id);
            presence::broadcast_snapshot(&entries);
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = handle.id(),
            "Connection unregistered"
        );
        true
    }

    /// Current live handle for a user (the newest one under `Multi`).
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries
            .lock()
            .get(user_id)
            .and_then(|handles| handles.last().cloned())
    }

    /// Push an event to every live handle of `user_id`.
    /// Returns false when the user is unreachable.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> bool {
        let entries = self.entries.lock();
        let Some(handles) = entries.get(user_id) else {
            return false;
        };
        let mut reached = false;
        for handle in handles {
            reached |= handle.send(event.clone());
        }
        reached
    }

    /// Queue the current online set to a single handle.
    pub fn send_snapshot(&self, handle: &ConnectionHandle) {
        presence::send_snapshot(&self.entries.lock(), handle);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.lock().contains_key(user_id)
    }

    /// Sorted ids of every user with a live handle.
    pub fn online_users(&self) -> Vec<String> {
        presence::online_snapshot(&self.entries.lock())
    }

    pub fn connection_count(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

/// Keeps a handle registered for as long as it lives.
///
/// Dropping it unregisters, so every way a connection task can end (close
/// frame, transport error, abort) releases the Presence Entry.
pub struct Registration {
    registry: ConnectionRegistry,
    handle: ConnectionHandle,
}

impl Registration {
    /// Register `handle` and return the guard plus any superseded handles.
    pub fn new(registry: &ConnectionRegistry, handle: ConnectionHandle) -> (Self, Vec<ConnectionHandle>) {
        let superseded = registry.register(handle.clone());
        (
            Self {
                registry: registry.clone(),
                handle,
            },
            superseded,
        )
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.handle);
    }
}
