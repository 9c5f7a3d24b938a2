//! Inbound Demultiplexing and Root Requests
//!
//! The `Router` is the connection's inbound switchboard: replies are
//! matched to pending requests by channel id, atom updates are routed
//! to their replicas. Anomalies (an unknown or already-resolved
//! channel, an unknown atom, a client-to-server kind arriving inbound)
//! are protocol errors: logged and dropped, never fatal to dispatch.
//!
//! `RequestDispatcher` drives the root object binding protocol on top:
//! allocate a reply channel, wait for readiness, send, await the reply
//! under a timeout, validate against the declared descriptor.

use crate::atom::AtomState;
use crate::channel::{ReplyChannel, ReplyHandle, ReplyPayload};
use crate::connection::ConnectionManager;
use crate::error::{BindError, Result};
use crate::proxy::{ObjectDescriptor, RemoteObjectProxy};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, warn};
use wire::{AtomId, ChannelId, WireMessage, WireValue};

struct PendingRequest {
    handle: ReplyHandle,
    created_at: Instant,
}

/// Per-connection routing tables
pub(crate) struct Router {
    pending: Mutex<HashMap<ChannelId, PendingRequest>>,
    atoms: Mutex<HashMap<AtomId, Weak<AtomState>>>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            atoms: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register_pending(&self, channel: ChannelId, handle: ReplyHandle) {
        self.pending.lock().insert(
            channel,
            PendingRequest {
                handle,
                created_at: Instant::now(),
            },
        );
    }

    /// Remove a pending request without resolving it (timeout, send
    /// failure). Dropping the handle wakes the awaiting channel with a
    /// closed error, which the caller has already mapped.
    pub(crate) fn cancel_pending(&self, channel: ChannelId) {
        self.pending.lock().remove(&channel);
    }

    pub(crate) fn register_atom(&self, id: AtomId, atom: &Arc<AtomState>) {
        self.atoms.lock().insert(id, Arc::downgrade(atom));
    }

    pub(crate) fn unregister_atoms(&self, ids: &[AtomId]) {
        let mut atoms = self.atoms.lock();
        for id in ids {
            atoms.remove(id);
        }
    }

    /// Dispatch one inbound message synchronously. Runs on the
    /// connection's single reader task, in arrival order.
    pub(crate) fn dispatch_inbound(&self, message: WireMessage) {
        match message {
            WireMessage::RootReply {
                channel,
                object_id,
                atoms,
                commands,
            } => match self.pending.lock().remove(&channel) {
                Some(request) => {
                    debug!(
                        %channel,
                        elapsed_ms = request.created_at.elapsed().as_millis() as u64,
                        "root reply matched"
                    );
                    request.handle.resolve(ReplyPayload {
                        object_id,
                        atoms,
                        commands,
                    });
                }
                None => {
                    warn!(%channel, "reply for unknown or already-resolved channel, dropping");
                }
            },
            WireMessage::AtomUpdate {
                atom_id,
                value,
                write_seq,
            } => {
                let atom = self.atoms.lock().get(&atom_id).and_then(Weak::upgrade);
                match atom {
                    Some(atom) => atom.apply_update(value, write_seq),
                    None => {
                        warn!(%atom_id, "update for unknown atom, dropping");
                        self.atoms.lock().remove(&atom_id);
                    }
                }
            }
            other => {
                warn!(kind = other.kind(), "client-to-server message arrived inbound, dropping");
            }
        }
    }

    /// Connection closure: reject every outstanding request and mark
    /// every routed atom stale, so nothing waits forever
    pub(crate) fn fail_all(&self, reason: &str) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            warn!(count = pending.len(), reason, "failing pending requests");
        }
        // Dropping the handles resolves each awaiting channel with Closed
        drop(pending);

        for atom in self.atoms.lock().values().filter_map(Weak::upgrade) {
            atom.mark_stale();
        }
    }
}

/// Sends root object requests and materializes proxies from replies.
///
/// Holds the connection it was given explicitly; create one per
/// connection, or several; they share nothing else.
#[derive(Clone)]
pub struct RequestDispatcher {
    connection: ConnectionManager,
}

impl RequestDispatcher {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Bind a named remote object.
    ///
    /// Suspends until the connection is Ready, then until the matching
    /// reply arrives. Fails with `RequestTimeout` past the configured
    /// bound, `Closed` if the connection dies first, or `Protocol` if
    /// the reply does not match the descriptor.
    pub async fn request_object(
        &self,
        descriptor: ObjectDescriptor,
        args: BTreeMap<String, WireValue>,
    ) -> Result<RemoteObjectProxy> {
        let core = self.connection.core();
        let (channel, handle) = ReplyChannel::allocate();
        let channel_id = channel.id();
        core.router.register_pending(channel_id, handle);

        if let Err(e) = self.connection.wait_ready().await {
            core.router.cancel_pending(channel_id);
            return Err(e);
        }

        let request = WireMessage::RootRequest {
            type_name: descriptor.type_name().to_string(),
            args,
            reply_channel: channel_id,
        };
        if let Err(e) = core.try_send(request) {
            core.router.cancel_pending(channel_id);
            return Err(e);
        }
        debug!(type_name = descriptor.type_name(), %channel_id, "root request sent");

        let timeout = core.config.request_timeout;
        match tokio::time::timeout(timeout, channel.recv()).await {
            Ok(Ok(payload)) => descriptor.materialize(payload, Arc::clone(core)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                core.router.cancel_pending(channel_id);
                Err(BindError::RequestTimeout {
                    type_name: descriptor.type_name().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
