//! Atom Replication
//!
//! An `AtomReplica` mirrors one individually addressable value pushed
//! by the server; `MutableAtom` adds optimistic local writes reconciled
//! by the blackout protocol:
//!
//! 1. `set` applies locally and notifies subscribers at once, then
//!    transmits `AtomSet` carrying a monotonic write sequence.
//! 2. A blackout window opens (restarting on every further `set`).
//!    While it is open, authoritative updates are suppressed unless
//!    they echo a write sequence at least as high as the latest local
//!    write, which acknowledges it and ends the window early.
//! 3. When the window elapses with no further write, the replica
//!    reconciles to the most recent authoritative value received.
//!
//! Listener fan-out is synchronous and in subscription order; a panic
//! inside one listener is caught and reported so later listeners still
//! run. Unsubscription waits for any in-flight fan-out, so once
//! `unsubscribe` returns no further invocation can begin. Callbacks
//! run outside every internal lock and may use the atom freely,
//! including `set`, `subscribe`, and `unsubscribe`.

use crate::connection::ConnCore;
use crate::error::Result;
use parking_lot::{Mutex, ReentrantMutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};
use wire::{AtomId, AtomMode, WireMessage, WireValue};

type Listener = Arc<dyn Fn(&WireValue) + Send + Sync>;

struct ListenerEntry {
    token: u64,
    callback: Listener,
}

/// Value-and-reconciliation state, guarded separately from listeners so
/// callbacks may read or write the atom without deadlocking
struct AtomValueState {
    value: WireValue,
    /// Highest local write sequence issued on this atom
    write_seq: u64,
    /// Active blackout deadline, if any
    blackout_until: Option<Instant>,
    /// Most recent authoritative value received, applied or suppressed
    last_authoritative: Option<WireValue>,
    stale: bool,
}

pub(crate) struct AtomState {
    id: AtomId,
    mode: AtomMode,
    blackout: Duration,
    conn: Arc<ConnCore>,
    state: Mutex<AtomValueState>,
    listeners: Mutex<Vec<ListenerEntry>>,
    /// Serializes fan-outs against cross-thread unsubscription while
    /// letting a callback re-enter notify on its own thread
    fanout: ReentrantMutex<()>,
    next_token: std::sync::atomic::AtomicU64,
}

impl AtomState {
    pub(crate) fn new(
        id: AtomId,
        mode: AtomMode,
        initial: WireValue,
        conn: Arc<ConnCore>,
    ) -> Arc<Self> {
        let blackout = conn.config.blackout;
        Arc::new(Self {
            id,
            mode,
            blackout,
            conn,
            state: Mutex::new(AtomValueState {
                value: initial,
                write_seq: 0,
                blackout_until: None,
                last_authoritative: None,
                stale: false,
            }),
            listeners: Mutex::new(Vec::new()),
            fanout: ReentrantMutex::new(()),
            next_token: std::sync::atomic::AtomicU64::new(1),
        })
    }

    /// Fan an applied value out to every current subscriber, in
    /// subscription order, isolating panics per listener. Callbacks are
    /// invoked with no internal lock held, so a callback may call back
    /// into the same atom.
    fn notify(&self, value: &WireValue) {
        let _guard = self.fanout.lock();
        let snapshot: Vec<(u64, Listener)> = self
            .listeners
            .lock()
            .iter()
            .map(|entry| (entry.token, Arc::clone(&entry.callback)))
            .collect();
        for (token, callback) in snapshot {
            // An earlier callback in this fan-out may have removed a
            // later one; skip entries no longer registered
            if !self.listeners.lock().iter().any(|entry| entry.token == token) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!(atom = %self.id, token, "listener panicked; isolating");
            }
        }
    }

    /// Route one authoritative update into this replica. Called from
    /// the connection's single dispatch context.
    pub(crate) fn apply_update(self: &Arc<Self>, value: WireValue, write_seq: Option<u64>) {
        let applied = {
            let mut state = self.state.lock();
            state.last_authoritative = Some(value.clone());

            let blacked_out = state
                .blackout_until
                .map_or(false, |deadline| Instant::now() < deadline);
            let acknowledges_local = write_seq.map_or(false, |seq| seq >= state.write_seq);

            if blacked_out && !acknowledges_local {
                debug!(atom = %self.id, "update suppressed during blackout");
                None
            } else {
                state.blackout_until = None;
                state.value = value.clone();
                Some(value)
            }
        };

        if let Some(value) = applied {
            self.notify(&value);
        }
    }

    /// Blackout elapsed with no further local write: converge to the
    /// most recent authoritative value, if any arrived meanwhile
    fn reconcile(self: &Arc<Self>, deadline: Instant) {
        let changed = {
            let mut state = self.state.lock();
            // A later set() moved the deadline; that window owns reconciliation
            if state.blackout_until != Some(deadline) {
                return;
            }
            state.blackout_until = None;
            match state.last_authoritative.clone() {
                Some(auth) if auth != state.value => {
                    state.value = auth.clone();
                    Some(auth)
                }
                _ => None,
            }
        };

        if let Some(value) = changed {
            debug!(atom = %self.id, "reconciled to authoritative value after blackout");
            self.notify(&value);
        }
    }

    pub(crate) fn mark_stale(&self) {
        self.state.lock().stale = true;
    }
}

/// Read handle on one replicated value
#[derive(Clone)]
pub struct AtomReplica {
    state: Arc<AtomState>,
}

impl AtomReplica {
    pub(crate) fn from_state(state: Arc<AtomState>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<AtomState> {
        &self.state
    }

    pub fn id(&self) -> AtomId {
        self.state.id
    }

    pub fn mode(&self) -> AtomMode {
        self.state.mode
    }

    /// The externally visible value (optimistic during a blackout)
    pub fn value(&self) -> WireValue {
        self.state.state.lock().value.clone()
    }

    /// True once the owning connection has closed; the value stays at
    /// its last known state and no further updates will arrive
    pub fn is_stale(&self) -> bool {
        self.state.state.lock().stale
    }

    /// Register a listener for every applied update. Delivery order
    /// equals subscription order. The returned handle is the only way
    /// to unsubscribe; dropping it leaves the listener registered.
    pub fn subscribe(&self, listener: impl Fn(&WireValue) + Send + Sync + 'static) -> Subscription {
        let token = self
            .state
            .next_token
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.state.listeners.lock().push(ListenerEntry {
            token,
            callback: Arc::new(listener),
        });
        Subscription {
            state: Arc::downgrade(&self.state),
            token,
        }
    }
}

impl std::fmt::Debug for AtomReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomReplica")
            .field("id", &self.state.id)
            .field("mode", &self.state.mode)
            .finish()
    }
}

/// Writable handle on a Mutable atom; derefs to the read API
#[derive(Clone, Debug)]
pub struct MutableAtom {
    replica: AtomReplica,
}

impl MutableAtom {
    pub(crate) fn from_state(state: Arc<AtomState>) -> Self {
        Self {
            replica: AtomReplica::from_state(state),
        }
    }

    /// Optimistic local write.
    ///
    /// The visible value updates and subscribers are notified before
    /// transmission is attempted, so a local write is always reflected
    /// immediately; the returned error only reports transmit failure
    /// (e.g. the connection is not Ready).
    pub fn set(&self, value: impl Into<WireValue>) -> Result<()> {
        let value = value.into();
        let state = &self.replica.state;

        let (seq, deadline) = {
            let mut s = state.state.lock();
            s.value = value.clone();
            s.write_seq += 1;
            let deadline = Instant::now() + state.blackout;
            s.blackout_until = Some(deadline);
            (s.write_seq, deadline)
        };

        state.notify(&value);

        // Arm the reconcile timer for this window; a later set() moves
        // the deadline and this timer becomes a no-op
        let weak = Arc::downgrade(state);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(atom) = weak.upgrade() {
                atom.reconcile(deadline);
            }
        });

        state.conn.try_send(WireMessage::AtomSet {
            atom_id: state.id,
            value,
            write_seq: seq,
        })
    }
}

impl std::ops::Deref for MutableAtom {
    type Target = AtomReplica;

    fn deref(&self) -> &AtomReplica {
        &self.replica
    }
}

/// Handle returned by `AtomReplica::subscribe`; consuming it guarantees
/// no further callback invocation for that listener
pub struct Subscription {
    state: Weak<AtomState>,
    token: u64,
}

impl Subscription {
    /// Remove the listener. Waits for any fan-out in flight on another
    /// thread, so once this returns the callback cannot run again. May
    /// also be called from inside a callback on the same atom.
    pub fn unsubscribe(self) {
        if let Some(state) = self.state.upgrade() {
            let _guard = state.fanout.lock();
            state.listeners.lock().retain(|entry| entry.token != self.token);
        }
    }
}
