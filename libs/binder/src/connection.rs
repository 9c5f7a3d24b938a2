//! Connection Lifecycle
//!
//! One `ConnectionManager` owns one transport for its whole life. The
//! state machine is strictly forward: Disconnected -> Connecting ->
//! Ready -> Closed, and Closed is terminal; reconnecting means
//! building a fresh manager (see `reconnect`).
//!
//! All inbound messages are demultiplexed by a single reader task that
//! dispatches each message synchronously through the `Router` before
//! reading the next, so there is never parallel handler execution for
//! one connection. Outbound messages funnel through a bounded queue
//! drained by a companion writer task.

use crate::config::BinderConfig;
use crate::dispatch::Router;
use crate::error::{BindError, Result};
use crate::transport::{self, Endpoint, TransportReader, TransportWriter};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use wire::WireMessage;

/// Lifecycle of a managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

/// Shared core behind a `ConnectionManager` and everything it hands out
pub(crate) struct ConnCore {
    pub(crate) config: BinderConfig,
    pub(crate) router: Router,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<WireMessage>>>,
}

impl ConnCore {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Enqueue a message for transmission; fails unless Ready
    pub(crate) fn try_send(&self, message: WireMessage) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(match state {
                ConnectionState::Closed => BindError::closed("connection closed"),
                other => BindError::NotReady { state: other },
            });
        }

        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| BindError::closed("connection closed"))?;

        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(m) => BindError::connection(format!(
                "Outbound queue full ({} messages), dropping {}",
                self.config.outbound_buffer,
                m.kind()
            )),
            mpsc::error::TrySendError::Closed(_) => BindError::closed("connection closed"),
        })
    }

    /// Move to Closed, exactly once, and fail everything still waiting
    pub(crate) fn close(&self, reason: &str) {
        let mut first = false;
        self.state_tx.send_if_modified(|s| {
            if *s == ConnectionState::Closed {
                false
            } else {
                *s = ConnectionState::Closed;
                first = true;
                true
            }
        });
        if !first {
            return;
        }

        *self.outbound.lock() = None;
        self.router.fail_all(reason);
        info!(reason, "connection closed");
    }
}

/// Owner of one connection lifecycle.
///
/// Cheap to clone; clones share the same underlying connection. Every
/// component that needs the connection receives a manager (or something
/// derived from one) explicitly; there is no ambient lookup.
#[derive(Clone)]
pub struct ConnectionManager {
    core: Arc<ConnCore>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(config: BinderConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            core: Arc::new(ConnCore {
                config,
                router: Router::new(),
                state_tx,
                outbound: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn core(&self) -> &Arc<ConnCore> {
        &self.core
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Begin establishing a transport to `address`.
    ///
    /// Returns immediately; use `wait_ready` to await establishment.
    /// Only valid on a Disconnected manager; a manager is single-shot
    /// and calling this twice is `InvalidState`.
    pub fn connect(&self, address: &str) -> Result<()> {
        let endpoint = Endpoint::parse(address)?;

        let mut actual = ConnectionState::Disconnected;
        let started = self.core.state_tx.send_if_modified(|s| {
            actual = *s;
            if *s == ConnectionState::Disconnected {
                *s = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(BindError::InvalidState {
                expected: ConnectionState::Disconnected,
                actual,
            });
        }

        debug!(%endpoint, "connecting");
        tokio::spawn(io_main(Arc::clone(&self.core), endpoint));
        Ok(())
    }

    /// Suspend until the connection is Ready.
    ///
    /// Fails with `Closed` if the connection reaches its terminal state
    /// first, rather than hanging forever.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state_rx = self.core.state_tx.subscribe();
        loop {
            match *state_rx.borrow_and_update() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Closed => {
                    return Err(BindError::closed("connection closed before ready"))
                }
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(BindError::closed("connection dropped"));
            }
        }
    }

    /// Transmit a structured message; fails with `NotReady` unless the
    /// connection is Ready
    pub fn send(&self, message: WireMessage) -> Result<()> {
        self.core.try_send(message)
    }

    /// Close the connection. Terminal; pending requests are failed and
    /// atoms are marked stale.
    pub fn close(&self) {
        self.core.close("closed by client");
    }
}

/// Establish the transport, publish readiness, then run the IO loops
async fn io_main(core: Arc<ConnCore>, endpoint: Endpoint) {
    let established =
        tokio::time::timeout(core.config.connect_timeout, transport::establish(&endpoint)).await;

    let (reader, writer) = match established {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            error!(%endpoint, error = %e, "transport establishment failed");
            core.close(&format!("connect failed: {}", e));
            return;
        }
        Err(_) => {
            core.close(&format!(
                "connect to {} timed out after {:?}",
                endpoint, core.config.connect_timeout
            ));
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(core.config.outbound_buffer);
    *core.outbound.lock() = Some(outbound_tx);

    // close() may have raced transport establishment
    let became_ready = core.state_tx.send_if_modified(|s| {
        if *s == ConnectionState::Connecting {
            *s = ConnectionState::Ready;
            true
        } else {
            false
        }
    });
    if !became_ready {
        *core.outbound.lock() = None;
        return;
    }
    info!(%endpoint, "connection ready");

    tokio::spawn(writer_loop(Arc::clone(&core), writer, outbound_rx));
    reader_loop(core, reader).await;
}

/// The single dispatch context: inbound messages are routed one at a
/// time, in arrival order
async fn reader_loop(core: Arc<ConnCore>, mut reader: TransportReader) {
    let mut state_rx = core.state_tx.subscribe();
    loop {
        tokio::select! {
            inbound = reader.recv(core.config.max_frame_size) => match inbound {
                Ok(Some(message)) => core.router.dispatch_inbound(message),
                Ok(None) => {
                    core.close("peer closed the connection");
                    break;
                }
                Err(e) => {
                    core.close(&format!("transport receive failed: {}", e));
                    break;
                }
            },
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow() == ConnectionState::Closed {
                    break;
                }
            }
        }
    }
}

async fn writer_loop(
    core: Arc<ConnCore>,
    mut writer: TransportWriter,
    mut outbound_rx: mpsc::Receiver<WireMessage>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(e) = writer.send(&message, core.config.max_frame_size).await {
            core.close(&format!("transport send failed: {}", e));
            break;
        }
    }
}
