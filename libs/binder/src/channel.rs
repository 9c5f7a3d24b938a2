//! Reply Channels and Command Senders
//!
//! `ReplyChannel` correlates one outbound request with exactly one
//! inbound reply: the resolving half is a oneshot sender consumed on
//! first use, so a second resolution is unrepresentable. `CommandSender`
//! is the repeatable fire-and-forget counterpart bound to one command
//! endpoint on one proxy.

use crate::connection::ConnCore;
use crate::error::{BindError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use wire::{AtomDecl, ChannelId, CommandDecl, CommandId, ObjectId, WireMessage, WireValue};

/// The useful body of a RootReply, after demultiplexing
#[derive(Debug)]
pub(crate) struct ReplyPayload {
    pub object_id: ObjectId,
    pub atoms: BTreeMap<String, AtomDecl>,
    pub commands: BTreeMap<String, CommandDecl>,
}

/// Receiving half of a one-shot reply correlation
pub(crate) struct ReplyChannel {
    id: ChannelId,
    rx: oneshot::Receiver<ReplyPayload>,
}

/// Resolving half, held by the router's pending-request table
pub(crate) struct ReplyHandle {
    tx: oneshot::Sender<ReplyPayload>,
}

impl ReplyChannel {
    /// Allocate a fresh channel and its resolving handle
    pub(crate) fn allocate() -> (ReplyChannel, ReplyHandle) {
        let (tx, rx) = oneshot::channel();
        let channel = ReplyChannel {
            id: ChannelId::allocate(),
            rx,
        };
        (channel, ReplyHandle { tx })
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    /// Await the single payload. Fails with `Closed` if the resolving
    /// handle was dropped (connection closure) before delivery.
    pub(crate) async fn recv(self) -> Result<ReplyPayload> {
        self.rx
            .await
            .map_err(|_| BindError::closed("connection closed before reply"))
    }
}

impl ReplyHandle {
    /// Deliver the payload, consuming the handle
    pub(crate) fn resolve(self, payload: ReplyPayload) {
        // The receiver may already be gone (request timed out); that is
        // not an error here.
        let _ = self.tx.send(payload);
    }
}

/// Fire-and-forget command endpoint on a bound remote object.
///
/// `send` has no return payload and no delivery guarantee beyond
/// attempted transmission while the connection is Ready.
#[derive(Clone)]
pub struct CommandSender {
    name: String,
    id: CommandId,
    conn: Arc<ConnCore>,
}

impl CommandSender {
    pub(crate) fn new(name: String, id: CommandId, conn: Arc<ConnCore>) -> Self {
        Self { name, id, conn }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Transmit the command with a payload
    pub fn send(&self, payload: impl Into<WireValue>) -> Result<()> {
        self.conn.try_send(WireMessage::Command {
            command_id: self.id,
            payload: payload.into(),
        })
    }

    /// Transmit the command with no payload
    pub fn trigger(&self) -> Result<()> {
        self.send(WireValue::Null)
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
