//! Protocol Message Schema
//!
//! Every message exchanged on a binder connection is one `WireMessage`
//! variant. Client-allocated ids (reply channels, write sequences) come
//! from a process-wide counter; server-allocated ids (atoms, commands,
//! objects) arrive in replies and are opaque to the client.

use crate::value::WireValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique id for client-side use
pub fn next_id() -> u64 {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype! {
    /// Correlates one outbound request with its single reply
    ChannelId
}
id_newtype! {
    /// Server-assigned identity of a replicated atom
    AtomId
}
id_newtype! {
    /// Server-assigned identity of a command endpoint
    CommandId
}
id_newtype! {
    /// Server-assigned identity of a bound remote object
    ObjectId
}

impl ChannelId {
    /// Allocate a fresh reply-channel id
    pub fn allocate() -> Self {
        ChannelId(next_id())
    }
}

/// Whether an atom accepts local writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomMode {
    ReadOnly,
    Mutable,
}

/// One atom as declared in a root reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomDecl {
    pub id: AtomId,
    pub mode: AtomMode,
    pub initial: WireValue,
}

/// One command endpoint as declared in a root reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDecl {
    pub id: CommandId,
}

/// All messages on a binder connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Bind a named remote object (client -> server)
    RootRequest {
        type_name: String,
        args: BTreeMap<String, WireValue>,
        reply_channel: ChannelId,
    },

    /// The object's atom and command set (server -> client)
    RootReply {
        channel: ChannelId,
        object_id: ObjectId,
        atoms: BTreeMap<String, AtomDecl>,
        commands: BTreeMap<String, CommandDecl>,
    },

    /// Authoritative value push for one atom (server -> client).
    /// `write_seq` echoes the highest client write sequence the server
    /// has folded into this value; `None` means a plain broadcast.
    AtomUpdate {
        atom_id: AtomId,
        value: WireValue,
        write_seq: Option<u64>,
    },

    /// Optimistic local write (client -> server)
    AtomSet {
        atom_id: AtomId,
        value: WireValue,
        write_seq: u64,
    },

    /// Fire-and-forget command invocation (client -> server)
    Command {
        command_id: CommandId,
        payload: WireValue,
    },

    /// Teardown of a bound object's server-side fanout (client -> server)
    Release { object_id: ObjectId },
}

impl WireMessage {
    /// Short tag for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::RootRequest { .. } => "RootRequest",
            WireMessage::RootReply { .. } => "RootReply",
            WireMessage::AtomUpdate { .. } => "AtomUpdate",
            WireMessage::AtomSet { .. } => "AtomSet",
            WireMessage::Command { .. } => "Command",
            WireMessage::Release { .. } => "Release",
        }
    }

    /// True for kinds a client may legitimately receive
    pub fn is_server_to_client(&self) -> bool {
        matches!(
            self,
            WireMessage::RootReply { .. } | WireMessage::AtomUpdate { .. }
        )
    }
}
