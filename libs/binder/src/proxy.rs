//! Remote Object Proxies
//!
//! An `ObjectDescriptor` declares the shape a caller expects (atoms
//! with their modes, plus command names) and a reply is validated
//! against it before anything is handed to the application: a missing
//! or undeclared atom, a mode mismatch, or a duplicated atom id all
//! fail the request instead of being silently accepted.
//!
//! The resulting `RemoteObjectProxy` is an immutable bundle for its
//! whole lifetime. Dropping it unregisters its atom routes and sends a
//! best-effort `Release` so the server can prune its fanout lists.

use crate::atom::{AtomReplica, AtomState, MutableAtom};
use crate::channel::{CommandSender, ReplyPayload};
use crate::connection::ConnCore;
use crate::error::{BindError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use wire::{AtomId, AtomMode, ObjectId, WireMessage};

/// Declared shape of a remote object, validated against the reply
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    type_name: String,
    atoms: Vec<(String, AtomMode)>,
    commands: Vec<String>,
}

impl ObjectDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            atoms: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Declare a read-only atom
    pub fn atom(mut self, name: impl Into<String>) -> Self {
        self.atoms.push((name.into(), AtomMode::ReadOnly));
        self
    }

    /// Declare a mutable atom
    pub fn mutable_atom(mut self, name: impl Into<String>) -> Self {
        self.atoms.push((name.into(), AtomMode::Mutable));
        self
    }

    /// Declare a command endpoint
    pub fn command(mut self, name: impl Into<String>) -> Self {
        self.commands.push(name.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    fn validate(&self, payload: &ReplyPayload) -> Result<()> {
        for (name, mode) in &self.atoms {
            match payload.atoms.get(name) {
                None => {
                    return Err(BindError::protocol(format!(
                        "Reply for '{}' is missing declared atom '{}'",
                        self.type_name, name
                    )))
                }
                Some(decl) if decl.mode != *mode => {
                    return Err(BindError::protocol(format!(
                        "Atom '{}' on '{}' declared {:?} but replied {:?}",
                        name, self.type_name, mode, decl.mode
                    )))
                }
                Some(_) => {}
            }
        }
        for name in payload.atoms.keys() {
            if !self.atoms.iter().any(|(n, _)| n == name) {
                return Err(BindError::protocol(format!(
                    "Reply for '{}' carries undeclared atom '{}'",
                    self.type_name, name
                )));
            }
        }

        for name in &self.commands {
            if !payload.commands.contains_key(name) {
                return Err(BindError::protocol(format!(
                    "Reply for '{}' is missing declared command '{}'",
                    self.type_name, name
                )));
            }
        }
        for name in payload.commands.keys() {
            if !self.commands.contains(name) {
                return Err(BindError::protocol(format!(
                    "Reply for '{}' carries undeclared command '{}'",
                    self.type_name, name
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for decl in payload.atoms.values() {
            if !seen.insert(decl.id) {
                return Err(BindError::protocol(format!(
                    "Reply for '{}' repeats atom id {}",
                    self.type_name, decl.id
                )));
            }
        }
        Ok(())
    }

    /// Turn a validated reply into a live proxy, registering its atoms
    /// for update routing
    pub(crate) fn materialize(
        &self,
        payload: ReplyPayload,
        conn: Arc<ConnCore>,
    ) -> Result<RemoteObjectProxy> {
        if let Err(e) = self.validate(&payload) {
            // The server considers the object bound; release it so its
            // fanout list does not leak
            let _ = conn.try_send(WireMessage::Release {
                object_id: payload.object_id,
            });
            return Err(e);
        }

        let mut atoms = HashMap::new();
        let mut mutables = HashMap::new();
        let mut atom_ids = Vec::with_capacity(payload.atoms.len());

        for (name, decl) in payload.atoms {
            let state = AtomState::new(decl.id, decl.mode, decl.initial, Arc::clone(&conn));
            conn.router.register_atom(decl.id, &state);
            atom_ids.push(decl.id);
            match decl.mode {
                AtomMode::ReadOnly => {
                    atoms.insert(name, AtomReplica::from_state(state));
                }
                AtomMode::Mutable => {
                    mutables.insert(name, MutableAtom::from_state(state));
                }
            }
        }

        let commands = payload
            .commands
            .into_iter()
            .map(|(name, decl)| {
                let sender = CommandSender::new(name.clone(), decl.id, Arc::clone(&conn));
                (name, sender)
            })
            .collect();

        debug!(
            type_name = %self.type_name,
            object_id = %payload.object_id,
            atoms = atom_ids.len(),
            "remote object bound"
        );

        Ok(RemoteObjectProxy {
            type_name: self.type_name.clone(),
            object_id: payload.object_id,
            atoms,
            mutables,
            commands,
            atom_ids,
            conn,
        })
    }
}

/// Client-side handle on one bound remote object: a fixed set of atom
/// replicas and command senders
pub struct RemoteObjectProxy {
    type_name: String,
    object_id: ObjectId,
    atoms: HashMap<String, AtomReplica>,
    mutables: HashMap<String, MutableAtom>,
    commands: HashMap<String, CommandSender>,
    atom_ids: Vec<AtomId>,
    conn: Arc<ConnCore>,
}

impl RemoteObjectProxy {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Look up a declared read-only atom
    pub fn atom(&self, name: &str) -> Option<&AtomReplica> {
        self.atoms.get(name)
    }

    /// Look up a declared mutable atom
    pub fn mutable(&self, name: &str) -> Option<&MutableAtom> {
        self.mutables.get(name)
    }

    /// Look up a declared command sender
    pub fn command(&self, name: &str) -> Option<&CommandSender> {
        self.commands.get(name)
    }
}

impl Drop for RemoteObjectProxy {
    fn drop(&mut self) {
        self.conn.router.unregister_atoms(&self.atom_ids);
        // Best effort; the connection may already be gone
        if let Err(e) = self.conn.try_send(WireMessage::Release {
            object_id: self.object_id,
        }) {
            debug!(object_id = %self.object_id, error = %e, "release not sent");
        }
    }
}

impl std::fmt::Debug for RemoteObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectProxy")
            .field("type_name", &self.type_name)
            .field("object_id", &self.object_id)
            .field("atoms", &self.atoms.keys().collect::<Vec<_>>())
            .field("mutables", &self.mutables.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}
