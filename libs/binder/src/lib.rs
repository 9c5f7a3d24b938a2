//! Binder Client
//!
//! Client-side remote-object synchronization over one persistent
//! connection: an application declares the shape of a named remote
//! object, binds it, and receives a proxy of replicated atoms and
//! fire-and-forget command senders. Mutable atoms accept optimistic
//! local writes reconciled against the server's pushes by a blackout
//! window with sequence-based early acknowledgment.
//!
//! ```no_run
//! use binder::{BinderConfig, ConnectionManager, ObjectDescriptor, RequestDispatcher};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> binder::Result<()> {
//! let connection = ConnectionManager::new(BinderConfig::default());
//! connection.connect("ws://localhost:8080/sync")?;
//!
//! let dispatcher = RequestDispatcher::new(connection.clone());
//! let descriptor = ObjectDescriptor::new("diffusion")
//!     .atom("progress")
//!     .mutable_atom("num_timesteps")
//!     .command("restart");
//! let proxy = dispatcher.request_object(descriptor, BTreeMap::new()).await?;
//!
//! let progress = proxy.atom("progress").unwrap();
//! let sub = progress.subscribe(|value| println!("progress: {:?}", value));
//!
//! proxy.mutable("num_timesteps").unwrap().set(20)?;
//! proxy.command("restart").unwrap().trigger()?;
//!
//! sub.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod atom;
pub mod channel;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod proxy;
pub mod reconnect;
pub mod transport;

pub use atom::{AtomReplica, MutableAtom, Subscription};
pub use channel::CommandSender;
pub use config::BinderConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::RequestDispatcher;
pub use error::{BindError, Result};
pub use proxy::{ObjectDescriptor, RemoteObjectProxy};
pub use reconnect::{connect_with_policy, ExponentialBackoff, NoRetry, ReconnectPolicy};
pub use transport::Endpoint;

// Re-export the wire schema applications see through the public API
pub use wire::{AtomId, AtomMode, ChannelId, CommandId, ObjectId, WireMessage, WireValue};
