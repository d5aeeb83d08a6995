//! # artisync-sync
//!
//! The synchronization engines: everything between the card codec and the
//! store.
//!
//! ## Shape of a session
//!
//! A session is a series of half-duplex *cycles*: the client composes one
//! request, the transport exchanges it for one reply, and the reply is
//! folded into the local store. The server is a one-shot request→reply
//! function ([`handle_request`]); the client is a loop ([`sync`]) that
//! runs until its continuation predicate says both sides have converged.
//!
//! All state for one side of a session lives in a [`Session`] value that
//! is threaded through the send and receive engines; nothing is global.
//! The store is a capability handed in by the caller and is mutated under
//! a single write transaction per request (server) or per cycle (client).

pub mod client;
pub mod config;
pub mod crosslink;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod recv;
pub mod send;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{sync, ClientOptions, SyncFlags, SyncOutcome};
pub use config::Settings;
pub use crosslink::{Crosslink, NullCrosslink};
pub use error::{Result, SyncError};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use server::{handle_request, ServerOptions};
pub use session::{EphemeralIndex, Session};
pub use transport::{LocalTransport, Transport};
