//! # artisync-core
//!
//! Wire-level primitives for the artisync protocol: the line-oriented card
//! grammar, content-addressed artifact names, the dual-hash capability set,
//! and the delta codec.
//!
//! A sync message is a sequence of newline-terminated *cards*. Each card is
//! a keyword followed by up to five whitespace-separated tokens; some cards
//! are followed by an exact run of raw payload bytes. [`MessageReader`]
//! walks a message card by card, and [`Card::write`] emits one.
//!
//! Artifact identity is the hash of its content. The hex length of a name
//! selects the algorithm: 40 characters means SHA-1, 64 means SHA-3-256.

pub mod card;
pub mod delta;
pub mod error;
pub mod hash;
pub mod name;
pub mod text;

pub use card::{Card, MessageReader};
pub use delta::{delta_apply, delta_encode};
pub use error::{CoreError, Result};
pub use hash::{constant_time_hex_eq, hash_one_shot, verify_against_name, HashAlgorithm};
pub use name::ArtifactName;
pub use text::{fossilize, defossilize};

/// Maximum number of whitespace-separated tokens on a card line,
/// including the keyword.
pub const MAX_TOKENS: usize = 6;
