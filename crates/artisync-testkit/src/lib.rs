//! # artisync-testkit
//!
//! Testing utilities for the artisync workspace.
//!
//! - **Fixtures**: a canned server peer and helpers to run complete
//!   client/server sessions in process over the loopback transport.
//! - **Generators**: proptest strategies for artifact content, names and
//!   text tokens.
//!
//! ```
//! use artisync_testkit::fixtures::{ServerFixture, run_session};
//! use artisync_sync::{ClientOptions, SyncFlags};
//! use artisync_store::MemoryStore;
//!
//! let mut server = ServerFixture::new();
//! server.add_artifact(b"hello");
//! let mut client = MemoryStore::new();
//! let outcome = run_session(
//!     &mut client,
//!     &mut server,
//!     &ClientOptions::new(SyncFlags::clone_repo()),
//! )
//! .unwrap();
//! assert_eq!(outcome.artifacts_rcvd, 1);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{run_session, ServerFixture, TEST_PROJECT_CODE, TEST_SERVER_CODE};
pub use generators::{arb_content, arb_name, arb_text};
