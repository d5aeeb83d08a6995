//! Post-store indexing hook.
//!
//! Whenever the receive engine completes an artifact it notifies the
//! crosslink hook, bracketed by `begin`/`end` once per request or cycle.
//! Deployments hang their manifest indexer here; the engines themselves
//! never interpret artifact content.

use artisync_core::ArtifactName;

/// Callback invoked for every newly completed artifact.
pub trait Crosslink {
    fn begin(&mut self);
    fn artifact(&mut self, name: &ArtifactName, content: &[u8]);
    fn end(&mut self);
}

/// The default hook: does nothing.
#[derive(Debug, Default)]
pub struct NullCrosslink;

impl Crosslink for NullCrosslink {
    fn begin(&mut self) {}
    fn artifact(&mut self, _name: &ArtifactName, _content: &[u8]) {}
    fn end(&mut self) {}
}
