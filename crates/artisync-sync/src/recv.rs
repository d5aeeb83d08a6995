//! The receive engine.
//!
//! Interprets inbound artifact and gossip cards against the store. Hash
//! verification happens here, before anything is published: a body that
//! does not hash to its declared name never enters the store.

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use tracing::warn;

use artisync_core::{delta_apply, verify_against_name, ArtifactName};
use artisync_store::Store;

use crate::crosslink::Crosslink;
use crate::error::{Result, SyncError};
use crate::session::Session;

/// Ingest a `file` card: raw content, or a patch when `delta_src` is set.
///
/// A delta whose basis is still a phantom is stored dangling; it counts
/// as received and materializes by itself when the basis arrives, so its
/// hash check is deferred to that materialization.
pub fn accept_file<S: Store, X: Crosslink>(
    sess: &mut Session,
    store: &mut S,
    xlink: &mut X,
    name: &ArtifactName,
    delta_src: Option<&ArtifactName>,
    payload: &[u8],
) -> Result<()> {
    let private = sess.take_pending_private();

    let (content, lineage) = match delta_src {
        Some(src) => {
            let src_id = store.resolve_or_phantom(src, private)?;
            match store.content(src_id)? {
                None => {
                    // Dangling delta: basis not here yet.
                    let id = store.put_delta(payload, name, src_id, private)?;
                    sess.counters.dangling_rcvd += 1;
                    if !private {
                        store.make_public(id)?;
                    }
                    sess.index.mark_have(name);
                    return Ok(());
                }
                Some(basis) => {
                    sess.counters.deltas_rcvd += 1;
                    (Bytes::from(delta_apply(&basis, payload)?), Some(src_id))
                }
            }
        }
        None => {
            sess.counters.files_rcvd += 1;
            (Bytes::copy_from_slice(payload), None)
        }
    };

    if !verify_against_name(&content, name) {
        return Err(SyncError::WrongHash(name.clone()));
    }

    let id = store.put(&content, name, lineage, private)?;
    if private {
        store.make_private(id)?;
    } else {
        store.make_public(id)?;
    }
    xlink.artifact(name, &content);
    sess.index.mark_have(name);
    Ok(())
}

/// Ingest a `cfile` card: decompress, then proceed exactly like `file`.
pub fn accept_cfile<S: Store, X: Crosslink>(
    sess: &mut Session,
    store: &mut S,
    xlink: &mut X,
    name: &ArtifactName,
    delta_src: Option<&ArtifactName>,
    raw_size: u64,
    payload: &[u8],
) -> Result<()> {
    use std::io::Read;

    let mut plain = Vec::with_capacity(raw_size as usize);
    ZlibDecoder::new(payload)
        .read_to_end(&mut plain)
        .map_err(|e| SyncError::Protocol(format!("cfile payload failed to inflate: {e}")))?;
    if plain.len() as u64 != raw_size {
        return Err(SyncError::Protocol(format!(
            "cfile size mismatch: card says {raw_size}, payload inflates to {}",
            plain.len()
        )));
    }
    accept_file(sess, store, xlink, name, delta_src, &plain)
}

/// Fold a `have`/`igot` card into local state.
///
/// When we hold the artifact its private bit is harmonized with the
/// announcement. When we do not and `want_missing` is set, a phantom is
/// created so a later cycle requests the content. Returns true when a
/// new phantom appeared.
pub fn accept_gossip<S: Store>(
    sess: &mut Session,
    store: &mut S,
    name: &ArtifactName,
    private: bool,
    want_missing: bool,
    can_private: bool,
) -> Result<bool> {
    if let Some(id) = store.resolve(name)? {
        if private {
            store.make_private(id)?;
        } else {
            store.make_public(id)?;
        }
        sess.index.mark_have(name);
        return Ok(false);
    }
    if private && !can_private {
        // Private content we are not entitled to: pretend it does not
        // exist.
        return Ok(false);
    }
    if !want_missing {
        sess.index.mark_have(name);
        return Ok(false);
    }
    if store.is_shunned(name)? {
        warn!(%name, "ignoring gossip for shunned artifact");
        return Ok(false);
    }
    store.new_phantom(name, private)?;
    sess.index.mark_have(name);
    Ok(true)
}
