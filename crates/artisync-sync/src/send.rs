//! The send engine.
//!
//! Three entry points share one contract and differ only in where the
//! artifact ids come from: [`send_roots`] walks the announcement set (or
//! sweeps all ids in resync mode), [`send_private`] announces private
//! holdings, and [`send_artifact`] emits one artifact, choosing between
//! raw, native-delta and parent-delta forms.
//!
//! Back-pressure is enforced here: past the byte cap or the deadline an
//! artifact degrades to a bare `have` announcement and the peer fetches
//! it with `gimme` on a later cycle.

use flate2::write::ZlibEncoder;
use flate2::Compression;

use artisync_core::{delta_encode, ArtifactName, Card};
use artisync_store::{ArtifactId, Store};

use crate::error::{Result, SyncError};
use crate::session::Session;

/// Bodies smaller than this are never worth a parent delta.
const MIN_DELTA_SOURCE: usize = 100;

/// Outcome of the shared preflight checks.
enum Preflight {
    /// Send the body; the artifact's name and privacy ride along.
    Send { name: ArtifactName, private: bool },
    /// Skip this artifact entirely.
    Skip,
}

fn preflight<S: Store>(
    sess: &mut Session,
    store: &S,
    out: &mut Vec<u8>,
    id: ArtifactId,
    expected: Option<&ArtifactName>,
) -> Result<Preflight> {
    let private = store.is_private(id)?;
    if private && !sess.sync_private {
        // Tease the artifact's existence to peers that understand a
        // private `have`; older peers would error out, so stay silent.
        if sess.peer_accepts_private_teaser() {
            if let Some(name) = store.name_of(id)? {
                Card::Have { name, private: true }.write(out);
                sess.counters.igots_sent += 1;
                sess.counters.priv_igots_sent += 1;
            }
        }
        return Ok(Preflight::Skip);
    }
    let Some(name) = store.name_of(id)? else {
        return Ok(Preflight::Skip);
    };
    if store.is_phantom(id)? {
        return Ok(Preflight::Skip);
    }
    if let Some(expected) = expected {
        if *expected != name {
            return Ok(Preflight::Skip);
        }
    }
    if sess.index.peer_has(&name) {
        return Ok(Preflight::Skip);
    }
    if store.is_shunned(&name)? {
        return Ok(Preflight::Skip);
    }
    if name.is_sha3() && !sess.peer_supports_sha3() {
        Card::Error {
            text: format!("peer cannot store SHA-3 artifact {name}"),
        }
        .write(out);
        return Ok(Preflight::Skip);
    }
    if sess.out_of_budget(out) {
        Card::Have { name, private }.write(out);
        sess.counters.igots_sent += 1;
        return Ok(Preflight::Skip);
    }
    Ok(Preflight::Send { name, private })
}

/// Emit one artifact.
///
/// With `use_delta`, a native delta (the artifact is stored as a patch
/// against a basis) is preferred; otherwise a parent delta is attempted
/// for bodies over [`MIN_DELTA_SOURCE`] bytes. A delta is only used when
/// it is shorter than the raw body; the engine never picks a longer form.
pub fn send_artifact<S: Store>(
    sess: &mut Session,
    store: &S,
    out: &mut Vec<u8>,
    id: ArtifactId,
    expected: Option<&ArtifactName>,
    use_delta: bool,
) -> Result<()> {
    let (name, private) = match preflight(sess, store, out, id, expected)? {
        Preflight::Send { name, private } => (name, private),
        Preflight::Skip => return Ok(()),
    };

    if use_delta {
        if let Some((src, patch)) = store.native_delta(id)? {
            if basis_is_sendable(sess, store, src)? {
                if let Some(src_name) = store.name_of(src)? {
                    if private {
                        Card::Private.write(out);
                    }
                    Card::File {
                        name: name.clone(),
                        delta_src: Some(src_name),
                        content: patch,
                    }
                    .write(out);
                    sess.counters.deltas_sent += 1;
                    sess.index.mark_have(&name);
                    return Ok(());
                }
            }
        }
    }

    let content = store
        .content(id)?
        .ok_or_else(|| SyncError::Protocol(format!("artifact {name} has no content")))?;

    if use_delta && content.len() > MIN_DELTA_SOURCE {
        if let Some(parent) = store.parent_of(id)? {
            if parent != id && basis_is_sendable(sess, store, parent)? {
                if let (Some(basis), Some(parent_name)) =
                    (store.content(parent)?, store.name_of(parent)?)
                {
                    let patch = delta_encode(&basis, &content);
                    if patch.len() < content.len() {
                        if private {
                            Card::Private.write(out);
                        }
                        Card::File {
                            name: name.clone(),
                            delta_src: Some(parent_name),
                            content: patch.into(),
                        }
                        .write(out);
                        sess.counters.deltas_sent += 1;
                        sess.index.mark_have(&name);
                        return Ok(());
                    }
                }
            }
        }
    }

    if private {
        Card::Private.write(out);
    }
    Card::File { name: name.clone(), delta_src: None, content }.write(out);
    sess.counters.files_sent += 1;
    sess.index.mark_have(&name);
    Ok(())
}

/// Emit one artifact as a `cfile`: the body travels zlib-compressed.
/// Used for clone protocol version 3 and up.
pub fn send_artifact_compressed<S: Store>(
    sess: &mut Session,
    store: &S,
    out: &mut Vec<u8>,
    id: ArtifactId,
    expected: Option<&ArtifactName>,
) -> Result<()> {
    use std::io::Write;

    let (name, private) = match preflight(sess, store, out, id, expected)? {
        Preflight::Send { name, private } => (name, private),
        Preflight::Skip => return Ok(()),
    };
    let content = store
        .content(id)?
        .ok_or_else(|| SyncError::Protocol(format!("artifact {name} has no content")))?;
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&content)
        .and_then(|_| enc.finish())
        .map(|compressed| {
            if private {
                Card::Private.write(out);
            }
            Card::CFile {
                name: name.clone(),
                delta_src: None,
                raw_size: content.len() as u64,
                content: compressed.into(),
            }
            .write(out);
        })
        .map_err(|e| SyncError::Transport(format!("compression failed: {e}")))?;
    sess.counters.files_sent += 1;
    sess.index.mark_have(&name);
    Ok(())
}

fn basis_is_sendable<S: Store>(sess: &Session, store: &S, basis: ArtifactId) -> Result<bool> {
    if store.is_phantom(basis)? {
        return Ok(false);
    }
    if store.is_private(basis)? && !sess.sync_private {
        return Ok(false);
    }
    Ok(true)
}

/// Announce the root set with `have` cards. In resync mode the sweep
/// covers every id at or below the cursor, descending, and parks the
/// cursor where the byte cap interrupts it.
pub fn send_roots<S: Store>(sess: &mut Session, store: &S, out: &mut Vec<u8>) -> Result<u32> {
    let mut cnt = 0;
    if sess.resync > 0 {
        let cursor = sess.resync;
        let mut swept_all = true;
        for (id, name) in store.names()?.into_iter().rev() {
            if id > cursor {
                continue;
            }
            if store.is_private(id)? || store.is_shunned(&name)? {
                continue;
            }
            Card::Have { name, private: false }.write(out);
            cnt += 1;
            if out.len() >= sess.mx_send {
                sess.resync = id.saturating_sub(1);
                swept_all = false;
                break;
            }
        }
        if swept_all || cnt == 0 {
            sess.resync = 0;
        }
    } else {
        for id in store.roots()? {
            let Some(name) = store.name_of(id)? else { continue };
            if store.is_shunned(&name)? {
                continue;
            }
            Card::Have { name, private: false }.write(out);
            cnt += 1;
        }
    }
    Ok(cnt)
}

/// Announce every private artifact with `igot H 1`. Only called when the
/// session syncs private content.
pub fn send_private<S: Store>(sess: &mut Session, store: &S, out: &mut Vec<u8>) -> Result<u32> {
    let mut cnt = 0;
    for name in store.private_names()? {
        Card::IGot { name, private: true }.write(out);
        sess.counters.igots_sent += 1;
        cnt += 1;
    }
    Ok(cnt)
}

/// Seed a bare clone: announce every public artifact we hold.
pub fn send_all<S: Store>(sess: &mut Session, store: &S, out: &mut Vec<u8>) -> Result<u32> {
    let mut cnt = 0;
    for (id, name) in store.names()? {
        if store.is_private(id)? || store.is_shunned(&name)? {
            continue;
        }
        Card::Have { name, private: false }.write(out);
        cnt += 1;
    }
    Ok(cnt)
}

/// Walk the clone sweep from `start`, announcing ids until the budget is
/// spent. Returns the next cursor, 0 when the sweep has covered the
/// highest id.
pub fn send_clone_sweep<S: Store>(
    sess: &mut Session,
    store: &S,
    out: &mut Vec<u8>,
    start: u64,
) -> Result<u64> {
    let max = store.max_id()?;
    let mut seq = start.max(1);
    while seq <= max {
        if sess.out_of_budget(out) {
            return Ok(seq);
        }
        if let Some(name) = store.name_of(seq)? {
            if !store.is_phantom(seq)?
                && !store.is_private(seq)?
                && !store.is_shunned(&name)?
            {
                Card::Have { name, private: false }.write(out);
            }
        }
        seq += 1;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_core::{hash_one_shot, HashAlgorithm, MessageReader};
    use artisync_store::MemoryStore;
    use bytes::Bytes;

    use crate::session::{MIN_PRIVATE_TEASER_DATE, MIN_SHA3_PEER_VERSION};

    fn put(store: &mut MemoryStore, content: &[u8]) -> (ArtifactId, ArtifactName) {
        let name = hash_one_shot(content, HashAlgorithm::Sha1);
        let id = store.put(content, &name, None, false).unwrap();
        (id, name)
    }

    fn fresh_session() -> Session {
        let mut sess = Session::new(1 << 20, None);
        sess.peer_version = MIN_SHA3_PEER_VERSION;
        sess.peer_date = MIN_PRIVATE_TEASER_DATE;
        sess
    }

    fn cards(buf: &[u8]) -> Vec<Card> {
        let mut reader = MessageReader::new(buf);
        let mut out = Vec::new();
        while let Some(card) = reader.next_card().unwrap() {
            out.push(card);
        }
        out
    }

    #[test]
    fn raw_send_marks_peer_have_and_skips_repeat() {
        let mut store = MemoryStore::new();
        let (id, name) = put(&mut store, b"hello");
        let mut sess = fresh_session();
        let mut out = Vec::new();

        send_artifact(&mut sess, &store, &mut out, id, None, false).unwrap();
        send_artifact(&mut sess, &store, &mut out, id, None, false).unwrap();

        let cards = cards(&out);
        assert_eq!(cards.len(), 1);
        assert!(matches!(
            &cards[0],
            Card::File { name: n, delta_src: None, content }
                if *n == name && &content[..] == b"hello"
        ));
        assert_eq!(sess.counters.files_sent, 1);
    }

    #[test]
    fn over_budget_degrades_to_have() {
        let mut store = MemoryStore::new();
        let (id, name) = put(&mut store, b"a sizable body");
        let mut sess = fresh_session();
        sess.mx_send = 1;
        let mut out = vec![b'x'; 2];

        send_artifact(&mut sess, &store, &mut out, id, None, false).unwrap();
        assert_eq!(
            cards(&out[2..]),
            vec![Card::Have { name, private: false }]
        );
        assert_eq!(sess.counters.files_sent, 0);
        assert_eq!(sess.counters.igots_sent, 1);
    }

    #[test]
    fn private_artifact_teases_new_peers_and_hides_from_old() {
        let mut store = MemoryStore::new();
        let content = b"private matter";
        let name = hash_one_shot(content, HashAlgorithm::Sha1);
        let id = store.put(content, &name, None, true).unwrap();

        let mut sess = fresh_session();
        let mut out = Vec::new();
        send_artifact(&mut sess, &store, &mut out, id, None, false).unwrap();
        assert_eq!(cards(&out), vec![Card::Have { name, private: true }]);

        let mut old = fresh_session();
        old.peer_date = 0;
        let mut out = Vec::new();
        send_artifact(&mut old, &store, &mut out, id, None, false).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn private_body_rides_behind_a_private_card() {
        let mut store = MemoryStore::new();
        let content = b"private matter";
        let name = hash_one_shot(content, HashAlgorithm::Sha1);
        let id = store.put(content, &name, None, true).unwrap();

        let mut sess = fresh_session();
        sess.sync_private = true;
        let mut out = Vec::new();
        send_artifact(&mut sess, &store, &mut out, id, None, false).unwrap();

        let cards = cards(&out);
        assert_eq!(cards[0], Card::Private);
        assert!(matches!(&cards[1], Card::File { name: n, .. } if *n == name));
    }

    #[test]
    fn native_delta_is_preferred() {
        let mut store = MemoryStore::new();
        let basis = b"a shared basis with enough length to matter".to_vec();
        let (basis_id, basis_name) = put(&mut store, &basis);
        let target = b"a shared basis with enough length to matter, and more".to_vec();
        let target_name = hash_one_shot(&target, HashAlgorithm::Sha1);
        let patch = delta_encode(&basis, &target);
        let target_id = store
            .put_delta(&patch, &target_name, basis_id, false)
            .unwrap();

        let mut sess = fresh_session();
        let mut out = Vec::new();
        send_artifact(&mut sess, &store, &mut out, target_id, None, true).unwrap();

        match &cards(&out)[0] {
            Card::File { name, delta_src: Some(src), content } => {
                assert_eq!(*name, target_name);
                assert_eq!(*src, basis_name);
                assert_eq!(content[..], patch[..]);
            }
            other => panic!("expected delta file card, got {other:?}"),
        }
        assert_eq!(sess.counters.deltas_sent, 1);
    }

    #[test]
    fn parent_delta_used_only_over_the_size_floor() {
        let mut store = MemoryStore::new();
        let basis: Vec<u8> = b"0123456789abcdef".repeat(20);
        let (basis_id, basis_name) = put(&mut store, &basis);

        let mut target = basis.clone();
        target.extend_from_slice(b"-tail");
        let target_name = hash_one_shot(&target, HashAlgorithm::Sha1);
        let target_id = store
            .put(&target, &target_name, Some(basis_id), false)
            .unwrap();

        let mut sess = fresh_session();
        let mut out = Vec::new();
        send_artifact(&mut sess, &store, &mut out, target_id, None, true).unwrap();
        match &cards(&out)[0] {
            Card::File { delta_src: Some(src), content, .. } => {
                assert_eq!(*src, basis_name);
                assert!(content.len() < target.len());
            }
            other => panic!("expected parent delta, got {other:?}"),
        }

        // A small body goes raw even with a parent on record.
        let (small_parent, _) = put(&mut store, b"tiny basis");
        let small = b"tiny body";
        let small_name = hash_one_shot(small, HashAlgorithm::Sha1);
        let small_id = store.put(small, &small_name, Some(small_parent), false).unwrap();
        let mut out = Vec::new();
        send_artifact(&mut sess, &store, &mut out, small_id, None, true).unwrap();
        assert!(matches!(&cards(&out)[0], Card::File { delta_src: None, .. }));
    }

    #[test]
    fn sha3_names_error_for_old_peers() {
        let mut store = MemoryStore::new();
        let content = b"modern content";
        let name = hash_one_shot(content, HashAlgorithm::Sha3_256);
        let id = store.put(content, &name, None, false).unwrap();

        let mut sess = fresh_session();
        sess.peer_version = MIN_SHA3_PEER_VERSION - 1;
        let mut out = Vec::new();
        send_artifact(&mut sess, &store, &mut out, id, None, false).unwrap();
        assert!(matches!(&cards(&out)[0], Card::Error { .. }));
        assert_eq!(sess.counters.files_sent, 0);
    }

    #[test]
    fn resync_sweep_parks_the_cursor_at_the_budget() {
        let mut store = MemoryStore::new();
        for i in 0..20u8 {
            put(&mut store, format!("artifact number {i}").as_bytes());
        }
        let mut sess = fresh_session();
        sess.mx_send = 200;
        sess.resync = store.max_id().unwrap();

        let mut out = Vec::new();
        send_roots(&mut sess, &store, &mut out).unwrap();
        assert!(sess.resync > 0);
        assert!(sess.resync < store.max_id().unwrap());
        let first = sess.resync;

        // Sweep resumes below the parked cursor and eventually drains.
        let mut guard = 0;
        while sess.resync > 0 {
            let mut out = Vec::new();
            send_roots(&mut sess, &store, &mut out).unwrap();
            assert!(sess.resync < first || sess.resync == 0);
            guard += 1;
            assert!(guard < 50);
        }
    }

    #[test]
    fn cfile_round_trips_through_zlib() {
        use flate2::read::ZlibDecoder;
        use std::io::Read;

        let mut store = MemoryStore::new();
        let body = b"compressible ".repeat(50);
        let (id, name) = put(&mut store, &body);
        let mut sess = fresh_session();
        let mut out = Vec::new();
        send_artifact_compressed(&mut sess, &store, &mut out, id, None).unwrap();

        match &cards(&out)[0] {
            Card::CFile { name: n, raw_size, content, .. } => {
                assert_eq!(*n, name);
                assert_eq!(*raw_size, body.len() as u64);
                assert!(content.len() < body.len());
                let mut plain = Vec::new();
                ZlibDecoder::new(&content[..]).read_to_end(&mut plain).unwrap();
                assert_eq!(Bytes::from(plain), Bytes::from(body));
            }
            other => panic!("expected cfile card, got {other:?}"),
        }
    }
}
