//! The server-side handler: one request in, one reply out.
//!
//! Authorization is earned card by card (`pull`/`push`/`clone`/`login`)
//! and consumed by everything after. The first fatal error resets the
//! reply to a single `error` card; every write lands in one transaction
//! that is rolled back when the request fails.

use std::time::{Duration, Instant};

use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, warn};

use artisync_auth::{check_login, check_tail, CapabilitySet, Credentials};
use artisync_core::{Card, MessageReader};
use artisync_store::Store;

use crate::config::Settings;
use crate::crosslink::Crosslink;
use crate::error::{Result, SyncError};
use crate::recv::{accept_file, accept_gossip};
use crate::send::{
    send_all, send_artifact, send_artifact_compressed, send_clone_sweep, send_private,
    send_roots,
};
use crate::session::Session;

/// Most phantoms the server will request from a pushing client in one
/// reply.
const MAX_PHANTOM_REQUESTS: usize = 500;

/// Server-side knobs for one repository.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub server_code: String,
    pub project_code: String,
    /// Outbound byte cap, `max-download`.
    pub mx_send: usize,
    /// Reply deadline, `max-download-time`.
    pub max_time: Duration,
    /// Capabilities of an unauthenticated caller.
    pub default_caps: CapabilitySet,
    /// Transferable configuration values served to `reqconfig`.
    pub config_values: Vec<(String, String)>,
    /// Session memo handed to read-authorized clients.
    pub cookie: Option<String>,
    /// Identity asserted by the transport (e.g. HTTP basic auth).
    pub remote_user: Option<String>,
    /// Honor `remote_user` for login cards, `remote_user_ok`.
    pub remote_user_ok: bool,
    /// Announce the unversioned side channel on clones, `uv-sync`.
    pub uv_sync: bool,
}

impl ServerOptions {
    pub fn new(server_code: impl Into<String>, project_code: impl Into<String>) -> Self {
        Self {
            server_code: server_code.into(),
            project_code: project_code.into(),
            mx_send: 5_000_000,
            max_time: Duration::from_secs(30),
            default_caps: CapabilitySet::NONE,
            config_values: Vec::new(),
            cookie: None,
            remote_user: None,
            remote_user_ok: false,
            uv_sync: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut opts = Self::new(
            settings.server_code.clone(),
            settings.project_code.clone().unwrap_or_default(),
        );
        opts.mx_send = settings.max_download;
        opts.max_time = Duration::from_secs(settings.max_download_time.max(1));
        opts.remote_user_ok = settings.remote_user_ok;
        opts.uv_sync = settings.uv_sync;
        opts.cookie = settings.cookie.clone();
        opts
    }
}

/// Process one sync request and compose the reply.
pub fn handle_request<S: Store, C: Credentials, X: Crosslink>(
    store: &mut S,
    creds: &C,
    xlink: &mut X,
    opts: &ServerOptions,
    request: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    if let Err(e) = store.begin_write() {
        Card::Error { text: format!("cannot open transaction: {e}") }.write(&mut out);
        return out;
    }
    xlink.begin();

    let nerr = match process(store, creds, xlink, opts, request, &mut out) {
        Ok(nerr) => nerr,
        Err(e) => {
            out.clear();
            Card::Error { text: e.to_string() }.write(&mut out);
            1
        }
    };
    write_timestamp(&mut out, nerr);

    if nerr > 0 {
        if let Err(e) = store.rollback() {
            warn!("rollback failed: {e}");
        }
    } else if let Err(e) = store.commit() {
        warn!("commit failed: {e}");
        out.clear();
        Card::Error { text: format!("commit failed: {e}") }.write(&mut out);
        write_timestamp(&mut out, 1);
    }
    xlink.end();
    out
}

fn process<S: Store, C: Credentials, X: Crosslink>(
    store: &mut S,
    creds: &C,
    xlink: &mut X,
    opts: &ServerOptions,
    request: &[u8],
    out: &mut Vec<u8>,
) -> Result<u32> {
    let mut sess = Session::new(opts.mx_send, Some(Instant::now() + opts.max_time));
    let mut caps = opts.default_caps;
    let mut auth_read = false;
    let mut auth_write = false;
    let mut seed_mode = false;
    let mut clone_cursor: Option<u64> = None;
    let mut uv_announced = false;
    let mut gimmes_rcvd = 0u32;
    let mut nerr = 0u32;

    Card::Pragma {
        name: "server-version".to_owned(),
        args: vec![
            crate::session::CLIENT_VERSION.to_string(),
            crate::session::CLIENT_VERSION_DATE.to_string(),
            crate::session::CLIENT_VERSION_TIME.to_string(),
        ],
    }
    .write(out);

    // Login cards are cumulative and may sit anywhere in the request,
    // but the capabilities they grant must be in force before any other
    // card is judged. Resolve them all first; the tail hash is taken at
    // each card's own position.
    {
        let mut scan = MessageReader::new(request);
        loop {
            match scan.next_card() {
                Ok(Some(Card::Login { user, nonce, signature })) => {
                    let accepted = if opts.remote_user_ok
                        && opts.remote_user.as_deref() == Some(user.as_str())
                    {
                        // Transport-level identity: trust it, grant the
                        // user's stored capabilities.
                        Some(match creds.lookup(&user) {
                            Some(stored) => CapabilitySet::from_cap_string(&stored.caps),
                            None => CapabilitySet::anonymous(),
                        })
                    } else if check_tail(&nonce, scan.remaining()) {
                        check_login(creds, &user, &nonce, &signature).ok()
                    } else {
                        None
                    };
                    match accepted {
                        Some(granted) => {
                            debug!(%user, "login accepted");
                            caps.merge(granted);
                        }
                        None => {
                            fail(out, &mut nerr, "login failed");
                            return Ok(nerr);
                        }
                    }
                }
                Ok(Some(_)) => {}
                // End of message; parse errors are reported by the main
                // pass below.
                Ok(None) | Err(_) => break,
            }
        }
    }

    let mut reader = MessageReader::new(request);
    loop {
        let card = match reader.next_card() {
            Ok(Some(card)) => card,
            Ok(None) => break,
            Err(e) => {
                fail(out, &mut nerr, &format!("malformed atom line: {e}"));
                break;
            }
        };
        match card {
            Card::Comment { .. } => {}

            Card::File { name, delta_src, content } => {
                if !auth_write {
                    fail(out, &mut nerr, "not authorized to write");
                    break;
                }
                match accept_file(&mut sess, store, xlink, &name, delta_src.as_ref(), &content)
                {
                    Ok(()) => {}
                    Err(SyncError::WrongHash(name)) => {
                        fail(
                            out,
                            &mut nerr,
                            &format!("wrong hash on received artifact: {name}"),
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            Card::CFile { name, delta_src, raw_size, content } => {
                if !auth_write {
                    fail(out, &mut nerr, "not authorized to write");
                    break;
                }
                match crate::recv::accept_cfile(
                    &mut sess,
                    store,
                    xlink,
                    &name,
                    delta_src.as_ref(),
                    raw_size,
                    &content,
                ) {
                    Ok(()) => {}
                    Err(SyncError::WrongHash(name)) => {
                        fail(
                            out,
                            &mut nerr,
                            &format!("wrong hash on received artifact: {name}"),
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            Card::Private => sess.pending_private = true,

            Card::Have { name, private } | Card::IGot { name, private } => {
                // Gossip from a peer that cannot write is ignored rather
                // than refused; a pull-only downgrade leaves the client's
                // announcements in the same request.
                if auth_write {
                    accept_gossip(&mut sess, store, &name, private, true, caps.private)?;
                }
            }

            Card::Gimme { name } => {
                gimmes_rcvd += 1;
                sess.index.mark_need(&name);
                if auth_read {
                    if let Some(id) = store.resolve(&name)? {
                        if sess.clone_version.unwrap_or(0) >= 3 {
                            send_artifact_compressed(&mut sess, store, out, id, Some(&name))?;
                        } else {
                            send_artifact(&mut sess, store, out, id, Some(&name), true)?;
                        }
                    }
                }
            }

            Card::Pull { .. } | Card::Push { .. } if opts.project_code.is_empty() => {
                fail(out, &mut nerr, "missing project code");
                break;
            }

            Card::Pull { project_code, .. } => {
                if !project_code.eq_ignore_ascii_case(&opts.project_code) {
                    fail(out, &mut nerr, "wrong project");
                    break;
                }
                if !caps.read {
                    fail(out, &mut nerr, "not authorized to read");
                    break;
                }
                auth_read = true;
            }

            Card::Push { project_code, .. } => {
                if !project_code.eq_ignore_ascii_case(&opts.project_code) {
                    fail(out, &mut nerr, "wrong project");
                    break;
                }
                if caps.write {
                    auth_write = true;
                } else if auth_read {
                    Card::Message {
                        text: "pull only - not authorized to push".to_owned(),
                    }
                    .write(out);
                } else {
                    fail(out, &mut nerr, "not authorized to write");
                    break;
                }
            }

            Card::Clone { version, seqno } => {
                if !caps.clone {
                    out.clear();
                    push_card(opts).write(out);
                    fail_keep(out, &mut nerr, "not authorized to clone");
                    break;
                }
                auth_read = true;
                sess.clone_version = version;
                if opts.uv_sync && !uv_announced {
                    Card::Pragma { name: "uv-pull-only".to_owned(), args: vec![] }.write(out);
                    uv_announced = true;
                }
                match (version, seqno) {
                    (Some(v), Some(n)) if v >= 2 => clone_cursor = Some(n),
                    _ => seed_mode = true,
                }
                push_card(opts).write(out);
            }

            // Validated in the pre-pass.
            Card::Login { .. } => {}

            Card::ReqConfig { name } => {
                if auth_read {
                    if let Some((_, value)) =
                        opts.config_values.iter().find(|(key, _)| *key == name)
                    {
                        Card::Config { name, content: value.clone().into_bytes().into() }
                            .write(out);
                    }
                }
            }

            Card::Pragma { name, args } => match name.as_str() {
                "client-version" => {
                    sess.peer_version = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
                    sess.peer_date = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(0);
                }
                "send-private" => {
                    if !caps.private {
                        fail(out, &mut nerr, "not authorized to sync private content");
                        break;
                    }
                    sess.sync_private = true;
                }
                "send-catalog" => {
                    sess.resync = store.max_id()?;
                }
                _ => debug!(pragma = %name, "ignoring unknown pragma"),
            },

            Card::Cookie { .. } => {}

            Card::Unknown { line } => {
                fail(out, &mut nerr, &format!("bad command: {line}"));
                break;
            }

            // Reply-only cards have no meaning in a request.
            Card::CloneSeqno { .. }
            | Card::Config { .. }
            | Card::Message { .. }
            | Card::Error { .. } => {
                fail(out, &mut nerr, "bad command: reply card in request");
                break;
            }
        }
    }

    if nerr > 0 {
        return Ok(nerr);
    }

    if auth_write {
        let mut requested = 0;
        for (_, name) in store.phantoms()? {
            if sess.index.is_needed(&name) {
                continue;
            }
            Card::Gimme { name }.write(out);
            sess.counters.gimmes_sent += 1;
            requested += 1;
            if requested >= MAX_PHANTOM_REQUESTS {
                break;
            }
        }
    }

    if seed_mode && gimmes_rcvd == 0 {
        // Initial bare clone: announce everything so the client phantoms
        // the whole repository at once.
        send_all(&mut sess, store, out)?;
        if sess.sync_private {
            send_private(&mut sess, store, out)?;
        }
    } else if let Some(cursor) = clone_cursor {
        let next = if cursor > 0 {
            send_clone_sweep(&mut sess, store, out, cursor)?
        } else {
            0
        };
        Card::CloneSeqno { seqno: next }.write(out);
    } else if auth_read || auth_write {
        send_roots(&mut sess, store, out)?;
        if sess.sync_private {
            send_private(&mut sess, store, out)?;
        }
    }

    if auth_read {
        if let Some(cookie) = &opts.cookie {
            Card::Cookie { value: cookie.clone() }.write(out);
        }
    }

    Ok(0)
}

fn push_card(opts: &ServerOptions) -> Card {
    Card::Push {
        server_code: opts.server_code.clone(),
        project_code: opts.project_code.clone(),
    }
}

/// Reset the reply to a single error card.
fn fail(out: &mut Vec<u8>, nerr: &mut u32, text: &str) {
    out.clear();
    fail_keep(out, nerr, text);
}

/// Append an error card without resetting what came before.
fn fail_keep(out: &mut Vec<u8>, nerr: &mut u32, text: &str) {
    Card::Error { text: text.to_owned() }.write(out);
    *nerr += 1;
}

fn write_timestamp(out: &mut Vec<u8>, nerr: u32) {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let now = OffsetDateTime::now_utc()
        .format(&fmt)
        .unwrap_or_else(|_| "1970-01-01T00:00:00".to_owned());
    Card::Comment { text: format!("timestamp {now} errors {nerr}") }.write(out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_auth::MemoryCredentials;
    use artisync_core::{hash_one_shot, HashAlgorithm};
    use artisync_store::MemoryStore;

    use crate::crosslink::NullCrosslink;

    fn opts() -> ServerOptions {
        let mut opts = ServerOptions::new("s".repeat(40), "p".repeat(40));
        opts.default_caps = CapabilitySet::anonymous();
        opts
    }

    fn reply_cards(reply: &[u8]) -> Vec<Card> {
        let mut reader = MessageReader::new(reply);
        let mut cards = Vec::new();
        while let Some(card) = reader.next_card().unwrap() {
            cards.push(card);
        }
        cards
    }

    #[test]
    fn wrong_project_is_rejected() {
        let mut store = MemoryStore::new();
        let request = format!("pull {} {}\n", "s".repeat(40), "q".repeat(40));
        let reply = handle_request(
            &mut store,
            &MemoryCredentials::new(),
            &mut NullCrosslink,
            &opts(),
            request.as_bytes(),
        );
        let cards = reply_cards(&reply);
        assert_eq!(cards[0], Card::Error { text: "wrong project".to_owned() });
        assert!(matches!(&cards[1], Card::Comment { text } if text.ends_with("errors 1")));
    }

    #[test]
    fn unknown_command_aborts_with_the_offending_line() {
        let mut store = MemoryStore::new();
        let reply = handle_request(
            &mut store,
            &MemoryCredentials::new(),
            &mut NullCrosslink,
            &opts(),
            b"frobnicate everything\n",
        );
        match &reply_cards(&reply)[0] {
            Card::Error { text } => assert_eq!(text, "bad command: frobnicate everything"),
            other => panic!("expected error card, got {other:?}"),
        }
    }

    #[test]
    fn file_without_push_authorization_is_refused() {
        let mut store = MemoryStore::new();
        let name = hash_one_shot(b"hello", HashAlgorithm::Sha1);
        let mut request = Vec::new();
        Card::File { name, delta_src: None, content: b"hello".as_ref().into() }
            .write(&mut request);
        let reply = handle_request(
            &mut store,
            &MemoryCredentials::new(),
            &mut NullCrosslink,
            &opts(),
            &request,
        );
        assert_eq!(
            reply_cards(&reply)[0],
            Card::Error { text: "not authorized to write".to_owned() }
        );
        assert_eq!(store.max_id().unwrap(), 0);
    }

    #[test]
    fn login_failure_stops_all_later_processing() {
        let mut store = MemoryStore::new();
        let mut creds = MemoryCredentials::new();
        creds.add("alice", &"a".repeat(40), "rw");
        let name = hash_one_shot(b"hello", HashAlgorithm::Sha1);

        let mut tail = Vec::new();
        Card::Push { server_code: "s".repeat(40), project_code: "p".repeat(40) }
            .write(&mut tail);
        Card::File { name: name.clone(), delta_src: None, content: b"hello".as_ref().into() }
            .write(&mut tail);
        let nonce = hash_one_shot(&tail, HashAlgorithm::Sha1);
        let mut request = Vec::new();
        Card::Login {
            user: "alice".to_owned(),
            nonce: nonce.as_str().to_owned(),
            signature: "f".repeat(40),
        }
        .write(&mut request);
        request.extend_from_slice(&tail);

        let reply = handle_request(
            &mut store,
            &creds,
            &mut NullCrosslink,
            &opts(),
            &request,
        );
        assert_eq!(
            reply_cards(&reply)[0],
            Card::Error { text: "login failed".to_owned() }
        );
        assert!(store.resolve(&name).unwrap().is_none());
    }

    #[test]
    fn push_downgrades_to_message_when_pull_is_authorized() {
        let mut store = MemoryStore::new();
        let request = format!(
            "pull {s} {p}\npush {s} {p}\n",
            s = "s".repeat(40),
            p = "p".repeat(40)
        );
        let reply = handle_request(
            &mut store,
            &MemoryCredentials::new(),
            &mut NullCrosslink,
            &opts(),
            request.as_bytes(),
        );
        let cards = reply_cards(&reply);
        assert!(cards.iter().any(|c| matches!(
            c,
            Card::Message { text } if text.starts_with("pull only")
        )));
        assert!(matches!(cards.last(), Some(Card::Comment { text }) if text.ends_with("errors 0")));
    }

    #[test]
    fn reqconfig_serves_allowlisted_values_only() {
        let mut store = MemoryStore::new();
        let mut options = opts();
        options.config_values = vec![("project-name".to_owned(), "demo".to_owned())];
        let request = format!(
            "pull {} {}\nreqconfig project-name\nreqconfig secret-key\n",
            "s".repeat(40),
            "p".repeat(40)
        );
        let reply = handle_request(
            &mut store,
            &MemoryCredentials::new(),
            &mut NullCrosslink,
            &options,
            request.as_bytes(),
        );
        let configs: Vec<_> = reply_cards(&reply)
            .into_iter()
            .filter_map(|c| match c {
                Card::Config { name, content } => Some((name, content)),
                _ => None,
            })
            .collect();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].0, "project-name");
        assert_eq!(&configs[0].1[..], b"demo");
    }
}
