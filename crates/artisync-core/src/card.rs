//! The card grammar: parsing and emission of protocol messages.
//!
//! A message is a byte buffer holding newline-terminated lines. Each line
//! is empty, a comment (`#`), or a card: a keyword plus up to five tokens
//! separated by runs of spaces. `file`, `cfile` and `config` cards consume
//! a payload suffix of exactly the byte count named on the line; parsing
//! resumes immediately after those bytes.
//!
//! [`MessageReader`] is position-aware: the `login` check hashes the bytes
//! that follow the login line, so [`MessageReader::remaining`] exposes the
//! unconsumed tail at any point.

use bytes::Bytes;

use crate::error::{CoreError, Result};
use crate::name::{is_name_shaped, ArtifactName};
use crate::text::{defossilize, fossilize};
use crate::MAX_TOKENS;

/// One parsed card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Card {
    /// `push SERVERCODE PROJCODE`: request write authorization.
    Push { server_code: String, project_code: String },
    /// `pull SERVERCODE PROJCODE`: request read authorization.
    Pull { server_code: String, project_code: String },
    /// `clone` or `clone VERS SEQ`: request full-repository seeding.
    Clone { version: Option<u32>, seqno: Option<u64> },
    /// `login USER NONCE SIG`: authenticate; position-sensitive.
    Login { user: String, nonce: String, signature: String },
    /// `have HASH [1]`: possession gossip.
    Have { name: ArtifactName, private: bool },
    /// `igot HASH [1]`: possession gossip, historically distinct.
    IGot { name: ArtifactName, private: bool },
    /// `gimme HASH` / `need HASH`: content request.
    Gimme { name: ArtifactName },
    /// `file HASH [DELTASRC] SIZE` + SIZE payload bytes.
    File {
        name: ArtifactName,
        delta_src: Option<ArtifactName>,
        content: Bytes,
    },
    /// `cfile HASH [DELTASRC] USIZE CSIZE` + CSIZE zlib payload bytes.
    CFile {
        name: ArtifactName,
        delta_src: Option<ArtifactName>,
        raw_size: u64,
        content: Bytes,
    },
    /// `reqconfig NAME`: request a configuration value.
    ReqConfig { name: String },
    /// `config NAME SIZE` + SIZE payload bytes.
    Config { name: String, content: Bytes },
    /// `private`: the next `file`/`cfile` carries private content.
    Private,
    /// `clone_seqno N`: clone sweep cursor, 0 when the sweep is done.
    CloneSeqno { seqno: u64 },
    /// `cookie TEXT`: opaque memo the client echoes next round.
    Cookie { value: String },
    /// `pragma NAME [ARGS…]`: informational; unknown pragmas are ignored.
    Pragma { name: String, args: Vec<String> },
    /// `message TEXT`: informational, processing continues.
    Message { text: String },
    /// `error TEXT`: abort the session.
    Error { text: String },
    /// `# …`: comment; `# timestamp T …` carries the server clock.
    Comment { text: String },
    /// Any card with an unrecognized keyword, kept verbatim for
    /// diagnostics.
    Unknown { line: String },
}

impl Card {
    /// Emit this card onto a message buffer in wire form.
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Card::Push { server_code, project_code } => {
                line(out, &["push", server_code, project_code]);
            }
            Card::Pull { server_code, project_code } => {
                line(out, &["pull", server_code, project_code]);
            }
            Card::Clone { version, seqno } => match (version, seqno) {
                (Some(v), Some(n)) => line(out, &["clone", &v.to_string(), &n.to_string()]),
                _ => line(out, &["clone"]),
            },
            Card::Login { user, nonce, signature } => {
                line(out, &["login", &fossilize(user), nonce, signature]);
            }
            Card::Have { name, private } => {
                if *private {
                    line(out, &["have", name.as_str(), "1"]);
                } else {
                    line(out, &["have", name.as_str()]);
                }
            }
            Card::IGot { name, private } => {
                if *private {
                    line(out, &["igot", name.as_str(), "1"]);
                } else {
                    line(out, &["igot", name.as_str()]);
                }
            }
            Card::Gimme { name } => line(out, &["gimme", name.as_str()]),
            Card::File { name, delta_src, content } => {
                let size = content.len().to_string();
                match delta_src {
                    Some(src) => line(out, &["file", name.as_str(), src.as_str(), &size]),
                    None => line(out, &["file", name.as_str(), &size]),
                }
                out.extend_from_slice(content);
            }
            Card::CFile { name, delta_src, raw_size, content } => {
                let usize_ = raw_size.to_string();
                let csize = content.len().to_string();
                match delta_src {
                    Some(src) => {
                        line(out, &["cfile", name.as_str(), src.as_str(), &usize_, &csize]);
                    }
                    None => line(out, &["cfile", name.as_str(), &usize_, &csize]),
                }
                out.extend_from_slice(content);
            }
            Card::ReqConfig { name } => line(out, &["reqconfig", &fossilize(name)]),
            Card::Config { name, content } => {
                let size = content.len().to_string();
                line(out, &["config", &fossilize(name), &size]);
                out.extend_from_slice(content);
            }
            Card::Private => line(out, &["private"]),
            Card::CloneSeqno { seqno } => line(out, &["clone_seqno", &seqno.to_string()]),
            Card::Cookie { value } => line(out, &["cookie", &fossilize(value)]),
            Card::Pragma { name, args } => {
                let mut tokens = vec!["pragma", name.as_str()];
                tokens.extend(args.iter().map(String::as_str));
                line(out, &tokens);
            }
            Card::Message { text } => line(out, &["message", &fossilize(text)]),
            Card::Error { text } => line(out, &["error", &fossilize(text)]),
            Card::Comment { text } => {
                out.extend_from_slice(b"# ");
                out.extend_from_slice(text.as_bytes());
                out.push(b'\n');
            }
            Card::Unknown { line: raw } => {
                out.extend_from_slice(raw.as_bytes());
                out.push(b'\n');
            }
        }
    }
}

fn line(out: &mut Vec<u8>, tokens: &[&str]) {
    for (i, tok) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(tok.as_bytes());
    }
    out.push(b'\n');
}

/// A pull-parser over one protocol message.
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unconsumed tail of the message. Immediately after a `login`
    /// card is returned, this is the byte range its nonce must hash to.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Total size of the message buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Parse the next card, or `None` at end of message. Blank lines are
    /// skipped; comments are returned as [`Card::Comment`].
    pub fn next_card(&mut self) -> Result<Option<Card>> {
        loop {
            let Some(raw) = self.read_line() else {
                return Ok(None);
            };
            let text = trim_cr(raw);
            if text.is_empty() {
                continue;
            }
            if text[0] == b'#' {
                let body = String::from_utf8_lossy(&text[1..]).trim().to_owned();
                return Ok(Some(Card::Comment { text: body }));
            }
            return self.parse_line(text).map(Some);
        }
    }

    fn read_line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        match self.buf[start..].iter().position(|&b| b == b'\n') {
            Some(off) => {
                self.pos = start + off + 1;
                Some(&self.buf[start..start + off])
            }
            None => {
                self.pos = self.buf.len();
                Some(&self.buf[start..])
            }
        }
    }

    fn take_payload(&mut self, n: u64) -> Result<Bytes> {
        let n = usize::try_from(n).map_err(|_| CoreError::TruncatedPayload(usize::MAX))?;
        if self.buf.len() - self.pos < n {
            return Err(CoreError::TruncatedPayload(n));
        }
        let payload = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(Bytes::copy_from_slice(payload))
    }

    fn parse_line(&mut self, text: &[u8]) -> Result<Card> {
        let line_str = String::from_utf8_lossy(text);
        let tokens: Vec<&str> = line_str.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return Ok(Card::Unknown { line: line_str.into_owned() });
        }
        if tokens.len() > MAX_TOKENS {
            return Err(CoreError::TooManyTokens);
        }
        match tokens[0] {
            "push" => parse_route("push", &tokens)
                .map(|(s, p)| Card::Push { server_code: s, project_code: p }),
            "pull" => parse_route("pull", &tokens)
                .map(|(s, p)| Card::Pull { server_code: s, project_code: p }),
            "clone" => match tokens.len() {
                1 => Ok(Card::Clone { version: None, seqno: None }),
                3 => {
                    let version = parse_int(tokens[1], "clone")? as u32;
                    let seqno = parse_int(tokens[2], "clone")?;
                    Ok(Card::Clone { version: Some(version), seqno: Some(seqno) })
                }
                _ => Err(CoreError::MalformedCard("clone")),
            },
            "login" => {
                if tokens.len() != 4 {
                    return Err(CoreError::MalformedCard("login"));
                }
                Ok(Card::Login {
                    user: defossilize(tokens[1]),
                    nonce: tokens[2].to_owned(),
                    signature: tokens[3].to_owned(),
                })
            }
            "have" => parse_gossip("have", &tokens)
                .map(|(name, private)| Card::Have { name, private }),
            "igot" => parse_gossip("igot", &tokens)
                .map(|(name, private)| Card::IGot { name, private }),
            "need" | "gimme" => {
                if tokens.len() != 2 {
                    return Err(CoreError::MalformedCard("gimme"));
                }
                Ok(Card::Gimme { name: parse_name(tokens[1], "gimme")? })
            }
            "file" => {
                let (name, delta_src, size) = match tokens.len() {
                    3 => (parse_name(tokens[1], "file")?, None, parse_int(tokens[2], "file")?),
                    4 => (
                        parse_name(tokens[1], "file")?,
                        Some(parse_name(tokens[2], "file")?),
                        parse_int(tokens[3], "file")?,
                    ),
                    _ => return Err(CoreError::MalformedCard("file")),
                };
                let content = self.take_payload(size)?;
                Ok(Card::File { name, delta_src, content })
            }
            "cfile" => {
                let (name, delta_src, raw_size, csize) = match tokens.len() {
                    4 => (
                        parse_name(tokens[1], "cfile")?,
                        None,
                        parse_int(tokens[2], "cfile")?,
                        parse_int(tokens[3], "cfile")?,
                    ),
                    5 => (
                        parse_name(tokens[1], "cfile")?,
                        Some(parse_name(tokens[2], "cfile")?),
                        parse_int(tokens[3], "cfile")?,
                        parse_int(tokens[4], "cfile")?,
                    ),
                    _ => return Err(CoreError::MalformedCard("cfile")),
                };
                let content = self.take_payload(csize)?;
                Ok(Card::CFile { name, delta_src, raw_size, content })
            }
            "reqconfig" => {
                if tokens.len() != 2 {
                    return Err(CoreError::MalformedCard("reqconfig"));
                }
                Ok(Card::ReqConfig { name: defossilize(tokens[1]) })
            }
            "config" => {
                if tokens.len() != 3 {
                    return Err(CoreError::MalformedCard("config"));
                }
                let size = parse_int(tokens[2], "config")?;
                let content = self.take_payload(size)?;
                Ok(Card::Config { name: defossilize(tokens[1]), content })
            }
            "private" => {
                if tokens.len() != 1 {
                    return Err(CoreError::MalformedCard("private"));
                }
                Ok(Card::Private)
            }
            "clone_seqno" => {
                if tokens.len() != 2 {
                    return Err(CoreError::MalformedCard("clone_seqno"));
                }
                Ok(Card::CloneSeqno { seqno: parse_int(tokens[1], "clone_seqno")? })
            }
            "cookie" => {
                if tokens.len() != 2 {
                    return Err(CoreError::MalformedCard("cookie"));
                }
                Ok(Card::Cookie { value: defossilize(tokens[1]) })
            }
            "pragma" => {
                if tokens.len() < 2 {
                    return Err(CoreError::MalformedCard("pragma"));
                }
                Ok(Card::Pragma {
                    name: tokens[1].to_owned(),
                    args: tokens[2..].iter().map(|t| (*t).to_owned()).collect(),
                })
            }
            "message" => {
                if tokens.len() != 2 {
                    return Err(CoreError::MalformedCard("message"));
                }
                Ok(Card::Message { text: defossilize(tokens[1]) })
            }
            "error" => {
                if tokens.len() != 2 {
                    return Err(CoreError::MalformedCard("error"));
                }
                Ok(Card::Error { text: defossilize(tokens[1]) })
            }
            _ => Ok(Card::Unknown { line: line_str.into_owned() }),
        }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn parse_name(token: &str, keyword: &'static str) -> Result<ArtifactName> {
    if !is_name_shaped(token) {
        return Err(CoreError::MalformedCard(keyword));
    }
    ArtifactName::parse(token).map_err(|_| CoreError::MalformedCard(keyword))
}

fn parse_int(token: &str, keyword: &'static str) -> Result<u64> {
    token.parse::<u64>().map_err(|_| CoreError::MalformedCard(keyword))
}

fn parse_route(keyword: &'static str, tokens: &[&str]) -> Result<(String, String)> {
    if tokens.len() != 3 {
        return Err(CoreError::MalformedCard(keyword));
    }
    Ok((tokens[1].to_owned(), tokens[2].to_owned()))
}

fn parse_gossip(keyword: &'static str, tokens: &[&str]) -> Result<(ArtifactName, bool)> {
    match tokens.len() {
        2 => Ok((parse_name(tokens[1], keyword)?, false)),
        3 => Ok((parse_name(tokens[1], keyword)?, tokens[2] == "1")),
        _ => Err(CoreError::MalformedCard(keyword)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_one_shot, HashAlgorithm};

    fn sha1_name(data: &[u8]) -> ArtifactName {
        hash_one_shot(data, HashAlgorithm::Sha1)
    }

    #[test]
    fn parses_a_mixed_message() {
        let name = sha1_name(b"hello");
        let mut buf = Vec::new();
        Card::Pull {
            server_code: "s".repeat(40),
            project_code: "p".repeat(40),
        }
        .write(&mut buf);
        buf.extend_from_slice(b"\n");
        Card::File { name: name.clone(), delta_src: None, content: Bytes::from_static(b"hello") }
            .write(&mut buf);
        Card::Have { name: name.clone(), private: true }.write(&mut buf);
        buf.extend_from_slice(b"# trailing randomness\n");

        let mut reader = MessageReader::new(&buf);
        assert!(matches!(reader.next_card().unwrap(), Some(Card::Pull { .. })));
        match reader.next_card().unwrap() {
            Some(Card::File { name: n, delta_src: None, content }) => {
                assert_eq!(n, name);
                assert_eq!(&content[..], b"hello");
            }
            other => panic!("expected file card, got {other:?}"),
        }
        assert_eq!(
            reader.next_card().unwrap(),
            Some(Card::Have { name, private: true })
        );
        assert!(matches!(reader.next_card().unwrap(), Some(Card::Comment { .. })));
        assert_eq!(reader.next_card().unwrap(), None);
    }

    #[test]
    fn payload_may_contain_newlines_and_hash_marks() {
        let content = b"line one\n# not a card\nline three";
        let name = sha1_name(content);
        let mut buf = Vec::new();
        Card::File {
            name: name.clone(),
            delta_src: None,
            content: Bytes::copy_from_slice(content),
        }
        .write(&mut buf);
        Card::Private.write(&mut buf);

        let mut reader = MessageReader::new(&buf);
        match reader.next_card().unwrap() {
            Some(Card::File { content: got, .. }) => assert_eq!(&got[..], content),
            other => panic!("expected file card, got {other:?}"),
        }
        assert_eq!(reader.next_card().unwrap(), Some(Card::Private));
    }

    #[test]
    fn login_exposes_the_tail_for_nonce_hashing() {
        let body = b"pull x y\n# r\n";
        let mut buf = Vec::new();
        buf.extend_from_slice(b"login alice 0123 abcd\n");
        buf.extend_from_slice(body);

        let mut reader = MessageReader::new(&buf);
        match reader.next_card().unwrap() {
            Some(Card::Login { user, .. }) => assert_eq!(user, "alice"),
            other => panic!("expected login card, got {other:?}"),
        }
        assert_eq!(reader.remaining(), body);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let name = sha1_name(b"hello");
        let mut buf = Vec::new();
        buf.extend_from_slice(format!("file {name} 100\nshort").as_bytes());
        let mut reader = MessageReader::new(&buf);
        assert!(matches!(
            reader.next_card(),
            Err(CoreError::TruncatedPayload(100))
        ));
    }

    #[test]
    fn five_token_artifact_line_is_malformed() {
        let name = sha1_name(b"x");
        let line = format!("file {name} {name} 3 0\nabc");
        let mut reader = MessageReader::new(line.as_bytes());
        assert!(matches!(
            reader.next_card(),
            Err(CoreError::MalformedCard("file"))
        ));
    }

    #[test]
    fn unknown_keyword_is_preserved() {
        let mut reader = MessageReader::new(b"frobnicate 1 2 3\n");
        match reader.next_card().unwrap() {
            Some(Card::Unknown { line }) => assert_eq!(line, "frobnicate 1 2 3"),
            other => panic!("expected unknown card, got {other:?}"),
        }
    }

    #[test]
    fn message_text_round_trips_escapes() {
        let text = "pull only - not authorized to push";
        let mut buf = Vec::new();
        Card::Message { text: text.to_owned() }.write(&mut buf);
        assert!(!buf[..buf.len() - 1].contains(&b'\n'));
        let mut reader = MessageReader::new(&buf);
        assert_eq!(
            reader.next_card().unwrap(),
            Some(Card::Message { text: text.to_owned() })
        );
    }

    #[test]
    fn need_is_an_alias_for_gimme() {
        let name = sha1_name(b"alias");
        let buf = format!("need {name}\n");
        let mut reader = MessageReader::new(buf.as_bytes());
        assert_eq!(reader.next_card().unwrap(), Some(Card::Gimme { name }));
    }
}
