//! Blocking HTTP transport.
//!
//! Requests POST to a single endpoint with the protocol content type.
//! Bodies travel zlib-compressed unless compression is turned off; the
//! reply's content type says whether it needs inflating. Up to 20
//! redirects are followed, like mainstream browsers.

use std::io::{Read, Write};
use std::time::Duration;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Result, SyncError};
use crate::transport::Transport;

/// Content type for zlib-compressed protocol bodies.
pub const CONTENT_TYPE: &str = "application/x-artisync";
/// Content type for plain protocol bodies.
pub const CONTENT_TYPE_UNCOMPRESSED: &str = "application/x-artisync-uncompressed";

const MAX_REDIRECTS: u32 = 20;

/// HTTP POST transport over a blocking agent.
pub struct HttpTransport {
    agent: ureq::Agent,
    url: String,
    compress: bool,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .redirects(MAX_REDIRECTS)
            .timeout(Duration::from_secs(120))
            .build();
        Self { agent, url: url.into(), compress: true }
    }

    /// Send bodies uncompressed (the NOCOMPRESS flag).
    pub fn without_compression(mut self) -> Self {
        self.compress = false;
        self
    }
}

impl Transport for HttpTransport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let (body, content_type) = if self.compress {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(request)
                .and_then(|_| enc.finish())
                .map(|compressed| (compressed, CONTENT_TYPE))
                .map_err(|e| SyncError::Transport(format!("deflate failed: {e}")))?
        } else {
            (request.to_vec(), CONTENT_TYPE_UNCOMPRESSED)
        };

        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", content_type)
            .send_bytes(&body)
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let compressed_reply = response.content_type() != CONTENT_TYPE_UNCOMPRESSED;
        let mut raw = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut raw)
            .map_err(|e| SyncError::Transport(format!("short read: {e}")))?;

        if compressed_reply {
            let mut plain = Vec::new();
            ZlibDecoder::new(&raw[..])
                .read_to_end(&mut plain)
                .map_err(|e| SyncError::Transport(format!("inflate failed: {e}")))?;
            Ok(plain)
        } else {
            Ok(raw)
        }
    }
}
