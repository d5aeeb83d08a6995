//! Transport abstraction: one half-duplex exchange.
//!
//! The core never touches the network directly. A transport takes a
//! complete request body and returns the complete reply body; framing,
//! compression, redirects and TLS are its problem.

use crate::error::Result;

/// One request/reply round trip.
pub trait Transport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

/// In-process transport: drives a server handler directly. Used by the
/// testkit and by integration tests to run full sessions without a
/// network.
pub struct LocalTransport<F> {
    handler: F,
}

impl<F> LocalTransport<F>
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Transport for LocalTransport<F>
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        Ok((self.handler)(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_echoes_through_the_handler() {
        let mut transport = LocalTransport::new(|req: &[u8]| {
            let mut out = b"reply to: ".to_vec();
            out.extend_from_slice(req);
            out
        });
        let reply = transport.exchange(b"ping").unwrap();
        assert_eq!(reply, b"reply to: ping");
    }
}
