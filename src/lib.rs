//! Sudokuwire is a traffic-obfuscating tunnel core that carries an opaque
//! byte stream between a client and an upstream TCP endpoint while
//! disguising the on-the-wire form as an innocuous ASCII dump, on top of
//! authenticated encryption of the underlying payload.
//!
//! Every frame is sealed with an AEAD, length-prefixed, and then expanded
//! by the Sudoku codec: each byte becomes four "hint" bytes (a cell value
//! and position in one of the 288 valid 4x4 Sudoku grids), shuffled and
//! interleaved with padding so the stream reads like a research-lab data
//! dump. Receivers recognize hint bytes by a bit-pattern test, fold
//! quadruples back into bytes, reassemble frames and verify the AEAD tag.
//!
//! ## Transports
//!
//! Two transport shapes are supported:
//!
//! * **Streaming**: [`Masker`] is a deterministic sans-I/O state machine:
//!   it contains no network code and is bound to any reliable, ordered
//!   stream implementing [`Read`] and [`Write`] (e.g. [`TcpStream`]).
//!   [`MaskedStream`] is the ready-to-use asynchronous wrapper implementing
//!   [`AsyncRead`] and [`AsyncWrite`] on top of tokio.
//!
//! * **Polling**: [`PollHub`] implements the HTTP-style long-poll model:
//!   short `upload` requests carry masked bytes in, a blocking `stream`
//!   request carries base64-encoded frames out with keepalive newlines,
//!   and sessions are addressed by opaque hex tokens. The HTTP routing
//!   layer itself stays outside this crate; the hub exposes typed async
//!   endpoints and never assumes HTTP.
//!
//! ## Configuration
//!
//! Both transports are set up through [`Config`]: a 32-byte [`SharedKey`]
//! distributed out-of-band, an AEAD [`CipherKind`] (ChaCha20-Poly1305 by
//! default, AES-128-GCM, or none), and a hint [`Layout`]. See the
//! [`config`] module for the builder and the environment variables read by
//! [`Config::from_env`].
//!
//! Both endpoints must use the same key, cipher and layout; the codec
//! tables are derived deterministically from the key, which is what makes
//! the hint stream decodable without any in-band negotiation.
//!
//! Note: masking is a plausibility filter, not a cipher. Confidentiality
//! and integrity come from the AEAD layer alone, and no forward secrecy or
//! replay protection across sessions is provided.
//!
//! [`Read`]: std::io::Read
//! [`Write`]: std::io::Write
//! [`TcpStream`]: std::net::TcpStream
//! [`AsyncRead`]: tokio::io::AsyncRead
//! [`AsyncWrite`]: tokio::io::AsyncWrite
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod poll;

mod chacha20;
mod codec;
mod crypto;
mod frame;
mod poly1305;
mod session;
mod specification;
mod state_machine;
mod tables;
mod tokio_stream_impl;

pub use config::{Config, Layout, UploadEncoding};
pub use crypto::{CipherKind, SharedKey};
pub use error::Error;
pub use poll::{PollHub, UpstreamEvent, UpstreamPipe};
pub use session::Session;
pub use state_machine::{Masker, Reader, Writer};
pub use tokio_stream_impl::MaskedStream;

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind, Read, Write};

    #[derive(Debug)]
    pub(crate) struct MockStream {
        pub(crate) buf: Vec<u8>,
        pub(crate) eof: bool,
    }

    impl MockStream {
        pub(crate) fn set_eof(&mut self) {
            self.buf.clear();
            self.eof = true;
        }
    }

    impl Default for MockStream {
        fn default() -> Self {
            Self {
                buf: Vec::with_capacity(65536),
                eof: false,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.eof {
                return Ok(0);
            }
            if self.buf.is_empty() {
                return Err(io::Error::new(ErrorKind::WouldBlock, "empty buffer"));
            }
            let n = core::cmp::min(buf.len(), self.buf.len());
            buf[..n].copy_from_slice(&self.buf[..n]);
            self.buf = self.buf.split_off(n);
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.eof {
                return Ok(0);
            }
            self.buf.extend(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
