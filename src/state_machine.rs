use std::io::{self, BufRead, ErrorKind, Read, Write};

use crate::config::Config;
use crate::session::Session;
use crate::specification::PAYLOAD_CHUNK_LEN;

/// How much wire data one `read_wire` call pulls at most.
const READ_CHUNK_LEN: usize = 16384;

/// A network traffic masker providing the streaming transport.
///
/// The `Masker` is a deterministic state machine following the sans-I/O
/// principle: you provide plaintext on one side and receive disguised
/// traffic on the other, and vice versa:
///
/// ```text
///         Plaintext                        Masked Data
///         =========                        ===========
///     writer()        +---------------+      write_wire()
///                     |               |
///           +--------->               +--------->
///                     |    Masker     |
///           <---------+               <---------+
///                     |               |
///     reader()        +---------------+       read_wire()
/// ```
///
/// * Use [`read_wire`] to receive masked bytes from a peer; decoded
///   plaintext accumulates internally and is consumed through [`reader`].
///
/// * Use [`writer`] to stage plaintext, then [`write_wire`] to seal, mask
///   and send it.
///
/// Both endpoints must be configured with the same shared key and cipher.
///
/// [`read_wire`]: Masker::read_wire
/// [`write_wire`]: Masker::write_wire
/// [`reader`]: Masker::reader
/// [`writer`]: Masker::writer
#[derive(Debug)]
pub struct Masker {
    session: Session,

    /// Plaintext staged by the [`Writer`], not yet sealed.
    staged: Vec<u8>,
    /// Masked bytes being written to the wire, with a partial-write cursor.
    out_buf: Vec<u8>,
    out_pos: usize,

    /// Decoded plaintext awaiting the [`Reader`], with a consume cursor.
    received: Vec<u8>,
    consumed: usize,

    eof: bool,
}

impl Masker {
    /// Creates a new `Masker` with the specified `config`.
    ///
    /// For details on constructing and configuring `config`, refer to
    /// the [`config`] module.
    ///
    /// [`config`]: crate::config
    pub fn with_config(config: &Config) -> Self {
        Self {
            session: Session::new(&config.shared_key, config.cipher_kind, config.layout),
            staged: Vec::new(),
            out_buf: Vec::new(),
            out_pos: 0,
            received: Vec::new(),
            consumed: 0,
            eof: false,
        }
    }

    /// Reads masked data from the `wire`, returning how many bytes were
    /// read. Decoded plaintext becomes available through [`reader`].
    ///
    /// Returns `Ok(0)` once the wire reaches EOF. A partial frame left
    /// buffered at EOF is reported as an error: the peer truncated a frame.
    ///
    /// # Errors
    ///
    /// I/O errors from the `wire` (including `WouldBlock`) are recoverable;
    /// call again when the wire is readable. Errors of kind `Other` carry a
    /// protocol [`Error`] and are fatal: drop the connection.
    ///
    /// [`reader`]: Masker::reader
    /// [`Error`]: crate::Error
    pub fn read_wire(&mut self, wire: &mut dyn Read) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }

        let mut chunk = [0u8; READ_CHUNK_LEN];
        let n = wire.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
            self.session.finish_inbound()?;
            return Ok(0);
        }

        // Reclaim fully consumed plaintext before appending more.
        if self.consumed > 0 && self.consumed == self.received.len() {
            self.received.clear();
            self.consumed = 0;
        }

        let mut plaintexts = Vec::new();
        self.session.decode_inbound(&chunk[..n], &mut plaintexts)?;
        for p in plaintexts {
            self.received.extend_from_slice(&p);
        }
        Ok(n)
    }

    /// Seals and masks any staged plaintext, then writes the masked bytes
    /// to the `wire`, returning how many wire bytes were written.
    ///
    /// If called with nothing staged, an empty frame is sent; this makes
    /// explicit flushes visible to the peer.
    ///
    /// On a short write the cursor is kept; calling again resumes where the
    /// wire stopped.
    pub fn write_wire(&mut self, wire: &mut dyn Write) -> io::Result<usize> {
        if self.out_pos == self.out_buf.len() {
            let staged = core::mem::take(&mut self.staged);
            self.out_buf = self.session.encode_outbound(&staged)?;
            self.out_pos = 0;
        }

        let mut written = 0;
        while self.out_pos < self.out_buf.len() {
            let n = wire.write(&self.out_buf[self.out_pos..])?;
            if n == 0 {
                return Ok(0);
            }
            self.out_pos += n;
            written += n;
        }
        self.out_buf.clear();
        self.out_pos = 0;
        Ok(written)
    }

    /// True while masked bytes from a previous [`write_wire`] are still
    /// waiting for the wire.
    ///
    /// [`write_wire`]: Masker::write_wire
    pub fn has_pending_write(&self) -> bool {
        self.out_pos < self.out_buf.len()
    }

    /// Returns a [`Reader`] over the decoded plaintext.
    pub fn reader(&mut self) -> Reader<'_> {
        Reader(self)
    }

    /// Returns a [`Writer`] that stages plaintext for the next
    /// [`write_wire`].
    ///
    /// [`write_wire`]: Masker::write_wire
    pub fn writer(&mut self) -> Writer<'_> {
        Writer(self)
    }
}

/// A structure that implements [`Read`] and [`BufRead`] for consuming the
/// decoded plaintext of a [`Masker`].
///
/// To create a `Reader`, use the [`reader`] method.
///
/// [`reader`]: Masker::reader
#[derive(Debug)]
pub struct Reader<'a>(&'a mut Masker);

impl Reader<'_> {
    /// Number of unread plaintext bytes currently buffered.
    pub fn remaining(&self) -> usize {
        self.0.received.len() - self.0.consumed
    }

    /// True if there is unread data in the reader.
    pub fn has_remaining(&self) -> bool {
        self.remaining() != 0
    }
}

impl Read for Reader<'_> {
    /// Reads decoded plaintext.
    ///
    /// Returns `Ok(0)` only at wire EOF. With no data buffered and the
    /// wire still open, returns `WouldBlock`; call [`Masker::read_wire`]
    /// to refill.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let buffer = self.fill_buf()?;
        let k = core::cmp::min(buf.len(), buffer.len());
        buf[..k].copy_from_slice(&buffer[..k]);
        self.consume(k);
        Ok(k)
    }
}

impl BufRead for Reader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.0.consumed < self.0.received.len() {
            Ok(&self.0.received[self.0.consumed..])
        } else if self.0.eof {
            Ok(&[])
        } else {
            Err(ErrorKind::WouldBlock.into())
        }
    }

    fn consume(&mut self, amt: usize) {
        self.0.consumed = core::cmp::min(self.0.consumed + amt, self.0.received.len());
    }
}

/// A structure that implements [`Write`] for staging plaintext data.
///
/// To create a `Writer`, use the [`writer`] method.
///
/// [`writer`]: Masker::writer
#[derive(Debug)]
pub struct Writer<'a>(&'a mut Masker);

impl Writer<'_> {
    /// Number of bytes that can still be staged before the next
    /// [`Masker::write_wire`].
    ///
    /// Returns `0` while a previous write is still being flushed.
    pub fn remaining_mut(&self) -> usize {
        if self.0.has_pending_write() {
            0
        } else {
            PAYLOAD_CHUNK_LEN.saturating_sub(self.0.staged.len())
        }
    }

    /// True if there is space in the writer for more bytes.
    pub fn has_remaining_mut(&self) -> bool {
        self.remaining_mut() != 0
    }
}

impl Write for Writer<'_> {
    /// Stages plaintext for the next [`Masker::write_wire`].
    ///
    /// Returns `WouldBlock` while the previous masked frame is still being
    /// flushed or the staging buffer is full.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.remaining_mut();
        if remaining == 0 {
            return Err(ErrorKind::WouldBlock.into());
        }
        let k = core::cmp::min(buf.len(), remaining);
        self.0.staged.extend_from_slice(&buf[..k]);
        Ok(k)
    }

    /// No-op; call [`Masker::write_wire`] to send the staged data.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{CipherKind, SharedKey};
    use crate::test::MockStream;
    use crate::{Config, Layout};

    fn test_config() -> Config {
        Config::builder_with_shared_key(SharedKey::from([0u8; 32]))
            .with_cipher_kind(CipherKind::ChaCha20Poly1305)
            .with_layout(Layout::Ascii)
    }

    #[test]
    fn test_wire_round_trip_through_mock_stream() {
        let mut wire = MockStream::default();
        let mut client = Masker::with_config(&test_config());
        let mut server = Masker::with_config(&test_config());

        let msg = b"over the masked wire";
        assert_eq!(client.writer().write(msg).unwrap(), msg.len());
        client.write_wire(&mut wire).unwrap();

        server.read_wire(&mut wire).unwrap();
        let mut got = vec![0u8; msg.len()];
        server.reader().read_exact(&mut got).unwrap();
        assert_eq!(&got, msg);
    }

    #[test]
    fn test_reader_would_block_without_data() {
        let mut masker = Masker::with_config(&test_config());
        let mut buf = [0u8; 8];
        let err = masker.reader().read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_read_wire_across_partial_deliveries() {
        let mut client = Masker::with_config(&test_config());
        let mut server = Masker::with_config(&test_config());

        let mut wire = MockStream::default();
        let msg = vec![0xA5u8; 40000];
        let mut staged = 0;
        while staged < msg.len() {
            staged += client.writer().write(&msg[staged..]).unwrap();
            client.write_wire(&mut wire).unwrap();
        }

        // Feed the server in small slices via a second mock.
        let all = wire.buf.clone();
        let mut feed = MockStream::default();
        let mut delivered = 0;
        while server.reader().remaining() < msg.len() {
            if delivered < all.len() {
                let end = core::cmp::min(delivered + 777, all.len());
                feed.buf.extend_from_slice(&all[delivered..end]);
                delivered = end;
            }
            match server.read_wire(&mut feed) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let mut got = vec![0u8; msg.len()];
        server.reader().read_exact(&mut got).unwrap();
        assert_eq!(got, msg);
    }

    #[test]
    fn test_writer_blocks_while_flush_pending() {
        let mut client = Masker::with_config(&test_config());
        assert_eq!(client.writer().write(b"abc").unwrap(), 3);

        // A wire that refuses to accept bytes leaves the frame pending.
        struct FullWire;
        impl Write for FullWire {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(ErrorKind::WouldBlock.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = client.write_wire(&mut FullWire).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert!(client.has_pending_write());

        let err = client.writer().write(b"more").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        // Once the wire drains, staging reopens.
        let mut wire = MockStream::default();
        client.write_wire(&mut wire).unwrap();
        assert!(!client.has_pending_write());
        assert_eq!(client.writer().write(b"more").unwrap(), 4);
    }

    #[test]
    fn test_eof_with_truncated_frame_is_an_error() {
        let mut client = Masker::with_config(&test_config());
        let mut server = Masker::with_config(&test_config());

        let mut wire = MockStream::default();
        client.writer().write(b"cut me off").unwrap();
        client.write_wire(&mut wire).unwrap();

        // Deliver all but the last byte, then EOF.
        let partial = wire.buf[..wire.buf.len() - 5].to_vec();
        let mut feed = MockStream::default();
        feed.buf = partial;
        loop {
            match server.read_wire(&mut feed) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        feed.set_eof();
        let err = server.read_wire(&mut feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_explicit_flush_sends_empty_frame() {
        let mut client = Masker::with_config(&test_config());
        let mut server = Masker::with_config(&test_config());

        let mut wire = MockStream::default();
        let n = client.write_wire(&mut wire).unwrap();
        assert!(n > 0);

        server.read_wire(&mut wire).unwrap();
        assert_eq!(server.reader().remaining(), 0);
        assert!(!server.reader().has_remaining());
    }
}
