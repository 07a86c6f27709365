//! Per-tunnel cryptographic and framing state.
//!
//! A [`Session`] owns both directions of one tunnel: the send path
//! (seal -> length prefix -> mask) and the receive path
//! (unmask -> reassemble -> open). It is a plain value with no hidden
//! singletons; the codec tables it borrows are shared read-only.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::codec::{HintDecoder, MaskEncoder};
use crate::config::Layout;
use crate::crypto::{CipherKind, FrameCrypter, SharedKey};
use crate::error::{Error, ProtocolState};
use crate::frame::{encode_frame, FrameAssembler};
use crate::specification::{MASK_OUTPUT_CEILING, PAYLOAD_CHUNK_LEN};
use crate::tables::CodecTables;

/// State of one tunnel.
///
/// Any decode or crypto failure poisons the session: it flips to closed and
/// every subsequent operation reports [`ProtocolState::SessionClosed`].
#[derive(Debug)]
pub struct Session {
    sealer: FrameCrypter,
    opener: FrameCrypter,
    mask: MaskEncoder,
    unmask: HintDecoder,
    assembler: FrameAssembler,
    layout: Layout,

    /// Masked frames sealed for the client, awaiting a poll-transport drain.
    ready: VecDeque<Vec<u8>>,
    closed: bool,
    last_activity: Instant,
}

impl Session {
    /// Creates a session, deriving (or fetching the cached) codec tables
    /// for `key`.
    pub fn new(key: &SharedKey, cipher: CipherKind, layout: Layout) -> Self {
        let tables = CodecTables::for_key(key.as_bytes());
        Self {
            sealer: FrameCrypter::new(cipher, key),
            opener: FrameCrypter::new(cipher, key),
            mask: MaskEncoder::new(Arc::clone(&tables), key.as_bytes()),
            unmask: HintDecoder::new(tables),
            assembler: FrameAssembler::new(),
            layout,
            ready: VecDeque::new(),
            closed: false,
            last_activity: Instant::now(),
        }
    }

    /// Turns plaintext into ready-to-send masked bytes.
    ///
    /// Plaintext is sliced into frames of at most 16 KiB so one frame's mask
    /// expansion stays under the per-call ceiling; the slices stay in order,
    /// preserving the byte stream.
    pub fn encode_outbound(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_open()?;
        let mut out = Vec::new();
        // An empty write still produces one (empty) frame, which keeps
        // explicit flushes visible on the wire.
        let mut chunks = plaintext.chunks(PAYLOAD_CHUNK_LEN);
        let first = chunks.next().unwrap_or(&[]);
        self.encode_one_frame(first, &mut out)?;
        for chunk in chunks {
            self.encode_one_frame(chunk, &mut out)?;
        }
        self.touch();
        Ok(out)
    }

    fn encode_one_frame(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        let body = self.sealer.seal(chunk).map_err(|e| self.poison(e))?;
        let framed = encode_frame(&body);
        let masked = self
            .mask
            .mask(&framed, MASK_OUTPUT_CEILING)
            .map_err(|e| self.poison(e))?;
        out.extend_from_slice(&masked);
        Ok(())
    }

    /// Feeds masked transport bytes, appending each recovered plaintext to
    /// `out` in frame order.
    ///
    /// A partial frame is not an error; its bytes stay buffered for the
    /// next call.
    pub fn decode_inbound(&mut self, masked: &[u8], out: &mut Vec<Vec<u8>>) -> Result<(), Error> {
        self.check_open()?;

        let mut unmasked = Vec::new();
        self.unmask.unmask(masked, &mut unmasked);
        self.assembler.feed(&unmasked);

        while let Some(body) = self.assembler.next_frame() {
            let plaintext = self.opener.open(&body).map_err(|e| self.poison(e))?;
            out.push(plaintext);
        }
        self.touch();
        Ok(())
    }

    /// Called when the inbound transport ends; leftover buffered bytes mean
    /// the peer truncated a frame.
    pub fn finish_inbound(&mut self) -> Result<(), Error> {
        self.assembler.finish().map_err(|e| self.poison(e))?;
        Ok(())
    }

    /// Seals plaintext and parks the masked frames on the ready queue for a
    /// poll-transport drain. Returns how many frames were enqueued.
    pub fn push_ready(&mut self, plaintext: &[u8]) -> Result<usize, Error> {
        self.check_open()?;
        let mut pushed = 0;
        let mut chunks = plaintext.chunks(PAYLOAD_CHUNK_LEN);
        let first = chunks.next().unwrap_or(&[]);
        let mut frame = Vec::new();
        self.encode_one_frame(first, &mut frame)?;
        self.ready.push_back(frame);
        pushed += 1;
        for chunk in chunks {
            let mut frame = Vec::new();
            self.encode_one_frame(chunk, &mut frame)?;
            self.ready.push_back(frame);
            pushed += 1;
        }
        self.touch();
        Ok(pushed)
    }

    /// Drains up to `max` ready frames, oldest first.
    pub fn take_ready(&mut self, max: usize) -> Vec<Vec<u8>> {
        let n = core::cmp::min(max, self.ready.len());
        self.ready.drain(..n).collect()
    }

    /// Frames currently parked for the client.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Marks the session closed and drains its queues. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
        self.ready.clear();
    }

    /// Whether the session has been closed (explicitly or by poisoning).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The configured hint layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Time since the session last processed data.
    pub fn idle_for(&self) -> core::time::Duration {
        self.last_activity.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Counter of the most recently sealed frame (1-based once traffic has
    /// flowed).
    pub fn send_counter(&self) -> u64 {
        self.sealer.counter()
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(ProtocolState::SessionClosed.into());
        }
        Ok(())
    }

    fn poison(&mut self, err: impl Into<Error>) -> Error {
        self.close();
        err.into()
    }
}
