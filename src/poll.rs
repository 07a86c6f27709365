//! Poll session manager for the HTTP-style long-poll transport.
//!
//! The manager exposes the five poll endpoints (`session`, `upload`,
//! `stream`, `fin`, `close`) as typed async methods; the HTTP routing layer
//! in front of it maps them to paths and status codes. Nothing here assumes
//! HTTP.
//!
//! Per-session state lives behind one mutex and is never held across an
//! await. The long-poll wake-up is a `tokio::sync::Notify` per session: one
//! producer, one consumer, fires at most once per notify, and a spurious
//! wake with an empty queue is handled by looping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::{rngs::OsRng, TryRngCore};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::config::{Config, UploadEncoding};
use crate::error::{Error, MalformedInput, ProtocolState, ResourceExhausted};
use crate::session::Session;
use crate::specification::TOKEN_LEN;

/// Backpressure bound on a session's ready-to-read queue.
const READY_QUEUE_BOUND: usize = 64;

/// Frames drained per long-poll wakeup.
const STREAM_DRAIN_MAX: usize = 64;

/// Depth of the per-session upstream event channel.
const UPSTREAM_CHANNEL_DEPTH: usize = 32;

/// Client-to-upstream traffic for one session, consumed by the outbound
/// TCP connector.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// Decoded plaintext to write to the upstream socket.
    Data(Vec<u8>),
    /// The client half-closed its write direction.
    Fin,
}

/// The upstream-facing end of a session: the connector reads events from
/// `events` and feeds upstream bytes back via [`PollHub::push_downstream`].
/// The channel closing means the session is gone.
#[derive(Debug)]
pub struct UpstreamPipe {
    /// Token of the owning session.
    pub token: String,
    /// Ordered client-to-upstream events.
    pub events: mpsc::Receiver<UpstreamEvent>,
}

#[derive(Debug)]
struct PollSession {
    inner: Mutex<Inner>,
    /// Wakes the long-poll when a frame becomes ready.
    data_ready: Notify,
    /// Wakes a blocked downstream push when the queue drains.
    space: Notify,
}

#[derive(Debug)]
struct Inner {
    session: Session,
    upstream: Option<mpsc::Sender<UpstreamEvent>>,
    half_closed: bool,
}

/// Registry and endpoint surface of the poll transport.
#[derive(Debug)]
pub struct PollHub {
    config: Config,
    sessions: Mutex<HashMap<String, Arc<PollSession>>>,
}

impl PollHub {
    /// Creates an empty hub; sessions are added through [`open_session`].
    ///
    /// [`open_session`]: PollHub::open_session
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// `session` endpoint: allocates a session and returns its opaque token
    /// together with the upstream-facing pipe.
    pub fn open_session(&self) -> Result<(String, UpstreamPipe), Error> {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if sessions.len() >= self.config.max_sessions {
            return Err(ResourceExhausted::RegistryFull.into());
        }

        let mut raw = [0u8; TOKEN_LEN];
        OsRng
            .try_fill_bytes(&mut raw)
            .expect("system random source failure");
        let token = hex::encode(raw);

        let (tx, rx) = mpsc::channel(UPSTREAM_CHANNEL_DEPTH);
        let entry = Arc::new(PollSession {
            inner: Mutex::new(Inner {
                session: Session::new(
                    &self.config.shared_key,
                    self.config.cipher_kind,
                    self.config.layout,
                ),
                upstream: Some(tx),
                half_closed: false,
            }),
            data_ready: Notify::new(),
            space: Notify::new(),
        });
        sessions.insert(token.clone(), entry);
        debug!(token = %token, "session opened");

        Ok((
            token.clone(),
            UpstreamPipe { token, events: rx },
        ))
    }

    /// `upload` endpoint: accepts masked bytes from the client, decodes
    /// them, and forwards the recovered plaintext upstream in order.
    pub async fn upload(&self, token: &str, body: &[u8]) -> Result<(), Error> {
        let entry = self.lookup(token)?;

        let masked = match self.config.upload_encoding {
            UploadEncoding::Raw => body.to_vec(),
            UploadEncoding::Base64Lines => {
                let mut masked = Vec::new();
                for line in body.split(|&b| b == b'\n') {
                    if line.is_empty() {
                        continue;
                    }
                    let decoded = BASE64.decode(line).map_err(|_| {
                        self.discard(token);
                        Error::from(MalformedInput::BadLineEncoding)
                    })?;
                    masked.extend_from_slice(&decoded);
                }
                masked
            }
        };

        let (plaintexts, upstream) = {
            let mut inner = entry.inner.lock().expect("session poisoned");
            if inner.half_closed {
                return Err(ProtocolState::SessionClosed.into());
            }
            let mut plaintexts = Vec::new();
            if let Err(e) = inner.session.decode_inbound(&masked, &mut plaintexts) {
                drop(inner);
                warn!(token = %token, error = %e, "upload decode failed");
                self.discard(token);
                return Err(e);
            }
            (plaintexts, inner.upstream.clone())
        };

        let Some(upstream) = upstream else {
            return Err(ProtocolState::SessionClosed.into());
        };
        for plaintext in plaintexts {
            if upstream.send(UpstreamEvent::Data(plaintext)).await.is_err() {
                self.discard(token);
                return Err(Error::TransportFailure);
            }
        }
        Ok(())
    }

    /// Feeds upstream-to-client bytes into the session's ready queue,
    /// waking any pending long-poll. Suspends while the queue is at its
    /// backpressure bound.
    pub async fn push_downstream(&self, token: &str, data: &[u8]) -> Result<(), Error> {
        let entry = self.lookup(token)?;
        loop {
            {
                let mut inner = entry.inner.lock().expect("session poisoned");
                if inner.session.is_closed() {
                    return Err(ProtocolState::SessionClosed.into());
                }
                if inner.session.ready_len() < READY_QUEUE_BOUND {
                    inner.session.push_ready(data)?;
                    entry.data_ready.notify_one();
                    return Ok(());
                }
            }
            entry.space.notified().await;
        }
    }

    /// `stream` endpoint: the long poll.
    ///
    /// Ready frames drain immediately as base64 lines; with none available
    /// the handler suspends on the session's notify, emitting a bare `\n`
    /// keepalive at every heartbeat interval, and ends the response once
    /// the total budget elapses (the client then reconnects).
    pub async fn stream(&self, token: &str, out: mpsc::Sender<Vec<u8>>) -> Result<(), Error> {
        let entry = self.lookup(token)?;
        let deadline = Instant::now() + self.config.long_poll_total;

        loop {
            let (frames, closed) = {
                let mut inner = entry.inner.lock().expect("session poisoned");
                (
                    inner.session.take_ready(STREAM_DRAIN_MAX),
                    inner.session.is_closed(),
                )
            };

            if !frames.is_empty() {
                entry.space.notify_one();
                for frame in frames {
                    let mut line = BASE64.encode(&frame).into_bytes();
                    line.push(b'\n');
                    if out.send(line).await.is_err() {
                        // Client went away mid-response.
                        return Err(Error::TransportFailure);
                    }
                }
                continue;
            }

            if closed || Instant::now() >= deadline {
                return Ok(());
            }

            let heartbeat = sleep(self.config.long_poll_heartbeat);
            tokio::select! {
                _ = entry.data_ready.notified() => {}
                _ = heartbeat => {
                    if out.send(vec![b'\n']).await.is_err() {
                        return Err(Error::TransportFailure);
                    }
                }
            }
        }
    }

    /// `fin` endpoint: half-closes the client-to-upstream direction.
    pub async fn fin(&self, token: &str) -> Result<(), Error> {
        let entry = self.lookup(token)?;
        let upstream = {
            let mut inner = entry.inner.lock().expect("session poisoned");
            inner.half_closed = true;
            inner.session.touch();
            inner.upstream.take()
        };
        if let Some(upstream) = upstream {
            // Best-effort: the connector may already be gone.
            let _ = upstream.send(UpstreamEvent::Fin).await;
        }
        Ok(())
    }

    /// `close` endpoint: tears the session down and invalidates its token.
    pub fn close(&self, token: &str) -> Result<(), Error> {
        if !self.discard(token) {
            return Err(ProtocolState::UnknownToken.into());
        }
        Ok(())
    }

    /// Evicts every session idle longer than the configured timeout.
    pub fn evict_idle(&self) -> usize {
        let stale: Vec<String> = {
            let sessions = self.sessions.lock().expect("registry poisoned");
            sessions
                .iter()
                .filter(|(_, entry)| {
                    let inner = entry.inner.lock().expect("session poisoned");
                    inner.session.idle_for() >= self.config.session_idle_timeout
                })
                .map(|(token, _)| token.clone())
                .collect()
        };
        for token in &stale {
            debug!(token = %token, "evicting idle session");
            self.discard(token);
        }
        stale.len()
    }

    /// Spawns the background idle sweep.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        let interval = (hub.config.session_idle_timeout / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                hub.evict_idle();
            }
        })
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("registry poisoned").len()
    }

    fn lookup(&self, token: &str) -> Result<Arc<PollSession>, Error> {
        self.sessions
            .lock()
            .expect("registry poisoned")
            .get(token)
            .cloned()
            .ok_or_else(|| ProtocolState::UnknownToken.into())
    }

    /// Removes a session, closing it and waking both waiters. Returns
    /// whether the token existed.
    fn discard(&self, token: &str) -> bool {
        let entry = self
            .sessions
            .lock()
            .expect("registry poisoned")
            .remove(token);
        let Some(entry) = entry else {
            return false;
        };
        {
            let mut inner = entry.inner.lock().expect("session poisoned");
            inner.session.close();
            // Dropping the sender ends the connector's event stream.
            inner.upstream = None;
        }
        entry.data_ready.notify_one();
        entry.space.notify_one();
        debug!(token = %token, "session closed");
        true
    }
}
