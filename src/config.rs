//! Configuration for tunnel sessions and the poll session manager.
//!
//! To build a config, make three decisions in order:
//!
//! 1. Obtain the [`SharedKey`] both endpoints were provisioned with
//!    (out-of-band, or via [`Config::from_env`]).
//! 2. Choose an AEAD cipher [`CipherKind`]. Both endpoints must use the
//!    same cipher.
//! 3. Choose a hint [`Layout`]. Only the ASCII layout is fully specified;
//!    `entropy` is reserved.
//!
//! Transport tunables (upstream endpoint, idle timeout, long-poll budgets)
//! have defaults and can be adjusted on the built [`Config`].
//!
//! # Example
//!
//! ```
//! use sudokuwire::{CipherKind, Config, Layout, SharedKey};
//!
//! let config = Config::builder_with_shared_key(SharedKey::from_entropy())
//!     .with_cipher_kind(CipherKind::ChaCha20Poly1305)
//!     .with_layout(Layout::Ascii)
//!     .with_upstream("internal.example.net", 8443);
//! ```
use core::str::FromStr;
use core::time::Duration;
use std::env;

use crate::crypto::{CipherKind, SharedKey};

/// Hint encoding space of the codec.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Layout {
    /// Hints and padding stay inside printable-adjacent ASCII. The default
    /// and the only fully specified layout.
    #[default]
    Ascii,

    /// Reserved high-entropy layout; accepted by configuration and carried
    /// in session state, codec semantics follow the ASCII layout.
    Entropy,
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ascii" => Ok(Layout::Ascii),
            "entropy" => Ok(Layout::Entropy),
            other => Err(format!("unknown layout: {other}")),
        }
    }
}

/// How `upload` request bodies are encoded on the poll transport.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum UploadEncoding {
    /// Newline-separated base64 lines, matching the `stream` response
    /// encoding. The canonical choice.
    #[default]
    Base64Lines,

    /// The raw concatenation of masked bytes.
    Raw,
}

/// Configuration shared by the stream transport and the poll session
/// manager.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) shared_key: SharedKey,
    pub(crate) cipher_kind: CipherKind,
    pub(crate) layout: Layout,
    pub(crate) upstream_host: String,
    pub(crate) upstream_port: u16,
    pub(crate) session_idle_timeout: Duration,
    pub(crate) long_poll_total: Duration,
    pub(crate) long_poll_heartbeat: Duration,
    pub(crate) upload_encoding: UploadEncoding,
    pub(crate) max_sessions: usize,
}

/// A builder for creating a [`Config`] instance.
///
/// To get a [`ConfigBuilder`], use [`Config::builder_with_shared_key`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder<State> {
    state: State,
}

impl Config {
    /// Sets up a shared key.
    pub fn builder_with_shared_key(shared_key: SharedKey) -> ConfigBuilder<WantsCipher> {
        ConfigBuilder {
            state: WantsCipher { shared_key },
        }
    }

    /// Builds a config from the environment, read once at start:
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `SUDOKUWIRE_KEY` | 64 hex chars, or any string hashed with SHA-256 |
    /// | `SUDOKUWIRE_CIPHER` | `none`, `aes-128-gcm`, `chacha20-poly1305` |
    /// | `SUDOKUWIRE_LAYOUT` | `ascii`, `entropy` |
    /// | `SUDOKUWIRE_UPSTREAM_HOST` | upstream hostname |
    /// | `SUDOKUWIRE_UPSTREAM_PORT` | upstream port, default 443 |
    pub fn from_env() -> Result<Config, EnvError> {
        let key = env::var("SUDOKUWIRE_KEY").map_err(|_| EnvError::MissingKey)?;
        let mut config = Config::builder_with_shared_key(SharedKey::from_env_str(&key))
            .with_default_cipher()
            .with_default_layout();

        if let Ok(cipher) = env::var("SUDOKUWIRE_CIPHER") {
            config.cipher_kind = cipher
                .parse()
                .map_err(|e| EnvError::BadValue("SUDOKUWIRE_CIPHER", e))?;
        }
        if let Ok(layout) = env::var("SUDOKUWIRE_LAYOUT") {
            config.layout = layout
                .parse()
                .map_err(|e| EnvError::BadValue("SUDOKUWIRE_LAYOUT", e))?;
        }
        if let Ok(host) = env::var("SUDOKUWIRE_UPSTREAM_HOST") {
            config.upstream_host = host;
        }
        if let Ok(port) = env::var("SUDOKUWIRE_UPSTREAM_PORT") {
            config.upstream_port = port
                .parse()
                .map_err(|_| EnvError::BadValue("SUDOKUWIRE_UPSTREAM_PORT", "not a port".into()))?;
        }
        Ok(config)
    }

    /// Sets the upstream TCP endpoint handed to the outbound connector.
    pub fn with_upstream(mut self, host: impl Into<String>, port: u16) -> Config {
        self.upstream_host = host.into();
        self.upstream_port = port;
        self
    }

    /// Overrides the idle timeout after which sessions are evicted.
    /// Defaults to 300 seconds.
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Config {
        self.session_idle_timeout = timeout;
        self
    }

    /// Overrides the total long-poll budget (default 25 seconds) and the
    /// keepalive interval (default 5 seconds).
    pub fn with_long_poll_budget(mut self, total: Duration, heartbeat: Duration) -> Config {
        self.long_poll_total = total;
        self.long_poll_heartbeat = heartbeat;
        self
    }

    /// Selects the `upload` body encoding.
    pub fn with_upload_encoding(mut self, encoding: UploadEncoding) -> Config {
        self.upload_encoding = encoding;
        self
    }

    /// Caps the number of concurrently registered sessions.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Config {
        self.max_sessions = max_sessions;
        self
    }

    /// The upstream endpoint as a `host:port` pair.
    pub fn upstream(&self) -> (&str, u16) {
        (&self.upstream_host, self.upstream_port)
    }
}

impl ConfigBuilder<WantsCipher> {
    /// Sets up an AEAD cipher.
    ///
    /// The client and server must use the same cipher.
    pub fn with_cipher_kind(self, cipher: CipherKind) -> ConfigBuilder<WantsLayout> {
        ConfigBuilder {
            state: WantsLayout {
                shared_key: self.state.shared_key,
                cipher,
            },
        }
    }

    /// Use the default AEAD cipher (ChaCha20-Poly1305).
    pub fn with_default_cipher(self) -> ConfigBuilder<WantsLayout> {
        self.with_cipher_kind(CipherKind::default())
    }
}

impl ConfigBuilder<WantsLayout> {
    /// Sets up the hint layout.
    pub fn with_layout(self, layout: Layout) -> Config {
        Config {
            shared_key: self.state.shared_key,
            cipher_kind: self.state.cipher,
            layout,
            upstream_host: String::from("127.0.0.1"),
            upstream_port: 443,
            session_idle_timeout: Duration::from_secs(300),
            long_poll_total: Duration::from_secs(25),
            long_poll_heartbeat: Duration::from_secs(5),
            upload_encoding: UploadEncoding::default(),
            max_sessions: 1024,
        }
    }

    /// Use the default (ASCII) layout.
    pub fn with_default_layout(self) -> Config {
        self.with_layout(Layout::default())
    }
}

/// Config builder state where the caller must supply an AEAD cipher.
#[derive(Clone, Debug)]
pub struct WantsCipher {
    shared_key: SharedKey,
}

/// Config builder state where the caller must supply a hint layout.
#[derive(Clone, Debug)]
pub struct WantsLayout {
    shared_key: SharedKey,
    cipher: CipherKind,
}

/// Environment parsing failures, surfaced at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EnvError {
    /// `SUDOKUWIRE_KEY` is not set.
    MissingKey,
    /// A variable was set to an unparseable value.
    BadValue(&'static str, String),
}

impl core::fmt::Display for EnvError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EnvError::MissingKey => write!(f, "SUDOKUWIRE_KEY is not set"),
            EnvError::BadValue(var, err) => write!(f, "{var}: {err}"),
        }
    }
}

impl core::error::Error for EnvError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder_with_shared_key(SharedKey::from([0u8; 32]))
            .with_default_cipher()
            .with_default_layout();
        assert_eq!(config.cipher_kind, CipherKind::ChaCha20Poly1305);
        assert_eq!(config.layout, Layout::Ascii);
        assert_eq!(config.upstream_port, 443);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(300));
        assert_eq!(config.long_poll_total, Duration::from_secs(25));
        assert_eq!(config.long_poll_heartbeat, Duration::from_secs(5));
        assert_eq!(config.upload_encoding, UploadEncoding::Base64Lines);
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!("none".parse::<CipherKind>().unwrap(), CipherKind::None);
        assert_eq!(
            "aes-128-gcm".parse::<CipherKind>().unwrap(),
            CipherKind::Aes128Gcm
        );
        assert_eq!(
            "chacha20-poly1305".parse::<CipherKind>().unwrap(),
            CipherKind::ChaCha20Poly1305
        );
        assert!("aes-gcm".parse::<CipherKind>().is_err());

        assert_eq!("ascii".parse::<Layout>().unwrap(), Layout::Ascii);
        assert_eq!("entropy".parse::<Layout>().unwrap(), Layout::Entropy);
        assert!("binary".parse::<Layout>().is_err());
    }

    #[test]
    fn test_tunable_overrides() {
        let config = Config::builder_with_shared_key(SharedKey::from([0u8; 32]))
            .with_default_cipher()
            .with_default_layout()
            .with_upstream("upstream.test", 8443)
            .with_session_idle_timeout(Duration::from_secs(60))
            .with_long_poll_budget(Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(config.upstream(), ("upstream.test", 8443));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.long_poll_total, Duration::from_secs(10));
        assert_eq!(config.long_poll_heartbeat, Duration::from_secs(2));
    }
}
