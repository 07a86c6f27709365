use core::{
    pin::Pin,
    task::{ready, Context, Poll},
};
use std::io::{ErrorKind, Read, Write};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::Config;
use crate::state_machine::Masker;

pin_project! {
    /// Asynchronous masked stream based on the `tokio` runtime.
    ///
    /// [`MaskedStream`] implements the [`AsyncRead`] and [`AsyncWrite`]
    /// traits, allowing it to be used similarly to a [`TcpStream`]: bytes
    /// written here leave the underlying transport sealed, framed and
    /// masked; bytes read here have been unmasked, reassembled and opened.
    ///
    /// [`TcpStream`]: tokio::net::TcpStream
    #[derive(Debug)]
    pub struct MaskedStream<IO> {
        stream: IO,
        masker: Masker,
        read_state: ReadState,
        write_state: WriteState,
    }
}

/// State Transition Diagram
/// ```text
///
///          |
///          V
///   +---- Read <------+
///   |      |          |
///   |      V          |
///   +--- WaitData ----+
///
/// ```
#[derive(Copy, Clone, Debug)]
enum ReadState {
    Read,
    WaitData,
}

/// State Transition Diagram
/// ```text
///
///    |
///    V
///  WaitData <---+
///    |          |
///    V          |
///   Write ------+
/// ```
#[derive(Copy, Clone, Debug)]
enum WriteState {
    WaitData,
    Write { written: usize },
}

impl<IO> MaskedStream<IO> {
    /// Creates a new [`MaskedStream`] over the underlying `stream` with the
    /// given `config`.
    ///
    /// For details on constructing and configuring `config`, refer to
    /// the [`config`] module.
    ///
    /// [`config`]: crate::config
    pub fn with_config_in(config: &Config, stream: IO) -> Self {
        Self {
            stream,
            masker: Masker::with_config(config),
            read_state: ReadState::Read,
            write_state: WriteState::WaitData,
        }
    }

    /// Returns a reference to the inner stream.
    pub fn inner_stream(&self) -> &IO {
        &self.stream
    }

    /// Returns a mutable reference to the inner stream.
    pub fn inner_stream_mut(&mut self) -> &mut IO {
        &mut self.stream
    }
}

impl<IO> AsyncRead for MaskedStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let mut me = self.project();
        loop {
            match *me.read_state {
                ReadState::Read => {
                    let mut reader = SyncReadAdapter {
                        io: &mut me.stream,
                        cx,
                    };
                    match me.masker.read_wire(&mut reader) {
                        // Read successfully; deliver buffered plaintext.
                        Ok(n) if n > 0 => *me.read_state = ReadState::WaitData,

                        // Reached EOF.
                        Ok(_) => return Poll::Ready(Ok(())),

                        // Wait for more data, pending.
                        Err(e) if e.kind() == ErrorKind::WouldBlock => return Poll::Pending,

                        // Protocol or I/O error; fatal for this stream.
                        Err(e) => return Poll::Ready(Err(e)),
                    };
                }
                ReadState::WaitData => {
                    return match me.masker.reader().read(buf.initialize_unfilled()) {
                        Ok(n) => {
                            buf.advance(n);
                            *me.read_state = ReadState::Read;
                            Poll::Ready(Ok(()))
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            // The chunk completed no frame; read again.
                            *me.read_state = ReadState::Read;
                            continue;
                        }
                        Err(e) => Poll::Ready(Err(e)),
                    };
                }
            }
        }
    }
}

impl<IO> AsyncWrite for MaskedStream<IO>
where
    IO: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut me = self.project();
        loop {
            match me.write_state {
                WriteState::WaitData => match me.masker.writer().write(buf) {
                    Ok(written) => {
                        *me.write_state = WriteState::Write { written };
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        // A previous frame is still flushing.
                        *me.write_state = WriteState::Write { written: 0 };
                    }
                    Err(e) => {
                        return Poll::Ready(Err(e));
                    }
                },
                WriteState::Write { written } => {
                    let mut writer = SyncWriteAdapter {
                        io: &mut me.stream,
                        cx,
                    };
                    return match me.masker.write_wire(&mut writer) {
                        Ok(_n) => {
                            let written = *written;
                            *me.write_state = WriteState::WaitData;
                            if written == 0 {
                                // The earlier flush finished; stage now.
                                continue;
                            }
                            Poll::Ready(Ok(written))
                        }

                        // Pending, wait for I/O.
                        Err(e) if e.kind() == ErrorKind::WouldBlock => Poll::Pending,

                        // I/O error from the wire.
                        Err(e) => Poll::Ready(Err(e)),
                    };
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        let mut me = self.project();
        match me.write_state {
            WriteState::WaitData => Poll::Ready(Ok(())),
            WriteState::Write { .. } => {
                let mut writer = SyncWriteAdapter {
                    io: &mut me.stream,
                    cx,
                };
                match me.masker.write_wire(&mut writer) {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        return Poll::Pending;
                    }
                    Err(e) => return Poll::Ready(Err(e)),
                };
                *me.write_state = WriteState::WaitData;
                Poll::Ready(Ok(()))
            }
        }
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        ready!(self.as_mut().poll_flush(cx))?;
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// An adapter that implements a [`Read`] interface for [`AsyncRead`] types
/// and an associated [`Context`].
///
/// Turns `Poll::Pending` into `WouldBlock`.
///
/// The credit goes to the [futures-rustls](https://github.com/rustls/futures-rustls)
/// project for this adapter.
struct SyncReadAdapter<'a, 'b, T> {
    pub io: &'a mut T,
    pub cx: &'a mut Context<'b>,
}

impl<T: AsyncRead + Unpin> Read for SyncReadAdapter<'_, '_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut buf = ReadBuf::new(buf);
        match Pin::new(&mut self.io).poll_read(self.cx, &mut buf) {
            Poll::Ready(Ok(())) => Ok(buf.filled().len()),
            Poll::Ready(Err(err)) => Err(err),
            Poll::Pending => Err(ErrorKind::WouldBlock.into()),
        }
    }
}

/// An adapter that implements a [`Write`] interface for [`AsyncWrite`]
/// types and an associated [`Context`].
///
/// Turns `Poll::Pending` into `WouldBlock`.
///
/// The credit goes to the [futures-rustls](https://github.com/rustls/futures-rustls)
/// project for this adapter.
struct SyncWriteAdapter<'a, 'b, T> {
    pub io: &'a mut T,
    pub cx: &'a mut Context<'b>,
}

impl<T: AsyncWrite + Unpin> Write for SyncWriteAdapter<'_, '_, T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match Pin::new(&mut self.io).poll_write(self.cx, buf) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(ErrorKind::WouldBlock.into()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match Pin::new(&mut self.io).poll_flush(self.cx) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(ErrorKind::WouldBlock.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::spawn;

    use super::*;
    use crate::crypto::{CipherKind, SharedKey};
    use crate::Layout;

    fn test_config() -> Config {
        Config::builder_with_shared_key(SharedKey::from([0u8; 32]))
            .with_cipher_kind(CipherKind::ChaCha20Poly1305)
            .with_layout(Layout::Ascii)
    }

    #[tokio::test]
    async fn test_async_read_write_echo() {
        const DATA_LEN: usize = 65536 * 4;
        let data = std::sync::Arc::new(vec![0x5Au8; DATA_LEN]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_task = spawn(async move {
            let (server_inner, _) = listener.accept().await.unwrap();
            let mut server_stream = MaskedStream::with_config_in(&test_config(), server_inner);

            let mut buf = vec![0u8; DATA_LEN];
            server_stream.read_exact(&mut buf).await.unwrap();
            server_stream.write_all(&buf).await.unwrap();
            server_stream.flush().await.unwrap();
        });

        let client_data = data.clone();
        let client_task = spawn(async move {
            let client_inner = TcpStream::connect(addr).await.unwrap();
            let mut client_stream = MaskedStream::with_config_in(&test_config(), client_inner);

            client_stream.write_all(&client_data).await.unwrap();
            client_stream.flush().await.unwrap();

            let mut buf = vec![0u8; DATA_LEN];
            client_stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf[..], &client_data[..]);
        });

        server_task.await.unwrap();
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_small_messages_arrive_intact() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = spawn(async move {
            let (inner, _) = listener.accept().await.unwrap();
            let mut stream = MaskedStream::with_config_in(&test_config(), inner);
            let mut buf = [0u8; 5];
            for expected in [&b"alpha"[..], &b"bravo"[..]] {
                stream.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, expected);
            }
        });

        let inner = TcpStream::connect(addr).await.unwrap();
        let mut stream = MaskedStream::with_config_in(&test_config(), inner);
        stream.write_all(b"alpha").await.unwrap();
        stream.flush().await.unwrap();
        stream.write_all(b"bravo").await.unwrap();
        stream.flush().await.unwrap();

        server_task.await.unwrap();
    }
}
