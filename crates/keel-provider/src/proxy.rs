//! Proxy streamer: bridges a caller-held duplex stream to a TCP port of a
//! running process.
//!
//! Each bridge owns one forwarding task that copies bytes both ways. When the
//! caller half-closes its side the process socket is half-closed too, and
//! whatever the process still sends keeps flowing back until it closes. EOF or
//! an error on the process side tears the whole bridge down at once.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Buffer of the in-process pipe between caller and forwarding task.
pub const PROXY_BUFFER: usize = 64 * 1024;

const PUMP_CHUNK: usize = 16 * 1024;

/// Spawns and counts forwarding tasks.
#[derive(Debug, Clone, Default)]
pub struct Proxy {
    active: Arc<AtomicUsize>,
}

impl Proxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of forwarding tasks still running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Dial `host:port` and bridge the connection.
    pub async fn connect(&self, host: &str, port: u16) -> ProviderResult<ProxyStream> {
        let upstream = TcpStream::connect((host, port)).await.map_err(|e| {
            warn!(%host, port, error = %e, "proxy dial failed");
            ProviderError::Io(e)
        })?;
        debug!(%host, port, "proxy connected");
        Ok(self.bridge(upstream))
    }

    /// Bridge any bidirectional stream.
    pub fn bridge<S>(&self, upstream: S) -> ProxyStream
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (caller, local) = tokio::io::duplex(PROXY_BUFFER);
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));

        let task = tokio::spawn(async move {
            let _guard = guard;
            let result = forward(local, upstream).await;
            match &result {
                Ok((up, down)) => debug!(bytes_up = up, bytes_down = down, "proxy closed"),
                Err(e) => debug!(error = %e, "proxy ended with error"),
            }
            result
        });

        ProxyStream { io: caller, task }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Caller end of a proxy bridge.
pub struct ProxyStream {
    io: DuplexStream,
    task: JoinHandle<io::Result<(u64, u64)>>,
}

impl ProxyStream {
    /// Whether the forwarding task has already torn the bridge down.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the caller end and wait for forwarding to stop.
    ///
    /// Forwarding stops once the process closes its side of the connection.
    ///
    /// Returns `(bytes_up, bytes_down)`: bytes sent to the process and bytes
    /// received from it.
    pub async fn finished(self) -> io::Result<(u64, u64)> {
        let Self { io, task } = self;
        drop(io);
        task.await.map_err(io::Error::other)?
    }
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

async fn forward<S>(local: DuplexStream, upstream: S) -> io::Result<(u64, u64)>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut up_rd, mut up_wr) = tokio::io::split(upstream);
    let (mut sent, mut received) = (0u64, 0u64);

    let result = {
        let upload = async {
            let result = pump(&mut local_rd, &mut up_wr, &mut sent).await;
            up_wr.shutdown().await?;
            result
        };
        let download = pump(&mut up_rd, &mut local_wr, &mut received);
        tokio::pin!(upload, download);

        let mut uploading = true;
        loop {
            tokio::select! {
                r = &mut upload, if uploading => {
                    uploading = false;
                    if let Err(e) = r {
                        break Err(e);
                    }
                    debug!("caller finished sending, draining process output");
                }
                // The process side decides when the bridge ends.
                r = &mut download => break r,
            }
        }
    };

    let _ = up_wr.shutdown().await;
    let _ = local_wr.shutdown().await;
    result.map(|()| (sent, received))
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, counter: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PUMP_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *counter += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn echo_server() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (mut rd, mut wr) = socket.split();
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });
        (port, handle)
    }

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let (port, _server) = echo_server().await;
        let proxy = Proxy::new();
        let mut stream = proxy.connect("127.0.0.1", port).await.unwrap();
        assert_eq!(proxy.active(), 1);

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let (up, down) = stream.finished().await.unwrap();
        assert_eq!(up, 4);
        assert_eq!(down, 4);
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn half_close_tears_down_both_directions() {
        let (port, _server) = echo_server().await;
        let proxy = Proxy::new();
        let mut stream = proxy.connect("127.0.0.1", port).await.unwrap();

        stream.write_all(b"last words").await.unwrap();
        stream.shutdown().await.unwrap();

        // The echo reply still arrives, then the read side reaches EOF.
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .expect("bridge did not close")
            .unwrap();
        assert_eq!(out, b"last words");

        tokio::time::timeout(Duration::from_secs(2), async {
            while !stream.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("forwarding task still running");
        let (up, down) = stream.finished().await.unwrap();
        assert_eq!((up, down), (10, 10));
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn slow_reply_after_half_close_is_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            socket.read_to_end(&mut request).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(b"got ").await.unwrap();
            socket.write_all(&request).await.unwrap();
        });

        let proxy = Proxy::new();
        let mut stream = proxy.connect("127.0.0.1", port).await.unwrap();
        stream.write_all(b"query").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .expect("bridge did not close")
            .unwrap();
        assert_eq!(out, b"got query");
        stream.finished().await.unwrap();
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn upstream_close_ends_caller_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"bye").await.unwrap();
        });

        let proxy = Proxy::new();
        let mut stream = proxy.connect("127.0.0.1", port).await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .expect("bridge did not close")
            .unwrap();

        assert_eq!(out, b"bye");
        let (_, down) = stream.finished().await.unwrap();
        assert_eq!(down, 3);
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn dial_failure_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let proxy = Proxy::new();
        let err = proxy.connect("127.0.0.1", port).await.err().unwrap();
        assert!(matches!(err, ProviderError::Io(_)));
        assert_eq!(proxy.active(), 0);
    }

    #[tokio::test]
    async fn bridge_works_over_in_process_streams() {
        let (upstream, mut remote) = tokio::io::duplex(1024);
        let proxy = Proxy::new();
        let mut stream = proxy.bridge(upstream);

        stream.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        drop(remote);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        stream.finished().await.unwrap();
        assert_eq!(proxy.active(), 0);
    }
}
