//! Adapters between axum bodies and tokio byte streams.

use std::io;

use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const CHUNK: usize = 16 * 1024;
const BODY_BUFFER: usize = 64 * 1024;

/// Stream everything `reader` yields as a response body.
///
/// The body ends at EOF, or right after the first read error.
pub(crate) fn reader_body<R>(reader: R) -> Body
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunks = futures_util::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; CHUNK];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<Bytes, io::Error>(Bytes::from(buf)), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    Body::from_stream(chunks)
}

/// Copy a request body into `writer`, then shut the writer down.
pub(crate) async fn pump_body<W>(body: Body, writer: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut chunks = body.into_data_stream();
    let mut total = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(io::Error::other)?;
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    writer.shutdown().await?;
    Ok(total)
}

/// Expose a request body as an `AsyncRead`.
///
/// The returned task reports whether the whole body arrived; a reader that
/// hits EOF early must check it before trusting what it read.
pub(crate) fn body_reader(body: Body) -> (DuplexStream, JoinHandle<io::Result<u64>>) {
    let (reader, mut writer) = tokio::io::duplex(BODY_BUFFER);
    let task = tokio::spawn(async move { pump_body(body, &mut writer).await });
    (reader, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_body_yields_all_bytes() {
        let data = vec![42u8; 3 * CHUNK + 5];
        let body = reader_body(std::io::Cursor::new(data.clone()));
        let collected = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(collected.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn body_reader_round_trips_request_bytes() {
        let (mut reader, task) = body_reader(Body::from("uploaded bytes"));
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "uploaded bytes");
        assert_eq!(task.await.unwrap().unwrap(), 14);
    }
}
