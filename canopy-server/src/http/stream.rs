//! Bridges between blocking producers/consumers and HTTP bodies.
//!
//! Scanning, hashing and the delta engine are synchronous and may run for a
//! long time, so they run on the blocking pool and hand chunks to the async
//! response through a bounded channel. A slow client therefore throttles
//! the producer instead of letting output pile up in memory.

use std::io::{self, Seek, Write};

use axum::body::{Body, Bytes};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::FileError;

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 8;

/// `Write` end of a streamed response body.
///
/// Writes are buffered into chunks of up to 64 KiB; `flush` pushes the
/// current chunk out immediately. Fails with `BrokenPipe` once the client
/// has gone away.
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn send_buf(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buf()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buf()
    }
}

/// Run `produce` on the blocking pool and stream what it writes as a body.
///
/// If `produce` fails after output has started, the body is aborted so the
/// client sees a truncated transfer rather than a clean end of stream.
pub fn blocking_body<F>(what: String, produce: F) -> Body
where
    F: FnOnce(&mut ChannelWriter) -> Result<(), FileError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter {
            tx: tx.clone(),
            buf: Vec::with_capacity(CHUNK_SIZE),
        };
        let result = produce(&mut writer).and_then(|()| writer.flush().map_err(FileError::from));
        match result {
            Ok(()) => tracing::debug!("Finished {}", what),
            Err(e) if e.is_disconnect() => tracing::debug!("Client left during {}", what),
            Err(e) => {
                tracing::error!("Failed {}: {}", what, e);
                let _ = tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
            }
        }
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    Body::from_stream(stream)
}

/// Copy a request body into `sink`. Returns the number of bytes written.
pub async fn copy_body<W>(body: Body, sink: &mut W) -> Result<u64, FileError>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = body.into_data_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FileError::BadRequest(format!("reading request body: {e}")))?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(written)
}

/// Spool a request body into an anonymous temporary file, rewound to the
/// start and ready for blocking reads.
pub async fn spool_body(body: Body) -> Result<std::fs::File, FileError> {
    let mut temp = tempfile::tempfile().map_err(FileError::TempFile)?;
    let mut writer = tokio::fs::File::from_std(temp.try_clone().map_err(FileError::TempFile)?);
    copy_body(body, &mut writer).await?;
    drop(writer);
    temp.rewind().map_err(FileError::TempFile)?;
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn blocking_output_reaches_the_body() {
        let body = blocking_body("test output".into(), |out| {
            for i in 0..10_000u32 {
                writeln!(out, "line {i}")?;
            }
            Ok(())
        });
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 10_000);
        assert!(text.ends_with("line 9999\n"));
    }

    #[tokio::test]
    async fn producer_failure_aborts_the_body() {
        let body = blocking_body("failing output".into(), |out| {
            out.write_all(b"partial")?;
            out.flush()?;
            Err(FileError::BadRequest("boom".into()))
        });
        assert!(axum::body::to_bytes(body, usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn dropped_body_stops_the_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let body = blocking_body("endless output".into(), move |out| {
            let chunk = vec![7u8; CHUNK_SIZE];
            let err = loop {
                if let Err(e) = out.write_all(&chunk).and_then(|()| out.flush()) {
                    break FileError::from(e);
                }
            };
            let _ = done_tx.send(err.is_disconnect());
            Err(err)
        });

        let mut stream = body.into_data_stream();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(stream);

        assert!(done_rx.await.unwrap());
    }

    #[tokio::test]
    async fn spooled_body_is_rewound() {
        let payload = vec![9u8; 200_000];
        let mut file = spool_body(Body::from(payload.clone())).await.unwrap();
        let mut back = Vec::new();
        file.read_to_end(&mut back).unwrap();
        assert_eq!(back, payload);
    }
}
