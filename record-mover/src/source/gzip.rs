use std::io::{self, Read};

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use tokio::{io::AsyncRead, sync::mpsc};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

const CHUNK_SIZE: usize = 8192;
const CHUNK_QUEUE_DEPTH: usize = 16;

/// Decompress a gzip byte stream.
///
/// flate2 is blocking, so decoding runs on the blocking pool and hands decompressed
/// chunks back over a small channel. Concatenated gzip members are decoded as one
/// stream. A decode error is delivered in-band as the next read error.
pub fn decode<R>(reader: R) -> impl AsyncRead + Send + Unpin
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHUNK_QUEUE_DEPTH);
    let bridge = SyncIoBridge::new(reader);

    tokio::task::spawn_blocking(move || {
        let mut decoder = MultiGzDecoder::new(bridge);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            match decoder.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx
                        .blocking_send(Ok(Bytes::copy_from_slice(&buffer[..n])))
                        .is_err()
                    {
                        // Reader went away, nothing left to decode for.
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if tx.blocking_send(Err(e)).is_err() {
                        debug!("gzip reader dropped before decode error was delivered");
                    }
                    break;
                }
            }
        }
    });

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    StreamReader::new(Box::pin(chunks))
}
