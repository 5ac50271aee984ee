//! Streaming artifact download with all-or-nothing file placement.
//!
//! Bytes are written to a sibling `*.part` file and renamed over the
//! destination only after the whole body has been flushed and synced. On any
//! error the partial file is removed, so an existing file at the destination
//! is always a complete artifact.

use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

/// Suffix appended to the destination while a download is in flight.
pub const PART_SUFFIX: &str = "part";

/// Path of the in-flight file for `destination`.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PART_SUFFIX);
    destination.with_file_name(name)
}

/// Write every chunk of `body` to `destination`.
///
/// Parent directories are created as needed. Returns the number of bytes
/// written. `E` is the chunk error type of the source stream.
pub async fn write_atomically<S, B, E>(body: S, destination: &Path) -> Result<u64, DownloadError<E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let part = part_path(destination);
    match stream_to(body, &part).await {
        Ok(written) => {
            if let Err(e) = tokio::fs::rename(&part, destination).await {
                remove_quietly(&part).await;
                return Err(e.into());
            }
            Ok(written)
        }
        Err(e) => {
            remove_quietly(&part).await;
            Err(e)
        }
    }
}

async fn stream_to<S, B, E>(body: S, part: &Path) -> Result<u64, DownloadError<E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut body = std::pin::pin!(body);
    let mut file = tokio::fs::File::create(part).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(DownloadError::Source)?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await?;
        written += bytes.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

/// Errors from [`write_atomically`].
#[derive(Debug, thiserror::Error)]
pub enum DownloadError<E> {
    /// The body stream yielded an error mid-transfer.
    #[error("download interrupted: {0}")]
    Source(E),

    /// Writing to the local filesystem failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
