//! Local staging of archive bytes before upload.
//!
//! The archive arrives as a stream of unknown length. Servers reject or
//! mishandle chunked PUTs, so the stream is written to a temporary file first
//! and uploaded from there with an exact `Content-Length`.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, trace};
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Failure while staging an archive locally.
#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    /// The temporary file could not be created or written.
    #[error("cannot write spool file: {0}")]
    Staging(#[source] io::Error),

    /// The producer of the archive bytes failed.
    #[error("archive source failed after {written} bytes: {source}")]
    Source {
        written: u64,
        #[source]
        source: io::Error,
    },
}

/// A fully written spool file.
///
/// The file is removed when the handle is released or dropped, whichever
/// happens first.
#[derive(Debug)]
pub struct SpoolHandle {
    temp: NamedTempFile,
    len: u64,
}

impl SpoolHandle {
    /// Number of bytes spooled.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Open the spooled bytes for reading from the start.
    pub async fn open(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.temp.path()).await
    }

    /// Remove the spool file.
    pub fn release(self) -> io::Result<()> {
        let path = self.temp.path().to_path_buf();
        self.temp.close()?;
        trace!("Released spool file {}", path.display());
        Ok(())
    }
}

/// Drain `source` into a new temporary file.
///
/// On any error the partially written file is removed before returning.
pub async fn spool<S>(source: S, spool_dir: Option<&Path>) -> Result<SpoolHandle, SpoolError>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let temp = match spool_dir {
        Some(dir) => tempfile::Builder::new()
            .prefix(".dav-spool-")
            .tempfile_in(dir),
        None => tempfile::Builder::new().prefix(".dav-spool-").tempfile(),
    }
    .map_err(SpoolError::Staging)?;

    let std_file = temp.reopen().map_err(SpoolError::Staging)?;
    let mut file = tokio::fs::File::from_std(std_file);
    let mut written: u64 = 0;

    futures::pin_mut!(source);
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(|source| SpoolError::Source { written, source })?;
        file.write_all(&chunk).await.map_err(SpoolError::Staging)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(SpoolError::Staging)?;
    file.sync_all().await.map_err(SpoolError::Staging)?;

    debug!("Spooled {} bytes to {}", written, temp.path().display());
    Ok(SpoolHandle { temp, len: written })
}

/// Drain an [`AsyncRead`] into a new temporary file.
pub async fn spool_reader<R>(reader: R, spool_dir: Option<&Path>) -> Result<SpoolHandle, SpoolError>
where
    R: AsyncRead,
{
    spool(ReaderStream::new(reader), spool_dir).await
}
