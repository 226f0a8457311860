//! Streams one file into its partial path
//!
//! An existing partial file is resumed with a ranged request when the
//! source supports it, otherwise the transfer starts over.

use crate::engine::source::FileSource;
use crate::error::DownloadError;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) struct Transfer<'a> {
    pub source: &'a dyn FileSource,
    pub url: &'a str,
    pub partial: &'a Path,
    pub expected_size: Option<u64>,
    pub cancel: &'a CancellationToken,
    pub progress_interval: Duration,
}

impl Transfer<'_> {
    /// Run the transfer, calling `on_progress` with the byte count at most
    /// once per progress interval. Returns the number of bytes on disk.
    pub async fn run(self, mut on_progress: impl FnMut(u64)) -> Result<u64, DownloadError> {
        if let Some(parent) = self.partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut existing = match tokio::fs::metadata(self.partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if let Some(expected) = self.expected_size {
            if existing > expected {
                debug!("Discarding oversized partial {:?}", self.partial);
                tokio::fs::remove_file(self.partial).await?;
                existing = 0;
            } else if existing == expected && expected > 0 {
                // Fully written before an interruption; only verification is left
                on_progress(existing);
                return Ok(existing);
            }
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.source.fetch(self.url, existing) => response?,
        };

        let mut file = if response.resumed && existing > 0 {
            info!("Resuming {:?} from byte {}", self.partial, existing);
            OpenOptions::new()
                .append(true)
                .open(self.partial)
                .await?
        } else {
            existing = 0;
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(self.partial)
                .await?
        };

        let mut downloaded = existing;
        let mut stream = response.stream;
        let mut last_emit = Instant::now();
        on_progress(downloaded);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    file.flush().await?;
                    return Err(DownloadError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    downloaded += bytes.len() as u64;
                    if last_emit.elapsed() >= self.progress_interval {
                        on_progress(downloaded);
                        last_emit = Instant::now();
                    }
                }
                Some(Err(e)) => {
                    file.flush().await?;
                    return Err(e);
                }
                None => break,
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        on_progress(downloaded);
        Ok(downloaded)
    }
}
