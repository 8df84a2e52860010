//! ============================================================================
//! Asset Delivery - Sends the gated file to a user
//! ============================================================================
//! The asset is opened once per delivery and streamed to the platform in
//! chunks. The open file lives inside the document body, so the handle is
//! released on every exit path: after the upload, on a transport error, or
//! when the request is dropped. A missing or unreadable file is reported as
//! `AssetMissing` and never retried.
//! ============================================================================

use futures_util::stream;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use crate::platform::{ChunkStream, Document, MessagingPlatform};
use crate::types::{PlatformError, UserId};

const CHUNK_SIZE: usize = 64 * 1024;

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    AssetMissing,
}

/// Delivers a single file asset
pub struct AssetDelivery<P: MessagingPlatform> {
    platform: Arc<P>,
    path: PathBuf,
    caption: Option<String>,
}

impl<P: MessagingPlatform> AssetDelivery<P> {
    pub fn new(platform: Arc<P>, path: impl Into<PathBuf>, caption: Option<String>) -> Self {
        Self {
            platform,
            path: path.into(),
            caption,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send the asset to `user`.
    /// Not idempotent: every call uploads the file again.
    pub async fn deliver(&self, user: UserId) -> Result<DeliveryOutcome, PlatformError> {
        let (file, length) = match self.open_asset().await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Asset {} unavailable: {}", self.path.display(), e);
                return Ok(DeliveryOutcome::AssetMissing);
            }
        };

        let document = Document {
            file_name: self.file_name(),
            length,
            caption: self.caption.clone(),
            body: chunks(file),
        };
        self.platform.send_document(user, document).await?;

        info!("Delivered {} to {}", self.path.display(), user);
        Ok(DeliveryOutcome::Delivered)
    }

    async fn open_asset(&self) -> io::Result<(File, u64)> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        Ok((file, metadata.len()))
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "asset".to_string())
    }
}

/// Read `file` lazily in fixed-size chunks
fn chunks(file: File) -> ChunkStream {
    Box::pin(stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = file.read(&mut buf).await?;
        buf.truncate(read);
        let next = if read == 0 { None } else { Some((buf, file)) };
        Ok::<_, io::Error>(next)
    }))
}
