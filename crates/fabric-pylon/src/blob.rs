use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;

use fabric_blob::{outbound, BeginOutcome, OutboundBlob, TransferRegistry, CHUNK_SIZE};
use fabric_core::entity::DeviceId;
use fabric_core::error::{FabricError, Result};
use fabric_core::payload::{
    BlobChunkPayload, BlobContext, BlobEndPayload, BlobRequestPayload, BlobStartPayload,
};

/// Information about a completed inbound transfer, used to append the
/// `file_attachment` log entry.
#[derive(Debug, Clone)]
pub struct CompletedBlob {
    pub blob_id: String,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub path: PathBuf,
    pub conversation_id: fabric_core::entity::EntityId,
}

/// Async wrapper around the transfer registry, owned by the receiving
/// workstation. Chunk slots are index-addressed, so the event loop can fill
/// them in any order without coordination.
pub struct BlobManager {
    registry: Mutex<TransferRegistry>,
    save_dir: PathBuf,
}

impl BlobManager {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        BlobManager {
            registry: Mutex::new(TransferRegistry::new()),
            save_dir: save_dir.into(),
        }
    }

    /// Handle `blob_start`. Returns the completed info immediately on the
    /// same-device fast path, `None` while chunks are expected.
    pub async fn start(
        &self,
        payload: &BlobStartPayload,
        from: Option<DeviceId>,
    ) -> Result<Option<CompletedBlob>> {
        let outcome = self
            .registry
            .lock()
            .await
            .begin(payload, &self.save_dir, from)?;
        match outcome {
            BeginOutcome::AlreadyComplete(path) => Ok(Some(CompletedBlob {
                blob_id: payload.blob_id.clone(),
                filename: payload.filename.clone(),
                mime_type: payload.mime_type.clone(),
                total_size: payload.total_size,
                path,
                conversation_id: payload.context.conversation_id,
            })),
            BeginOutcome::Receiving => Ok(None),
        }
    }

    pub async fn chunk(&self, payload: &BlobChunkPayload) -> Result<()> {
        self.registry.lock().await.chunk(payload)
    }

    /// Handle `blob_end`: finalise the transfer and return its summary.
    pub async fn end(&self, payload: &BlobEndPayload) -> Result<CompletedBlob> {
        let mut registry = self.registry.lock().await;
        let path = registry.finish(payload)?;
        let transfer = registry
            .get(&payload.blob_id)
            .ok_or_else(|| FabricError::NotFound(format!("blob {}", payload.blob_id)))?;
        Ok(CompletedBlob {
            blob_id: transfer.blob_id.clone(),
            filename: transfer.filename.clone(),
            mime_type: transfer.mime_type.clone(),
            total_size: transfer.total_size,
            path,
            conversation_id: transfer.conversation_id,
        })
    }

    /// Handle `blob_request`: prepare the named file for a push back to the
    /// requester as a start/chunk*/end sequence.
    pub async fn request(
        &self,
        payload: &BlobRequestPayload,
        context: BlobContext,
    ) -> Result<OutboundBlob> {
        let path = match &payload.local_path {
            Some(p) => PathBuf::from(p),
            None => {
                let registry = self.registry.lock().await;
                let transfer = registry.get(&payload.blob_id).ok_or_else(|| {
                    FabricError::NotFound(format!("blob {}", payload.blob_id))
                })?;
                transfer.resolved_path().to_path_buf()
            }
        };
        if !path.exists() {
            return Err(FabricError::NotFound(format!(
                "file {} not found",
                path.display()
            )));
        }
        outbound(&path, &payload.blob_id, context, CHUNK_SIZE)
    }

    /// Drop unfinished transfers from a disconnected sender.
    pub async fn discard_from(&self, device: DeviceId) -> usize {
        self.registry.lock().await.discard_from(device)
    }

    /// Explicit eviction of stalled transfers.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        self.registry.lock().await.cleanup(max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use fabric_core::entity::EntityId;
    use tempfile::TempDir;

    fn context() -> BlobContext {
        BlobContext {
            kind: "attachment".into(),
            conversation_id: EntityId::conversation(1, 1, 2).unwrap(),
        }
    }

    fn start_payload(total: u64, chunks: u32) -> BlobStartPayload {
        BlobStartPayload {
            blob_id: "B1".into(),
            filename: "notes.txt".into(),
            mime_type: "text/plain".into(),
            total_size: total,
            chunk_size: 8,
            total_chunks: chunks,
            encoding: "base64".into(),
            context: context(),
            same_device: false,
            local_path: None,
        }
    }

    #[tokio::test]
    async fn inbound_transfer_completes_with_summary() {
        let dir = TempDir::new().unwrap();
        let manager = BlobManager::new(dir.path());

        assert!(manager.start(&start_payload(5, 1), None).await.unwrap().is_none());
        manager
            .chunk(&BlobChunkPayload {
                blob_id: "B1".into(),
                index: 0,
                data: base64::engine::general_purpose::STANDARD.encode(b"hello"),
                size: 5,
            })
            .await
            .unwrap();
        let done = manager
            .end(&BlobEndPayload {
                blob_id: "B1".into(),
                checksum: None,
                total_received: 1,
            })
            .await
            .unwrap();
        assert_eq!(done.filename, "notes.txt");
        assert_eq!(done.conversation_id, context().conversation_id);
        assert_eq!(std::fs::read(&done.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn request_pushes_back_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("out.bin");
        std::fs::write(&file, vec![7u8; 100]).unwrap();

        let manager = BlobManager::new(dir.path());
        let blob = manager
            .request(
                &BlobRequestPayload {
                    blob_id: "B2".into(),
                    filename: "out.bin".into(),
                    local_path: Some(file.to_string_lossy().into_owned()),
                },
                context(),
            )
            .await
            .unwrap();
        assert_eq!(blob.start.total_size, 100);
        assert!(!blob.chunks.is_empty());

        let missing = manager
            .request(
                &BlobRequestPayload {
                    blob_id: "B3".into(),
                    filename: "gone".into(),
                    local_path: Some(dir.path().join("gone").to_string_lossy().into_owned()),
                },
                context(),
            )
            .await;
        assert!(missing.is_err());
    }
}
