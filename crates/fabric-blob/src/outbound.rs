use std::path::Path;

use base64::Engine as _;

use fabric_core::error::{FabricError, Result};
use fabric_core::payload::{BlobChunkPayload, BlobContext, BlobEndPayload, BlobStartPayload};

use crate::transfer::hex_digest;

/// Transport chunk size for outbound transfers.
pub const CHUNK_SIZE: u32 = 64 * 1024;

/// A fully prepared outbound transfer: `blob_start`, every `blob_chunk`
/// in index order, and the terminal `blob_end` with checksum.
#[derive(Debug)]
pub struct OutboundBlob {
    pub start: BlobStartPayload,
    pub chunks: Vec<BlobChunkPayload>,
    pub end: BlobEndPayload,
}

/// Prepare `path` for transfer as `blob_id`. Reads the file once; the
/// checksum covers the exact bytes the chunks carry.
pub fn outbound(
    path: &Path,
    blob_id: &str,
    context: BlobContext,
    chunk_size: u32,
) -> Result<OutboundBlob> {
    if chunk_size == 0 {
        return Err(FabricError::Validation("chunk size must be non-zero".into()));
    }
    let bytes = std::fs::read(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let total_chunks = (bytes.len() as u64).div_ceil(chunk_size as u64) as u32;
    let chunks: Vec<BlobChunkPayload> = bytes
        .chunks(chunk_size as usize)
        .enumerate()
        .map(|(index, slice)| BlobChunkPayload {
            blob_id: blob_id.to_string(),
            index: index as u32,
            data: base64::engine::general_purpose::STANDARD.encode(slice),
            size: slice.len() as u32,
        })
        .collect();

    Ok(OutboundBlob {
        start: BlobStartPayload {
            blob_id: blob_id.to_string(),
            filename,
            mime_type,
            total_size: bytes.len() as u64,
            chunk_size,
            total_chunks,
            encoding: "base64".into(),
            context,
            same_device: false,
            local_path: None,
        },
        end: BlobEndPayload {
            blob_id: blob_id.to_string(),
            checksum: Some(format!("sha256:{}", hex_digest(&bytes))),
            total_received: total_chunks,
        },
        chunks,
    })
}

/// Announce a same-host transfer: only a `blob_start` is sent, carrying the
/// local path; the receiver resolves it without any chunks.
pub fn outbound_same_device(
    path: &Path,
    blob_id: &str,
    context: BlobContext,
) -> Result<BlobStartPayload> {
    let meta = std::fs::metadata(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(BlobStartPayload {
        blob_id: blob_id.to_string(),
        filename,
        mime_type,
        total_size: meta.len(),
        chunk_size: 0,
        total_chunks: 0,
        encoding: "base64".into(),
        context,
        same_device: true,
        local_path: Some(path.to_string_lossy().into_owned()),
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferRegistry;
    use fabric_core::entity::EntityId;
    use tempfile::TempDir;

    fn context() -> BlobContext {
        BlobContext {
            kind: "attachment".into(),
            conversation_id: EntityId::conversation(2, 1, 5).unwrap(),
        }
    }

    #[test]
    fn outbound_chunks_cover_the_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.png");
        let bytes: Vec<u8> = (0..100u8).cycle().take(1000).collect();
        std::fs::write(&file, &bytes).unwrap();

        let blob = outbound(&file, "B9", context(), 256).unwrap();
        assert_eq!(blob.start.total_chunks, 4);
        assert_eq!(blob.start.total_size, 1000);
        assert_eq!(blob.start.mime_type, "image/png");
        assert_eq!(blob.chunks.len(), 4);
        assert_eq!(blob.chunks[3].size, 1000 - 3 * 256);
        assert_eq!(blob.end.total_received, 4);
    }

    #[test]
    fn outbound_feeds_registry_round_trip() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let file = src_dir.path().join("report.pdf");
        let bytes: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        std::fs::write(&file, &bytes).unwrap();

        let blob = outbound(&file, "B10", context(), 1024).unwrap();

        let mut registry = TransferRegistry::new();
        registry.begin(&blob.start, dst_dir.path(), None).unwrap();
        for chunk in &blob.chunks {
            registry.chunk(chunk).unwrap();
        }
        let path = registry.finish(&blob.end).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), bytes);
    }

    #[test]
    fn empty_file_has_zero_chunks() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("empty.txt");
        std::fs::write(&file, b"").unwrap();
        let blob = outbound(&file, "B11", context(), 64).unwrap();
        assert_eq!(blob.start.total_chunks, 0);
        assert!(blob.chunks.is_empty());
    }

    #[test]
    fn same_device_announcement_carries_local_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"video").unwrap();
        let start = outbound_same_device(&file, "B12", context()).unwrap();
        assert!(start.same_device);
        assert_eq!(start.local_path.as_deref(), Some(file.to_str().unwrap()));
        assert_eq!(start.total_size, 5);
        assert_eq!(start.mime_type, "video/mp4");
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(outbound(&file, "B13", context(), 0).is_err());
    }
}
