use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::Engine as _;
use sha2::{Digest, Sha256};

use fabric_core::entity::{DeviceId, EntityId};
use fabric_core::error::{FabricError, Result};
use fabric_core::io::{atomic_write, ensure_dir};
use fabric_core::payload::{BlobChunkPayload, BlobEndPayload, BlobStartPayload};

// ─── Transfer ─────────────────────────────────────────────────────────────

/// One in-flight (or just-completed) inbound transfer.
///
/// Chunks land in a pre-sized slot array indexed by sequence number, so out
/// of order arrival needs no locking or reordering.
#[derive(Debug)]
pub struct Transfer {
    pub blob_id: String,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub conversation_id: EntityId,
    pub save_path: PathBuf,
    pub from: Option<DeviceId>,
    chunks: Vec<Option<Vec<u8>>>,
    pub received_count: u32,
    pub completed: bool,
    /// Set when the same-device fast path was used.
    pub local_path: Option<PathBuf>,
    started_at: Instant,
}

impl Transfer {
    /// The final on-disk location: the local path for same-device
    /// transfers, the assembled save path otherwise.
    pub fn resolved_path(&self) -> &Path {
        self.local_path.as_deref().unwrap_or(&self.save_path)
    }
}

/// Outcome of [`TransferRegistry::begin`].
#[derive(Debug, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Same-device fast path: the file already exists locally and no
    /// chunks will be sent.
    AlreadyComplete(PathBuf),
    /// A receive slot was created; chunks are expected.
    Receiving,
}

// ─── TransferRegistry ─────────────────────────────────────────────────────

/// All transfers owned by this receiver, keyed by blob id.
///
/// Stalled transfers are never evicted automatically; callers wire up
/// [`TransferRegistry::cleanup`] explicitly.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: HashMap<String, Transfer>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an announced transfer. `save_dir` is the receiver's blob
    /// root; the per-conversation directory beneath it is created here.
    pub fn begin(
        &mut self,
        start: &BlobStartPayload,
        save_dir: &Path,
        from: Option<DeviceId>,
    ) -> Result<BeginOutcome> {
        if self.transfers.contains_key(&start.blob_id) {
            return Err(FabricError::Conflict(format!(
                "transfer {} already in progress",
                start.blob_id
            )));
        }
        if start.encoding != "base64" {
            return Err(FabricError::Validation(format!(
                "unsupported encoding '{}'",
                start.encoding
            )));
        }

        // Same-host fast path: the sender and receiver share a filesystem.
        if start.same_device {
            if let Some(local) = &start.local_path {
                let local = PathBuf::from(local);
                if local.exists() {
                    self.transfers.insert(
                        start.blob_id.clone(),
                        Transfer {
                            blob_id: start.blob_id.clone(),
                            filename: start.filename.clone(),
                            mime_type: start.mime_type.clone(),
                            total_size: start.total_size,
                            total_chunks: 0,
                            conversation_id: start.context.conversation_id,
                            save_path: local.clone(),
                            from,
                            chunks: Vec::new(),
                            received_count: 0,
                            completed: true,
                            local_path: Some(local.clone()),
                            started_at: Instant::now(),
                        },
                    );
                    return Ok(BeginOutcome::AlreadyComplete(local));
                }
                tracing::warn!(
                    blob_id = %start.blob_id,
                    path = %local.display(),
                    "same-device path missing; falling back to chunked transfer"
                );
            }
        }

        let conv_dir = save_dir.join(start.context.conversation_id.raw().to_string());
        ensure_dir(&conv_dir)?;
        let save_path = conv_dir.join(sanitize_filename(&start.filename));

        self.transfers.insert(
            start.blob_id.clone(),
            Transfer {
                blob_id: start.blob_id.clone(),
                filename: start.filename.clone(),
                mime_type: start.mime_type.clone(),
                total_size: start.total_size,
                total_chunks: start.total_chunks,
                conversation_id: start.context.conversation_id,
                save_path,
                from,
                chunks: vec![None; start.total_chunks as usize],
                received_count: 0,
                completed: false,
                local_path: None,
                started_at: Instant::now(),
            },
        );
        Ok(BeginOutcome::Receiving)
    }

    /// Store one chunk. Indices may arrive in any order; a duplicate index
    /// overwrites without double-counting.
    pub fn chunk(&mut self, payload: &BlobChunkPayload) -> Result<()> {
        let transfer = self
            .transfers
            .get_mut(&payload.blob_id)
            .ok_or_else(|| FabricError::NotFound(format!("blob {}", payload.blob_id)))?;

        if payload.index >= transfer.total_chunks {
            return Err(FabricError::Validation(format!(
                "chunk index {} out of range 0..{}",
                payload.index, transfer.total_chunks
            )));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&payload.data)
            .map_err(|e| FabricError::Validation(format!("chunk {}: {e}", payload.index)))?;

        let slot = &mut transfer.chunks[payload.index as usize];
        if slot.is_none() {
            transfer.received_count += 1;
        }
        *slot = Some(bytes);
        Ok(())
    }

    /// Finalise a transfer: verify completeness and checksum, write the
    /// assembled bytes atomically, clear the slot array.
    ///
    /// A checksum mismatch discards the transfer; nothing is written.
    pub fn finish(&mut self, payload: &BlobEndPayload) -> Result<PathBuf> {
        let transfer = self
            .transfers
            .get_mut(&payload.blob_id)
            .ok_or_else(|| FabricError::NotFound(format!("blob {}", payload.blob_id)))?;

        if transfer.completed {
            // Same-device transfers complete at begin; finish is a no-op.
            return Ok(transfer.resolved_path().to_path_buf());
        }

        if transfer.received_count != transfer.total_chunks {
            return Err(FabricError::Validation(format!(
                "Missing chunks {}/{}",
                transfer.received_count, transfer.total_chunks
            )));
        }

        let mut assembled = Vec::with_capacity(transfer.total_size as usize);
        for slot in &transfer.chunks {
            assembled.extend_from_slice(slot.as_deref().unwrap_or_default());
        }

        if let Some(checksum) = &payload.checksum {
            let expected = checksum
                .strip_prefix("sha256:")
                .ok_or_else(|| {
                    FabricError::Validation(format!("unsupported checksum '{checksum}'"))
                })?
                .to_ascii_lowercase();
            let actual = hex_digest(&assembled);
            if actual != expected {
                self.transfers.remove(&payload.blob_id);
                return Err(FabricError::Checksum { expected, actual });
            }
        }

        atomic_write(&transfer.save_path, &assembled)?;
        transfer.chunks.clear();
        transfer.completed = true;
        Ok(transfer.save_path.clone())
    }

    pub fn get(&self, blob_id: &str) -> Option<&Transfer> {
        self.transfers.get(blob_id)
    }

    pub fn remove(&mut self, blob_id: &str) -> Option<Transfer> {
        self.transfers.remove(blob_id)
    }

    /// Drop unfinished transfers owned by a disconnected sender.
    pub fn discard_from(&mut self, device: DeviceId) -> usize {
        let before = self.transfers.len();
        self.transfers
            .retain(|_, t| t.completed || t.from != Some(device));
        before - self.transfers.len()
    }

    /// Drop unfinished transfers older than `max_age`. Explicit only.
    pub fn cleanup(&mut self, max_age: Duration) -> usize {
        let before = self.transfers.len();
        self.transfers
            .retain(|_, t| t.completed || t.started_at.elapsed() < max_age);
        before - self.transfers.len()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Strip characters that are path separators or unsafe on common
/// filesystems: `< > : " / \ | ? *`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────
