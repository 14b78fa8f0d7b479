//! `fabric-blob` — chunked file transfer layered on the fabric envelope.
//!
//! Four message types (`blob_start`, `blob_chunk`, `blob_end`,
//! `blob_request`) carry base64 chunks over the relay; in-memory
//! representation is raw bytes in a pre-sized slot array. A transfer
//! completes when either the same-host fast path resolves a local file, or
//! every chunk has arrived and the optional sha-256 checksum matches.

pub mod outbound;
pub mod transfer;

pub use outbound::{outbound, outbound_same_device, OutboundBlob, CHUNK_SIZE};
pub use transfer::{sanitize_filename, BeginOutcome, Transfer, TransferRegistry};
