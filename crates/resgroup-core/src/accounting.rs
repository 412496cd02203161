//! Memory accounting collaborator
//!
//! The engine budgets memory in chunks, not bytes. The driver only needs
//! the conversions and the host-wide vmem ceiling.

use serde::{Deserialize, Serialize};

/// Conversion between bytes and the engine's chunk currency
pub trait MemoryAccounting: Send + Sync {
    /// Host-visible vmem ceiling for one primary worker, in chunks
    fn vmem_limit_chunks(&self) -> i32;

    /// Number of primary workers on this host
    fn host_primary_count(&self) -> i32;

    fn chunks_to_bytes(&self, chunks: i32) -> i64;

    fn bytes_to_chunks(&self, bytes: i64) -> i32;
}

/// Power-of-two sized chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAccounting {
    /// log2 of the chunk size (default: 20, 1 MiB chunks)
    pub chunk_size_bits: u32,
    pub vmem_limit_chunks: i32,
    pub host_primary_count: i32,
}

impl Default for ChunkAccounting {
    fn default() -> Self {
        Self {
            chunk_size_bits: 20,
            vmem_limit_chunks: 8192,
            host_primary_count: 1,
        }
    }
}

impl MemoryAccounting for ChunkAccounting {
    fn vmem_limit_chunks(&self) -> i32 {
        self.vmem_limit_chunks
    }

    fn host_primary_count(&self) -> i32 {
        self.host_primary_count
    }

    fn chunks_to_bytes(&self, chunks: i32) -> i64 {
        (chunks as i64) << self.chunk_size_bits
    }

    fn bytes_to_chunks(&self, bytes: i64) -> i32 {
        (bytes.max(0) >> self.chunk_size_bits).min(i32::MAX as i64) as i32
    }
}
