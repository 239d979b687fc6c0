//! Media framing for client uploads.
//!
//! Images arrive as `image_start` / `image_chunk`* / `image_end`. Chunks are
//! fragments of a data URL and are appended in arrival order; there is no
//! reordering. Audio has no framing protocol: each `audio` message is one
//! array of int16 samples packed straight into PCM16.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{RelayError, RelayResult};

/// Prompt attached to an image when `image_start` carries no text.
pub const DEFAULT_IMAGE_PROMPT: &str = "Please describe this image.";

/// An `image_chunk_ack` is sent every this many chunks.
pub const CHUNK_ACK_INTERVAL: usize = 10;

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_PENDING_UPLOADS: usize = 8;

#[derive(Debug)]
struct PendingImage {
    chunks: Vec<String>,
    bytes: usize,
    prompt: String,
}

/// A fully reassembled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledImage {
    pub id: String,
    pub data_url: String,
    pub prompt: String,
}

/// Per-connection image reassembly. Owned by the client receive loop, so it
/// needs no locking.
#[derive(Debug)]
pub struct ImageAssembler {
    pending: HashMap<String, PendingImage>,
    max_image_bytes: usize,
    max_pending: usize,
}

impl Default for ImageAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_PENDING_UPLOADS)
    }
}

impl ImageAssembler {
    pub fn new(max_image_bytes: usize, max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_image_bytes,
            max_pending: max_pending.max(1),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Begin an upload. Restarting an id that is already in flight discards
    /// what was collected for it.
    pub fn start(&mut self, id: &str, prompt: Option<String>) -> RelayResult<()> {
        if !self.pending.contains_key(id) && self.pending.len() >= self.max_pending {
            return Err(RelayError::TooManyUploads(self.max_pending));
        }
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_PROMPT.to_string());
        self.pending.insert(
            id.to_string(),
            PendingImage {
                chunks: Vec::new(),
                bytes: 0,
                prompt,
            },
        );
        Ok(())
    }

    /// Append a chunk, returning the number of chunks received so far.
    pub fn push_chunk(&mut self, id: &str, chunk: String) -> RelayResult<usize> {
        let Some(pending) = self.pending.get_mut(id) else {
            return Err(RelayError::OrphanChunk(id.to_string()));
        };

        if pending.bytes + chunk.len() > self.max_image_bytes {
            self.pending.remove(id);
            return Err(RelayError::ImageTooLarge {
                id: id.to_string(),
                limit: self.max_image_bytes,
            });
        }

        pending.bytes += chunk.len();
        pending.chunks.push(chunk);
        Ok(pending.chunks.len())
    }

    /// Finish an upload. The accumulator is discarded whatever the outcome.
    pub fn finish(&mut self, id: &str) -> RelayResult<AssembledImage> {
        let Some(pending) = self.pending.remove(id) else {
            return Err(RelayError::OrphanChunk(id.to_string()));
        };

        let data_url = pending.chunks.concat();
        if data_url.is_empty() {
            return Err(RelayError::EmptyImage(id.to_string()));
        }

        Ok(AssembledImage {
            id: id.to_string(),
            data_url,
            prompt: pending.prompt,
        })
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Whether an `image_chunk_ack` is due after `count` chunks.
pub fn chunk_ack_due(count: usize) -> bool {
    count > 0 && count % CHUNK_ACK_INTERVAL == 0
}

/// Pack int16 samples as PCM16 little-endian.
pub fn pcm16_from_samples(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.put_i16_le(*sample);
    }
    buf.freeze()
}
