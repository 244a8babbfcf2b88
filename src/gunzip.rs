use std::io::Write;

use anyhow::{Context, Result};
use bytes::Bytes;
use flate2::write::GzDecoder;

/// Incremental gzip decoder: compressed chunks go in, whatever decompressed
/// output is ready comes back out. Output never accumulates past one `push`.
pub struct GunzipStream {
    decoder: GzDecoder<Vec<u8>>,
}

impl GunzipStream {
    pub fn new() -> Self {
        Self {
            decoder: GzDecoder::new(Vec::new()),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Bytes> {
        self.decoder
            .write_all(chunk)
            .context("malformed gzip stream")?;
        Ok(std::mem::take(self.decoder.get_mut()).into())
    }

    /// Drains remaining output and validates the gzip trailer; a truncated
    /// stream fails here rather than producing a silently short object.
    pub fn finish(self) -> Result<Bytes> {
        let rest = self.decoder.finish().context("truncated gzip stream")?;
        Ok(rest.into())
    }
}

impl Default for GunzipStream {
    fn default() -> Self {
        Self::new()
    }
}
