use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

mod s3;

pub use s3::{S3Credentials, S3Storage};

/// Where an object lives: a bucket in a region, and a key within the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub region: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: &str, region: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

/// The three object-storage operations the transfer pipeline consumes.
///
/// `head` reports the content length, or `None` when the object does not
/// exist. `get` and `put` deal in byte streams so an object never has to be
/// materialized in memory.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn head(&self, location: &ObjectLocation) -> Result<Option<u64>>;

    async fn get(&self, location: &ObjectLocation) -> Result<BoxStream<'static, Result<Bytes>>>;

    async fn put(
        &self,
        location: &ObjectLocation,
        data: BoxStream<'static, Result<Bytes>>,
    ) -> Result<PutResult>;
}
