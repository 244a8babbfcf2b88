use std::{
    collections::HashMap,
    io::Write,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blob_store::{ObjectLocation, ObjectStorage, PutResult};
use bytes::Bytes;
use futures::{stream, stream::BoxStream, StreamExt};
use sha2::{Digest, Sha256};

pub fn gzip(data: &[u8]) -> Bytes {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap().into()
}

/// One scripted source object.
#[derive(Default)]
pub struct StubObject {
    /// Head result; `None` derives the size from `body`.
    pub size: Option<u64>,
    /// Compressed payload served by `get`.
    pub body: Bytes,
    /// Number of leading `get` calls that fail with a transient error.
    pub fail_gets: u32,
    /// Serve a stream that never yields, for cancellation tests.
    pub hang_get: bool,
}

/// Scripted [`ObjectStorage`]: head sizes, transient-failure injection, and
/// recorded uploads, keyed by object key.
#[derive(Default)]
pub struct StubStorage {
    objects: Mutex<HashMap<String, StubObject>>,
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    pub head_calls: AtomicU32,
    pub get_calls: AtomicU32,
    /// Source chunks handed out across all `get` streams.
    pub chunks_served: Arc<AtomicU32>,
    /// Accept `put` calls but never consume their body.
    pub stall_puts: AtomicBool,
}

impl StubStorage {
    pub fn insert(&self, key: &str, object: StubObject) {
        self.objects.lock().unwrap().insert(key.to_string(), object);
    }

    pub fn upload(&self, key: &str) -> Option<Vec<u8>> {
        self.uploads.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStorage for StubStorage {
    async fn head(&self, location: &ObjectLocation) -> Result<Option<u64>> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(&location.key)
            .map(|o| o.size.unwrap_or(o.body.len() as u64)))
    }

    async fn get(&self, location: &ObjectLocation) -> Result<BoxStream<'static, Result<Bytes>>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&location.key)
            .ok_or_else(|| anyhow!("no such object {location}"))?;
        if object.fail_gets > 0 {
            object.fail_gets -= 1;
            return Err(anyhow!("simulated transient fault on {location}"));
        }
        if object.hang_get {
            return Ok(Box::pin(stream::pending()));
        }
        // Serve the body in small chunks to exercise incremental decoding.
        let chunks: Vec<Result<Bytes>> = object
            .body
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let served = self.chunks_served.clone();
        Ok(Box::pin(stream::iter(chunks).inspect(move |_| {
            served.fetch_add(1, Ordering::SeqCst);
        })))
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        mut data: BoxStream<'static, Result<Bytes>>,
    ) -> Result<PutResult> {
        if self.stall_puts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut received = Vec::new();
        while let Some(chunk) = data.next().await {
            received.extend_from_slice(&chunk?);
        }
        let sha256_hash = format!("{:x}", Sha256::digest(&received));
        let size_bytes = received.len() as u64;
        self.uploads
            .lock()
            .unwrap()
            .insert(location.key.clone(), received);
        Ok(PutResult {
            key: location.key.clone(),
            size_bytes,
            sha256_hash,
        })
    }
}
