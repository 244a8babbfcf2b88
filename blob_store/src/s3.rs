use std::{env, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore, WriteMultipart};
use sha2::{Digest, Sha256};

use super::{ObjectLocation, ObjectStorage, PutResult};

#[derive(Debug, Clone, Default)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// S3-API backed [`ObjectStorage`]. A client is built per location because
/// source buckets vary from event to event while credentials stay fixed.
pub struct S3Storage {
    credentials: S3Credentials,
    endpoint: Option<String>,
}

impl S3Storage {
    pub fn new(credentials: S3Credentials, endpoint: Option<String>) -> Self {
        Self {
            credentials,
            endpoint,
        }
    }

    fn client(&self, location: &ObjectLocation) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&location.bucket)
            .with_region(&location.region)
            .with_access_key_id(&self.credentials.access_key_id)
            .with_secret_access_key(&self.credentials.secret_access_key);

        // For supporting localstack/minio for testing
        let endpoint = self
            .endpoint
            .clone()
            .or_else(|| env::var("AWS_ENDPOINT_URL").ok());
        if let Some(endpoint) = endpoint {
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
            builder = builder.with_endpoint(endpoint);
        }

        let client = builder
            .build()
            .map_err(|e| anyhow!("failed to build client for bucket {:?}: {e}", location.bucket))?;
        Ok(Arc::new(client))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn head(&self, location: &ObjectLocation) -> Result<Option<u64>> {
        let client = self.client(location)?;
        match client.head(&Path::from(location.key.as_str())).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(anyhow!("can't head object {location}: {e:?}")),
        }
    }

    async fn get(&self, location: &ObjectLocation) -> Result<BoxStream<'static, Result<Bytes>>> {
        let client = self.client(location)?;
        let get_result = client
            .get(&Path::from(location.key.as_str()))
            .await
            .map_err(|e| anyhow!("can't get object {location}: {e:?}"))?;
        let location = location.clone();
        // Pull-based on purpose: the consumer's pace, not the network's,
        // decides how much of the object is in flight.
        Ok(Box::pin(get_result.into_stream().map(move |chunk| {
            chunk.map_err(|e| anyhow!("error reading object {location}: {e:?}"))
        })))
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        mut data: BoxStream<'static, Result<Bytes>>,
    ) -> Result<PutResult> {
        let client = self.client(location)?;
        let path = Path::from(location.key.as_str());
        let mut hasher = Sha256::new();

        let multipart = client.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new(multipart);
        let mut size_bytes = 0;
        while let Some(chunk) = data.next().await {
            writer.wait_for_capacity(1).await?;
            let chunk = chunk?;
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer.finish().await?;

        Ok(PutResult {
            key: location.key.clone(),
            size_bytes,
            sha256_hash: format!("{:x}", hasher.finalize()),
        })
    }
}
