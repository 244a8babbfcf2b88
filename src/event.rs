use anyhow::{anyhow, Context, Result};
use blob_store::ObjectLocation;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use url::Url;

/// Object-storage notification payload: one record per touched object.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub url: String,
}

impl NotificationEvent {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("malformed notification event")
    }

    /// Resolves every record to a source location. Any malformed record is a
    /// configuration error surfaced before a single task is built.
    pub fn source_locations(&self) -> Result<Vec<ObjectLocation>> {
        self.records
            .iter()
            .map(|record| parse_object_url(&record.url))
            .collect()
    }
}

/// Parses `https://<bucket>.<service-domain>/<region>/<url-encoded key>`
/// into a source location. The scheme is optional in notification payloads.
pub fn parse_object_url(raw: &str) -> Result<ObjectLocation> {
    let normalized = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&normalized).with_context(|| format!("invalid object url {raw:?}"))?;

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("object url {raw:?} has no host"))?;
    let (bucket, _) = host
        .split_once('.')
        .ok_or_else(|| anyhow!("object url host {host:?} carries no bucket label"))?;
    if bucket.is_empty() {
        return Err(anyhow!("object url {raw:?} has an empty bucket label"));
    }

    let mut segments = url
        .path_segments()
        .ok_or_else(|| anyhow!("object url {raw:?} has no path"))?;
    let region = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("object url {raw:?} is missing the region segment"))?;
    let encoded_key = segments.collect::<Vec<_>>().join("/");
    if encoded_key.is_empty() {
        return Err(anyhow!("object url {raw:?} is missing the object key"));
    }
    let key = percent_decode_str(&encoded_key)
        .decode_utf8()
        .with_context(|| format!("object key in {raw:?} is not valid utf-8"))?
        .to_string();

    Ok(ObjectLocation::new(bucket, region, &key))
}
