use std::{
    fmt,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use blob_store::{ObjectLocation, ObjectStorage, PutResult};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gunzip::GunzipStream;

/// Single-PUT ceiling of the destination store; larger sources are rejected
/// up front instead of failing mid-transfer.
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Decompressed chunks buffered between the decoder and the upload. Small on
/// purpose: the producer must block until the upload drains.
const PIPE_DEPTH: usize = 8;

const DEFAULT_CANCEL_REASON: &str = "task is canceled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    CheckFileType,
    CheckFileSize,
    GunzipAndUpload,
    Canceled,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskPhase::CheckFileType => "checkFileType",
            TaskPhase::CheckFileSize => "checkFileSize",
            TaskPhase::GunzipAndUpload => "gunzipAndUpload",
            TaskPhase::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// A task failure, labeled with the phase that produced it. Classification
/// is carried explicitly: validation and cancellation set `retryable` to
/// false at the failure site, transfer faults set it to true.
#[derive(Debug, thiserror::Error)]
#[error("{phase}: {source}")]
pub struct TaskError {
    pub phase: TaskPhase,
    pub retryable: bool,
    #[source]
    source: anyhow::Error,
}

impl TaskError {
    fn validation(phase: TaskPhase, source: anyhow::Error) -> Self {
        Self {
            phase,
            retryable: false,
            source,
        }
    }

    fn transfer(source: anyhow::Error) -> Self {
        Self {
            phase: TaskPhase::GunzipAndUpload,
            retryable: true,
            source,
        }
    }

    fn canceled(reason: String) -> Self {
        Self {
            phase: TaskPhase::Canceled,
            retryable: false,
            source: anyhow!(reason),
        }
    }
}

/// Immutable per-task configuration. The destination key is derived once,
/// here, and nowhere else.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub source: ObjectLocation,
    pub destination: ObjectLocation,
    pub max_attempts: u32,
}

impl TransferParams {
    pub fn new(
        source: ObjectLocation,
        target_bucket: &str,
        target_region: &str,
        target_prefix: &str,
        max_attempts: u32,
    ) -> Self {
        let key = destination_key(target_prefix, &source.key);
        Self {
            source,
            destination: ObjectLocation::new(target_bucket, target_region, &key),
            max_attempts,
        }
    }
}

/// `<prefix>/<source key minus ".gz">`, path separators normalized to `/`.
pub fn destination_key(prefix: &str, source_key: &str) -> String {
    let normalized = source_key.replace('\\', "/");
    let stripped = normalized.strip_suffix(".gz").unwrap_or(&normalized);
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        stripped.trim_start_matches('/')
    )
}

/// Shared cancellation state for one task: a write-once reason plus the
/// token the pipeline watches. The watcher writes, the task only reads.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// First cancel wins; later calls, including ones arriving after the
    /// task completed, are no-ops.
    pub fn cancel(&self, reason: Option<String>) {
        {
            let mut slot = self.reason.lock().unwrap();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()));
        }
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn error(&self) -> TaskError {
        let reason = self
            .reason
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        TaskError::canceled(reason)
    }
}

/// Result of one task: the params it ran with and either the destination
/// object metadata or the failure that ended it.
#[derive(Debug)]
pub struct TaskOutcome {
    pub params: TransferParams,
    pub result: Result<PutResult, TaskError>,
}

/// Drives one source object to its destination: pre-flight validation, the
/// streaming gunzip/upload pipeline, and the bounded retry loop around both.
pub struct TransferTask {
    params: TransferParams,
    storage: Arc<dyn ObjectStorage>,
    cancel: CancelHandle,
}

impl TransferTask {
    pub fn new(params: TransferParams, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            params,
            storage,
            cancel: CancelHandle::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs up to `max_attempts` attempts. Validation failures and
    /// cancellation stop the loop immediately; transfer faults are retried.
    /// Consumes the task: outcomes are immutable once produced.
    pub async fn run(self) -> TaskOutcome {
        let mut last_error: Option<TaskError> = None;
        for attempt in 1..=self.params.max_attempts {
            if self.cancel.is_canceled() {
                // Keep the failure that was already observed; the reason
                // only stands in when no attempt got to fail first.
                last_error = Some(last_error.unwrap_or_else(|| self.cancel.error()));
                break;
            }
            match self.attempt().await {
                Ok(result) => {
                    info!(
                        source = %self.params.source,
                        destination = %self.params.destination,
                        size_bytes = result.size_bytes,
                        attempt,
                        "transfer complete"
                    );
                    return TaskOutcome {
                        params: self.params,
                        result: Ok(result),
                    };
                }
                Err(error) => {
                    warn!(
                        source = %self.params.source,
                        attempt,
                        max_attempts = self.params.max_attempts,
                        phase = %error.phase,
                        error = %error,
                        "transfer attempt failed"
                    );
                    let stop = !error.retryable || self.cancel.is_canceled();
                    last_error = Some(error);
                    if stop {
                        break;
                    }
                }
            }
        }
        let error = last_error.unwrap_or_else(|| self.cancel.error());
        TaskOutcome {
            params: self.params,
            result: Err(error),
        }
    }

    async fn attempt(&self) -> Result<PutResult, TaskError> {
        self.check_file_type()?;
        self.check_file_size().await?;
        self.gunzip_and_upload().await
    }

    fn check_file_type(&self) -> Result<(), TaskError> {
        if !self.params.source.key.ends_with(".gz") {
            return Err(TaskError::validation(
                TaskPhase::CheckFileType,
                anyhow!("source key {:?} does not end in .gz", self.params.source.key),
            ));
        }
        Ok(())
    }

    async fn check_file_size(&self) -> Result<(), TaskError> {
        let size = self
            .storage
            .head(&self.params.source)
            .await
            .map_err(|e| TaskError::validation(TaskPhase::CheckFileSize, e))?;
        match size {
            None => Err(TaskError::validation(
                TaskPhase::CheckFileSize,
                anyhow!("source object {} not found", self.params.source),
            )),
            Some(0) => Err(TaskError::validation(
                TaskPhase::CheckFileSize,
                anyhow!("source object {} has no content", self.params.source),
            )),
            Some(size) if size > MAX_OBJECT_SIZE => Err(TaskError::validation(
                TaskPhase::CheckFileSize,
                anyhow!(
                    "source object {} is {size} bytes, over the {MAX_OBJECT_SIZE} byte limit",
                    self.params.source
                ),
            )),
            Some(_) => Ok(()),
        }
    }

    /// One pipeline pass: source stream -> gunzip -> bounded channel ->
    /// upload, the pump and the upload progressing concurrently. Either side
    /// failing tears the other down: the pump pushes its error into the
    /// channel so the upload aborts, and a dead upload closes the channel so
    /// the pump's next send fails.
    async fn gunzip_and_upload(&self) -> Result<PutResult, TaskError> {
        let source = self
            .storage
            .get(&self.params.source)
            .await
            .map_err(TaskError::transfer)?;

        let (tx, rx) = mpsc::channel::<Result<Bytes>>(PIPE_DEPTH);
        let body: BoxStream<'static, Result<Bytes>> = Box::pin(ReceiverStream::new(rx));

        let upload = async {
            self.storage
                .put(&self.params.destination, body)
                .await
                .map_err(TaskError::transfer)
        };
        let (result, ()) = tokio::try_join!(upload, pump(source, tx, self.cancel.clone()))?;
        Ok(result)
    }
}

/// Feeds source chunks through the decoder into the pass-through channel,
/// watching the cancellation token at every chunk boundary.
async fn pump(
    mut source: BoxStream<'static, Result<Bytes>>,
    tx: mpsc::Sender<Result<Bytes>>,
    cancel: CancelHandle,
) -> Result<(), TaskError> {
    let mut decoder = GunzipStream::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.token.cancelled() => {
                let error = cancel.error();
                let _ = tx.try_send(Err(anyhow!(error.to_string())));
                return Err(error);
            }
            chunk = source.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let decoded = match chunk.and_then(|c| decoder.push(&c)) {
            Ok(decoded) => decoded,
            Err(error) => {
                let message = error.to_string();
                let _ = tx.try_send(Err(error));
                return Err(TaskError::transfer(anyhow!(message)));
            }
        };
        if decoded.is_empty() {
            continue;
        }
        tokio::select! {
            _ = cancel.token.cancelled() => {
                let error = cancel.error();
                let _ = tx.try_send(Err(anyhow!(error.to_string())));
                return Err(error);
            }
            sent = tx.send(Ok(decoded)) => {
                if sent.is_err() {
                    return Err(TaskError::transfer(anyhow!("upload side closed the pipe")));
                }
            }
        }
    }
    match decoder.finish() {
        Ok(rest) => {
            if !rest.is_empty() {
                let _ = tx.send(Ok(rest)).await;
            }
            Ok(())
        }
        Err(error) => {
            let message = error.to_string();
            let _ = tx.try_send(Err(error));
            Err(TaskError::transfer(anyhow!(message)))
        }
    }
}
