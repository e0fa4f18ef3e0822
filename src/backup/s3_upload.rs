// dbbackup/src/backup/s3_upload.rs
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::error::SdkError;
use s3::primitives::ByteStream;

use crate::backup::archive::DumpArtifact;
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result, StorageError};

/// An uploaded backup's identity in object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectDescriptor {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Storage-reported SHA-256 (base64), when the store returns one.
    pub sha256_base64: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The object-storage operations the pipeline depends on. The production
/// implementation is [`S3Store`]; tests substitute a fake.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        sha256_base64: &str,
    ) -> std::result::Result<RemoteObjectDescriptor, StorageError>;

    async fn head(&self, key: &str) -> std::result::Result<RemoteObjectDescriptor, StorageError>;

    /// Lists all objects under the prefix, sorted by key ascending.
    async fn list(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<RemoteObjectDescriptor>, StorageError>;

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError>;
}

/// Bounded retry with exponential backoff, kept as plain data so tests can
/// run with zero delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 4, base_delay: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based): doubles each time.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Builds the object key for an artifact: basic ISO-8601 UTC timestamp so
/// byte-lexicographic key order equals chronological order.
pub fn object_key(prefix: &str, created_at: DateTime<Utc>, name: &str) -> String {
    format!(
        "{}/{}-{}.sql.gz",
        prefix.trim_end_matches('/'),
        created_at.format("%Y%m%dT%H%M%SZ"),
        name
    )
}

/// Uploads the artifact, retrying transient storage failures with bounded
/// exponential backoff. Permanent failures and retry exhaustion both
/// surface as [`BackupError::Upload`].
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    key: &str,
    artifact: &DumpArtifact,
    policy: &RetryPolicy,
) -> Result<RemoteObjectDescriptor> {
    let sha256 = artifact.sha256_base64();
    let mut attempt = 1u32;
    loop {
        match store.upload(key, artifact.path(), &sha256).await {
            Ok(descriptor) => {
                println!("✓ Uploaded {} ({} bytes) on attempt {}", key, descriptor.size, attempt);
                return Ok(descriptor);
            }
            Err(e) if e.transient && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                eprintln!(
                    "⚠ Upload attempt {}/{} failed ({}), retrying in {:?}...",
                    attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(BackupError::Upload { attempts: attempt, message: e.message });
            }
        }
    }
}

/// Post-upload verification read-back: compares the storage-reported
/// checksum (or, failing that, the object size) against the locally
/// computed values. Any mismatch means the object is not a valid backup.
pub async fn verify_upload(
    store: &dyn ObjectStore,
    key: &str,
    artifact: &DumpArtifact,
) -> Result<RemoteObjectDescriptor> {
    let descriptor = store
        .head(key)
        .await
        .map_err(|e| BackupError::Integrity(format!("verification read-back of {key} failed: {e}")))?;

    match &descriptor.sha256_base64 {
        Some(remote) => {
            let local = artifact.sha256_base64();
            if *remote != local {
                return Err(BackupError::Integrity(format!(
                    "checksum mismatch for {key}: local {local}, storage reported {remote}"
                )));
            }
        }
        None => {
            if descriptor.size != artifact.compressed_size {
                return Err(BackupError::Integrity(format!(
                    "size mismatch for {key}: local {} bytes, storage reported {}",
                    artifact.compressed_size, descriptor.size
                )));
            }
        }
    }
    println!("✓ Verified {} against local checksum", key);
    Ok(descriptor)
}

/// S3-compatible object store (AWS, DigitalOcean Spaces, MinIO, ...).
pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(config: &BackupConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;
        S3Store { client: s3::Client::new(&sdk_config), bucket: config.bucket.clone() }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        sha256_base64: &str,
    ) -> std::result::Result<RemoteObjectDescriptor, StorageError> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| StorageError::permanent(format!("cannot stat {}: {e}", source.display())))?
            .len();

        // ByteStream streams from disk; the artifact is never buffered whole.
        let body = ByteStream::from_path(source).await.map_err(|e| {
            StorageError::permanent(format!("cannot open {}: {e}", source.display()))
        })?;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .checksum_sha256(sha256_base64)
            .body(body)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(RemoteObjectDescriptor {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size,
            sha256_base64: output.checksum_sha256().map(str::to_string),
            last_modified: None,
        })
    }

    async fn head(&self, key: &str) -> std::result::Result<RemoteObjectDescriptor, StorageError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .checksum_mode(s3::types::ChecksumMode::Enabled)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(RemoteObjectDescriptor {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size: output.content_length().unwrap_or_default().max(0) as u64,
            sha256_base64: output.checksum_sha256().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
        })
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<RemoteObjectDescriptor>, StorageError> {
        let mut descriptors = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let page = request.send().await.map_err(classify_sdk_error)?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                descriptors.push(RemoteObjectDescriptor {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    sha256_base64: None,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            if page.is_truncated() == Some(true) {
                continuation_token = page.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(descriptors)
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }
}

/// Maps an SDK error to [`StorageError`]: dispatch/timeout/response errors
/// and 5xx service responses are transient, everything else is permanent.
fn classify_sdk_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => {
            let code = ctx.raw().status().as_u16();
            (500..600).contains(&code)
        }
        _ => false,
    };
    let message = format!("{}", s3::error::DisplayErrorContext(&err));
    if transient {
        StorageError::transient(message)
    } else {
        StorageError::permanent(message)
    }
}

fn to_chrono(dt: &s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}
