// dbbackup/src/backup/logic.rs
use std::path::Path;

use chrono::Utc;

use crate::backup::archive;
use crate::backup::db_dump::DumpSource;
use crate::backup::retention::{self, RetentionSummary};
use crate::backup::s3_upload::{
    object_key, upload_with_retry, verify_upload, ObjectStore, RemoteObjectDescriptor, RetryPolicy,
};
use crate::config::BackupConfig;
use crate::errors::{Result, Stage};

/// What a completed run produced: the verified remote object and the
/// retention sweep outcome (`None` when the sweep itself failed, which is
/// reported but not fatal).
#[derive(Debug)]
pub struct RunReport {
    pub uploaded: RemoteObjectDescriptor,
    pub retention: Option<RetentionSummary>,
}

/// Drives the pipeline through its stages:
/// `Dumping → Packaging → Uploading → Verifying → RetentionSweep → Done`.
///
/// Any stage failure propagates immediately and skips everything after it;
/// in particular the retention sweep only ever runs once a new backup is
/// durably and verifiably stored, so a failed run can never shrink the
/// pool of existing backups. The spool file lives inside the artifact and
/// is dropped on every exit path.
pub async fn run_pipeline(
    config: &BackupConfig,
    dump_source: &dyn DumpSource,
    store: &dyn ObjectStore,
    retry: &RetryPolicy,
    spool_dir: &Path,
) -> Result<RunReport> {
    println!("▶ Stage: {}", Stage::Dumping);
    let dump = dump_source.open()?;

    println!("▶ Stage: {}", Stage::Packaging);
    let artifact = archive::package_dump(dump, config.compression_level, spool_dir)?;
    let key = object_key(&config.prefix, artifact.created_at, &artifact.name);

    println!("▶ Stage: {}", Stage::Uploading);
    upload_with_retry(store, &key, &artifact, retry).await?;

    println!("▶ Stage: {}", Stage::Verifying);
    let uploaded = verify_upload(store, &key, &artifact).await?;

    // Spool file released before the sweep; the backup now lives remotely.
    drop(artifact);

    println!("▶ Stage: {}", Stage::RetentionSweep);
    let retention = match retention::apply_retention(
        store,
        &config.prefix,
        config.retention,
        &key,
        Utc::now(),
    )
    .await
    {
        Ok(summary) => Some(summary),
        Err(e) => {
            eprintln!("⚠ Retention sweep failed: {e}. The next run will sweep again.");
            None
        }
    };

    println!("▶ Stage: {}", Stage::Done);
    Ok(RunReport { uploaded, retention })
}
