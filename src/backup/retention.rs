// dbbackup/src/backup/retention.rs
use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::backup::s3_upload::{ObjectStore, RemoteObjectDescriptor};
use crate::errors::StorageError;

/// Which historical backups to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the `n` most recent backups.
    KeepLast(usize),
    /// Keep backups newer than this many days.
    KeepDays(u32),
}

/// Outcome of one retention sweep, reported even on success.
#[derive(Debug, Default)]
pub struct RetentionSummary {
    pub kept: usize,
    pub deleted: Vec<String>,
    /// Per-object deletion failures: (key, reason). Never fatal to the run.
    pub failed: Vec<(String, String)>,
}

impl std::fmt::Display for RetentionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "kept {}, deleted {}, failed to delete {}",
            self.kept,
            self.deleted.len(),
            self.failed.len()
        )
    }
}

/// Extracts the UTC timestamp from a backup key's final path segment
/// (`<prefix>/<YYYYMMDD>T<HHMMSS>Z-<name>.sql.gz`). Keys that do not match
/// the convention yield `None` and are never retention candidates.
pub fn parse_key_timestamp(key: &str) -> Option<DateTime<Utc>> {
    let file_name = key.rsplit('/').next()?;
    let ts = file_name.get(..16)?;
    if !ts.ends_with('Z') || file_name.as_bytes().get(16) != Some(&b'-') {
        return None;
    }
    NaiveDateTime::parse_from_str(ts, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Partitions listed objects into keep/delete sets.
///
/// Objects whose key does not parse as a backup key are ignored. The
/// object uploaded by the current run is kept unconditionally, even under
/// a policy that would otherwise select it, so a misconfigured policy can
/// never empty the backup pool.
pub fn partition<'a>(
    objects: &'a [RemoteObjectDescriptor],
    policy: RetentionPolicy,
    current_key: &str,
    now: DateTime<Utc>,
) -> (Vec<&'a RemoteObjectDescriptor>, Vec<&'a RemoteObjectDescriptor>) {
    // Newest first; key order is chronological by construction.
    let mut candidates: Vec<(&RemoteObjectDescriptor, DateTime<Utc>)> = objects
        .iter()
        .filter_map(|obj| parse_key_timestamp(&obj.key).map(|ts| (obj, ts)))
        .collect();
    candidates.sort_by(|a, b| b.0.key.cmp(&a.0.key));

    let mut keep = Vec::new();
    let mut delete = Vec::new();
    for (index, (obj, ts)) in candidates.iter().enumerate() {
        let retain = match policy {
            RetentionPolicy::KeepLast(n) => index < n,
            RetentionPolicy::KeepDays(days) => *ts >= now - Duration::days(days as i64),
        };
        if retain || obj.key == current_key {
            keep.push(*obj);
        } else {
            delete.push(*obj);
        }
    }
    (keep, delete)
}

/// Lists the prefix, applies the policy, and deletes expired backups one by
/// one. Deletion is best-effort: a stale backup left behind is a lesser
/// failure than a missing current one, so individual delete errors are
/// recorded in the summary and the sweep continues.
pub async fn apply_retention(
    store: &dyn ObjectStore,
    prefix: &str,
    policy: RetentionPolicy,
    current_key: &str,
    now: DateTime<Utc>,
) -> Result<RetentionSummary, StorageError> {
    let objects = store.list(prefix).await?;
    let (keep, delete) = partition(&objects, policy, current_key, now);

    let mut summary = RetentionSummary { kept: keep.len(), ..Default::default() };
    for obj in delete {
        println!("Deleting old backup: {}", obj.key);
        match store.delete(&obj.key).await {
            Ok(()) => summary.deleted.push(obj.key.clone()),
            Err(e) => {
                eprintln!("⚠ Failed to delete {}: {}", obj.key, e);
                summary.failed.push((obj.key.clone(), e.message));
            }
        }
    }
    Ok(summary)
}
