// dbbackup/src/backup/archive.rs
use std::io::{Read, Write};
use std::path::Path;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::backup::db_dump::ActiveDump;
use crate::errors::{BackupError, Result};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// The packaged output of one backup run: a gzip-compressed dump spooled to
/// a temporary file, plus the metadata the uploader and verifier need.
///
/// The spool file is exclusively owned and deleted when the artifact is
/// dropped, on success and failure alike.
#[derive(Debug)]
pub struct DumpArtifact {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    sha256: [u8; 32],
    file: NamedTempFile,
}

impl DumpArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// Base64 form, as the S3 `ChecksumSHA256` field expects.
    pub fn sha256_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.sha256)
    }
}

/// Counts and hashes the compressed bytes on their way to the spool file.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Consumes a dump stream, compressing it into a spooled temporary file
/// while computing a SHA-256 over the *compressed* bytes (the artifact as
/// stored, so the digest is directly comparable to the storage-reported
/// checksum).
///
/// The artifact is only produced once the stream reaches EOF and the dump
/// producer confirms completion; any failure discards the spool file.
pub fn package_dump(
    mut dump: ActiveDump,
    compression_level: u32,
    spool_dir: &Path,
) -> Result<DumpArtifact> {
    let created_at = Utc::now();
    let name = dump.name.clone();

    let spool = NamedTempFile::new_in(spool_dir).map_err(|e| {
        BackupError::Packaging(format!(
            "failed to create spool file in {}: {e}",
            spool_dir.display()
        ))
    })?;

    let mut encoder = GzEncoder::new(
        HashingWriter { inner: spool, hasher: Sha256::new(), written: 0 },
        Compression::new(compression_level),
    );

    let mut uncompressed_size: u64 = 0;
    let mut buf = [0u8; COPY_BUF_SIZE];
    loop {
        let n = dump
            .reader
            .read(&mut buf)
            .map_err(|e| BackupError::Dump(format!("reading dump stream failed: {e}")))?;
        if n == 0 {
            break;
        }
        encoder
            .write_all(&buf[..n])
            .map_err(|e| BackupError::Packaging(format!("compressing dump failed: {e}")))?;
        uncompressed_size += n as u64;
    }

    let mut writer = encoder
        .finish()
        .map_err(|e| BackupError::Packaging(format!("finishing gzip stream failed: {e}")))?;
    writer
        .flush()
        .map_err(|e| BackupError::Packaging(format!("flushing spool file failed: {e}")))?;

    // The stream is fully consumed; the producer gets the last word on
    // whether it was complete. A truncated dump dies here, not in storage.
    dump.finish()?;

    let compressed_size = writer.written;
    let sha256 = writer.hasher.finalize().into();
    println!(
        "Packaged dump '{}': {} bytes raw, {} bytes compressed",
        name, uncompressed_size, compressed_size
    );

    Ok(DumpArtifact {
        name,
        created_at,
        uncompressed_size,
        compressed_size,
        sha256,
        file: writer.inner,
    })
}
