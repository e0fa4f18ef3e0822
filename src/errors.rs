use thiserror::Error;

/// Pipeline stage, used for progress reporting and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuring,
    Dumping,
    Packaging,
    Uploading,
    Verifying,
    RetentionSweep,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Configuring => "configuring",
            Stage::Dumping => "dumping",
            Stage::Packaging => "packaging",
            Stage::Uploading => "uploading",
            Stage::Verifying => "verifying",
            Stage::RetentionSweep => "retention-sweep",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database dump failed: {0}")]
    Dump(String),

    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error("Upload failed after {attempts} attempt(s): {message}")]
    Upload { attempts: u32, message: String },

    #[error("Integrity verification failed: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// The pipeline stage this error terminates in.
    pub fn stage(&self) -> Stage {
        match self {
            BackupError::Config(_) => Stage::Configuring,
            BackupError::Dump(_) => Stage::Dumping,
            BackupError::Packaging(_) | BackupError::Io(_) => Stage::Packaging,
            BackupError::Upload { .. } => Stage::Uploading,
            BackupError::Integrity(_) => Stage::Verifying,
        }
    }

    /// Distinct process exit code per failing stage.
    pub fn exit_code(&self) -> u8 {
        match self.stage() {
            Stage::Configuring => 2,
            Stage::Dumping => 3,
            Stage::Packaging => 4,
            Stage::Uploading => 5,
            Stage::Verifying => 6,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Error surfaced by an object-store operation, carrying the
/// transient/permanent classification the upload retry loop needs.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StorageError {
    pub message: String,
    pub transient: bool,
}

impl StorageError {
    pub fn transient(message: impl Into<String>) -> Self {
        StorageError { message: message.into(), transient: true }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StorageError { message: message.into(), transient: false }
    }
}
