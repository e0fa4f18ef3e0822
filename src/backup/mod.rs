mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod retention;
pub(crate) mod s3_upload;
#[cfg(test)]
pub(crate) mod testing;

pub use logic::RunReport;

use crate::config::BackupConfig;
use crate::errors::Result;

/// Public entry point for the backup job: wires the real `mysqldump`
/// source and S3 client into the pipeline and runs it once.
pub async fn run_backup_flow(config: &BackupConfig) -> Result<RunReport> {
    let store = s3_upload::S3Store::connect(config).await;
    let source = db_dump::MysqldumpSource::new(config);
    logic::run_pipeline(
        config,
        &source,
        &store,
        &s3_upload::RetryPolicy::default(),
        &std::env::temp_dir(),
    )
    .await
}
