//! Single-shot database backup job
//!
//! Dumps a MariaDB/MySQL server, compresses and checksums the dump, uploads
//! it to S3-compatible object storage with verification, then applies the
//! retention policy to older backups. Configuration comes entirely from the
//! environment; see README.md for the variable reference.

// dbbackup/src/main.rs
mod backup;
mod config;
mod errors;

use std::process::ExitCode;

use config::BackupConfig;
use errors::BackupError;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config = match BackupConfig::from_env() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    println!("🚀 Starting database backup job");
    match backup::run_backup_flow(&config).await {
        Ok(report) => {
            println!(
                "✅ Backup stored as s3://{}/{}",
                report.uploaded.bucket, report.uploaded.key
            );
            match &report.retention {
                Some(summary) => println!("Retention summary: {summary}"),
                None => println!("Retention summary: sweep skipped (listing failed)"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(error: &BackupError) -> ExitCode {
    eprintln!("❌ Backup failed during {}: {}", error.stage(), error);
    ExitCode::from(error.exit_code())
}
