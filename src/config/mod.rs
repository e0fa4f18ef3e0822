// dbbackup/src/config/mod.rs
use std::collections::HashMap;
use std::env;

use crate::backup::retention::RetentionPolicy;
use crate::errors::{BackupError, Result};

pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Databases never included in a backup.
pub const SYSTEM_DATABASES: [&str; 4] =
    ["information_schema", "performance_schema", "mysql", "sys"];

/// Immutable job configuration, resolved once at startup from the
/// process environment and passed by reference to every component.
#[derive(Clone)]
pub struct BackupConfig {
    pub mysql_user: String,
    pub mysql_password: Option<String>,
    pub mysql_hostname: String,
    pub mysql_port: u16,
    /// Explicit databases to back up; `None` means discover all
    /// non-system databases from the server.
    pub databases: Option<Vec<String>>,

    pub bucket: String,
    pub endpoint_url: String,
    pub region: String,
    pub prefix: String,
    pub access_key_id: String,
    pub secret_access_key: String,

    pub retention: RetentionPolicy,
    pub compression_level: u32,
}

// Credentials must never reach the logs, so Debug redacts them.
impl std::fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupConfig")
            .field("mysql_user", &self.mysql_user)
            .field("mysql_password", &self.mysql_password.as_ref().map(|_| "<redacted>"))
            .field("mysql_hostname", &self.mysql_hostname)
            .field("mysql_port", &self.mysql_port)
            .field("databases", &self.databases)
            .field("bucket", &self.bucket)
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("retention", &self.retention)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

impl BackupConfig {
    /// Resolves configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(&vars)
    }

    /// Resolves configuration from an arbitrary key/value map. Split out
    /// from [`BackupConfig::from_env`] so tests do not mutate the real
    /// process environment.
    pub fn from_lookup(vars: &HashMap<String, String>) -> Result<Self> {
        let mysql_user = required(vars, "MYSQL_USER")?;
        let mysql_password = optional(vars, "MYSQL_PASSWORD");
        let mysql_hostname =
            optional(vars, "MYSQL_HOSTNAME").unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        let mysql_port = match optional(vars, "MYSQL_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                BackupError::Config(format!("MYSQL_PORT is not a valid port: {raw}"))
            })?,
            None => DEFAULT_PORT,
        };

        let databases = match optional(vars, "DATABASE_LIST") {
            Some(raw) => Some(parse_database_list(&raw)?),
            None => None,
        };

        let bucket = required(vars, "S3_BUCKET")?;
        let endpoint_url = required(vars, "S3_ENDPOINT")?;
        let region = optional(vars, "S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let prefix = required(vars, "S3_PREFIX")?;
        let access_key_id = required(vars, "AWS_ACCESS_KEY_ID")?;
        let secret_access_key = required(vars, "AWS_SECRET_ACCESS_KEY")?;

        // RETENTION_COUNT wins over RETENTION_DAYS when both are set.
        let retention = match optional(vars, "RETENTION_COUNT") {
            Some(raw) => {
                let count = raw.parse::<usize>().map_err(|_| {
                    BackupError::Config(format!("RETENTION_COUNT is not a valid count: {raw}"))
                })?;
                RetentionPolicy::KeepLast(count)
            }
            None => {
                let days = match optional(vars, "RETENTION_DAYS") {
                    Some(raw) => raw.parse::<u32>().map_err(|_| {
                        BackupError::Config(format!("RETENTION_DAYS is not a valid number of days: {raw}"))
                    })?,
                    None => DEFAULT_RETENTION_DAYS,
                };
                RetentionPolicy::KeepDays(days)
            }
        };

        let compression_level = match optional(vars, "COMPRESSION_LEVEL") {
            Some(raw) => {
                let level = raw.parse::<u32>().map_err(|_| {
                    BackupError::Config(format!("COMPRESSION_LEVEL is not a number: {raw}"))
                })?;
                if level > 9 {
                    return Err(BackupError::Config(format!(
                        "COMPRESSION_LEVEL must be between 0 and 9, got {level}"
                    )));
                }
                level
            }
            None => DEFAULT_COMPRESSION_LEVEL,
        };

        Ok(BackupConfig {
            mysql_user,
            mysql_password,
            mysql_hostname,
            mysql_port,
            databases,
            bucket,
            endpoint_url,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            retention,
            compression_level,
        })
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    match vars.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(value) => Ok(value.to_string()),
        None => Err(BackupError::Config(format!(
            "required environment variable {key} is not set"
        ))),
    }
}

fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_database_list(raw: &str) -> Result<Vec<String>> {
    let names: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if names.is_empty() {
        return Err(BackupError::Config(
            "DATABASE_LIST is set but contains no database names".to_string(),
        ));
    }
    for name in &names {
        if name
            .contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        {
            return Err(BackupError::Config(format!(
                "invalid character in database name from DATABASE_LIST: {name}"
            )));
        }
    }
    Ok(names)
}
