// dbbackup/src/backup/db_dump.rs
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;

use which::which;

use crate::config::{BackupConfig, SYSTEM_DATABASES};
use crate::errors::{BackupError, Result};

/// A source of database dumps. The production implementation shells out to
/// `mysqldump`; tests substitute an in-memory fake.
pub trait DumpSource {
    fn open(&self) -> Result<ActiveDump>;
}

/// An in-progress dump: a byte stream plus a completion check.
///
/// The stream must be read to EOF and then [`ActiveDump::finish`] called
/// before the output may be treated as a complete dump. A non-zero client
/// exit surfaces there, so a truncated stream is never silently accepted.
pub struct ActiveDump {
    /// Name component for the artifact key: the database's name, or
    /// `all-databases` when more than one is dumped.
    pub name: String,
    pub reader: Box<dyn Read + Send>,
    completion: Box<dyn FnOnce() -> Result<()> + Send>,
}

impl ActiveDump {
    pub fn new(
        name: String,
        reader: Box<dyn Read + Send>,
        completion: Box<dyn FnOnce() -> Result<()> + Send>,
    ) -> Self {
        ActiveDump { name, reader, completion }
    }

    /// Waits for the producer and returns its verdict on the stream.
    pub fn finish(self) -> Result<()> {
        (self.completion)()
    }
}

/// Produces dumps by invoking the MySQL client tools as subprocesses.
///
/// Consistency note: the dump runs with `--single-transaction`, which gives
/// a consistent snapshot for transactional (InnoDB) tables without locking.
/// Non-transactional tables get whatever consistency mysqldump provides.
pub struct MysqldumpSource<'a> {
    config: &'a BackupConfig,
}

impl<'a> MysqldumpSource<'a> {
    pub fn new(config: &'a BackupConfig) -> Self {
        MysqldumpSource { config }
    }

    /// Lists non-system databases via `mysql -N -e "SHOW DATABASES;"`.
    fn list_user_databases(&self) -> Result<Vec<String>> {
        let mysql_path = find_client_executable("mysql")?;
        let mut cmd = Command::new(mysql_path);
        self.apply_connection_args(&mut cmd);
        let output = cmd
            .arg("-N")
            .arg("-e")
            .arg("SHOW DATABASES;")
            .output()
            .map_err(|e| BackupError::Dump(format!("failed to execute mysql client: {e}")))?;

        if !output.status.success() {
            return Err(BackupError::Dump(format!(
                "listing databases failed with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let all: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        Ok(filter_user_databases(all))
    }

    fn apply_connection_args(&self, cmd: &mut Command) {
        cmd.arg(format!("-u{}", self.config.mysql_user))
            .arg(format!("-h{}", self.config.mysql_hostname))
            .arg(format!("-P{}", self.config.mysql_port));
        // Password goes through the child's environment, never the
        // command line, so it cannot show up in the process table.
        if let Some(password) = &self.config.mysql_password {
            cmd.env("MYSQL_PWD", password);
        }
    }

    fn spawn_mysqldump(&self, databases: &[String]) -> Result<Child> {
        let mysqldump_path = find_client_executable("mysqldump")?;
        let mut cmd = Command::new(mysqldump_path);
        self.apply_connection_args(&mut cmd);
        cmd.arg("--single-transaction").arg("--databases").args(databases);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.spawn()
            .map_err(|e| BackupError::Dump(format!("failed to spawn mysqldump: {e}")))
    }
}

impl DumpSource for MysqldumpSource<'_> {
    fn open(&self) -> Result<ActiveDump> {
        let databases = match &self.config.databases {
            Some(explicit) => explicit.clone(),
            None => {
                println!("Fetching list of databases...");
                self.list_user_databases()?
            }
        };
        if databases.is_empty() {
            return Err(BackupError::Dump(
                "no user databases found, nothing to dump".to_string(),
            ));
        }
        println!("Databases to be backed up: {:?}", databases);

        let mut child = self.spawn_mysqldump(&databases)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::Dump("mysqldump stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackupError::Dump("mysqldump stderr not captured".to_string()))?;

        // Drain stderr on a separate thread so a chatty client cannot
        // deadlock against the stdout pipe.
        let stderr_thread = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let name = logical_dump_name(&databases);
        let completion = Box::new(move || {
            let status = child
                .wait()
                .map_err(|e| BackupError::Dump(format!("failed to wait for mysqldump: {e}")))?;
            let diagnostics = stderr_thread.join().unwrap_or_default();
            if !status.success() {
                return Err(BackupError::Dump(format!(
                    "mysqldump exited with status {}: {}",
                    status,
                    diagnostics.trim()
                )));
            }
            Ok(())
        });

        Ok(ActiveDump::new(name, Box::new(stdout), completion))
    }
}

/// Drops the server's built-in databases from a listing.
pub fn filter_user_databases(all: Vec<String>) -> Vec<String> {
    all.into_iter()
        .filter(|db| !SYSTEM_DATABASES.contains(&db.as_str()))
        .collect()
}

pub fn logical_dump_name(databases: &[String]) -> String {
    match databases {
        [single] => single.clone(),
        _ => "all-databases".to_string(),
    }
}

fn find_client_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|_| {
        BackupError::Dump(format!(
            "{name} executable not found in PATH; ensure the MySQL client tools are installed"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn system_databases_are_filtered() {
        let all = vec![
            "app".to_string(),
            "information_schema".to_string(),
            "mysql".to_string(),
            "analytics".to_string(),
            "performance_schema".to_string(),
            "sys".to_string(),
        ];
        assert_eq!(filter_user_databases(all), vec!["app", "analytics"]);
    }

    #[test]
    fn dump_name_reflects_database_count() {
        assert_eq!(logical_dump_name(&["app".to_string()]), "app");
        assert_eq!(
            logical_dump_name(&["app".to_string(), "analytics".to_string()]),
            "all-databases"
        );
    }

    #[test]
    fn finish_reports_the_producer_verdict() {
        let ok = ActiveDump::new(
            "app".to_string(),
            Box::new(Cursor::new(b"-- dump".to_vec())),
            Box::new(|| Ok(())),
        );
        assert!(ok.finish().is_ok());

        let failed = ActiveDump::new(
            "app".to_string(),
            Box::new(Cursor::new(Vec::new())),
            Box::new(|| Err(BackupError::Dump("connection refused".to_string()))),
        );
        assert!(matches!(failed.finish(), Err(BackupError::Dump(_))));
    }
}
