//! Append-only registration of cron entries.
//!
//! The host's crontab is read, extended by one line and written back as a
//! whole. The read-modify-write window is guarded by a process-wide lock so
//! concurrent appends never drop each other's entries.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::executor::{CommandExecutor, CommandOutput, CommandSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronEntry {
    pub schedule: String,
    pub command: String,
}

impl fmt::Display for CronEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.schedule, self.command)
    }
}

/// The persisted entry table, as raw crontab text.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn read_table(&self) -> Result<String, GatewayError>;
    async fn write_table(&self, table: &str) -> Result<(), GatewayError>;
}

/// The current user's crontab via the `crontab` binary.
pub struct CrontabStore {
    executor: CommandExecutor,
    bin: String,
}

impl CrontabStore {
    pub fn new(executor: CommandExecutor, bin: impl Into<String>) -> Self {
        Self {
            executor,
            bin: bin.into(),
        }
    }

    fn check(&self, output: &CommandOutput, step: &str) -> Result<(), GatewayError> {
        if output.timed_out {
            return Err(GatewayError::timeout(format!("{} {step} did not finish in time", self.bin)));
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for CrontabStore {
    async fn read_table(&self) -> Result<String, GatewayError> {
        let output = self
            .executor
            .run(&CommandSpec::argv(self.bin.as_str(), ["-l"]), None)
            .await?;
        self.check(&output, "-l")?;
        if output.success() {
            // Writing back a partial or mangled table would drop entries.
            if output.stdout_truncated {
                return Err(GatewayError::upstream(
                    "existing crontab exceeds the output cap, refusing to rewrite it",
                ));
            }
            if output.stdout.contains(char::REPLACEMENT_CHARACTER) {
                return Err(GatewayError::upstream(
                    "existing crontab is not valid UTF-8, refusing to rewrite it",
                ));
            }
            return Ok(output.stdout);
        }
        if output.stderr.contains("no crontab for") {
            debug!("no existing crontab, starting empty");
            return Ok(String::new());
        }
        Err(GatewayError::upstream(format!(
            "reading crontab failed: {}",
            output.failure_message("unknown error")
        )))
    }

    async fn write_table(&self, table: &str) -> Result<(), GatewayError> {
        let spec = CommandSpec::argv(self.bin.as_str(), ["-"]).with_stdin(table);
        let output = self.executor.run(&spec, None).await?;
        self.check(&output, "-")?;
        if !output.success() {
            return Err(GatewayError::upstream(format!(
                "crontab rejected the new table: {}",
                output.failure_message("unknown error")
            )));
        }
        Ok(())
    }
}

pub struct ScheduleManager {
    store: Arc<dyn ScheduleStore>,
    lock: Mutex<()>,
    strict: bool,
}

impl ScheduleManager {
    /// With `strict`, schedules must be valid five-field expressions or
    /// `@` macros. Otherwise any non-empty single-line schedule passes.
    pub fn new(store: Arc<dyn ScheduleStore>, strict: bool) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            strict,
        }
    }

    pub async fn append_entry(&self, schedule: &str, command: &str) -> Result<CronEntry, GatewayError> {
        let schedule = single_line("schedule", schedule)?;
        let command = single_line("command", command)?;
        if self.strict {
            validate_schedule(schedule)?;
        }
        let entry = CronEntry {
            schedule: schedule.to_string(),
            command: command.to_string(),
        };

        let _guard = self.lock.lock().await;
        let mut table = self.store.read_table().await?;
        if !table.is_empty() && !table.ends_with('\n') {
            table.push('\n');
        }
        table.push_str(&entry.to_string());
        table.push('\n');
        self.store.write_table(&table).await?;

        info!(schedule = %entry.schedule, "scheduled task appended");
        Ok(entry)
    }
}

fn single_line<'a>(param: &str, value: &'a str) -> Result<&'a str, GatewayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::validation(format!("parameter '{param}' must not be empty")));
    }
    if trimmed.contains(['\n', '\r', '\0']) {
        return Err(GatewayError::validation(format!(
            "parameter '{param}' must be a single line"
        )));
    }
    Ok(trimmed)
}

const MACROS: &[&str] = &[
    "@reboot", "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
];
const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAYS: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct Field {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of `names[0]`.
    name_base: u32,
}

const FIELDS: [Field; 5] = [
    Field { label: "minute", min: 0, max: 59, names: &[], name_base: 0 },
    Field { label: "hour", min: 0, max: 23, names: &[], name_base: 0 },
    Field { label: "day of month", min: 1, max: 31, names: &[], name_base: 0 },
    Field { label: "month", min: 1, max: 12, names: MONTHS, name_base: 1 },
    Field { label: "day of week", min: 0, max: 7, names: DAYS, name_base: 0 },
];

/// Check a crontab(5) time specification.
pub fn validate_schedule(schedule: &str) -> Result<(), GatewayError> {
    if schedule.starts_with('@') {
        return if MACROS.contains(&schedule.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(GatewayError::validation(format!("unknown schedule macro '{schedule}'")))
        };
    }
    let parts: Vec<&str> = schedule.split_whitespace().collect();
    if parts.len() != FIELDS.len() {
        return Err(GatewayError::validation(format!(
            "schedule must have 5 fields, got {}",
            parts.len()
        )));
    }
    for (part, field) in parts.iter().zip(FIELDS.iter()) {
        validate_field(part, field).map_err(|reason| {
            GatewayError::validation(format!("invalid {} field '{part}': {reason}", field.label))
        })?;
    }
    Ok(())
}

fn validate_field(raw: &str, field: &Field) -> Result<(), String> {
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (item, None),
        };
        if let Some(step) = step {
            let step: u32 = step.parse().map_err(|_| format!("bad step '{step}'"))?;
            if step == 0 || step > field.max {
                return Err(format!("step {step} out of range"));
            }
        }
        if range == "*" {
            continue;
        }
        match range.split_once('-') {
            Some((lo, hi)) => {
                let lo = field_value(lo, field)?;
                let hi = field_value(hi, field)?;
                if lo > hi {
                    return Err(format!("range {lo}-{hi} is reversed"));
                }
            }
            None => {
                field_value(range, field)?;
            }
        }
    }
    Ok(())
}

fn field_value(token: &str, field: &Field) -> Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    if let Some(pos) = field.names.iter().position(|n| *n == lower) {
        return Ok(field.name_base + pos as u32);
    }
    let value: u32 = token.parse().map_err(|_| format!("'{token}' is not a number"))?;
    if value < field.min || value > field.max {
        return Err(format!("{value} not in {}-{}", field.min, field.max));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryScheduleStore;
    use hostgate_core::ErrorKind;
    use std::time::Duration;

    #[test]
    fn test_validate_schedule() {
        for ok in [
            "* * * * *",
            "*/5 0-6 1,15 jan-mar mon-fri",
            "0 3 * * 7",
            "30 2 * DEC sun",
            "@reboot",
            "@Daily",
        ] {
            assert!(validate_schedule(ok).is_ok(), "{ok}");
        }
        for bad in [
            "* * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "@sometimes",
            "every minute please ok",
        ] {
            assert!(validate_schedule(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_append_preserves_existing_entries() {
        let store = Arc::new(MemoryScheduleStore::with_table("0 1 * * * /usr/bin/backup"));
        let mgr = ScheduleManager::new(store.clone(), false);

        let entry = mgr.append_entry("*/5 * * * *", "/usr/local/bin/poll").await.unwrap();
        assert_eq!(entry.to_string(), "*/5 * * * * /usr/local/bin/poll");
        assert_eq!(
            store.table(),
            "0 1 * * * /usr/bin/backup\n*/5 * * * * /usr/local/bin/poll\n"
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_and_multiline() {
        let mgr = ScheduleManager::new(Arc::new(MemoryScheduleStore::default()), false);
        let err = mgr.append_entry("  ", "echo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("schedule"));

        let err = mgr
            .append_entry("* * * * *", "echo hi\n* * * * * rm -rf /")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("command"));
    }

    #[tokio::test]
    async fn test_permissive_by_default_strict_on_request() {
        let lax = ScheduleManager::new(Arc::new(MemoryScheduleStore::default()), false);
        assert!(lax.append_entry("whenever", "echo").await.is_ok());

        let strict = ScheduleManager::new(Arc::new(MemoryScheduleStore::default()), true);
        let err = strict.append_entry("whenever", "echo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(MemoryScheduleStore::default());
        let mgr = Arc::new(ScheduleManager::new(store.clone(), false));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let mgr = mgr.clone();
                tokio::spawn(async move {
                    mgr.append_entry("* * * * *", &format!("echo job-{i}")).await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let table = store.table();
        assert_eq!(table.lines().count(), 32);
        for i in 0..32 {
            assert!(table.contains(&format!("echo job-{i}\n")));
        }
    }

    /// A `crontab` stand-in backed by a plain file. Returns (table, binary).
    #[cfg(unix)]
    fn crontab_shim(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let table = dir.join("table");
        let shim = dir.join("crontab");
        std::fs::write(
            &shim,
            format!(
                "#!/bin/sh\nF='{}'\nif [ \"$1\" = \"-l\" ]; then\n  [ -f \"$F\" ] || {{ echo 'no crontab for tester' >&2; exit 1; }}\n  cat \"$F\"\nelse\n  cat > \"$F.tmp\" && mv \"$F.tmp\" \"$F\"\nfi\n",
                table.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&shim, std::fs::Permissions::from_mode(0o755)).unwrap();
        (table, shim)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crontab_store_against_shim() {
        let dir = tempfile::tempdir().unwrap();
        let (table, shim) = crontab_shim(dir.path());

        let executor = CommandExecutor::new(Duration::from_secs(10), Duration::from_secs(10), 1 << 20);
        let store = Arc::new(CrontabStore::new(executor, shim.to_string_lossy()));
        let mgr = Arc::new(ScheduleManager::new(store, true));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.append_entry("@hourly", &format!("job {i}")).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let written = std::fs::read_to_string(&table).unwrap();
        assert_eq!(written.lines().count(), 8);
        for i in 0..8 {
            assert!(written.contains(&format!("@hourly job {i}\n")));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_crontab_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (table, shim) = crontab_shim(dir.path());
        let original: String = (0..20).map(|i| format!("0 {i} * * * /usr/bin/job-{i}\n")).collect();
        std::fs::write(&table, &original).unwrap();

        let executor = CommandExecutor::new(Duration::from_secs(10), Duration::from_secs(10), 100);
        let store = Arc::new(CrontabStore::new(executor, shim.to_string_lossy()));
        let mgr = ScheduleManager::new(store, false);

        let err = mgr.append_entry("@daily", "new").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(std::fs::read_to_string(&table).unwrap(), original);
    }

    #[tokio::test]
    async fn test_crontab_write_failure_is_upstream() {
        let executor = CommandExecutor::new(Duration::from_secs(5), Duration::from_secs(5), 4096);
        let store = CrontabStore::new(executor, "false");
        let err = store.write_table("* * * * * x\n").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        let err = store.read_table().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }
}
