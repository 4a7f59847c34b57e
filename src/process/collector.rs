use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task;

use crate::session::ProcessMetadata;

/// Number of whitespace tokens `ps` prints for `lstart`.
const CREATE_TIME_TOKENS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub create_time: String,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub argv: Vec<String>,
}

impl From<ProcessInfo> for ProcessMetadata {
    fn from(info: ProcessInfo) -> Self {
        Self {
            process_create_time: Some(info.create_time),
            cpu_percent: Some(info.cpu_percent),
            memory_percent: Some(info.mem_percent),
            cmd: Some(info.argv),
        }
    }
}

/// Raw result of one process listing.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub success: bool,
    pub stdout: String,
}

#[derive(Debug, Error)]
pub enum ProcessQueryError {
    #[error("failed to run process listing: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("process query task failed to join: {0}")]
    Join(String),

    #[error("working directory of pid {pid} unavailable: {source}")]
    WorkingDir {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Abstraction over the external process listing so it can be mocked in tests.
#[async_trait]
pub trait ProcessQuery: Send + Sync {
    /// Lists `pids` (comma-joined) in the fixed column order
    /// `lstart %cpu %mem pid command...`.
    async fn list(&self, pids: &str) -> Result<QueryOutput, ProcessQueryError>;

    async fn working_dir(&self, pid: u32) -> Result<PathBuf, ProcessQueryError>;
}

/// Default query backed by `ps` and `/proc`.
pub struct PsQuery;

#[async_trait]
impl ProcessQuery for PsQuery {
    async fn list(&self, pids: &str) -> Result<QueryOutput, ProcessQueryError> {
        let pids = pids.to_string();
        task::spawn_blocking(move || -> Result<QueryOutput, ProcessQueryError> {
            use std::process::{Command, Stdio};

            let output = Command::new("ps")
                .args([
                    "-o", "lstart=", "-o", "%cpu=", "-o", "%mem=", "-o", "pid=", "-o", "args=",
                    "-p",
                ])
                .arg(&pids)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                log::debug!("ps exited with {}: {}", output.status, stderr.trim());
            }

            Ok(QueryOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            })
        })
        .await
        .map_err(|e| ProcessQueryError::Join(e.to_string()))?
    }

    async fn working_dir(&self, pid: u32) -> Result<PathBuf, ProcessQueryError> {
        task::spawn_blocking(move || {
            std::fs::read_link(format!("/proc/{pid}/cwd"))
                .map_err(|source| ProcessQueryError::WorkingDir { pid, source })
        })
        .await
        .map_err(|e| ProcessQueryError::Join(e.to_string()))?
    }
}

/// Resolves process metadata for many pids with a single listing.
#[derive(Clone)]
pub struct ProcessInfoCollector {
    query: Arc<dyn ProcessQuery>,
}

impl Default for ProcessInfoCollector {
    fn default() -> Self {
        Self::new(Arc::new(PsQuery))
    }
}

impl ProcessInfoCollector {
    pub fn new(query: Arc<dyn ProcessQuery>) -> Self {
        Self { query }
    }

    /// Collects metadata for every pid in one external query. Pid `0` is never
    /// queried. A failed or empty listing yields an empty map; callers treat
    /// missing pids as having no metadata.
    pub async fn collect(&self, pids: &BTreeSet<u32>) -> HashMap<u32, ProcessInfo> {
        let joined = pids
            .iter()
            .filter(|pid| **pid > 0)
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        if joined.is_empty() {
            return HashMap::new();
        }

        let output = match self.query.list(&joined).await {
            Ok(output) => output,
            Err(err) => {
                log::warn!("Process info unavailable for pids {}: {}", joined, err);
                return HashMap::new();
            }
        };

        if !output.success || output.stdout.trim().is_empty() {
            log::warn!(
                "Process listing for pids {} failed or returned nothing; saving without process info",
                joined
            );
            return HashMap::new();
        }

        parse_process_listing(&output.stdout)
    }

    pub async fn working_dir(&self, pid: u32) -> Result<PathBuf, ProcessQueryError> {
        self.query.working_dir(pid).await
    }
}

/// Parses `ps` output in `lstart %cpu %mem pid command...` column order.
/// Malformed lines are skipped.
pub fn parse_process_listing(stdout: &str) -> HashMap<u32, ProcessInfo> {
    let mut infos = HashMap::new();
    for line in stdout.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < CREATE_TIME_TOKENS + 4 {
            if !tokens.is_empty() {
                log::debug!("Skipping short process line: {}", line);
            }
            continue;
        }

        let rest = &tokens[CREATE_TIME_TOKENS..];
        let parsed = (
            rest[0].parse::<f32>(),
            rest[1].parse::<f32>(),
            rest[2].parse::<u32>(),
        );
        let (Ok(cpu_percent), Ok(mem_percent), Ok(pid)) = parsed else {
            log::debug!("Skipping unparsable process line: {}", line);
            continue;
        };

        infos.insert(
            pid,
            ProcessInfo {
                create_time: tokens[..CREATE_TIME_TOKENS].join(" "),
                cpu_percent,
                mem_percent,
                argv: rest[3..].iter().map(|s| s.to_string()).collect(),
            },
        );
    }
    infos
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockQuery {
        output: QueryOutput,
        calls: Mutex<Vec<String>>,
    }

    impl MockQuery {
        fn new(success: bool, stdout: &str) -> Arc<Self> {
            Arc::new(Self {
                output: QueryOutput {
                    success,
                    stdout: stdout.to_string(),
                },
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProcessQuery for MockQuery {
        async fn list(&self, pids: &str) -> Result<QueryOutput, ProcessQueryError> {
            self.calls.lock().unwrap().push(pids.to_string());
            Ok(self.output.clone())
        }

        async fn working_dir(&self, pid: u32) -> Result<PathBuf, ProcessQueryError> {
            Err(ProcessQueryError::WorkingDir {
                pid,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        }
    }

    const LISTING: &str = "\
Mon Oct 12 09:30:01 2026  0.5  1.2  4242 /usr/bin/gnome-terminal --window
Tue Oct 13 18:02:44 2026 12.0  3.4  5150 ./build/app -v
";

    #[test]
    fn parses_fixed_columns() {
        let infos = parse_process_listing(LISTING);
        assert_eq!(infos.len(), 2);
        let terminal = &infos[&4242];
        assert_eq!(terminal.create_time, "Mon Oct 12 09:30:01 2026");
        assert_eq!(terminal.cpu_percent, 0.5);
        assert_eq!(terminal.mem_percent, 1.2);
        assert_eq!(terminal.argv, vec!["/usr/bin/gnome-terminal", "--window"]);
        assert_eq!(infos[&5150].argv[0], "./build/app");
    }

    #[test]
    fn skips_malformed_lines() {
        let infos = parse_process_listing("garbage\nMon Oct 12 09:30:01 2026 x y 1 cmd\n\n");
        assert!(infos.is_empty());
    }

    #[tokio::test]
    async fn one_query_for_many_pids() {
        let query = MockQuery::new(true, LISTING);
        let collector = ProcessInfoCollector::new(query.clone());
        let pids: BTreeSet<u32> = [4242, 5150, 0].into_iter().collect();

        let infos = collector.collect(&pids).await;

        assert_eq!(infos.len(), 2);
        assert_eq!(*query.calls.lock().unwrap(), vec!["4242,5150".to_string()]);
    }

    #[tokio::test]
    async fn one_query_for_single_pid() {
        let query = MockQuery::new(true, LISTING);
        let collector = ProcessInfoCollector::new(query.clone());

        collector.collect(&[4242].into_iter().collect()).await;

        assert_eq!(query.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_query_yields_no_metadata() {
        let query = MockQuery::new(false, LISTING);
        let collector = ProcessInfoCollector::new(query.clone());

        let infos = collector.collect(&[4242, 5150].into_iter().collect()).await;

        assert!(infos.is_empty());
        assert_eq!(query.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_pid_is_never_queried() {
        let query = MockQuery::new(true, "");
        let collector = ProcessInfoCollector::new(query.clone());

        let infos = collector.collect(&[0].into_iter().collect()).await;

        assert!(infos.is_empty());
        assert!(query.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn metadata_conversion_fills_every_field() {
        let info = parse_process_listing(LISTING).remove(&4242).unwrap();
        let metadata = ProcessMetadata::from(info);
        assert!(metadata.is_known());
        assert_eq!(metadata.cpu_percent, Some(0.5));
    }
}
