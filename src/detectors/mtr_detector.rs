use super::mtr_parser::parse_report;
use crate::error::{ConfigError, MeasureError};
use crate::structures::Report;
use crate::util::find_in_path;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

const MTR_BIN: &str = "mtr";

/// Produces raw `mtr --report` text for a target.
#[async_trait]
pub trait MtrRunner: Send + Sync {
    async fn run(
        &self,
        host: &str,
        cycles: u32,
        extra: &[String],
    ) -> Result<String, MeasureError>;
}

/// Runs the mtr binary found on `PATH`.
#[derive(Debug, Clone)]
pub struct SystemMtr {
    bin: PathBuf,
}

impl SystemMtr {
    pub fn locate() -> Result<Self, ConfigError> {
        let bin = find_in_path(MTR_BIN).ok_or(ConfigError::MtrNotFound)?;
        info!("Use mtr binary {}", bin.display());
        Ok(Self { bin })
    }

    pub fn with_bin(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    fn args(host: &str, cycles: u32, extra: &[String]) -> Vec<String> {
        let mut args = vec![
            "--report".to_string(),
            "-n".to_string(),
            "-c".to_string(),
            cycles.to_string(),
            host.to_string(),
        ];
        args.extend(extra.iter().cloned());
        args
    }
}

#[async_trait]
impl MtrRunner for SystemMtr {
    async fn run(
        &self,
        host: &str,
        cycles: u32,
        extra: &[String],
    ) -> Result<String, MeasureError> {
        let args = Self::args(host, cycles, extra);
        debug!("Run {} {}", self.bin.display(), args.join(" "));

        let output = Command::new(&self.bin)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(MeasureError::Spawn)?;

        if !output.status.success() {
            return Err(MeasureError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Measures the path to one target and parses it into a report.
#[derive(Clone)]
pub struct MtrDetector {
    runner: Arc<dyn MtrRunner>,
    host: String,
    cycles: u32,
    extra: Vec<String>,
}

impl MtrDetector {
    pub fn new(runner: Arc<dyn MtrRunner>, host: String, cycles: u32) -> Self {
        Self {
            runner,
            host,
            cycles,
            extra: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, extra: Vec<String>) -> Self {
        self.extra = extra;
        self
    }

    /// The report carries no location; `elapsed_time` covers the subprocess only.
    pub async fn detect(&self) -> Result<Report, MeasureError> {
        let time = Utc::now();

        let start = Instant::now();
        let raw = self.runner.run(&self.host, self.cycles, &self.extra).await?;
        let elapsed = start.elapsed();

        let hosts = parse_report(&raw)?;
        info!(
            "Mtr to {} done, hops:{} elapsed:{:?}",
            self.host,
            hosts.len(),
            elapsed
        );

        Ok(Report::new(time, hosts, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Canned(&'static str);

    #[async_trait]
    impl MtrRunner for Canned {
        async fn run(&self, _: &str, _: u32, _: &[String]) -> Result<String, MeasureError> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn command_line_layout() {
        let args = SystemMtr::args("example.com", 3, &["--tcp".to_string()]);
        assert_eq!(
            args,
            vec!["--report", "-n", "-c", "3", "example.com", "--tcp"]
        );
    }

    #[tokio::test]
    async fn detect_times_the_run() {
        let text = "  1.|-- 10.0.0.1   0.0%  3  1.0  1.0  1.0  1.0  0.0\n";
        let detector = MtrDetector::new(Arc::new(Canned(text)), "h".into(), 3);
        let report = detector.detect().await.unwrap();

        assert_eq!(report.hops(), 1);
        assert!(report.elapsed_time >= Duration::from_millis(2));
        assert!(report.location.is_none());
    }

    #[tokio::test]
    async fn system_runner_captures_stdout() {
        let out = SystemMtr::with_bin("echo")
            .run("example.com", 2, &[])
            .await
            .unwrap();
        assert_eq!(out.trim(), "--report -n -c 2 example.com");
    }

    #[tokio::test]
    async fn system_runner_fails_on_exit_status() {
        let err = SystemMtr::with_bin("false")
            .run("example.com", 2, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MeasureError::Exit { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = SystemMtr::with_bin("/nonexistent/mtr")
            .run("example.com", 2, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MeasureError::Spawn(_)));
    }
}
