use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Writes the two-line duration report (`Duration`, then milliseconds) for a phase.
pub fn write_report(log_dir: &Path, file_name: &str, elapsed: Duration) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let path = log_dir.join(file_name);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create timing report: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "Duration")?;
    writeln!(writer, "{}", elapsed.as_millis())?;
    writer.flush()?;

    info!(path = %path.display(), millis = elapsed.as_millis() as u64, "Timing report written");
    Ok(path)
}

/// Wall-clock timer for one phase invocation.
pub struct PhaseTimer {
    phase: &'static str,
    start: Instant,
}

impl PhaseTimer {
    pub fn start(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Records the elapsed time. A report that cannot be written is logged, not returned.
    pub fn finish(self, log_dir: &Path, file_name: &str) -> Duration {
        let elapsed = self.elapsed();
        crate::recover::log_and_continue(
            self.phase,
            "write timing report",
            write_report(log_dir, file_name, elapsed),
        );
        elapsed
    }
}
