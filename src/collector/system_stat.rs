//! Sampler and delta engine for `/proc/stat`'s aggregate CPU line and the
//! two system-wide process-count lines.

use crate::collector::traits::FileSystem;
use crate::error::HardParse;
use std::path::Path;

pub const DEFAULT_PATH: &str = "/proc/stat";

/// The ten counters on the aggregate `cpu ` line, in file order.
pub type CpuTimes = [u64; 10];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStat {
    pub cpu: CpuTimes,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

pub fn parse_proc_stat(content: &str) -> Result<SystemStat, HardParse> {
    let mut cpu: Option<CpuTimes> = None;
    let mut procs_running: Option<u64> = None;
    let mut procs_blocked: Option<u64> = None;

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("cpu ") {
            if cpu.is_some() {
                return Err(HardParse::new("duplicate cpu line in /proc/stat"));
            }
            // The kernel may emit an empty second field; dropping empty
            // tokens makes this tolerant of that without affecting the rest.
            let fields: Vec<&str> = rest.split(' ').filter(|f| !f.is_empty()).collect();
            if fields.len() < 10 {
                return Err(HardParse::new(format!(
                    "expected 10 cpu counters, got {}",
                    fields.len()
                )));
            }
            let mut times = [0u64; 10];
            for (slot, field) in times.iter_mut().zip(fields.iter()) {
                *slot = field
                    .parse()
                    .map_err(|_| HardParse::new(format!("non-integer cpu field: {field:?}")))?;
            }
            cpu = Some(times);
        } else if let Some(rest) = line.strip_prefix("procs_running ") {
            if procs_running.is_some() {
                return Err(HardParse::new("duplicate procs_running line"));
            }
            procs_running = Some(
                rest.trim()
                    .parse()
                    .map_err(|_| HardParse::new(format!("non-integer procs_running: {rest:?}")))?,
            );
        } else if let Some(rest) = line.strip_prefix("procs_blocked ") {
            if procs_blocked.is_some() {
                return Err(HardParse::new("duplicate procs_blocked line"));
            }
            procs_blocked = Some(
                rest.trim()
                    .parse()
                    .map_err(|_| HardParse::new(format!("non-integer procs_blocked: {rest:?}")))?,
            );
        } else if line.starts_with("procs_") {
            return Err(HardParse::new(format!("unexpected procs_ line: {line:?}")));
        }
    }

    Ok(SystemStat {
        cpu: cpu.ok_or_else(|| HardParse::new("missing cpu line in /proc/stat"))?,
        procs_running: procs_running
            .ok_or_else(|| HardParse::new("missing procs_running line in /proc/stat"))?,
        procs_blocked: procs_blocked
            .ok_or_else(|| HardParse::new("missing procs_blocked line in /proc/stat"))?,
    })
}

pub struct SystemStatSampler<F: FileSystem> {
    fs: F,
    path: String,
    enabled: bool,
}

impl<F: FileSystem> SystemStatSampler<F> {
    pub fn new(fs: F, path: impl Into<String>) -> Self {
        let path = path.into();
        let enabled = fs.exists(Path::new(&path));
        Self { fs, path, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample(&self) -> Result<SystemStat, HardParse> {
        if !self.enabled {
            return Err(HardParse::new(format!("cannot access {}", self.path)));
        }
        let content = self
            .fs
            .read_to_string(Path::new(&self.path))
            .map_err(|e| HardParse::new(format!("failed to read {}: {e}", self.path)))?;
        parse_proc_stat(&content)
    }
}

/// Usage since the previous sample: CPU counters subtracted, process counts
/// kept absolute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStatUsage {
    pub cpu_delta: CpuTimes,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

#[derive(Debug, Default)]
pub struct SystemStatDelta {
    last: Option<SystemStat>,
}

impl SystemStatDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, sample: SystemStat) -> SystemStatUsage {
        let mut cpu_delta = [0u64; 10];
        if let Some(prev) = &self.last {
            for (slot, (curr, prev)) in cpu_delta.iter_mut().zip(sample.cpu.iter().zip(prev.cpu.iter())) {
                *slot = curr.saturating_sub(*prev);
            }
        }
        let usage = SystemStatUsage {
            cpu_delta,
            procs_running: sample.procs_running,
            procs_blocked: sample.procs_blocked,
        };
        self.last = Some(sample);
        usage
    }
}
