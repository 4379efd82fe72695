//! Sampler and delta engine for the per-process tree under `/proc`.

use crate::collector::traits::FileSystem;
use crate::error::{Collected, CollectResult, HardParse, TransientParse};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATH: &str = "/proc";

/// Fields parsed out of one `stat` line (process- or thread-level; the
/// format and algorithm are identical for both).
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatFields {
    id: u32,
    comm: String,
    state: char,
    ppid: u32,
    major_faults: u64,
    num_threads: u64,
    start_time: u64,
}

/// Locates the comm field's closing parenthesis by scanning forward across
/// whitespace-split tokens, since `comm` itself may contain spaces.
fn parse_stat_line(line: &str) -> Result<StatFields, HardParse> {
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() < 2 {
        return Err(HardParse::new(format!("stat line too short: {line:?}")));
    }
    let id: u32 = fields[0]
        .parse()
        .map_err(|_| HardParse::new(format!("non-integer pid in stat line: {line:?}")))?;

    let mut comm = String::new();
    let mut comm_end_offset = None;
    for (i, field) in fields.iter().enumerate().skip(1) {
        comm.push_str(field);
        if field.ends_with(')') {
            comm_end_offset = Some(i - 1);
            break;
        }
        comm.push(' ');
    }
    let comm_end_offset = comm_end_offset
        .ok_or_else(|| HardParse::new(format!("comm field never closes in stat line: {line:?}")))?;
    if !comm.starts_with('(') || !comm.ends_with(')') {
        return Err(HardParse::new(format!(
            "comm field malformed in stat line: {line:?}"
        )));
    }
    comm = comm[1..comm.len() - 1].to_string();

    let min_len = 22 + comm_end_offset;
    if fields.len() < min_len {
        return Err(HardParse::new(format!(
            "stat line has {} fields, need at least {min_len}: {line:?}",
            fields.len()
        )));
    }
    let field_at = |offset: usize| -> &str { fields[offset + comm_end_offset] };
    let state = field_at(2)
        .chars()
        .next()
        .ok_or_else(|| HardParse::new(format!("empty state field in stat line: {line:?}")))?;
    let ppid: u32 = field_at(3)
        .parse()
        .map_err(|_| HardParse::new(format!("non-integer ppid in stat line: {line:?}")))?;
    let major_faults: u64 = field_at(11)
        .parse()
        .map_err(|_| HardParse::new(format!("non-integer major faults in stat line: {line:?}")))?;
    let num_threads: u64 = field_at(19)
        .parse()
        .map_err(|_| HardParse::new(format!("non-integer num threads in stat line: {line:?}")))?;
    let start_time: u64 = field_at(21)
        .parse()
        .map_err(|_| HardParse::new(format!("non-integer start time in stat line: {line:?}")))?;

    Ok(StatFields {
        id,
        comm,
        state,
        ppid,
        major_faults,
        num_threads,
        start_time,
    })
}

/// The two facts pulled out of a `status` file.
struct StatusFields {
    uid: u32,
    tgid: u32,
}

fn parse_status(content: &str) -> Result<StatusFields, HardParse> {
    let mut uid = None;
    let mut tgid = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            if uid.is_some() {
                return Err(HardParse::new("duplicate Uid: line in status"));
            }
            let first = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| HardParse::new(format!("empty Uid: line: {line:?}")))?;
            uid = Some(
                first
                    .parse()
                    .map_err(|_| HardParse::new(format!("non-integer uid in status: {line:?}")))?,
            );
        } else if let Some(rest) = line.strip_prefix("Tgid:") {
            if tgid.is_some() {
                return Err(HardParse::new("duplicate Tgid: line in status"));
            }
            tgid = Some(rest.trim().parse().map_err(|_| {
                HardParse::new(format!("non-integer tgid in status: {line:?}"))
            })?);
        }
    }
    Ok(StatusFields {
        uid: uid.ok_or_else(|| HardParse::new("missing Uid: line in status"))?,
        tgid: tgid.ok_or_else(|| HardParse::new("missing Tgid: line in status"))?,
    })
}

/// One thread's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRecord {
    pub tid: u32,
    pub state: char,
    pub major_faults: u64,
    pub start_time: u64,
}

/// One process's counters plus its threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub uid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub major_faults: u64,
    pub num_threads: u64,
    pub start_time: u64,
    pub threads: HashMap<u32, ThreadRecord>,
}

fn numeric_children(fs: &impl FileSystem, dir: &Path) -> Vec<(u32, PathBuf)> {
    fs.read_dir(dir)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            name.parse::<u32>().ok().map(|id| (id, path))
        })
        .collect()
}

fn collect_one_process(
    fs: &impl FileSystem,
    proc_root: &Path,
    pid: u32,
    skipped: &mut Vec<TransientParse>,
) -> Result<Option<ProcessRecord>, HardParse> {
    let base = proc_root.join(pid.to_string());

    let stat_content = match fs.read_to_string(&base.join("stat")) {
        Ok(c) => c,
        Err(e) => {
            skipped.push(TransientParse::new(format!(
                "stat for pid {pid} unreadable: {e}"
            )));
            return Ok(None);
        }
    };
    let stat = parse_stat_line(stat_content.trim_end_matches('\n'))?;

    let status_content = match fs.read_to_string(&base.join("status")) {
        Ok(c) => c,
        Err(e) => {
            skipped.push(TransientParse::new(format!(
                "status for pid {pid} unreadable: {e}"
            )));
            return Ok(None);
        }
    };
    let status = parse_status(&status_content)?;

    if status.tgid != pid {
        return Ok(None);
    }

    let task_dir = base.join("task");
    let mut threads = HashMap::new();
    for (tid, tid_path) in numeric_children(fs, &task_dir) {
        match fs.read_to_string(&tid_path.join("stat")) {
            Ok(content) => {
                let t = parse_stat_line(content.trim_end_matches('\n'))?;
                threads.insert(
                    tid,
                    ThreadRecord {
                        tid,
                        state: t.state,
                        major_faults: t.major_faults,
                        start_time: t.start_time,
                    },
                );
            }
            Err(e) => {
                skipped.push(TransientParse::new(format!(
                    "task stat for pid {pid} tid {tid} unreadable: {e}"
                )));
            }
        }
    }

    // Matches the original's designated-initializer synthesis, which leaves
    // majorFaults at its struct default rather than copying the process total.
    threads.entry(pid).or_insert(ThreadRecord {
        tid: pid,
        state: stat.state,
        major_faults: 0,
        start_time: stat.start_time,
    });

    Ok(Some(ProcessRecord {
        pid: stat.id,
        uid: status.uid,
        comm: stat.comm,
        state: stat.state,
        ppid: stat.ppid,
        major_faults: stat.major_faults,
        num_threads: stat.num_threads,
        start_time: stat.start_time,
        threads,
    }))
}

pub struct ProcessSampler<F: FileSystem> {
    fs: F,
    path: String,
    enabled: bool,
}

impl<F: FileSystem> ProcessSampler<F> {
    pub fn new(fs: F, path: impl Into<String>) -> Self {
        let path = path.into();
        let enabled = fs.exists(Path::new(&path));
        Self { fs, path, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample(&self) -> CollectResult<HashMap<u32, ProcessRecord>> {
        let root = Path::new(&self.path);
        let mut out = HashMap::new();
        let mut skipped = Vec::new();
        for (pid, _) in numeric_children(&self.fs, root) {
            if let Some(record) = collect_one_process(&self.fs, root, pid, &mut skipped)? {
                out.insert(pid, record);
            }
        }
        let mut collected = Collected::new(out);
        collected.skipped = skipped;
        Ok(collected)
    }
}

/// Usage since the previous sample, per PID and per thread within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessUsage {
    pub pid: u32,
    pub uid: u32,
    pub comm: String,
    pub num_threads: u64,
    pub major_faults: u64,
    pub threads: HashMap<u32, ThreadRecord>,
}

#[derive(Debug, Default)]
pub struct ProcessDelta {
    last: HashMap<u32, ProcessRecord>,
}

impl ProcessDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, sample: HashMap<u32, ProcessRecord>) -> Vec<ProcessUsage> {
        let mut usages = Vec::with_capacity(sample.len());
        for (&pid, record) in &sample {
            let prev = self.last.get(&pid).filter(|p| p.start_time == record.start_time);

            let major_faults = match prev {
                Some(p) => record.major_faults.saturating_sub(p.major_faults),
                None => record.major_faults,
            };

            let mut threads = HashMap::with_capacity(record.threads.len());
            for (&tid, thread) in &record.threads {
                let prev_thread = prev
                    .and_then(|p| p.threads.get(&tid))
                    .filter(|t| t.start_time == thread.start_time);
                let delta_faults = match prev_thread {
                    Some(t) => thread.major_faults.saturating_sub(t.major_faults),
                    None => thread.major_faults,
                };
                threads.insert(
                    tid,
                    ThreadRecord {
                        tid,
                        state: thread.state,
                        major_faults: delta_faults,
                        start_time: thread.start_time,
                    },
                );
            }

            usages.push(ProcessUsage {
                pid,
                uid: record.uid,
                comm: record.comm.clone(),
                num_threads: record.num_threads,
                major_faults,
                threads,
            });
        }
        self.last = sample;
        usages
    }
}
