//! Sampler and delta engine for `/proc/uid_io/stats`.

use crate::collector::traits::FileSystem;
use crate::error::HardParse;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_PATH: &str = "/proc/uid_io/stats";

/// The five counters the kernel maintains for one UID-state (foreground or
/// background).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStat {
    pub rchar: u64,
    pub wchar: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub fsync: u64,
}

impl IoStat {
    fn checked_sub(&self, other: &IoStat) -> IoStat {
        IoStat {
            rchar: self.rchar.saturating_sub(other.rchar),
            wchar: self.wchar.saturating_sub(other.wchar),
            read_bytes: self.read_bytes.saturating_sub(other.read_bytes),
            write_bytes: self.write_bytes.saturating_sub(other.write_bytes),
            fsync: self.fsync.saturating_sub(other.fsync),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == IoStat::default()
    }
}

/// One UID's raw sample: foreground and background counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidIoRecord {
    pub foreground: IoStat,
    pub background: IoStat,
}

/// Per-UID usage since the previous sample; negative raw deltas are clamped
/// to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidIoUsage {
    pub uid: u32,
    pub foreground: IoStat,
    pub background: IoStat,
}

impl UidIoUsage {
    pub fn is_zero(&self) -> bool {
        self.foreground.is_zero() && self.background.is_zero()
    }
}

fn parse_line(line: &str) -> Result<(u32, UidIoRecord), HardParse> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 11 {
        return Err(HardParse::new(format!(
            "expected 11 fields in uid_io line, got {}: {line:?}",
            fields.len()
        )));
    }
    let mut n = [0u64; 10];
    for (i, slot) in n.iter_mut().enumerate() {
        *slot = fields[i + 1]
            .parse()
            .map_err(|_| HardParse::new(format!("non-integer field in uid_io line: {line:?}")))?;
    }
    let uid: u32 = fields[0]
        .parse()
        .map_err(|_| HardParse::new(format!("non-integer uid in uid_io line: {line:?}")))?;
    Ok((
        uid,
        UidIoRecord {
            foreground: IoStat {
                rchar: n[0],
                wchar: n[1],
                read_bytes: n[2],
                write_bytes: n[3],
                fsync: n[8],
            },
            background: IoStat {
                rchar: n[4],
                wchar: n[5],
                read_bytes: n[6],
                write_bytes: n[7],
                fsync: n[9],
            },
        },
    ))
}

/// Parses the whole `/proc/uid_io/stats` content into a per-UID map. Lines
/// beginning with `task` are skipped; any other malformed line fails the
/// whole sample.
pub fn parse_uid_io_stats(content: &str) -> Result<HashMap<u32, UidIoRecord>, HardParse> {
    let mut map = HashMap::new();
    for line in content.lines() {
        if line.is_empty() || line.starts_with("task") {
            continue;
        }
        let (uid, record) = parse_line(line)?;
        map.insert(uid, record);
    }
    Ok(map)
}

/// Samples `/proc/uid_io/stats`, `enabled` fixed at construction from a
/// read-access probe on the source path.
pub struct UidIoSampler<F: FileSystem> {
    fs: F,
    path: String,
    enabled: bool,
}

impl<F: FileSystem> UidIoSampler<F> {
    pub fn new(fs: F, path: impl Into<String>) -> Self {
        let path = path.into();
        let enabled = fs.exists(Path::new(&path));
        Self { fs, path, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample(&self) -> Result<HashMap<u32, UidIoRecord>, HardParse> {
        if !self.enabled {
            return Err(HardParse::new(format!("cannot access {}", self.path)));
        }
        let content = self
            .fs
            .read_to_string(Path::new(&self.path))
            .map_err(|e| HardParse::new(format!("failed to read {}: {e}", self.path)))?;
        parse_uid_io_stats(&content)
    }
}

/// Maintains the previous sample and computes clamped per-UID deltas.
#[derive(Debug, Default)]
pub struct UidIoDelta {
    last: HashMap<u32, UidIoRecord>,
}

impl UidIoDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes usage for every UID present in `sample`, then replaces the
    /// retained previous sample wholesale.
    pub fn collect(&mut self, sample: HashMap<u32, UidIoRecord>) -> Vec<UidIoUsage> {
        let mut usages = Vec::with_capacity(sample.len());
        for (&uid, record) in &sample {
            let prev = self.last.get(&uid).copied().unwrap_or_default();
            usages.push(UidIoUsage {
                uid,
                foreground: record.foreground.checked_sub(&prev.foreground),
                background: record.background.checked_sub(&prev.background),
            });
        }
        self.last = sample;
        usages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    #[test]
    fn skips_task_lines_and_parses_rest() {
        let content = "task 1 2 3 4 5 6 7 8 9 10\n1009 0 0 0 0 0 0 14000 16000 0 100\n";
        let map = parse_uid_io_stats(content).unwrap();
        assert_eq!(map.len(), 1);
        let r = map[&1009];
        assert_eq!(r.background.read_bytes, 14000);
        assert_eq!(r.background.write_bytes, 16000);
        assert_eq!(r.background.fsync, 100);
    }

    #[test]
    fn too_few_fields_is_hard_parse_error() {
        let content = "1009 0 0 0\n";
        assert!(parse_uid_io_stats(content).is_err());
    }

    #[test]
    fn non_integer_field_is_hard_parse_error() {
        let content = "1009 0 0 0 x 0 0 0 0 0 0\n";
        assert!(parse_uid_io_stats(content).is_err());
    }

    #[test]
    fn delta_clamps_negative_to_zero_and_replaces_wholesale() {
        let mut delta = UidIoDelta::new();
        let mut first = HashMap::new();
        first.insert(
            7,
            UidIoRecord {
                foreground: IoStat::default(),
                background: IoStat {
                    read_bytes: 100,
                    ..Default::default()
                },
            },
        );
        let usages = delta.collect(first);
        assert_eq!(usages[0].background.read_bytes, 100);

        let mut second = HashMap::new();
        second.insert(
            7,
            UidIoRecord {
                foreground: IoStat::default(),
                background: IoStat {
                    read_bytes: 40, // kernel reset: raw value decreased
                    ..Default::default()
                },
            },
        );
        let usages = delta.collect(second);
        assert_eq!(usages[0].background.read_bytes, 0);
    }

    #[test]
    fn sampler_disabled_when_path_missing() {
        let fs = MockFs::new();
        let sampler = UidIoSampler::new(fs, DEFAULT_PATH);
        assert!(!sampler.enabled());
        assert!(sampler.sample().is_err());
    }

    #[test]
    fn sampler_reads_through_filesystem() {
        let mut fs = MockFs::new();
        fs.add_file(DEFAULT_PATH, "1009 0 0 0 14000 0 0 0 16000 0 100\n");
        let sampler = UidIoSampler::new(fs, DEFAULT_PATH);
        assert!(sampler.enabled());
        let sample = sampler.sample().unwrap();
        assert_eq!(sample.len(), 1);
    }
}
