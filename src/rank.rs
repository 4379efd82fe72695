//! Turns one tick's sampler deltas into top-N ranked reports.

use crate::collector::{ProcessUsage, SystemStatUsage, UidIoUsage};
use crate::config::Tunables;
use crate::transport::PackageResolver;
use std::collections::HashMap;

/// Below this UID, names come from the OS password database instead of the
/// package-name service.
pub const APP_UID_THRESHOLD: u32 = 10_000;

/// Inserts `candidate` into `list` (capped at `cap` unless `unbounded`),
/// scanning from the front for the first strictly-lower-keyed entry.
/// Equal keys do not displace. Used by every top-N list in this module.
fn rank_insert<T>(list: &mut Vec<T>, candidate: T, cap: usize, unbounded: bool, key: impl Fn(&T) -> u64) {
    let candidate_key = key(&candidate);
    let pos = list.iter().position(|e| key(e) < candidate_key);
    match pos {
        Some(i) => list.insert(i, candidate),
        None => list.push(candidate),
    }
    if !unbounded && list.len() > cap {
        list.pop();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UidIoEntry {
    pub uid: u32,
    pub name: String,
    pub foreground_bytes: u64,
    pub background_bytes: u64,
    pub foreground_fsync: u64,
    pub background_fsync: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UidIoTotals {
    pub foreground_read_bytes: u64,
    pub background_read_bytes: u64,
    pub foreground_write_bytes: u64,
    pub background_write_bytes: u64,
    pub foreground_fsync: u64,
    pub background_fsync: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UidIoReport {
    pub totals: UidIoTotals,
    pub top_reads: Vec<UidIoEntry>,
    pub top_writes: Vec<UidIoEntry>,
}

/// Ranks UID I/O usage. `filter` is an optional set of allowed package names;
/// when set the lists grow unbounded and exclude non-matching candidates,
/// but totals always include every UID.
pub fn rank_uid_io(
    usages: &[UidIoUsage],
    tunables: &Tunables,
    filter: Option<&[String]>,
    resolver: &dyn PackageResolver,
) -> UidIoReport {
    let mut totals = UidIoTotals::default();
    let uids: Vec<u32> = usages.iter().map(|u| u.uid).collect();
    let names = resolver.names_for_uids(&uids);

    let mut top_reads = Vec::new();
    let mut top_writes = Vec::new();

    for (usage, name) in usages.iter().zip(names) {
        totals.foreground_read_bytes += usage.foreground.read_bytes;
        totals.background_read_bytes += usage.background.read_bytes;
        totals.foreground_write_bytes += usage.foreground.write_bytes;
        totals.background_write_bytes += usage.background.write_bytes;
        totals.foreground_fsync += usage.foreground.fsync;
        totals.background_fsync += usage.background.fsync;

        if usage.is_zero() {
            continue;
        }

        let name = if name.is_empty() {
            usage.uid.to_string()
        } else {
            name
        };

        if let Some(packages) = filter
            && !packages.iter().any(|p| p == &name)
        {
            continue;
        }

        let read_entry = UidIoEntry {
            uid: usage.uid,
            name: name.clone(),
            foreground_bytes: usage.foreground.read_bytes,
            background_bytes: usage.background.read_bytes,
            foreground_fsync: usage.foreground.fsync,
            background_fsync: usage.background.fsync,
        };
        let write_entry = UidIoEntry {
            uid: usage.uid,
            name,
            foreground_bytes: usage.foreground.write_bytes,
            background_bytes: usage.background.write_bytes,
            foreground_fsync: usage.foreground.fsync,
            background_fsync: usage.background.fsync,
        };

        let unbounded = filter.is_some();
        let read_sum = usage.foreground.read_bytes + usage.background.read_bytes;
        let write_sum = usage.foreground.write_bytes + usage.background.write_bytes;
        rank_insert(&mut top_reads, read_entry, tunables.top_n_per_category, unbounded, |_| read_sum);
        rank_insert(&mut top_writes, write_entry, tunables.top_n_per_category, unbounded, |_| write_sum);
    }

    UidIoReport {
        totals,
        top_reads,
        top_writes,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemReport {
    pub cpu_io_wait: u64,
    pub total_cpu_time: u64,
    pub io_blocked_count: u64,
    pub total_process_count: u64,
}

/// Index 4 on the `cpu ` line is `iowait` in kernel documentation order
/// (user, nice, system, idle, iowait, irq, softirq, steal, guest, guest_nice).
const CPU_IOWAIT_INDEX: usize = 4;

pub fn rank_system(usage: &SystemStatUsage) -> SystemReport {
    SystemReport {
        cpu_io_wait: usage.cpu_delta[CPU_IOWAIT_INDEX],
        total_cpu_time: usage.cpu_delta.iter().sum(),
        io_blocked_count: usage.procs_blocked,
        total_process_count: usage.procs_running + usage.procs_blocked,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub comm: String,
    pub major_faults: u64,
    pub io_blocked_tasks: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UidProcessEntry {
    pub uid: u32,
    pub name: String,
    pub major_faults: u64,
    pub total_tasks: u64,
    pub io_blocked_tasks: u64,
    pub top_by_io_blocked: Vec<ProcessEntry>,
    pub top_by_major_faults: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    pub top_by_io_blocked: Vec<UidProcessEntry>,
    pub top_by_major_faults: Vec<UidProcessEntry>,
    pub total_major_faults: u64,
    pub major_faults_percent_change: f64,
}

struct UidAggregate {
    major_faults: u64,
    total_tasks: u64,
    io_blocked_tasks: u64,
    processes: Vec<ProcessEntry>,
}

/// Ranks per-process usage, aggregating by UID, and tracks the running
/// total-major-faults figure across ticks for percent-change reporting.
pub struct ProcessRanker {
    previous_total_major_faults: u64,
}

impl ProcessRanker {
    pub fn new() -> Self {
        Self {
            previous_total_major_faults: 0,
        }
    }

    pub fn rank(
        &mut self,
        usages: &[ProcessUsage],
        tunables: &Tunables,
        resolver: &dyn PackageResolver,
    ) -> ProcessReport {
        let mut by_uid: HashMap<u32, UidAggregate> = HashMap::new();

        for usage in usages {
            let io_blocked_tasks = usage
                .threads
                .values()
                .filter(|t| t.state == 'D')
                .count() as u64;

            let entry = by_uid.entry(usage.uid).or_insert_with(|| UidAggregate {
                major_faults: 0,
                total_tasks: 0,
                io_blocked_tasks: 0,
                processes: Vec::new(),
            });
            entry.major_faults += usage.major_faults;
            entry.total_tasks += usage.num_threads;
            entry.io_blocked_tasks += io_blocked_tasks;
            entry.processes.push(ProcessEntry {
                pid: usage.pid,
                comm: usage.comm.clone(),
                major_faults: usage.major_faults,
                io_blocked_tasks,
            });
        }

        let uids: Vec<u32> = by_uid.keys().copied().collect();
        let names: HashMap<u32, String> = uids
            .iter()
            .copied()
            .zip(resolver.names_for_uids(&uids))
            .collect();

        let mut top_by_io_blocked = Vec::new();
        let mut top_by_major_faults = Vec::new();
        let mut total_major_faults = 0u64;

        for (uid, agg) in by_uid {
            total_major_faults += agg.major_faults;
            let name = names.get(&uid).cloned().unwrap_or_default();
            let name = if name.is_empty() { uid.to_string() } else { name };

            let mut sub_by_io_blocked = Vec::new();
            let mut sub_by_faults = Vec::new();
            for p in &agg.processes {
                rank_insert(&mut sub_by_io_blocked, p.clone(), tunables.top_n_per_subcategory, false, |e| e.io_blocked_tasks);
                rank_insert(&mut sub_by_faults, p.clone(), tunables.top_n_per_subcategory, false, |e| e.major_faults);
            }

            let uid_entry = UidProcessEntry {
                uid,
                name,
                major_faults: agg.major_faults,
                total_tasks: agg.total_tasks,
                io_blocked_tasks: agg.io_blocked_tasks,
                top_by_io_blocked: sub_by_io_blocked,
                top_by_major_faults: sub_by_faults,
            };

            rank_insert(&mut top_by_io_blocked, uid_entry.clone(), tunables.top_n_per_category, false, |e| e.io_blocked_tasks);
            rank_insert(&mut top_by_major_faults, uid_entry, tunables.top_n_per_category, false, |e| e.major_faults);
        }

        let percent_change = if self.previous_total_major_faults == 0 {
            0.0
        } else {
            ((total_major_faults as f64 - self.previous_total_major_faults as f64)
                / self.previous_total_major_faults as f64)
                * 100.0
        };
        self.previous_total_major_faults = total_major_faults;

        ProcessReport {
            top_by_io_blocked,
            top_by_major_faults,
            total_major_faults,
            major_faults_percent_change: percent_change,
        }
    }
}

impl Default for ProcessRanker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::uid_io::IoStat;

    struct FixedResolver(HashMap<u32, String>);
    impl PackageResolver for FixedResolver {
        fn names_for_uids(&self, uids: &[u32]) -> Vec<String> {
            uids.iter().map(|u| self.0.get(u).cloned().unwrap_or_default()).collect()
        }
    }

    #[test]
    fn uid_io_ranking_with_filter_matches_scenario() {
        let tunables = Tunables::default();
        let usages = vec![
            UidIoUsage {
                uid: 1009,
                foreground: IoStat::default(),
                background: IoStat { read_bytes: 14000, write_bytes: 16000, fsync: 100, ..Default::default() },
            },
            UidIoUsage {
                uid: 2001,
                foreground: IoStat::default(),
                background: IoStat { read_bytes: 3400, write_bytes: 6700, fsync: 200, ..Default::default() },
            },
            UidIoUsage {
                uid: 3456,
                foreground: IoStat::default(),
                background: IoStat { read_bytes: 4200, write_bytes: 5600, fsync: 300, ..Default::default() },
            },
        ];
        let resolver = FixedResolver(HashMap::from([
            (1009, "android.car.cts".to_string()),
            (2001, "system_server".to_string()),
            (3456, "random_process".to_string()),
        ]));
        let filter = vec!["android.car.cts".to_string(), "system_server".to_string()];
        let report = rank_uid_io(&usages, &tunables, Some(&filter), &resolver);

        assert_eq!(report.top_reads.iter().map(|e| e.uid).collect::<Vec<_>>(), vec![1009, 2001]);
        assert_eq!(report.top_writes.iter().map(|e| e.uid).collect::<Vec<_>>(), vec![1009, 2001]);
        assert_eq!(report.totals.background_read_bytes, 21600);
        assert_eq!(report.totals.background_write_bytes, 28300);
        assert_eq!(report.totals.background_fsync, 600);
    }

    #[test]
    fn zero_usage_uid_is_skipped_even_if_list_not_full() {
        let tunables = Tunables::default();
        let usages = vec![UidIoUsage { uid: 5, ..Default::default() }];
        let resolver = crate::transport::NullResolver;
        let report = rank_uid_io(&usages, &tunables, None, &resolver);
        assert!(report.top_reads.is_empty());
    }

    #[test]
    fn percent_change_is_zero_on_first_tick() {
        let mut ranker = ProcessRanker::new();
        let tunables = Tunables::default();
        let resolver = crate::transport::NullResolver;
        let report = ranker.rank(&[], &tunables, &resolver);
        assert_eq!(report.major_faults_percent_change, 0.0);
    }
}
