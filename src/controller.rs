//! Collection state machine: boot-time -> periodic -> (optional custom) -> periodic.

use crate::collector::{ProcessDelta, ProcessSampler, SystemStatDelta, SystemStatSampler, UidIoDelta, UidIoSampler};
use crate::collector::traits::FileSystem;
use crate::config::Tunables;
use crate::error::{AdminError, HardParse};
use crate::rank::{self, ProcessRanker, ProcessReport, SystemReport, UidIoReport};
use crate::transport::PackageResolver;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Init,
    BootTime,
    Periodic,
    Custom,
    Terminated,
}

/// One tick's fully ranked output.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub uid_io: UidIoReport,
    pub system: SystemReport,
    pub process: ProcessReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Boot,
    Periodic,
    Custom,
}

struct CustomState {
    interval: Duration,
    max_duration: Duration,
    filter: Option<Vec<String>>,
    cache: VecDeque<CollectionRecord>,
}

/// Drives the three samplers through a single tick and owns the bounded
/// per-mode caches. Ticking, mode transitions, and validation all live here;
/// scheduling the next due-instant is the caller's job (see `eventloop`).
pub struct CollectionController<F: FileSystem> {
    mode: Mode,
    tunables: Tunables,
    uid_io_sampler: UidIoSampler<F>,
    system_sampler: SystemStatSampler<F>,
    process_sampler: ProcessSampler<F>,
    uid_io_delta: UidIoDelta,
    system_delta: SystemStatDelta,
    process_delta: ProcessDelta,
    process_ranker: ProcessRanker,
    boottime_cache: VecDeque<CollectionRecord>,
    periodic_cache: VecDeque<CollectionRecord>,
    custom: Option<CustomState>,
}

impl<F: FileSystem> CollectionController<F> {
    pub fn new(
        fs: F,
        tunables: Tunables,
        uid_io_path: impl Into<String>,
        system_path: impl Into<String>,
        process_path: impl Into<String>,
    ) -> Self
    where
        F: Clone,
    {
        Self {
            mode: Mode::Init,
            tunables,
            uid_io_sampler: UidIoSampler::new(fs.clone(), uid_io_path),
            system_sampler: SystemStatSampler::new(fs.clone(), system_path),
            process_sampler: ProcessSampler::new(fs, process_path),
            uid_io_delta: UidIoDelta::new(),
            system_delta: SystemStatDelta::new(),
            process_delta: ProcessDelta::new(),
            process_ranker: ProcessRanker::new(),
            boottime_cache: VecDeque::new(),
            periodic_cache: VecDeque::new(),
            custom: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn boottime_records(&self) -> &VecDeque<CollectionRecord> {
        &self.boottime_cache
    }

    pub fn periodic_records(&self) -> &VecDeque<CollectionRecord> {
        &self.periodic_cache
    }

    pub fn custom_records(&self) -> Option<&VecDeque<CollectionRecord>> {
        self.custom.as_ref().map(|c| &c.cache)
    }

    /// `INIT -> BOOT_TIME`. The caller posts the first boot tick immediately.
    pub fn start(&mut self) {
        self.mode = Mode::BootTime;
    }

    /// `BOOT_TIME -> PERIODIC`. Performs one final boot-time tick before
    /// flipping state, per the documented transition.
    pub fn end_boot(&mut self, resolver: &dyn PackageResolver) -> Result<(), HardParse> {
        if self.mode != Mode::BootTime {
            return Ok(());
        }
        self.tick(TickKind::Boot, resolver)?;
        self.mode = Mode::Periodic;
        Ok(())
    }

    /// `PERIODIC -> CUSTOM`. Validates interval/max-duration, rejects if not
    /// currently periodic.
    pub fn start_custom(
        &mut self,
        interval: Duration,
        max_duration: Duration,
        filter: Option<Vec<String>>,
    ) -> Result<(), AdminError> {
        if self.mode != Mode::Periodic {
            return Err(AdminError::InvalidState(
                "custom collection can only start while periodic".into(),
            ));
        }
        if interval < Duration::from_secs(1) || max_duration < Duration::from_secs(1) {
            return Err(AdminError::InvalidInput(
                "interval and max-duration must each be at least 1 second".into(),
            ));
        }
        self.custom = Some(CustomState {
            interval,
            max_duration,
            filter,
            cache: VecDeque::new(),
        });
        self.mode = Mode::Custom;
        Ok(())
    }

    /// `CUSTOM -> PERIODIC`, whether triggered by the timed end or an
    /// explicit admin command. Idempotent beyond the first call per the
    /// state machine's "only the first of the two wins" guard.
    pub fn end_custom(&mut self) -> Result<VecDeque<CollectionRecord>, AdminError> {
        match self.custom.take() {
            Some(state) => {
                self.mode = Mode::Periodic;
                Ok(state.cache)
            }
            None => Err(AdminError::InvalidState(
                "no custom collection is running".into(),
            )),
        }
    }

    pub fn custom_interval(&self) -> Option<Duration> {
        self.custom.as_ref().map(|c| c.interval)
    }

    pub fn custom_max_duration(&self) -> Option<Duration> {
        self.custom.as_ref().map(|c| c.max_duration)
    }

    pub fn terminate(&mut self) {
        self.mode = Mode::Terminated;
    }

    /// Runs one tick: verifies mode, validates tunables, samples, deltas,
    /// ranks, and appends to the relevant cache. On any sampler error the
    /// controller terminates; caches already built remain dumpable.
    pub fn tick(&mut self, kind: TickKind, resolver: &dyn PackageResolver) -> Result<(), HardParse> {
        let mode_matches = matches!(
            (self.mode, kind),
            (Mode::BootTime, TickKind::Boot) | (Mode::Periodic, TickKind::Periodic) | (Mode::Custom, TickKind::Custom)
        );
        if !mode_matches {
            return Ok(()); // stale tick from a prior mode: drop silently
        }

        let interval = match kind {
            TickKind::Boot => self.tunables.boottime_collection_interval,
            TickKind::Periodic => self.tunables.periodic_collection_interval,
            TickKind::Custom => self.custom.as_ref().map(|c| c.interval).unwrap_or_default(),
        };
        let max_cache_size = match kind {
            TickKind::Boot | TickKind::Custom => usize::MAX,
            TickKind::Periodic => self.tunables.periodic_collection_buffer_size,
        };
        if interval < Duration::from_secs(1) || max_cache_size < 1 {
            self.mode = Mode::Terminated;
            return Err(HardParse::new("tick validation failed: interval or cache size out of range"));
        }

        let result = self.run_samplers(resolver);
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                self.mode = Mode::Terminated;
                return Err(e);
            }
        };

        let (cache, cap) = match kind {
            TickKind::Boot => (&mut self.boottime_cache, usize::MAX),
            TickKind::Periodic => (&mut self.periodic_cache, self.tunables.periodic_collection_buffer_size),
            TickKind::Custom => {
                let state = self.custom.as_mut().expect("custom tick implies custom state");
                state.cache.push_back(record);
                return Ok(());
            }
        };
        cache.push_back(record);
        if cache.len() > cap {
            cache.pop_front();
        }
        Ok(())
    }

    fn run_samplers(&mut self, resolver: &dyn PackageResolver) -> Result<CollectionRecord, HardParse> {
        let uid_io_sample = self.uid_io_sampler.sample()?;
        let system_sample = self.system_sampler.sample()?;
        let process_collected = self.process_sampler.sample()?;

        let uid_io_usage = self.uid_io_delta.collect(uid_io_sample);
        let system_usage = self.system_delta.collect(system_sample);
        let process_usage = self.process_delta.collect(process_collected.value);

        let filter = self.custom.as_ref().and_then(|c| c.filter.clone());
        let uid_io_report = rank::rank_uid_io(&uid_io_usage, &self.tunables, filter.as_deref(), resolver);
        let system_report = rank::rank_system(&system_usage);
        let process_report = self.process_ranker.rank(&process_usage, &self.tunables, resolver);

        Ok(CollectionRecord {
            uid_io: uid_io_report,
            system: system_report,
            process: process_report,
        })
    }
}

/// A single due-instant paired with its event, used by `eventloop`'s heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Due {
    pub at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::transport::NullResolver;

    fn empty_fs() -> MockFs {
        let mut fs = MockFs::new();
        fs.add_file("/proc/uid_io/stats", "");
        fs.add_file("/proc/stat", "cpu  0 0 0 0 0 0 0 0 0 0\nprocs_running 0\nprocs_blocked 0\n");
        fs.add_dir("/proc");
        fs
    }

    #[test]
    fn boot_to_periodic_transition_runs_final_boot_tick() {
        let fs = empty_fs();
        let mut c = CollectionController::new(fs, Tunables::default(), "/proc/uid_io/stats", "/proc/stat", "/proc");
        c.start();
        assert_eq!(c.mode(), Mode::BootTime);
        c.tick(TickKind::Boot, &NullResolver).unwrap();
        c.tick(TickKind::Boot, &NullResolver).unwrap();
        c.end_boot(&NullResolver).unwrap();
        assert_eq!(c.mode(), Mode::Periodic);
        assert_eq!(c.boottime_records().len(), 3);
    }

    #[test]
    fn custom_requires_periodic_mode() {
        let fs = empty_fs();
        let mut c = CollectionController::new(fs, Tunables::default(), "/proc/uid_io/stats", "/proc/stat", "/proc");
        c.start();
        let err = c.start_custom(Duration::from_secs(3), Duration::from_secs(11), None);
        assert!(matches!(err, Err(AdminError::InvalidState(_))));
    }

    #[test]
    fn custom_rejects_sub_second_interval() {
        let fs = empty_fs();
        let mut c = CollectionController::new(fs, Tunables::default(), "/proc/uid_io/stats", "/proc/stat", "/proc");
        c.start();
        c.end_boot(&NullResolver).unwrap();
        let err = c.start_custom(Duration::from_millis(500), Duration::from_secs(30), None);
        assert!(matches!(err, Err(AdminError::InvalidInput(_))));
    }

    #[test]
    fn end_custom_without_start_is_invalid_state() {
        let fs = empty_fs();
        let mut c = CollectionController::new(fs, Tunables::default(), "/proc/uid_io/stats", "/proc/stat", "/proc");
        assert!(matches!(c.end_custom(), Err(AdminError::InvalidState(_))));
    }

    #[test]
    fn periodic_cache_evicts_oldest_beyond_max() {
        let fs = empty_fs();
        let tunables = Tunables {
            periodic_collection_buffer_size: 2,
            ..Tunables::default()
        };
        let mut c = CollectionController::new(fs, tunables, "/proc/uid_io/stats", "/proc/stat", "/proc");
        c.start();
        c.end_boot(&NullResolver).unwrap();
        for _ in 0..3 {
            c.tick(TickKind::Periodic, &NullResolver).unwrap();
        }
        assert_eq!(c.periodic_records().len(), 2);
    }

    #[test]
    fn sampler_hard_error_terminates_controller() {
        let mut fs = MockFs::new();
        fs.add_dir("/proc");
        fs.add_file("/proc/uid_io/stats", "garbage\n");
        fs.add_file("/proc/stat", "cpu  0 0 0 0 0 0 0 0 0 0\nprocs_running 0\nprocs_blocked 0\n");
        let mut c = CollectionController::new(fs, Tunables::default(), "/proc/uid_io/stats", "/proc/stat", "/proc");
        c.start();
        assert!(c.tick(TickKind::Boot, &NullResolver).is_err());
        assert_eq!(c.mode(), Mode::Terminated);
    }
}
