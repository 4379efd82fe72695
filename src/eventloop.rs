//! Single-threaded cooperative event loop: a sorted timer queue dispatching
//! an internal event enum, replacing the original's integer-keyed message
//! handler.

use crate::collector::traits::FileSystem;
use crate::config::Tier;
use crate::controller::{CollectionController, TickKind};
use crate::transport::{ClientTransport, MonitorTransport, PackageResolver, ShutdownOracle};
use crate::supervisor::Supervisor;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    BootTick,
    EndBoot,
    PeriodicTick,
    CustomTick,
    EndCustom,
    PingTier(Tier),
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    due: Instant,
    event: Event,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due)
    }
}

/// Owns the timer queue and wires the collection controller to the process
/// supervisor. All ticking, ping-cycle dispatch, and mode transitions are
/// driven by repeatedly calling `run_due`.
pub struct EventLoop<F: FileSystem> {
    controller: CollectionController<F>,
    supervisor: Supervisor,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    boot_interval: Duration,
    periodic_interval: Duration,
    terminated: bool,
}

impl<F: FileSystem> EventLoop<F> {
    pub fn new(controller: CollectionController<F>, supervisor: Supervisor, boot_interval: Duration, periodic_interval: Duration) -> Self {
        Self {
            controller,
            supervisor,
            timers: BinaryHeap::new(),
            boot_interval,
            periodic_interval,
            terminated: false,
        }
    }

    pub fn controller(&self) -> &CollectionController<F> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut CollectionController<F> {
        &mut self.controller
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    fn schedule(&mut self, event: Event, due: Instant) {
        self.timers.push(Reverse(TimerEntry { due, event }));
    }

    /// `INIT -> BOOT_TIME`: posts the first boot tick for immediate execution.
    pub fn start(&mut self, now: Instant) {
        self.controller.start();
        self.schedule(Event::BootTick, now);
    }

    /// Arms (or re-arms) a tier's ping cycle timer, e.g. on first
    /// registration or on power RESUME.
    pub fn arm_tier(&mut self, tier: Tier, now: Instant) {
        self.schedule(Event::PingTier(tier), now);
    }

    /// Admin-triggered `BOOT_TIME -> PERIODIC`: posts the boot-end transition
    /// for immediate execution, mirroring `request_end_custom`.
    pub fn request_end_boot(&mut self, now: Instant) {
        self.schedule(Event::EndBoot, now);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(e)| e.due)
    }

    /// Pops and runs every timer due at or before `now`. Returns when the
    /// queue is empty or the next entry is still in the future.
    #[allow(clippy::too_many_arguments)]
    pub fn run_due(
        &mut self,
        now: Instant,
        resolver: &dyn PackageResolver,
        client_transport: &dyn ClientTransport,
        monitor_transport: &dyn MonitorTransport,
        shutdown: &dyn ShutdownOracle,
    ) {
        while let Some(Reverse(entry)) = self.timers.peek().copied() {
            if entry.due > now || self.terminated {
                break;
            }
            self.timers.pop();
            self.dispatch(entry, resolver, client_transport, monitor_transport, shutdown);
        }
    }

    fn dispatch(
        &mut self,
        entry: TimerEntry,
        resolver: &dyn PackageResolver,
        client_transport: &dyn ClientTransport,
        monitor_transport: &dyn MonitorTransport,
        shutdown: &dyn ShutdownOracle,
    ) {
        match entry.event {
            Event::BootTick => {
                if self.controller.tick(TickKind::Boot, resolver).is_err() {
                    self.terminated = true;
                    return;
                }
                self.schedule(Event::BootTick, entry.due + self.boot_interval);
            }
            Event::EndBoot => {
                if self.controller.mode() == crate::controller::Mode::BootTime {
                    if self.controller.end_boot(resolver).is_err() {
                        self.terminated = true;
                        return;
                    }
                    self.schedule(Event::PeriodicTick, entry.due + self.periodic_interval);
                }
                // else: stale or duplicate end-boot signal, already past BOOT_TIME
            }
            Event::PeriodicTick => {
                if self.controller.tick(TickKind::Periodic, resolver).is_err() {
                    self.terminated = true;
                    return;
                }
                self.schedule(Event::PeriodicTick, entry.due + self.periodic_interval);
            }
            Event::CustomTick => {
                if self.controller.tick(TickKind::Custom, resolver).is_err() {
                    self.terminated = true;
                    return;
                }
                if let Some(interval) = self.controller.custom_interval() {
                    self.schedule(Event::CustomTick, entry.due + interval);
                }
            }
            Event::EndCustom => {
                if self.controller.end_custom().is_ok() {
                    self.schedule(Event::PeriodicTick, entry.due);
                }
                // else: already ended by an explicit admin command, nothing to do
            }
            Event::PingTier(tier) => {
                let outcome = self.supervisor.run_ping_cycle(tier, client_transport, monitor_transport, shutdown);
                if outcome.challenged > 0 {
                    self.schedule(Event::PingTier(tier), entry.due + tier.timeout());
                }
                // else: go idle for the tier until re-armed by registration or RESUME
            }
        }
    }

    /// Admin-triggered `PERIODIC -> CUSTOM`: posts the immediate custom tick
    /// and the one-shot end-custom deadline.
    pub fn begin_custom(&mut self, now: Instant, max_duration: Duration) {
        self.schedule(Event::CustomTick, now);
        self.schedule(Event::EndCustom, now + max_duration);
    }

    pub fn request_end_custom(&mut self, now: Instant) {
        self.schedule(Event::EndCustom, now);
    }

    /// Terminates from outside the worker thread: clears all timers. A
    /// terminate call made from inside the loop itself must instead just
    /// set the terminal flag (no join), which `dispatch` already does on
    /// sampler failure.
    pub fn terminate(&mut self) {
        self.controller.terminate();
        self.timers.clear();
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::config::Tunables;
    use crate::transport::NullResolver;

    struct NoopClient;
    impl ClientTransport for NoopClient {
        fn check_if_alive(&self, _handle: u64, _session_id: i32, _tier: Tier) -> Result<(), String> {
            Ok(())
        }
        fn prepare_process_termination(&self, _handle: u64) -> Result<(), String> {
            Ok(())
        }
        fn bind_death_watch(&self, _handle: u64) -> Result<(), String> {
            Ok(())
        }
        fn unbind_death_watch(&self, _handle: u64) {}
    }
    struct NoopMonitor;
    impl MonitorTransport for NoopMonitor {
        fn on_clients_not_responding(&self, _monitor: u64, _pids: &[u32]) -> Result<(), String> {
            Ok(())
        }
    }

    fn loop_with_empty_fs() -> EventLoop<MockFs> {
        let mut fs = MockFs::new();
        fs.add_dir("/proc");
        fs.add_file("/proc/uid_io/stats", "");
        fs.add_file("/proc/stat", "cpu  0 0 0 0 0 0 0 0 0 0\nprocs_running 0\nprocs_blocked 0\n");
        let controller = CollectionController::new(fs, Tunables::default(), "/proc/uid_io/stats", "/proc/stat", "/proc");
        EventLoop::new(controller, Supervisor::new(), Duration::from_secs(1), Duration::from_secs(10))
    }

    #[test]
    fn boot_ticks_fire_at_fixed_interval_without_drift() {
        let mut el = loop_with_empty_fs();
        let t0 = Instant::now();
        el.start(t0);
        el.run_due(t0, &NullResolver, &NoopClient, &NoopMonitor, &|| false);
        assert_eq!(el.controller().boottime_records().len(), 1);

        let next = el.next_due().unwrap();
        assert_eq!(next, t0 + Duration::from_secs(1));
        el.run_due(next, &NullResolver, &NoopClient, &NoopMonitor, &|| false);
        assert_eq!(el.controller().boottime_records().len(), 2);
    }

    #[test]
    fn ping_cycle_reschedules_only_when_someone_was_challenged() {
        let mut el = loop_with_empty_fs();
        el.supervisor_mut().register_client(1, 100, 10, Tier::Critical, &NoopClient).unwrap();
        el.arm_tier(Tier::Critical, Instant::now());
        let now = Instant::now();
        el.run_due(now, &NullResolver, &NoopClient, &NoopMonitor, &|| false);
        assert!(el.next_due().is_some());
    }

    #[test]
    fn terminate_clears_queue() {
        let mut el = loop_with_empty_fs();
        el.start(Instant::now());
        el.terminate();
        assert!(el.next_due().is_none());
        assert!(el.is_terminated());
    }
}
