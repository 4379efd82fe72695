//! Registry, ping scheduler, and escalation path for supervised clients.

use crate::config::Tier;
use crate::error::SupervisorError;
use crate::transport::{ClientTransport, Handle, MonitorTransport, ShutdownOracle};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Plain,
    Mediator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub handle: Handle,
    pub pid: u32,
    pub uid: u32,
    pub tier: Tier,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Suspend,
    Shutdown,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Started,
    Stopped,
}

/// Every registration still in a tier's pinged-client map when its next
/// cycle starts missed its deadline. Returned by `run_ping_cycle` so the
/// caller can schedule the dump-and-kill dispatch outside the lock the
/// registry uses.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub to_kill: Vec<u32>,
    pub challenged: usize,
}

pub struct Supervisor {
    registries: HashMap<Tier, Vec<Registration>>,
    pinged: HashMap<Tier, HashMap<i32, Handle>>,
    monitor: Option<Handle>,
    stopped_users: HashSet<u32>,
    enabled: bool,
    next_session: i32,
}

impl Supervisor {
    pub fn new() -> Self {
        let mut registries = HashMap::new();
        let mut pinged = HashMap::new();
        for tier in Tier::ALL {
            registries.insert(tier, Vec::new());
            pinged.insert(tier, HashMap::new());
        }
        Self {
            registries,
            pinged,
            monitor: None,
            stopped_users: HashSet::new(),
            enabled: true,
            next_session: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tier_registrations(&self, tier: Tier) -> &[Registration] {
        &self.registries[&tier]
    }

    fn alloc_session_id(&mut self) -> i32 {
        self.next_session = self.next_session.wrapping_add(1);
        if self.next_session <= 0 {
            self.next_session = 1;
        }
        self.next_session
    }

    fn register(
        &mut self,
        handle: Handle,
        pid: u32,
        uid: u32,
        tier: Tier,
        role: Role,
        transport: &dyn ClientTransport,
    ) -> Result<(), SupervisorError> {
        transport
            .bind_death_watch(handle)
            .map_err(SupervisorError::Transport)?;
        let entries = self.registries.get_mut(&tier).expect("all tiers present");
        let was_empty = entries.is_empty();
        entries.push(Registration { handle, pid, uid, tier, role });
        let _ = was_empty; // arming the ping timer is the caller's (eventloop's) job
        Ok(())
    }

    pub fn register_client(
        &mut self,
        handle: Handle,
        pid: u32,
        uid: u32,
        tier: Tier,
        transport: &dyn ClientTransport,
    ) -> Result<(), SupervisorError> {
        self.register(handle, pid, uid, tier, Role::Plain, transport)
    }

    pub fn register_mediator(
        &mut self,
        handle: Handle,
        pid: u32,
        uid: u32,
        transport: &dyn ClientTransport,
    ) -> Result<(), SupervisorError> {
        self.register(handle, pid, uid, Tier::Critical, Role::Mediator, transport)
    }

    pub fn register_monitor(
        &mut self,
        handle: Handle,
        transport: &dyn ClientTransport,
    ) -> Result<(), SupervisorError> {
        match self.monitor {
            Some(existing) if existing == handle => Ok(()),
            Some(_) => Err(SupervisorError::MonitorConflict),
            None => {
                transport
                    .bind_death_watch(handle)
                    .map_err(SupervisorError::Transport)?;
                self.monitor = Some(handle);
                Ok(())
            }
        }
    }

    fn unregister_from_tiers(&mut self, handle: Handle, transport: &dyn ClientTransport) -> Result<(), SupervisorError> {
        for entries in self.registries.values_mut() {
            if let Some(pos) = entries.iter().position(|r| r.handle == handle) {
                entries.remove(pos);
                transport.unbind_death_watch(handle);
                return Ok(());
            }
        }
        Err(SupervisorError::NotFound)
    }

    pub fn unregister_client(&mut self, handle: Handle, transport: &dyn ClientTransport) -> Result<(), SupervisorError> {
        self.unregister_from_tiers(handle, transport)
    }

    pub fn unregister_mediator(&mut self, handle: Handle, transport: &dyn ClientTransport) -> Result<(), SupervisorError> {
        self.unregister_from_tiers(handle, transport)
    }

    pub fn unregister_monitor(&mut self, handle: Handle, transport: &dyn ClientTransport) -> Result<(), SupervisorError> {
        match self.monitor {
            Some(existing) if existing == handle => {
                transport.unbind_death_watch(handle);
                self.monitor = None;
                Ok(())
            }
            _ => Err(SupervisorError::NotFound),
        }
    }

    /// Handles a death notification from the transport: not an error, an
    /// event. Returns whether it matched the monitor or a tiered client.
    pub fn on_death(&mut self, handle: Handle) {
        if self.monitor == Some(handle) {
            self.monitor = None;
            return;
        }
        for entries in self.registries.values_mut() {
            if let Some(pos) = entries.iter().position(|r| r.handle == handle) {
                entries.remove(pos);
                return;
            }
        }
    }

    /// Runs one ping cycle for `tier`: first the escalation pass over the
    /// previous cycle's stragglers, then the challenge-send pass for a fresh
    /// set of survivors.
    pub fn run_ping_cycle(
        &mut self,
        tier: Tier,
        client_transport: &dyn ClientTransport,
        monitor_transport: &dyn MonitorTransport,
        shutdown: &dyn ShutdownOracle,
    ) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();

        let stragglers: Vec<Handle> = self.pinged[&tier].values().copied().collect();
        for handle in stragglers {
            if let Some(pos) = self.registries[&tier].iter().position(|r| r.handle == handle) {
                let reg = self.registries.get_mut(&tier).unwrap().remove(pos);
                if !self.stopped_users.contains(&reg.uid) {
                    let _ = client_transport.prepare_process_termination(handle);
                    outcome.to_kill.push(reg.pid);
                }
            }
        }
        self.pinged.insert(tier, HashMap::new());

        if !outcome.to_kill.is_empty() {
            let _ = self.dump_and_kill(&outcome.to_kill, monitor_transport, shutdown);
        }

        if !self.enabled {
            return outcome;
        }

        let survivors: Vec<Registration> = self.registries[&tier]
            .iter()
            .filter(|r| !self.stopped_users.contains(&r.uid))
            .copied()
            .collect();

        let mut fresh_pinged = HashMap::new();
        for reg in survivors {
            let session_id = self.alloc_session_id();
            match client_transport.check_if_alive(reg.handle, session_id, tier) {
                Ok(()) => {
                    fresh_pinged.insert(session_id, reg.handle);
                    outcome.challenged += 1;
                }
                Err(_) => {
                    // transport failure: do not add to the pinged map, do not escalate this cycle
                }
            }
        }
        self.pinged.insert(tier, fresh_pinged);

        outcome
    }

    fn find_session(&self, session_id: i32) -> Option<(Tier, Handle)> {
        for tier in Tier::ALL {
            if let Some(&handle) = self.pinged[&tier].get(&session_id) {
                return Some((tier, handle));
            }
        }
        None
    }

    pub fn tell_client_alive(&mut self, handle: Handle, session_id: i32) -> Result<(), SupervisorError> {
        match self.find_session(session_id) {
            Some((tier, recorded)) if recorded == handle => {
                self.pinged.get_mut(&tier).unwrap().remove(&session_id);
                Ok(())
            }
            _ => Err(SupervisorError::UnknownSession),
        }
    }

    pub fn tell_mediator_alive(
        &mut self,
        handle: Handle,
        pids_not_responding: &[u32],
        session_id: i32,
        monitor_transport: &dyn MonitorTransport,
        shutdown: &dyn ShutdownOracle,
    ) -> Result<(), SupervisorError> {
        self.tell_client_alive(handle, session_id)?;
        if !pids_not_responding.is_empty() {
            self.dump_and_kill(pids_not_responding, monitor_transport, shutdown)?;
        }
        Ok(())
    }

    /// Dispatches `pids` to the monitor unless one of the early-out
    /// conditions (no monitor, system shutting down) applies.
    pub fn dump_and_kill(
        &self,
        pids: &[u32],
        monitor_transport: &dyn MonitorTransport,
        shutdown: &dyn ShutdownOracle,
    ) -> Result<(), SupervisorError> {
        let monitor = match self.monitor {
            Some(m) => m,
            None => return Err(SupervisorError::NotFound),
        };
        if shutdown.is_system_shutting_down() {
            return Ok(());
        }
        monitor_transport
            .on_clients_not_responding(monitor, pids)
            .map_err(SupervisorError::Transport)
    }

    pub fn tell_dump_finished(&self, monitor_handle: Handle, _pid: u32) -> Result<(), SupervisorError> {
        match self.monitor {
            Some(m) if m == monitor_handle => Ok(()),
            _ => Err(SupervisorError::NotFound),
        }
    }

    /// Returns which tiers should have their ping timer (re)armed.
    pub fn notify_power(&mut self, state: PowerState) -> Vec<Tier> {
        match state {
            PowerState::Suspend | PowerState::Shutdown => {
                self.enabled = false;
                Vec::new()
            }
            PowerState::Resume => {
                self.enabled = true;
                Tier::ALL
                    .into_iter()
                    .filter(|t| !self.registries[t].is_empty())
                    .collect()
            }
        }
    }

    pub fn notify_user(&mut self, uid: u32, state: UserState) {
        match state {
            UserState::Started => {
                self.stopped_users.remove(&uid);
            }
            UserState::Stopped => {
                self.stopped_users.insert(uid);
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeTransport {
        fail_bind: HashSet<Handle>,
        fail_challenge: HashSet<Handle>,
        challenged: RefCell<Vec<(Handle, i32, Tier)>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                fail_bind: HashSet::new(),
                fail_challenge: HashSet::new(),
                challenged: RefCell::new(Vec::new()),
            }
        }
    }

    impl ClientTransport for FakeTransport {
        fn check_if_alive(&self, handle: Handle, session_id: i32, tier: Tier) -> Result<(), String> {
            if self.fail_challenge.contains(&handle) {
                return Err("unreachable".into());
            }
            self.challenged.borrow_mut().push((handle, session_id, tier));
            Ok(())
        }

        fn prepare_process_termination(&self, _handle: Handle) -> Result<(), String> {
            Ok(())
        }

        fn bind_death_watch(&self, handle: Handle) -> Result<(), String> {
            if self.fail_bind.contains(&handle) {
                return Err("bind failed".into());
            }
            Ok(())
        }

        fn unbind_death_watch(&self, _handle: Handle) {}
    }

    struct FakeMonitor {
        calls: RefCell<Vec<(Handle, Vec<u32>)>>,
    }

    impl MonitorTransport for FakeMonitor {
        fn on_clients_not_responding(&self, monitor: Handle, pids: &[u32]) -> Result<(), String> {
            self.calls.borrow_mut().push((monitor, pids.to_vec()));
            Ok(())
        }
    }

    fn never_shutting_down() -> impl Fn() -> bool {
        || false
    }

    #[test]
    fn escalation_removes_straggler_and_dispatches_to_monitor() {
        let mut sup = Supervisor::new();
        let transport = FakeTransport::new();
        sup.register_client(1, 100, 10, Tier::Critical, &transport).unwrap();
        sup.register_client(2, 200, 20, Tier::Critical, &transport).unwrap();
        sup.register_monitor(99, &transport).unwrap();
        let monitor = FakeMonitor { calls: RefCell::new(Vec::new()) };
        let shutdown = never_shutting_down();

        sup.run_ping_cycle(Tier::Critical, &transport, &monitor, &shutdown);
        // C1 responds, C2 does not.
        let session_for = |sup: &Supervisor, handle: Handle| -> i32 {
            sup.pinged[&Tier::Critical]
                .iter()
                .find(|(_, h)| **h == handle)
                .map(|(s, _)| *s)
                .unwrap()
        };
        let c1_session = session_for(&sup, 1);
        sup.tell_client_alive(1, c1_session).unwrap();

        sup.run_ping_cycle(Tier::Critical, &transport, &monitor, &shutdown);

        assert_eq!(sup.tier_registrations(Tier::Critical).len(), 1);
        assert_eq!(sup.tier_registrations(Tier::Critical)[0].handle, 1);
        assert_eq!(monitor.calls.borrow()[0], (99, vec![200]));
    }

    #[test]
    fn second_differing_monitor_is_rejected() {
        let mut sup = Supervisor::new();
        let transport = FakeTransport::new();
        sup.register_monitor(1, &transport).unwrap();
        assert!(sup.register_monitor(1, &transport).is_ok());
        assert_eq!(sup.register_monitor(2, &transport), Err(SupervisorError::MonitorConflict));
    }

    #[test]
    fn transport_failure_on_challenge_drops_from_pinged_map_without_escalating() {
        let mut sup = Supervisor::new();
        let mut transport = FakeTransport::new();
        transport.fail_challenge.insert(1);
        sup.register_client(1, 100, 10, Tier::Moderate, &transport).unwrap();
        let monitor = FakeMonitor { calls: RefCell::new(Vec::new()) };
        let shutdown = never_shutting_down();
        let outcome = sup.run_ping_cycle(Tier::Moderate, &transport, &monitor, &shutdown);
        assert_eq!(outcome.challenged, 0);
        assert!(sup.pinged[&Tier::Moderate].is_empty());
        // still registered: the failed send isn't escalation, just not pinged this cycle
        assert_eq!(sup.tier_registrations(Tier::Moderate).len(), 1);
    }

    #[test]
    fn power_suspend_then_resume_rearms_nonempty_tiers_only() {
        let mut sup = Supervisor::new();
        let transport = FakeTransport::new();
        sup.register_client(1, 100, 10, Tier::Critical, &transport).unwrap();
        assert_eq!(sup.notify_power(PowerState::Suspend), Vec::<Tier>::new());
        assert!(!sup.enabled());
        let rearmed = sup.notify_power(PowerState::Resume);
        assert_eq!(rearmed, vec![Tier::Critical]);
    }

    #[test]
    fn stopped_user_is_skipped_by_ping_cycle() {
        let mut sup = Supervisor::new();
        let transport = FakeTransport::new();
        sup.register_client(1, 100, 10, Tier::Normal, &transport).unwrap();
        sup.notify_user(10, UserState::Stopped);
        let monitor = FakeMonitor { calls: RefCell::new(Vec::new()) };
        let shutdown = never_shutting_down();
        let outcome = sup.run_ping_cycle(Tier::Normal, &transport, &monitor, &shutdown);
        assert_eq!(outcome.challenged, 0);
    }

    #[test]
    fn dump_and_kill_without_monitor_is_error() {
        let sup = Supervisor::new();
        let monitor = FakeMonitor { calls: RefCell::new(Vec::new()) };
        let shutdown = never_shutting_down();
        assert!(sup.dump_and_kill(&[1], &monitor, &shutdown).is_err());
    }

    #[test]
    fn dump_and_kill_during_shutdown_is_noop_success() {
        let mut sup = Supervisor::new();
        let transport = FakeTransport::new();
        sup.register_monitor(1, &transport).unwrap();
        let monitor = FakeMonitor { calls: RefCell::new(Vec::new()) };
        let shutdown = || true;
        assert!(sup.dump_and_kill(&[1], &monitor, &shutdown).is_ok());
        assert!(monitor.calls.borrow().is_empty());
    }
}
