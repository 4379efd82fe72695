//! Abstractions over the collaborators the spec treats as external: the RPC
//! transport to clients/monitor, the package-name lookup service, and the
//! process shutdown/reboot state oracle. None of these do their own
//! marshalling here; they are plain traits the supervisor calls through.

use crate::config::Tier;

/// A handle identifying one registered client, mediator, or monitor on the
/// transport. Opaque to the supervisor beyond equality.
pub type Handle = u64;

/// Outbound calls the supervisor makes to a single registered client.
pub trait ClientTransport: Send {
    /// Challenge the client to prove liveness.
    fn check_if_alive(&self, handle: Handle, session_id: i32, tier: Tier)
    -> Result<(), String>;

    /// Best-effort request that the client prepare for termination.
    fn prepare_process_termination(&self, handle: Handle) -> Result<(), String>;

    /// Binds a death-watch for `handle`. Returns an opaque token that must be
    /// passed to `unbind_death_watch` on every exit path.
    fn bind_death_watch(&self, handle: Handle) -> Result<(), String>;

    /// Reverses `bind_death_watch`.
    fn unbind_death_watch(&self, handle: Handle);
}

/// Outbound calls the supervisor makes to the singleton monitor.
pub trait MonitorTransport: Send {
    fn on_clients_not_responding(&self, monitor: Handle, pids: &[u32]) -> Result<(), String>;
}

/// Resolves UIDs to human-readable package/user names.
///
/// System UIDs below the app-UID threshold are resolved via the OS's
/// password-entry lookup instead of the package-name service; callers are
/// expected to apply that split themselves (see `rank`).
pub trait PackageResolver: Send + Sync {
    /// Returns one name per input UID; an empty string means "unknown, keep
    /// the UID as a string".
    fn names_for_uids(&self, uids: &[u32]) -> Vec<String>;
}

/// A resolver that never knows any names; used where no resolver is wired
/// up (e.g. unit tests of the ranker).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl PackageResolver for NullResolver {
    fn names_for_uids(&self, uids: &[u32]) -> Vec<String> {
        vec![String::new(); uids.len()]
    }
}

/// Oracle answering whether the system is currently shutting down. Backed
/// by a single boolean query in the real platform.
pub trait ShutdownOracle: Send + Sync {
    fn is_system_shutting_down(&self) -> bool;
}

impl<F: Fn() -> bool + Send + Sync> ShutdownOracle for F {
    fn is_system_shutting_down(&self) -> bool {
        self()
    }
}

/// A client transport with no wired-up RPC backend: every call succeeds
/// and does nothing. Used until a real transport is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullClientTransport;

impl ClientTransport for NullClientTransport {
    fn check_if_alive(&self, _handle: Handle, _session_id: i32, _tier: Tier) -> Result<(), String> {
        Ok(())
    }

    fn prepare_process_termination(&self, _handle: Handle) -> Result<(), String> {
        Ok(())
    }

    fn bind_death_watch(&self, _handle: Handle) -> Result<(), String> {
        Ok(())
    }

    fn unbind_death_watch(&self, _handle: Handle) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitorTransport;

impl MonitorTransport for NullMonitorTransport {
    fn on_clients_not_responding(&self, _monitor: Handle, _pids: &[u32]) -> Result<(), String> {
        Ok(())
    }
}
