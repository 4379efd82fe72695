//! The operator-facing dump/control surface: argument parsing, validation,
//! and SYSTEM-UID gating in front of the controller and supervisor.

use crate::config::{SYSTEM_UID, Tier};
use crate::collector::traits::FileSystem;
use crate::error::AdminError;
use crate::eventloop::EventLoop;
use crate::supervisor::{PowerState, Supervisor, UserState};
use crate::transport::{ClientTransport, Handle, MonitorTransport, ShutdownOracle};
use std::time::{Duration, Instant};

pub const HELP_TEXT: &str = "\
usage:
  (no args)                                    dump supervisor status and reports
  --start_io [--interval SEC] [--max_duration SEC] [--filter_packages CSV]
  --end_io                                     end custom collection, dump it
  --end_boot                                   signal boot finished (BOOT_TIME -> PERIODIC)
  -h, --help                                   print this help
";

const DEFAULT_CUSTOM_INTERVAL_SEC: u64 = 10;
const DEFAULT_CUSTOM_MAX_DURATION_SEC: u64 = 30 * 60;

enum Command {
    Help,
    Dump,
    StartIo {
        interval: Duration,
        max_duration: Duration,
        filter_packages: Option<Vec<String>>,
    },
    EndIo,
    EndBoot,
}

fn parse_args(args: &[String]) -> Result<Command, AdminError> {
    if args.is_empty() {
        return Ok(Command::Dump);
    }
    if args[0] == "-h" || args[0] == "--help" {
        if args.len() > 1 {
            return Err(AdminError::InvalidInput("-h/--help takes no arguments".into()));
        }
        return Ok(Command::Help);
    }
    if args[0] == "--end_io" {
        if args.len() > 1 {
            return Err(AdminError::InvalidInput("--end_io takes no arguments".into()));
        }
        return Ok(Command::EndIo);
    }
    if args[0] == "--end_boot" {
        if args.len() > 1 {
            return Err(AdminError::InvalidInput("--end_boot takes no arguments".into()));
        }
        return Ok(Command::EndBoot);
    }
    if args[0] == "--start_io" {
        let mut interval = Duration::from_secs(DEFAULT_CUSTOM_INTERVAL_SEC);
        let mut max_duration = Duration::from_secs(DEFAULT_CUSTOM_MAX_DURATION_SEC);
        let mut filter_packages = None;
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--interval" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        AdminError::InvalidInput("--interval requires a value".into())
                    })?;
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| AdminError::InvalidInput(format!("not an integer: {value}")))?;
                    interval = Duration::from_secs(secs);
                    i += 2;
                }
                "--max_duration" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        AdminError::InvalidInput("--max_duration requires a value".into())
                    })?;
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| AdminError::InvalidInput(format!("not an integer: {value}")))?;
                    max_duration = Duration::from_secs(secs);
                    i += 2;
                }
                "--filter_packages" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        AdminError::InvalidInput("--filter_packages requires a value".into())
                    })?;
                    filter_packages = Some(value.split(',').map(str::to_string).collect());
                    i += 2;
                }
                other => {
                    return Err(AdminError::InvalidInput(format!("unknown flag: {other}")));
                }
            }
        }
        return Ok(Command::StartIo {
            interval,
            max_duration,
            filter_packages,
        });
    }
    Err(AdminError::InvalidInput(format!("unknown flag: {}", args[0])))
}

/// Runs one admin command. Privileged operations (everything except
/// registering a plain client, which never goes through this surface) are
/// gated on `caller_uid == SYSTEM_UID`.
pub fn dispatch<F: FileSystem>(
    args: &[String],
    out: &mut impl std::fmt::Write,
    caller_uid: u32,
    event_loop: &mut EventLoop<F>,
    now: Instant,
) -> Result<(), AdminError> {
    let command = match parse_args(args) {
        Ok(c) => c,
        Err(e) => {
            let _ = out.write_str(HELP_TEXT);
            return Err(e);
        }
    };

    if caller_uid != SYSTEM_UID && !matches!(command, Command::Help) {
        return Err(AdminError::AuthDenied);
    }

    match command {
        Command::Help => {
            let _ = out.write_str(HELP_TEXT);
            Ok(())
        }
        Command::Dump => {
            dump_reports(event_loop.controller(), out);
            Ok(())
        }
        Command::StartIo {
            interval,
            max_duration,
            filter_packages,
        } => {
            event_loop
                .controller_mut()
                .start_custom(interval, max_duration, filter_packages)?;
            event_loop.begin_custom(now, max_duration);
            Ok(())
        }
        Command::EndIo => {
            let cache = event_loop.controller_mut().end_custom()?;
            event_loop.request_end_custom(now);
            let _ = writeln!(out, "custom collection: {} records", cache.len());
            for record in &cache {
                dump_record(out, record);
            }
            Ok(())
        }
        Command::EndBoot => notify_boot(caller_uid, event_loop, now),
    }
}

/// Admin-invoked `BOOT_TIME -> PERIODIC` transition. The original dispatches
/// `notifySystemStateChange(BOOT, ...)` straight to `onBootFinished()`; here
/// it posts the boot-end event for the event loop's next pass.
pub fn notify_boot<F: FileSystem>(
    caller_uid: u32,
    event_loop: &mut EventLoop<F>,
    now: Instant,
) -> Result<(), AdminError> {
    require_system(caller_uid)?;
    event_loop.request_end_boot(now);
    Ok(())
}

fn dump_reports<F: FileSystem>(controller: &crate::controller::CollectionController<F>, out: &mut impl std::fmt::Write) {
    let _ = writeln!(out, "mode: {:?}", controller.mode());
    let _ = writeln!(out, "boot-time records: {}", controller.boottime_records().len());
    for record in controller.boottime_records() {
        dump_record(out, record);
    }
    let _ = writeln!(out, "periodic records: {}", controller.periodic_records().len());
    for record in controller.periodic_records() {
        dump_record(out, record);
    }
}

fn dump_record(out: &mut impl std::fmt::Write, record: &crate::controller::CollectionRecord) {
    let _ = writeln!(
        out,
        "  uid_io totals: read(fg={} bg={}) write(fg={} bg={})",
        record.uid_io.totals.foreground_read_bytes,
        record.uid_io.totals.background_read_bytes,
        record.uid_io.totals.foreground_write_bytes,
        record.uid_io.totals.background_write_bytes,
    );
    let _ = writeln!(
        out,
        "  system: cpu_io_wait={} total_cpu_time={} io_blocked={} total_procs={}",
        record.system.cpu_io_wait,
        record.system.total_cpu_time,
        record.system.io_blocked_count,
        record.system.total_process_count,
    );
    let _ = writeln!(
        out,
        "  process: total_major_faults={} ({:+.1}%)",
        record.process.total_major_faults, record.process.major_faults_percent_change,
    );
}

/// Privileged registration/liveness/power/user calls funneled through this
/// surface. Plain client registration bypasses this gate entirely (it is
/// reached directly through the transport, not admin dispatch).
pub fn register_client(
    supervisor: &mut Supervisor,
    handle: Handle,
    pid: u32,
    uid: u32,
    tier: Tier,
    transport: &dyn ClientTransport,
) -> Result<(), AdminError> {
    // The sole unprivileged operation: no UID check here.
    supervisor
        .register_client(handle, pid, uid, tier, transport)
        .map_err(|e| AdminError::InvalidState(e.to_string()))
}

fn require_system(caller_uid: u32) -> Result<(), AdminError> {
    if caller_uid != SYSTEM_UID {
        return Err(AdminError::AuthDenied);
    }
    Ok(())
}

pub fn register_mediator(
    caller_uid: u32,
    supervisor: &mut Supervisor,
    handle: Handle,
    pid: u32,
    uid: u32,
    transport: &dyn ClientTransport,
) -> Result<(), AdminError> {
    require_system(caller_uid)?;
    supervisor
        .register_mediator(handle, pid, uid, transport)
        .map_err(|e| AdminError::InvalidState(e.to_string()))
}

pub fn register_monitor(
    caller_uid: u32,
    supervisor: &mut Supervisor,
    handle: Handle,
    transport: &dyn ClientTransport,
) -> Result<(), AdminError> {
    require_system(caller_uid)?;
    supervisor
        .register_monitor(handle, transport)
        .map_err(|e| AdminError::InvalidState(e.to_string()))
}

pub fn notify_power(caller_uid: u32, supervisor: &mut Supervisor, state: PowerState) -> Result<Vec<Tier>, AdminError> {
    require_system(caller_uid)?;
    Ok(supervisor.notify_power(state))
}

pub fn notify_user(caller_uid: u32, supervisor: &mut Supervisor, uid: u32, state: UserState) -> Result<(), AdminError> {
    require_system(caller_uid)?;
    supervisor.notify_user(uid, state);
    Ok(())
}

pub fn tell_mediator_alive(
    caller_uid: u32,
    supervisor: &mut Supervisor,
    handle: Handle,
    pids_not_responding: &[u32],
    session_id: i32,
    monitor_transport: &dyn MonitorTransport,
    shutdown: &dyn ShutdownOracle,
) -> Result<(), AdminError> {
    require_system(caller_uid)?;
    supervisor
        .tell_mediator_alive(handle, pids_not_responding, session_id, monitor_transport, shutdown)
        .map_err(|e| AdminError::InvalidState(e.to_string()))
}
