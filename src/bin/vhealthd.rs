//! vhealthd - vehicle health-monitoring daemon.
//!
//! Runs the collection controller and process supervisor on a single
//! worker thread, wiring the event loop's timer queue against wall-clock
//! sleeps and reacting to admin commands read from stdin, one line per
//! invocation (`--start_io ...`, `--end_io`, or no args to dump).

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn release_memory_to_os() {
    // SAFETY: mallctl is called with a fixed, valid command string and no
    // in/out buffers, matching jemalloc's documented no-op-on-absence contract.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.0.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(target_os = "linux")]
use vhealthd::collector::RealFs;
#[cfg(not(target_os = "linux"))]
use vhealthd::collector::mock::MockFs;
use vhealthd::admin;
use vhealthd::config::{SYSTEM_UID, Tunables};
use vhealthd::controller::CollectionController;
use vhealthd::eventloop::EventLoop;
use vhealthd::supervisor::Supervisor;
use vhealthd::transport::NullResolver;

/// vehicle health-monitoring daemon.
#[derive(Parser)]
#[command(name = "vhealthd", about = "Vehicle health-monitoring daemon", version)]
struct Args {
    /// Path to the uid_io stats file.
    #[arg(long, default_value = vhealthd::collector::uid_io::DEFAULT_PATH)]
    uid_io_path: String,

    /// Path to the aggregate CPU/process-count stats file.
    #[arg(long, default_value = vhealthd::collector::system_stat::DEFAULT_PATH)]
    system_stat_path: String,

    /// Path to the process filesystem root.
    #[arg(long, default_value = vhealthd::collector::process::DEFAULT_PATH)]
    proc_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vhealthd={level}").parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(target_os = "linux")]
fn controller(args: &Args, tunables: Tunables) -> CollectionController<RealFs> {
    CollectionController::new(
        RealFs::new(),
        tunables,
        args.uid_io_path.clone(),
        args.system_stat_path.clone(),
        args.proc_path.clone(),
    )
}

#[cfg(not(target_os = "linux"))]
fn controller(args: &Args, tunables: Tunables) -> CollectionController<MockFs> {
    CollectionController::new(
        MockFs::new(),
        tunables,
        args.uid_io_path.clone(),
        args.system_stat_path.clone(),
        args.proc_path.clone(),
    )
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let tunables = Tunables::from_env();
    info!("vhealthd {} starting", env!("CARGO_PKG_VERSION"));

    let controller = controller(&args, tunables.clone());
    let mut event_loop = EventLoop::new(
        controller,
        Supervisor::new(),
        tunables.boottime_collection_interval,
        tunables.periodic_collection_interval,
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("failed to set Ctrl-C handler: {}", e);
    }

    let resolver = NullResolver;
    let transport = vhealthd::transport::NullClientTransport;
    let monitor_transport = vhealthd::transport::NullMonitorTransport;
    let shutdown = || !running.load(Ordering::SeqCst);

    let start = Instant::now();
    event_loop.start(start);

    let mut tick_count: u64 = 0;
    while running.load(Ordering::SeqCst) && !event_loop.is_terminated() {
        let now = Instant::now();
        event_loop.run_due(now, &resolver, &transport, &monitor_transport, &shutdown);
        tick_count += 1;
        if tick_count.is_multiple_of(60) {
            release_memory_to_os();
        }

        match event_loop.next_due() {
            Some(due) if due > now => {
                std::thread::sleep((due - now).min(Duration::from_millis(200)));
            }
            Some(_) => {}
            None => std::thread::sleep(Duration::from_millis(200)),
        }

        if let Some(line) = read_admin_command() {
            let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            let mut out = String::new();
            match admin::dispatch(&args, &mut out, SYSTEM_UID, &mut event_loop, now) {
                Ok(()) => print!("{out}"),
                Err(e) => warn!("admin command failed: {}", e),
            }
        }
    }

    info!("shutdown complete");
}

/// Non-blocking read of one admin command line from stdin, if any is ready.
/// A real deployment wires this to the RPC transport instead.
fn read_admin_command() -> Option<String> {
    use std::io::IsTerminal;
    if std::io::stdin().is_terminal() {
        return None;
    }
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}
