//! Master supervisor
//!
//! Binds the listening socket and maps the shared statistics region before
//! forking the worker fleet, then settles into a once-per-second tick:
//! exited children are reaped opportunistically each tick and a statistics
//! summary is logged every thirty. On a termination signal every worker is
//! sent SIGTERM and waited for. Workers are not respawned; a dead worker
//! reduces fleet capacity until the server is restarted.

use std::io;
use std::net::TcpListener;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::listener;
use crate::signals;
use crate::stats::SharedStats;
use crate::worker::Worker;

// Summary cadence, in ticks of one second.
const SUMMARY_TICKS: u64 = 30;

/// The master process: listener, statistics region, and worker fleet.
#[derive(Debug)]
pub struct Master {
    config: Arc<Config>,
    stats: Arc<SharedStats>,
    listener: TcpListener,
    children: Vec<Pid>,
    started: Instant,
}

impl Master {
    /// Performs every fatal-if-it-fails initialization step: signal
    /// disposition, statistics mapping, socket binding.
    pub fn new(config: Config) -> io::Result<Self> {
        signals::install().map_err(io::Error::from)?;
        let stats = Arc::new(SharedStats::create()?);
        let listener = listener::bind(config.port)?;

        Ok(Master {
            config: Arc::new(config),
            stats,
            listener,
            children: Vec::new(),
            started: Instant::now(),
        })
    }

    /// Forks the fleet and supervises it until a termination signal.
    pub fn run(mut self) -> io::Result<()> {
        self.spawn_workers()?;
        info!(
            port = self.config.port,
            workers = self.children.len(),
            root = %self.config.document_root.display(),
            "listening"
        );

        let mut ticks: u64 = 0;
        while !signals::shutdown_requested() {
            thread::sleep(Duration::from_secs(1));
            ticks += 1;

            self.reap_exited();
            if ticks % SUMMARY_TICKS == 0 {
                info!("{}", self.stats.summary());
            }
        }

        self.shutdown();
        Ok(())
    }

    fn spawn_workers(&mut self) -> io::Result<()> {
        for id in 0..self.config.num_workers {
            let inherited = self.listener.try_clone()?;

            // SAFETY: the master is single-threaded at this point; the child
            // only runs the worker and exits without returning.
            match unsafe { fork() }.map_err(io::Error::from)? {
                ForkResult::Child => {
                    let worker = Worker::new(
                        id,
                        inherited,
                        Arc::clone(&self.config),
                        Arc::clone(&self.stats),
                        self.started,
                    );
                    let code = match worker.run() {
                        Ok(()) => 0,
                        Err(err) => {
                            error!(worker = id, "worker failed: {err}");
                            1
                        }
                    };
                    process::exit(code);
                }
                ForkResult::Parent { child } => {
                    debug!(worker = id, pid = child.as_raw(), "forked worker");
                    drop(inherited);
                    self.children.push(child);
                }
            }
        }

        Ok(())
    }

    fn reap_exited(&mut self) {
        self.children.retain(|&pid| {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => true,
                Ok(status) => {
                    // No respawn: capacity stays reduced until restart.
                    warn!(pid = pid.as_raw(), "worker exited: {status:?}");
                    false
                }
                Err(err) => {
                    warn!(pid = pid.as_raw(), "waitpid failed: {err}");
                    false
                }
            }
        });
    }

    fn shutdown(&mut self) {
        info!("shutting down {} workers", self.children.len());

        for &pid in &self.children {
            if let Err(err) = kill(pid, Signal::SIGTERM) {
                warn!(pid = pid.as_raw(), "failed to signal worker: {err}");
            }
        }
        for &pid in &self.children {
            // Already-reaped children surface ECHILD here; nothing to do.
            let _ = waitpid(pid, None);
        }
        self.children.clear();

        info!("final statistics: {}", self.stats.summary());
    }
}
