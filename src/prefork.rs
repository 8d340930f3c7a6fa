//! # Prefork Module
//!
//! Multi-process serving. The supervisor binds the listener once, re-executes
//! itself with the socket fd passed through the environment, and watches the
//! brood. Children adopt the inherited fd and run the ordinary accept loop,
//! so the kernel balances connections across processes.
//!
//! ## Protocol
//!
//! - `MAYFLY_PREFORK_CHILD=1` marks a process as a worker child.
//! - `MAYFLY_PREFORK_FD=<fd>` carries the listener fd number.
//!
//! The supervisor clears `FD_CLOEXEC` on the listener before spawning so the
//! fd survives exec. A child that dies is restarted up to [`RESPAWN_LIMIT`]
//! times per slot; after that the supervisor tears the brood down and returns
//! an error. SIGTERM and SIGINT initiate a graceful teardown.

use std::env;

/// Environment marker present in worker children.
pub const CHILD_ENV: &str = "MAYFLY_PREFORK_CHILD";
/// Environment variable carrying the inherited listener fd.
pub const FD_ENV: &str = "MAYFLY_PREFORK_FD";
/// Times a dead child slot is restarted before the supervisor gives up.
pub const RESPAWN_LIMIT: u32 = 2;

/// Whether this process is a prefork worker child.
#[must_use]
pub fn is_child() -> bool {
    env::var_os(CHILD_ENV).is_some()
}

pub use imp::{inherited_listener, supervise};

#[cfg(unix)]
mod imp {
    use std::env;
    use std::io;
    use std::net::TcpListener;
    use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
    use std::process::{Child, Command};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::Context;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use tracing::{error, info, warn};

    use super::{CHILD_ENV, FD_ENV, RESPAWN_LIMIT};

    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    struct Slot {
        child: Child,
        respawns: u32,
    }

    /// Adopt the listener fd inherited from the supervisor.
    ///
    /// Call once per child process; the returned listener owns the fd.
    pub fn inherited_listener() -> io::Result<TcpListener> {
        let raw = env::var(FD_ENV).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "MAYFLY_PREFORK_FD is not set")
        })?;
        let fd: RawFd = raw.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad inherited listener fd: {raw}"),
            )
        })?;
        // SAFETY: the supervisor opened this fd and left it open across
        // exec; ownership transfers to the returned listener.
        let listener = unsafe { TcpListener::from_raw_fd(fd) };
        Ok(listener)
    }

    /// Run the supervisor: spawn `workers` children sharing `listener`,
    /// restart the ones that die, and tear the brood down on SIGTERM or
    /// SIGINT.
    ///
    /// Returns after every child has exited. `Ok(())` for a signalled
    /// shutdown, an error when a slot exhausts its respawn budget.
    pub fn supervise(listener: TcpListener, workers: usize) -> anyhow::Result<()> {
        let fd = listener.as_raw_fd();
        clear_cloexec(fd).context("clearing FD_CLOEXEC on the listener")?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut signals = Signals::new([SIGTERM, SIGINT]).context("installing signal handlers")?;
        {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("mayfly-signals".to_string())
                .spawn(move || {
                    if let Some(signal) = signals.forever().next() {
                        info!(signal, "shutdown signal received");
                        shutdown.store(true, Ordering::SeqCst);
                    }
                })
                .context("spawning signal thread")?;
        }

        let mut brood = Vec::with_capacity(workers);
        for slot in 0..workers {
            let child = spawn_child(fd)?;
            info!(slot, pid = child.id(), "worker child started");
            brood.push(Slot { child, respawns: 0 });
        }

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return drain(&mut brood);
            }
            for idx in 0..brood.len() {
                let slot = &mut brood[idx];
                match slot.child.try_wait() {
                    Ok(Some(status)) => {
                        if slot.respawns >= RESPAWN_LIMIT {
                            error!(slot = idx, %status, "worker keeps dying, giving up");
                            let _ = drain(&mut brood);
                            anyhow::bail!("worker slot {idx} exceeded its respawn budget");
                        }
                        warn!(slot = idx, %status, "worker died, respawning");
                        slot.respawns += 1;
                        slot.child = spawn_child(fd)?;
                        info!(slot = idx, pid = slot.child.id(), "worker child restarted");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(slot = idx, error = %e, "wait on worker failed"),
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Re-exec the current binary as a worker child, forwarding the CLI
    /// arguments and pointing it at the shared listener fd.
    fn spawn_child(fd: RawFd) -> anyhow::Result<Child> {
        let exe = env::current_exe().context("resolving current executable")?;
        let child = Command::new(&exe)
            .args(env::args_os().skip(1))
            .env(CHILD_ENV, "1")
            .env(FD_ENV, fd.to_string())
            .spawn()
            .with_context(|| format!("spawning worker from {}", exe.display()))?;
        Ok(child)
    }

    /// Ask every child to exit, wait out a grace period, then force the
    /// stragglers.
    fn drain(brood: &mut [Slot]) -> anyhow::Result<()> {
        for slot in brood.iter() {
            // SAFETY: kill(2) on a pid this process spawned; ESRCH means
            // the child is already gone.
            unsafe {
                libc::kill(slot.child.id() as libc::pid_t, libc::SIGTERM);
            }
        }
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline {
            if brood
                .iter_mut()
                .all(|s| matches!(s.child.try_wait(), Ok(Some(_))))
            {
                info!("all workers exited");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        for slot in brood.iter_mut() {
            if matches!(slot.child.try_wait(), Ok(None)) {
                warn!(pid = slot.child.id(), "worker ignored SIGTERM, killing");
                let _ = slot.child.kill();
                let _ = slot.child.wait();
            }
        }
        Ok(())
    }

    fn clear_cloexec(fd: RawFd) -> io::Result<()> {
        // SAFETY: fcntl(2) on a descriptor the caller owns.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

}

#[cfg(not(unix))]
mod imp {
    use std::io;
    use std::net::TcpListener;

    pub fn inherited_listener() -> io::Result<TcpListener> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "prefork requires a unix platform",
        ))
    }

    pub fn supervise(_listener: TcpListener, _workers: usize) -> anyhow::Result<()> {
        anyhow::bail!("prefork requires a unix platform")
    }
}
