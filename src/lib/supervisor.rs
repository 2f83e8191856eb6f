//! Process supervision with timeout escalation
//!
//! The child runs in its own process group. Once the timeout elapses the whole
//! group gets SIGINT, and if it is still around after the grace period, SIGKILL.
//!
//! Exit is observed by a watcher thread that waits *without reaping*, so the
//! child's pid stays reserved until the supervisor itself collects the status.
//! Every signal is therefore sent either to a live process or to a zombie,
//! never to a recycled pid.

use std::ffi::OsString;
use std::io;
use std::ops::ControlFlow;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{EntrypointError, Result};

/// How often a running child is checked against the abort flag.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal result of a supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The child exited on its own before any escalation
    Exited(i32),
    /// The timeout fired. The child either died from the interrupt or had to
    /// be killed after the grace period; its own code is not reported.
    TimedOutKilled,
    /// The child could not be started
    SpawnFailed(String),
    /// A previous step failed with this code, so nothing ran
    SkippedDueToPriorFailure(i32),
    /// The entrypoint itself was asked to stop
    Aborted,
}

impl Outcome {
    /// Short name used in logs and metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Exited(_) => "exited",
            Outcome::TimedOutKilled => "timed_out",
            Outcome::SpawnFailed(_) => "spawn_failed",
            Outcome::SkippedDueToPriorFailure(_) => "skipped",
            Outcome::Aborted => "aborted",
        }
    }
}

/// Why escalation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Timeout,
    Abort,
}

impl Cause {
    fn killed_outcome(self) -> Outcome {
        match self {
            Cause::Timeout => Outcome::TimedOutKilled,
            Cause::Abort => Outcome::Aborted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Interrupting {
        cause: Cause,
        kill_at: Option<Instant>,
    },
    Killing {
        cause: Cause,
    },
}

impl Phase {
    /// Once escalation has started, the cause decides the outcome and the
    /// child's own code only goes to the log.
    fn outcome(self, code: i32) -> Outcome {
        match self {
            Phase::Running => Outcome::Exited(code),
            Phase::Interrupting { cause, .. } | Phase::Killing { cause } => cause.killed_outcome(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Interrupt,
    Kill,
}

/// Runs one child to completion under a timeout and grace period.
pub struct Supervisor<'a> {
    timeout: Duration,
    grace_period: Duration,
    envs: Vec<(String, OsString)>,
    abort: Option<&'a AtomicBool>,
}

impl<'a> Supervisor<'a> {
    /// A zero `timeout` never interrupts; a zero `grace_period` never kills.
    pub fn new(timeout: Duration, grace_period: Duration) -> Self {
        Self {
            timeout,
            grace_period,
            envs: Vec::new(),
            abort: None,
        }
    }

    /// Set an extra environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Start escalation as soon as `flag` is raised.
    pub fn abort_on(mut self, flag: &'a AtomicBool) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Run `args` and return how it ended.
    ///
    /// Errors only when the child's status cannot be observed at all; start-up
    /// failures are reported as [`Outcome::SpawnFailed`].
    pub fn supervise(&self, args: &[String]) -> Result<Outcome> {
        let Some((program, rest)) = args.split_first() else {
            return Ok(Outcome::SpawnFailed("no command to run".to_string()));
        };

        let mut command = Command::new(program);
        command.args(rest);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
            // An inherited SIG_IGN would survive exec and make the child deaf to
            // the first escalation stage.
            unsafe {
                command.pre_exec(|| {
                    libc::signal(libc::SIGINT, libc::SIG_DFL);
                    Ok(())
                });
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(program = %program, error = %e, "could not start process");
                return Ok(Outcome::SpawnFailed(format!("{}: {}", program, e)));
            }
        };
        let pid = child.id();
        info!(pid, command = %args.join(" "), "process started");

        let mut watch = match ExitWatch::start(&child) {
            Ok(watch) => watch,
            Err(e) => {
                abandon(&mut child);
                return Err(EntrypointError::Wait(e));
            }
        };

        let started = Instant::now();
        let mut phase = Phase::Running;
        loop {
            let limit = self.wait_limit(phase, started);
            match watch.wait(&mut child, limit) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    error!(pid, error = %e, "lost track of process, killing it");
                    abandon(&mut child);
                    return Err(EntrypointError::Wait(e));
                }
            }

            let now = Instant::now();
            let step = match phase {
                Phase::Running if self.abort_requested() => {
                    info!(pid, "entrypoint interrupted, stopping process");
                    self.interrupt(&mut child, Cause::Abort, now)
                }
                Phase::Running if self.timed_out(started, now) => {
                    info!(
                        pid,
                        timeout = %humantime::format_duration(self.timeout),
                        "process did not finish before timeout"
                    );
                    self.interrupt(&mut child, Cause::Timeout, now)
                }
                Phase::Interrupting {
                    cause,
                    kill_at: Some(kill_at),
                } if now >= kill_at => {
                    warn!(pid, "process did not exit within grace period");
                    self.kill(&mut child, cause)
                }
                other => ControlFlow::Continue(other),
            };
            match step {
                ControlFlow::Continue(next) => phase = next,
                ControlFlow::Break(outcome) => return Ok(outcome),
            }
        }

        let status = child.wait().map_err(EntrypointError::Wait)?;
        let code = exit_code(status);
        let outcome = phase.outcome(code);
        info!(pid, code, outcome = outcome.kind(), "process finished");
        Ok(outcome)
    }

    /// How long to block before the next state check, if at all.
    fn wait_limit(&self, phase: Phase, started: Instant) -> Option<Duration> {
        let deadline = match phase {
            Phase::Running if !self.timeout.is_zero() => Some(started + self.timeout),
            Phase::Interrupting { kill_at, .. } => kill_at,
            _ => None,
        };
        let limit = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if phase == Phase::Running && self.abort.is_some() {
            return Some(limit.map_or(ABORT_POLL_INTERVAL, |l| l.min(ABORT_POLL_INTERVAL)));
        }
        limit
    }

    fn abort_requested(&self) -> bool {
        self.abort.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn timed_out(&self, started: Instant, now: Instant) -> bool {
        !self.timeout.is_zero() && now >= started + self.timeout
    }

    fn interrupt(
        &self,
        child: &mut Child,
        cause: Cause,
        now: Instant,
    ) -> ControlFlow<Outcome, Phase> {
        let pid = child.id();
        match signal_group(pid, GroupSignal::Interrupt) {
            Ok(()) => {
                info!(
                    pid,
                    grace_period = %humantime::format_duration(self.grace_period),
                    "sent SIGINT to process group"
                );
                let kill_at = (!self.grace_period.is_zero()).then(|| now + self.grace_period);
                ControlFlow::Continue(Phase::Interrupting { cause, kill_at })
            }
            Err(e) => {
                warn!(pid, error = %e, "could not interrupt process group, killing instead");
                self.kill(child, cause)
            }
        }
    }

    fn kill(&self, child: &mut Child, cause: Cause) -> ControlFlow<Outcome, Phase> {
        let pid = child.id();
        match signal_group(pid, GroupSignal::Kill) {
            Ok(()) => info!(pid, "sent SIGKILL to process group"),
            Err(e) => {
                warn!(pid, error = %e, "could not kill process group, killing process directly");
                if let Err(e) = child.kill() {
                    error!(pid, error = %e, "process is unresponsive, giving up on it");
                    // Both kills failed, so a blocking wait could hang forever.
                    let _ = child.try_wait();
                    return ControlFlow::Break(cause.killed_outcome());
                }
            }
        }
        ControlFlow::Continue(Phase::Killing { cause })
    }
}

/// Kill the child's group and reap the child before bailing out.
///
/// The exit watcher thread is left to finish on its own once the child is gone.
fn abandon(child: &mut Child) -> Option<ExitStatus> {
    let _ = signal_group(child.id(), GroupSignal::Kill);
    let _ = child.kill();
    child.wait().ok()
}

/// Result code for a finished child. Death by signal maps to 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: GroupSignal) -> io::Result<()> {
    let signo = match signal {
        GroupSignal::Interrupt => libc::SIGINT,
        GroupSignal::Kill => libc::SIGKILL,
    };
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if unsafe { libc::killpg(pgid, signo) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: GroupSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// Reports child exit to the supervision loop.
#[cfg(unix)]
struct ExitWatch {
    rx: std::sync::mpsc::Receiver<io::Result<()>>,
}

#[cfg(unix)]
impl ExitWatch {
    fn start(child: &Child) -> io::Result<Self> {
        let pid = child.id() as libc::id_t;
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("child-exit-watch".to_string())
            .spawn(move || {
                let _ = tx.send(wait_without_reaping(pid));
            })?;
        Ok(Self { rx })
    }

    /// `Ok(true)` once the child has exited, `Ok(false)` if `limit` passed first.
    fn wait(&mut self, _child: &mut Child, limit: Option<Duration>) -> io::Result<bool> {
        use std::sync::mpsc::RecvTimeoutError;

        let received = match limit {
            Some(limit) => match self.rx.recv_timeout(limit) {
                Ok(received) => received,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => return Err(watcher_gone()),
            },
            None => self.rx.recv().map_err(|_| watcher_gone())?,
        };
        received.map(|()| true)
    }
}

#[cfg(unix)]
fn wait_without_reaping(pid: libc::id_t) -> io::Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn watcher_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "exit watcher stopped unexpectedly")
}

#[cfg(not(unix))]
struct ExitWatch;

#[cfg(not(unix))]
impl ExitWatch {
    fn start(_child: &Child) -> io::Result<Self> {
        Ok(Self)
    }

    fn wait(&mut self, child: &mut Child, limit: Option<Duration>) -> io::Result<bool> {
        let deadline = limit.map(|l| Instant::now() + l);
        loop {
            if child.try_wait()?.is_some() {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}
