//! Execute one attempt of one experiment.
//!
//! The command's stdout and stderr both go to the log file. A run that
//! exceeds the timeout is killed and leaves a marker file holding the
//! timeout. An interrupt keeps the partial log under `.interrupted` and
//! aborts the caller, as does a command that cannot be started.

use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use colored::*;
use log::{debug, info, warn};
use tokio::process::{Child, Command};
use tokio::signal::unix::{Signal, SignalKind, signal};

use crate::error::{BenchError, Result};
use crate::experiment::{Experiment, Status, interrupted_log, timeout_marker};

const SIGINT: i32 = 2;

/// Source of the external interrupt that aborts a scheduling run.
///
/// Implementations must remember an interrupt that arrives while nobody is
/// waiting, so the next call to [`received`](Self::received) sees it.
pub trait Interrupt {
    /// Resolves once an interrupt has been received.
    fn received(&mut self) -> impl Future<Output = ()>;
}

impl Interrupt for Signal {
    async fn received(&mut self) {
        if self.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Listen for SIGINT until the returned listener is dropped.
pub fn interrupt_listener() -> Result<Signal> {
    Ok(signal(SignalKind::interrupt())?)
}

/// Returns true if an interrupt is already waiting.
pub async fn interrupt_pending<I: Interrupt>(interrupt: &mut I) -> bool {
    tokio::select! {
        biased;
        _ = interrupt.received() => true,
        _ = std::future::ready(()) => false,
    }
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
}

/// Run an experiment, stopping early when `interrupt` fires.
pub async fn run_experiment<I: Interrupt>(
    experiment: &Experiment,
    timeout_secs: u64,
    logfile: &Path,
    interrupt: &mut I,
) -> Result<Status> {
    let marker = timeout_marker(logfile);
    remove_stale(logfile)?;
    remove_stale(&marker)?;

    print!("Performing {}... ", experiment.name());
    io::stdout().flush()?;

    let mut child = spawn(experiment, logfile).inspect_err(|_| {
        println!("{}", "OS error, typically caused by a missing executable.".red());
    })?;

    // The interrupt goes first: a terminal Ctrl-C reaches the child too, and
    // its exit must not be mistaken for a finished run.
    let outcome = tokio::select! {
        biased;
        _ = interrupt.received() => Outcome::Interrupted,
        exit = child.wait() => Outcome::Exited(exit?),
        _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => Outcome::TimedOut,
    };

    match outcome {
        Outcome::Exited(exit) => {
            debug!("{} exited with {}", experiment.name(), exit);
            if exit.signal() == Some(SIGINT) || interrupt_pending(interrupt).await {
                return abort(experiment, logfile, &mut child).await;
            }
            let status = experiment.status_from_log(logfile)?;
            match &status {
                Status::Done(metrics) => println!("done; {}.", experiment.summarize(metrics)),
                Status::Error(message) => println!("{}.", format!("error: {}", message).bold().red()),
                Status::Timeout(secs) => println!("timeout ({}).", secs),
                Status::NotDone => println!("not done."),
            }
            Ok(status)
        }
        Outcome::TimedOut => {
            child.kill().await?;
            fs::write(&marker, timeout_secs.to_string())?;
            println!("timeout.");
            warn!("{} timed out after {}s", experiment.name(), timeout_secs);
            Ok(Status::Timeout(timeout_secs))
        }
        Outcome::Interrupted => abort(experiment, logfile, &mut child).await,
    }
}

/// Stop the child, keep its partial log, and fail with `Interrupted`.
async fn abort(experiment: &Experiment, logfile: &Path, child: &mut Child) -> Result<Status> {
    if let Err(e) = child.kill().await {
        warn!("Failed to stop {} after interrupt: {}", experiment.name(), e);
    }
    let preserved = interrupted_log(logfile);
    fs::rename(logfile, &preserved)?;
    println!("Experiment interrupted.");
    warn!("{} interrupted, partial log kept at {}", experiment.name(), preserved.display());
    Err(BenchError::Interrupted {
        name: experiment.name().to_string(),
        preserved,
    })
}

fn spawn(experiment: &Experiment, logfile: &Path) -> Result<Child> {
    let spawn_error = |source: io::Error| BenchError::Spawn {
        name: experiment.name().to_string(),
        source,
    };

    let (program, args) = experiment
        .command()
        .split_first()
        .ok_or_else(|| spawn_error(io::Error::new(io::ErrorKind::InvalidInput, "empty command")))?;

    let stdout = File::create(logfile)?;
    let stderr = stdout.try_clone()?;

    info!("Running {}: {}", experiment.name(), experiment.command().join(" "));
    Command::new(program)
        .args(args)
        .envs(experiment.env())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::experiment::tests::TimeKind;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::Instant;

    /// Interrupt that never fires
    pub(crate) struct Never;

    impl Interrupt for Never {
        fn received(&mut self) -> impl Future<Output = ()> {
            std::future::pending()
        }
    }

    /// Interrupt that fires from a fixed instant on
    pub(crate) struct At(pub(crate) Instant);

    impl At {
        pub(crate) fn after(delay: Duration) -> Self {
            At(Instant::now() + delay)
        }
    }

    impl Interrupt for At {
        fn received(&mut self) -> impl Future<Output = ()> {
            tokio::time::sleep_until(self.0)
        }
    }

    fn shell(name: &str, script: &str) -> Experiment {
        Experiment::builder(name, Arc::new(TimeKind))
            .command(["sh", "-c", script])
            .build()
    }

    #[tokio::test]
    async fn test_run_done() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("quick-0");
        let exp = shell("quick", "echo 'time: 0.5'");
        let status = run_experiment(&exp, 10, &log, &mut Never).await.unwrap();
        assert!(matches!(status, Status::Done(ref m) if m.get("time") == Some(&0.5)));
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("loud-0");
        let exp = shell("loud", "echo 'time: 1.0' >&2");
        let status = run_experiment(&exp, 10, &log, &mut Never).await.unwrap();
        assert!(matches!(status, Status::Done(_)));
        assert!(fs::read_to_string(&log).unwrap().contains("time: 1.0"));
    }

    #[tokio::test]
    async fn test_run_unparseable_output_is_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("noisy-0");
        let exp = shell("noisy", "echo crashed; exit 3");
        let status = run_experiment(&exp, 10, &log, &mut Never).await.unwrap();
        assert_eq!(status, Status::Error("unknown error".to_string()));
    }

    #[tokio::test]
    async fn test_run_uses_environment() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("env-0");
        let exp = Experiment::builder("env", Arc::new(TimeKind))
            .command(["sh", "-c", "echo \"time: $BENCH_TIME\""])
            .env("BENCH_TIME", "4.5")
            .build();
        let status = run_experiment(&exp, 10, &log, &mut Never).await.unwrap();
        assert!(matches!(status, Status::Done(ref m) if m.get("time") == Some(&4.5)));
    }

    #[tokio::test]
    async fn test_run_timeout_writes_marker() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("slow-0");
        let exp = shell("slow", "sleep 30");
        let status = run_experiment(&exp, 1, &log, &mut Never).await.unwrap();
        assert_eq!(status, Status::Timeout(1));
        assert_eq!(fs::read_to_string(timeout_marker(&log)).unwrap(), "1");
        assert_eq!(exp.status_from_log(&log).unwrap(), Status::Timeout(1));
    }

    #[tokio::test]
    async fn test_run_removes_stale_artifacts() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("again-0");
        fs::write(&log, "old output").unwrap();
        fs::write(timeout_marker(&log), "5").unwrap();
        let exp = shell("again", "echo 'time: 2.0'");
        let status = run_experiment(&exp, 10, &log, &mut Never).await.unwrap();
        assert!(matches!(status, Status::Done(_)));
        assert!(!timeout_marker(&log).exists());
        assert!(!fs::read_to_string(&log).unwrap().contains("old output"));
    }

    #[tokio::test]
    async fn test_run_missing_executable_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("ghost-0");
        let exp = Experiment::builder("ghost", Arc::new(TimeKind))
            .command(["/nonexistent/benchlab-tool-xyz"])
            .build();
        let err = run_experiment(&exp, 10, &log, &mut Never).await.unwrap_err();
        assert!(matches!(err, BenchError::Spawn { ref name, .. } if name == "ghost"));
    }

    #[tokio::test]
    async fn test_run_empty_command_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("empty-0");
        let exp = Experiment::builder("empty", Arc::new(TimeKind)).build();
        let err = run_experiment(&exp, 10, &log, &mut Never).await.unwrap_err();
        assert!(matches!(err, BenchError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_interrupt_preserves_partial_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("long-0");
        let exp = shell("long", "echo partial; sleep 30");
        let mut interrupt = At::after(Duration::from_millis(300));
        let err = run_experiment(&exp, 60, &log, &mut interrupt).await.unwrap_err();
        let preserved = match err {
            BenchError::Interrupted { preserved, .. } => preserved,
            other => panic!("expected interrupt, got {:?}", other),
        };
        assert_eq!(preserved, interrupted_log(&log));
        assert!(!log.exists());
        assert!(preserved.exists());
        assert!(!timeout_marker(&log).exists());
    }

    #[tokio::test]
    async fn test_run_child_killed_by_sigint_is_interrupt() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("ctrlc-0");
        let exp = shell("ctrlc", "echo partial; kill -INT $$; sleep 5");
        let err = run_experiment(&exp, 60, &log, &mut Never).await.unwrap_err();
        let preserved = match err {
            BenchError::Interrupted { preserved, .. } => preserved,
            other => panic!("expected interrupt, got {:?}", other),
        };
        assert!(!log.exists());
        assert_eq!(fs::read_to_string(preserved).unwrap(), "partial\n");
    }

    #[tokio::test]
    async fn test_pending_interrupt_wins_over_exit() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("race-0");
        let exp = shell("race", "echo 'time: 1.0'");
        let mut interrupt = At(Instant::now());
        let err = run_experiment(&exp, 10, &log, &mut interrupt).await.unwrap_err();
        assert!(matches!(err, BenchError::Interrupted { ref name, .. } if name == "race"));
        assert!(interrupted_log(&log).exists());
    }

    #[tokio::test]
    async fn test_interrupt_pending() {
        assert!(!interrupt_pending(&mut Never).await);
        assert!(interrupt_pending(&mut At(Instant::now())).await);
        assert!(!interrupt_pending(&mut At::after(Duration::from_secs(60))).await);
    }
}
