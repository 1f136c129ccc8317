// src/process/mod.rs

//! Child process supervision.
//!
//! Each task script runs as `<package-manager> run <task> [-- args]` in its
//! own process group, so a shutdown signal reaches the whole tree the
//! script may have spawned. The manager keeps every live group id;
//! [`ProcessManager::close`] sends SIGINT to all of them, waits out a grace
//! period, then SIGKILLs stragglers.
//!
//! Exit codes: a normal exit reports its code; a signal death reports the
//! signal number, which is always positive, so an aggregate `max` over
//! child exits can never pick `0` from a killed task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::ExecError;
use crate::paths::AbsPath;

/// What to run and where.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: AbsPath,
    /// The complete child environment; nothing else is inherited.
    pub env: std::collections::BTreeMap<String, String>,
}

/// Terminal state of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Process exited on its own with this code.
    Finished(i32),
    /// Process died to a signal; the value is the signal number.
    KilledBySignal(i32),
    /// Killed by the manager during shutdown; no completion is reported.
    Interrupted,
}

impl ChildExit {
    /// The magnitude that feeds the run's aggregate exit code.
    pub fn code(&self) -> i32 {
        match self {
            ChildExit::Finished(code) => code.abs(),
            ChildExit::KilledBySignal(signal) => signal.abs(),
            ChildExit::Interrupted => 1,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Finished(0))
    }
}

#[derive(Default)]
struct LiveSet {
    /// pid → process-group id.
    children: HashMap<u32, i32>,
}

/// Tracks all live children for coordinated shutdown.
#[derive(Clone)]
pub struct ProcessManager {
    live: Arc<Mutex<LiveSet>>,
    closing: Arc<AtomicBool>,
    grace_period: Duration,
}

impl ProcessManager {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            live: Arc::new(Mutex::new(LiveSet::default())),
            closing: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Run a command, streaming each output line (stdout and stderr merged)
    /// into `on_line`. Returns when the child exits or the manager kills it.
    pub async fn exec(
        &self,
        command: ChildCommand,
        mut on_line: impl FnMut(&str),
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ChildExit, ExecError> {
        if self.is_closing() {
            return Ok(ChildExit::Interrupted);
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(command.cwd.as_std_path())
            .env_clear()
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
            command: format!("{} {}", command.program, command.args.join(" ")),
            source: e,
        })?;

        let pid = child.id().unwrap_or(0);
        {
            let mut live = self.live.lock().unwrap();
            live.children.insert(pid, pid as i32);
        }
        debug!(pid, program = %command.program, "spawned child");

        // Merge stdout and stderr into one line stream. Each pipe gets its
        // own reader task; lines interleave but never split.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(line_tx);

        let mut exit: Option<ChildExit> = None;
        let mut interrupted = false;
        let mut cancel_closed = false;

        loop {
            tokio::select! {
                line = line_rx.recv() => {
                    match line {
                        Some(line) => on_line(&line),
                        // Pipes closed; wait for the exit status.
                        None => {
                            if exit.is_none() {
                                let status = child.wait().await.map_err(|e| ExecError::Spawn {
                                    command: command.program.clone(),
                                    source: e,
                                })?;
                                exit = Some(status_to_exit(status, interrupted));
                            }
                            break;
                        }
                    }
                }
                status = child.wait(), if exit.is_none() => {
                    let status = status.map_err(|e| ExecError::Spawn {
                        command: command.program.clone(),
                        source: e,
                    })?;
                    exit = Some(status_to_exit(status, interrupted));
                    // Keep draining lines until the pipes close.
                }
                changed = cancel.changed(), if !interrupted && !cancel_closed => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            interrupted = true;
                            info!(pid, "stopping child");
                            self.interrupt_group(pid as i32);
                            let manager = self.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(manager.grace_period).await;
                                manager.kill_group(pid as i32);
                            });
                        }
                        Ok(()) => {}
                        // Sender gone; nobody can cancel us anymore.
                        Err(_) => cancel_closed = true,
                    }
                }
            }
        }

        {
            let mut live = self.live.lock().unwrap();
            live.children.remove(&pid);
        }

        let exit = exit.expect("loop exits only with a status");
        debug!(pid, ?exit, "child finished");
        if interrupted {
            return Ok(ChildExit::Interrupted);
        }
        Ok(exit)
    }

    /// Begin shutdown: SIGINT every live group, SIGKILL after the grace
    /// period. Idempotent.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let pids: Vec<i32> = {
            let live = self.live.lock().unwrap();
            live.children.values().copied().collect()
        };
        if pids.is_empty() {
            return;
        }

        info!(children = pids.len(), "interrupting running tasks");
        for pid in &pids {
            self.interrupt_group(*pid);
        }

        tokio::time::sleep(self.grace_period).await;

        let survivors: Vec<i32> = {
            let live = self.live.lock().unwrap();
            live.children.values().copied().collect()
        };
        for pid in survivors {
            warn!(pid, "child survived grace period; killing");
            self.kill_group(pid);
        }
    }

    #[cfg(unix)]
    fn interrupt_group(&self, pgid: i32) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGINT);
    }

    #[cfg(unix)]
    fn kill_group(&self, pgid: i32) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn interrupt_group(&self, _pgid: i32) {}

    #[cfg(not(unix))]
    fn kill_group(&self, _pgid: i32) {}
}

#[cfg(unix)]
fn status_to_exit(status: std::process::ExitStatus, interrupted: bool) -> ChildExit {
    use std::os::unix::process::ExitStatusExt;
    if interrupted {
        return ChildExit::Interrupted;
    }
    match status.code() {
        Some(code) => ChildExit::Finished(code),
        None => ChildExit::KilledBySignal(status.signal().unwrap_or(1)),
    }
}

#[cfg(not(unix))]
fn status_to_exit(status: std::process::ExitStatus, interrupted: bool) -> ChildExit {
    if interrupted {
        return ChildExit::Interrupted;
    }
    ChildExit::Finished(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(script: &str, cwd: &AbsPath) -> ChildCommand {
        let mut env = std::collections::BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_default(),
        );
        ChildCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: cwd.clone(),
            env,
        }
    }

    fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let manager = ProcessManager::new(Duration::from_millis(200));
        let (_tx, rx) = cancel_channel();

        let mut lines = Vec::new();
        let exit = manager
            .exec(command("echo one; echo two >&2", &cwd), |l| {
                lines.push(l.to_string())
            }, rx)
            .await
            .unwrap();

        assert!(exit.success());
        lines.sort();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let manager = ProcessManager::new(Duration::from_millis(200));
        let (_tx, rx) = cancel_channel();

        let exit = manager
            .exec(command("exit 3", &cwd), |_| {}, rx)
            .await
            .unwrap();
        assert_eq!(exit, ChildExit::Finished(3));
        assert_eq!(exit.code(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let manager = ProcessManager::new(Duration::from_millis(100));
        let (tx, rx) = cancel_channel();

        let exec = manager.exec(command("sleep 30", &cwd), |_| {}, rx);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        };
        let (exit, ()) = tokio::join!(exec, cancel);
        assert_eq!(exit.unwrap(), ChildExit::Interrupted);
    }

    #[test]
    fn signal_exits_never_alias_success() {
        assert_eq!(ChildExit::KilledBySignal(2).code(), 2);
        assert_eq!(ChildExit::Interrupted.code(), 1);
        assert!(ChildExit::KilledBySignal(15).code() > 0);
    }
}
