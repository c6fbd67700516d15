// Managed kernel supervision
//
// Starts and stops at most one locally owned kernel process. Operations are
// serialized through an async mutex, and a failed start or stop leaves the
// tracked state exactly as it was.

use crate::config::constants::NAME_PLACEHOLDER;
use crate::config::ManagedConfig;
use crate::errors::{KernelError, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Lines of kernel stderr kept for the exit report
const STDERR_TAIL_LINES: usize = 20;

/// What the supervisor knows about its process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Nothing tracked
    NotStarted,
    /// Spawned and not yet exited. Says nothing about readiness.
    Running { pid: u32 },
    /// Tracked but already gone; `stop` clears it
    Exited { pid: u32, code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    /// A process was already tracked and was left untouched
    AlreadyRunning { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// `code` is `None` when the process was ended by a signal
    Stopped { pid: u32, code: Option<i32> },
    /// Nothing was tracked
    NotRunning,
}

/// A spawned kernel process
struct ManagedKernel {
    name: String,
    executable: PathBuf,
    pid: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl ManagedKernel {
    fn exited(&mut self) -> Option<ExitStatus> {
        // An error here means the status is unknowable; treat as still running
        self.child.try_wait().ok().flatten()
    }

    fn stderr_tail(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Supervises at most one locally spawned kernel
pub struct ManagedProcessSupervisor {
    config: ManagedConfig,
    current: AsyncMutex<Option<ManagedKernel>>,
}

impl ManagedProcessSupervisor {
    pub fn new(config: ManagedConfig) -> Self {
        Self {
            config,
            current: AsyncMutex::new(None),
        }
    }

    /// Spawn the configured kernel executable for `name`.
    ///
    /// A no-op when a process is already tracked. Returning does not mean the
    /// kernel accepts connections yet; readiness shows up through discovery.
    pub async fn start(&self, name: &str) -> Result<StartOutcome> {
        let mut current = self.current.lock().await;

        if let Some(kernel) = current.as_ref() {
            debug!(
                requested = name,
                running = %kernel.name,
                pid = kernel.pid,
                "Not starting a managed kernel because one is already running"
            );
            return Ok(StartOutcome::AlreadyRunning { pid: kernel.pid });
        }

        let executable = self
            .config
            .executable
            .clone()
            .ok_or(KernelError::NotConfigured("managed.executable"))?;

        let kernel = self.spawn_kernel(name, executable).await?;
        let pid = kernel.pid;
        info!(name, pid, executable = %kernel.executable.display(), "Started managed kernel");

        *current = Some(kernel);
        Ok(StartOutcome::Started { pid })
    }

    /// Terminate the tracked kernel and stop tracking it.
    ///
    /// Asks nicely first (shutdown input, then SIGTERM on unix when no
    /// shutdown input is configured), and kills the process if it is still
    /// alive after the stop timeout. A no-op when nothing is tracked.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut current = self.current.lock().await;

        let Some(kernel) = current.as_mut() else {
            debug!("Not stopping the managed kernel because none is running");
            return Ok(StopOutcome::NotRunning);
        };

        let pid = kernel.pid;
        info!(name = %kernel.name, pid, "Stopping managed kernel");

        let status = self
            .terminate(kernel)
            .await
            .map_err(|source| KernelError::ProcessTerminate { pid, source })?;

        let code = status.code();
        if !status.success() {
            warn!(
                pid,
                ?code,
                stderr = %kernel.stderr_tail(),
                "Managed kernel exited with a non-zero status"
            );
        }

        *current = None;
        info!(pid, ?code, "Managed kernel stopped");
        Ok(StopOutcome::Stopped { pid, code })
    }

    /// True iff a process is tracked and has not exited
    pub async fn is_started(&self) -> bool {
        matches!(self.status().await, ProcessStatus::Running { .. })
    }

    pub async fn status(&self) -> ProcessStatus {
        let mut current = self.current.lock().await;
        match current.as_mut() {
            None => ProcessStatus::NotStarted,
            Some(kernel) => match kernel.exited() {
                None => ProcessStatus::Running { pid: kernel.pid },
                Some(status) => ProcessStatus::Exited {
                    pid: kernel.pid,
                    code: status.code(),
                },
            },
        }
    }

    async fn spawn_kernel(&self, name: &str, executable: PathBuf) -> Result<ManagedKernel> {
        let wants_stdin =
            !self.config.startup_input.is_empty() || !self.config.shutdown_input.is_empty();

        let mut command = Command::new(&executable);
        command
            .args(self.config.args.iter().map(|arg| substitute(arg, name)))
            .stdin(if wants_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| KernelError::ProcessSpawn {
            path: executable.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "kernel_link::kernel_output", pid, "{}", line);
                    let mut tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            });
        }

        let mut kernel = ManagedKernel {
            name: name.to_string(),
            executable,
            pid,
            child,
            stdin,
            stderr_tail,
        };

        let startup: Vec<String> = self
            .config
            .startup_input
            .iter()
            .map(|line| substitute(line, name))
            .collect();

        if let Err(source) = write_lines(kernel.stdin.as_mut(), &startup).await {
            // Spawned but not set up: do not leave an untracked process behind
            warn!(pid, error = %source, "Failed to send startup input, killing managed kernel");
            if let Err(e) = kernel.child.kill().await {
                warn!(pid, error = %e, "Failed to kill half-started managed kernel");
            }
            return Err(KernelError::ProcessSpawn {
                path: kernel.executable,
                source,
            });
        }

        Ok(kernel)
    }

    async fn terminate(&self, kernel: &mut ManagedKernel) -> std::io::Result<ExitStatus> {
        if let Some(status) = kernel.exited() {
            debug!(pid = kernel.pid, "Managed kernel had already exited");
            return Ok(status);
        }

        let shutdown: Vec<String> = self
            .config
            .shutdown_input
            .iter()
            .map(|line| substitute(line, &kernel.name))
            .collect();

        if let Err(e) = write_lines(kernel.stdin.as_mut(), &shutdown).await {
            debug!(pid = kernel.pid, error = %e, "Could not send shutdown input");
        }
        // Closing stdin is itself a stop signal for kernels driven from stdin
        kernel.stdin = None;

        #[cfg(unix)]
        {
            if shutdown.is_empty() {
                send_sigterm(kernel.pid);
            }
        }

        let timeout = self.config.stop_timeout();
        match tokio::time::timeout(timeout, kernel.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    pid = kernel.pid,
                    ?timeout,
                    "Managed kernel did not stop gracefully, killing it"
                );
                kernel.child.kill().await?;
                kernel.child.wait().await
            }
        }
    }
}

/// Replace `{name}` in a configured argument or input line
fn substitute(template: &str, name: &str) -> String {
    template.replace(NAME_PLACEHOLDER, name)
}

async fn write_lines(stdin: Option<&mut ChildStdin>, lines: &[String]) -> std::io::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let Some(stdin) = stdin else {
        return Ok(());
    };
    for line in lines {
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
    }
    stdin.flush().await
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // ESRCH just means it already exited; wait() will report that
        debug!(pid, error = %e, "Failed to send SIGTERM to managed kernel");
    }
}
