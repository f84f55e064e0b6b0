//! Process management - spawning and stopping the app under test

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Grace period between a close request and a forced kill.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// What to run: program, arguments, working directory and extra environment.
///
/// The program is executed directly; arguments are never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `cargo run` invocation that binds `project` to `url`.
    pub fn cargo_project(project: &str, url: &str, workspace_root: impl AsRef<Path>) -> Self {
        Self::new("cargo")
            .args(["run", "--quiet", "--package", project, "--", "--urls", url])
            .current_dir(workspace_root)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so signals reach whatever the program spawns in turn
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }
}

/// Handle to a running app process.
///
/// At most one of these is held per fixture. Dropping a handle that was never
/// passed to [`ProcessLauncher::stop`] kills the process outright.
#[derive(Debug)]
pub struct AppProcess {
    child: Child,
    pid: Option<u32>,
    program: String,
}

impl AppProcess {
    /// OS process id, as reported at spawn time.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has exited. Reaps it if so.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to shut down. Unix only; elsewhere there is no polite
    /// request to make and the caller escalates after the grace period.
    fn request_close(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to process group {} failed: {}", pid, e);
            }
        }
    }

    async fn force_kill(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {} (pid {:?}): {}", self.program, self.pid, e);
        }
    }

    /// SIGKILL anything left in the process group. Harmless once it is empty.
    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }
}

impl Drop for AppProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!("App process {:?} dropped while running; killing it", self.pid);
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}

/// Starts and stops the app under test.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    grace: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_GRACE)
    }
}

impl ProcessLauncher {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Spawn the process described by `spec`.
    ///
    /// Its stdout and stderr are forwarded to `tracing` at debug level.
    pub fn start(&self, spec: &LaunchSpec) -> E2eResult<AppProcess> {
        let mut child = spec.command().spawn().map_err(|source| E2eError::Launch {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        info!(
            "Started {} {} (pid {:?}) in '{}'",
            spec.program,
            spec.args.join(" "),
            pid,
            spec.working_dir.display()
        );

        Ok(AppProcess {
            child,
            pid,
            program: spec.program.clone(),
        })
    }

    /// Stop a process: close request, wait up to the grace period, then kill.
    ///
    /// A no-op for `None` or an already exited process. Never fails; problems
    /// are logged.
    pub async fn stop(&self, handle: Option<AppProcess>) {
        let Some(mut process) = handle else {
            return;
        };

        if process.has_exited() {
            debug!("{} (pid {:?}) already exited", process.program, process.pid);
            process.kill_group();
            return;
        }

        info!("Stopping {} (pid {:?})", process.program, process.pid);
        process.request_close();

        match timeout(self.grace, process.wait()).await {
            Ok(Ok(status)) => {
                info!("{} exited with {}", process.program, status);
                process.kill_group();
            }
            Ok(Err(e)) => {
                warn!("Failed waiting on {}: {}", process.program, e);
                process.force_kill().await;
            }
            Err(_) => {
                warn!(
                    "{} did not exit within {:?}; killing it",
                    process.program, self.grace
                );
                process.force_kill().await;
            }
        }
    }
}

async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "webapp_e2e::app", stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(target: "webapp_e2e::app", stream, "output closed: {}", e);
                break;
            }
        }
    }
}
