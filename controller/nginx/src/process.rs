use crate::{Error, Result};
use std::{ffi::OsStr, fmt, process::Stdio, time::Duration};
use tokio::{
    process::Command,
    sync::{oneshot, watch},
};

/// How a supervised process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exit {
    pub name: String,
    /// The exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// Set when the process could not be waited on.
    pub error: Option<String>,
}

/// Resolves once the process exits.
pub type Done = watch::Receiver<Option<Exit>>;

/// A spawned process that is waited on by a background task.
#[derive(Debug)]
pub(crate) struct Spawned {
    pub name: String,
    pub pid: Option<u32>,
    pub done: Done,
    kill: Option<oneshot::Sender<()>>,
}

// === impl Exit ===

impl Exit {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.code == Some(0)
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.code) {
            (Some(error), _) => write!(f, "{} failed: {error}", self.name),
            (None, Some(code)) => write!(f, "{} exited with code {code}", self.name),
            (None, None) => write!(f, "{} was terminated by a signal", self.name),
        }
    }
}

// === impl Spawned ===

impl Spawned {
    /// Starts `cmd` and forwards its exit to the returned [`Done`].
    pub fn spawn(name: impl Into<String>, mut cmd: Command) -> Result<Self> {
        let name = name.into();
        let mut child = cmd
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to start {name}: {e}")))?;
        let pid = child.id();
        tracing::info!(%name, ?pid, "Started process");

        let (done_tx, done) = watch::channel(None);
        let (kill, kill_rx) = oneshot::channel::<()>();
        let task_name = name.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(error) = child.start_kill() {
                        tracing::warn!(name = %task_name, %error, "Failed to kill process");
                    }
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => Exit {
                    name: task_name,
                    code: status.code(),
                    error: None,
                },
                Err(error) => Exit {
                    name: task_name,
                    code: None,
                    error: Some(error.to_string()),
                },
            };
            tracing::debug!(%exit, "Process exited");
            let _ = done_tx.send(Some(exit));
        });

        Ok(Self {
            name,
            pid,
            done,
            kill: Some(kill),
        })
    }

    /// Waits up to `timeout` for the process to exit, then kills it.
    pub async fn wait_or_kill(&mut self, timeout: Duration) -> Exit {
        let mut done = self.done.clone();
        if let Ok(Ok(exit)) = tokio::time::timeout(timeout, done.wait_for(Option::is_some)).await
        {
            if let Some(exit) = exit.clone() {
                return exit;
            }
        }

        tracing::warn!(name = %self.name, ?timeout, "Process did not exit in time; killing it");
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        let exit = done.wait_for(Option::is_some).await.ok().and_then(|e| e.clone());
        exit.unwrap_or_else(|| Exit {
            name: self.name.clone(),
            code: None,
            error: Some("exit status lost".to_string()),
        })
    }
}

/// Runs a short-lived command to completion, failing with its stderr when it fails.
pub(crate) async fn run<I, S>(program: &OsStr, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    tracing::debug!(command = ?cmd, "Executing");
    let output = cmd
        .output()
        .await
        .map_err(|e| Error::Process(format!("failed to execute {cmd:?}: {e}")))?;
    if output.status.success() {
        return Ok(());
    }
    Err(Error::Process(format!(
        "{cmd:?} finished with {}: stdout: {:?} stderr: {:?}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_exit_codes() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);
        let mut spawned = Spawned::spawn("sh", cmd).expect("spawn");
        let exit = spawned.wait_or_kill(Duration::from_secs(10)).await;
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
        assert_eq!(exit.to_string(), "sh exited with code 3");
    }

    #[tokio::test]
    async fn kills_processes_that_outlive_the_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut spawned = Spawned::spawn("sleep", cmd).expect("spawn");
        let exit = spawned.wait_or_kill(Duration::from_millis(50)).await;
        assert_eq!(exit.code, None);
        assert!(exit.error.is_none());
    }

    #[tokio::test]
    async fn run_reports_failures() {
        run(OsStr::new("true"), Vec::<&str>::new())
            .await
            .expect("true succeeds");
        let err = run(OsStr::new("sh"), ["-c", "echo broken >&2; exit 1"])
            .await
            .expect_err("command fails");
        assert!(err.to_string().contains("broken"), "{err}");
    }
}
