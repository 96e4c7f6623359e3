//! Supervision of the processes that run alongside NGINX (the WAF plugin, the WAF agent and
//! the DoS agent).
//!
//! Each child is started before NGINX and quit after it, in reverse start order. A child
//! exiting on its own is fatal: the caller watches [`Done`] and shuts the controller down.

use crate::{
    process::{self, Spawned},
    Done, Error, Exit, Result,
};
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug)]
pub struct SupervisedChild {
    name: String,
    command: Vec<String>,
    running: Option<Spawned>,
}

/// Children in start order.
#[derive(Debug, Default)]
pub struct Children(Vec<SupervisedChild>);

// === impl SupervisedChild ===

impl SupervisedChild {
    /// `command` is the program followed by its arguments.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            running: None,
        }
    }

    /// Parses a whitespace-separated command line.
    pub fn from_command_line(name: impl Into<String>, line: &str) -> Self {
        Self::new(name, line.split_whitespace().map(str::to_string).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&mut self) -> Result<Done> {
        if let Some(running) = &self.running {
            return Ok(running.done.clone());
        }
        let Some((program, args)) = self.command.split_first() else {
            return Err(Error::Process(format!("{} has no command", self.name)));
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        let spawned = Spawned::spawn(self.name.clone(), cmd)?;
        let done = spawned.done.clone();
        self.running = Some(spawned);
        Ok(done)
    }

    /// Asks the child to terminate and waits up to `timeout` before killing it.
    pub async fn quit(&mut self, timeout: Duration) -> Option<Exit> {
        let mut running = self.running.take()?;
        if let Some(pid) = running.pid {
            let pid = pid.to_string();
            if let Err(error) = process::run("kill".as_ref(), ["-TERM", pid.as_str()]).await {
                tracing::debug!(name = %self.name, %error, "Failed to signal process");
            }
        }
        let exit = running.wait_or_kill(timeout).await;
        tracing::info!(%exit, "Stopped process");
        Some(exit)
    }
}

// === impl Children ===

impl Children {
    pub fn push(&mut self, child: SupervisedChild) {
        self.0.push(child);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Starts every child in order. Returns their exit notifications.
    pub fn start(&mut self) -> Result<Vec<Done>> {
        self.0.iter_mut().map(SupervisedChild::start).collect()
    }

    /// Quits every running child in reverse start order.
    pub async fn quit(&mut self, timeout: Duration) -> Vec<Exit> {
        let mut exits = Vec::new();
        for child in self.0.iter_mut().rev() {
            if let Some(exit) = child.quit(timeout).await {
                exits.push(exit);
            }
        }
        exits
    }
}

/// Resolves with the first exit among `done`. Never resolves when `done` is empty.
pub async fn first_exit(done: Vec<Done>) -> Exit {
    if done.is_empty() {
        return std::future::pending().await;
    }
    let waits = done.into_iter().map(|mut rx| {
        Box::pin(async move {
            match rx.wait_for(Option::is_some).await {
                Ok(exit) => exit.clone(),
                Err(_) => None,
            }
        })
    });
    let (exit, _, _) = futures::future::select_all(waits).await;
    exit.unwrap_or_else(|| Exit {
        name: "unknown".to_string(),
        code: None,
        error: Some("exit notification lost".to_string()),
    })
}
