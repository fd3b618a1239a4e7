// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Daemon launch.
//!
//! The daemon command runs under `/bin/sh -c` with this process's stdio and
//! environment, plus any variables the bootstrap adds. By default the shell
//! replaces the bootstrap process. In supervised mode it runs as a child
//! instead: termination signals are forwarded to it and its exit code becomes
//! ours.

use std::process::{Command, ExitStatus};

use anyhow::Context;
use tracing::{debug, info};

const SHELL: &str = "/bin/sh";

/// How the daemon is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Replace the current process image.
    Exec,
    /// Run as a child and wait for it.
    Supervise,
}

/// Starts the daemon.
#[derive(Debug, Clone)]
pub struct Launcher {
    command: String,
    env: Vec<(String, String)>,
    mode: LaunchMode,
}

impl Launcher {
    pub fn new(command: impl Into<String>) -> Launcher {
        Launcher {
            command: command.into(),
            env: vec![],
            mode: LaunchMode::Exec,
        }
    }

    /// Adds a variable to the daemon's environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Launcher {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn mode(mut self, mode: LaunchMode) -> Launcher {
        self.mode = mode;
        self
    }

    /// The shell command that will be run.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn extra_env(&self) -> &[(String, String)] {
        &self.env
    }

    fn shell_command(&self) -> Command {
        let mut command = Command::new(SHELL);
        command
            .arg("-c")
            .arg(&self.command)
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        command
    }

    /// Starts the daemon and returns the exit code the bootstrap should exit
    /// with.
    ///
    /// In [`LaunchMode::Exec`] this only returns if the process image could
    /// not be replaced.
    pub async fn launch(self) -> Result<i32, anyhow::Error> {
        match self.mode {
            #[cfg(unix)]
            LaunchMode::Exec => self.exec(),
            #[cfg(not(unix))]
            LaunchMode::Exec => {
                debug!("process replacement unavailable; supervising daemon instead");
                self.supervise().await
            }
            LaunchMode::Supervise => self.supervise().await,
        }
    }

    #[cfg(unix)]
    fn exec(self) -> Result<i32, anyhow::Error> {
        use std::os::unix::process::CommandExt;

        info!(command = %self.command, "handing off to daemon");
        let err = self.shell_command().exec();
        Err(anyhow::Error::new(err).context(format!("executing {SHELL}")))
    }

    async fn supervise(self) -> Result<i32, anyhow::Error> {
        // Handlers must be in place before the child exists, or a signal
        // arriving in between terminates the bootstrap and orphans the daemon.
        #[cfg(unix)]
        let (mut sigterm, mut sigint) = {
            use tokio::signal::unix::{SignalKind, signal};

            (
                signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
                signal(SignalKind::interrupt()).context("installing SIGINT handler")?,
            )
        };

        let mut child = tokio::process::Command::from(self.shell_command())
            .spawn()
            .with_context(|| format!("spawning {SHELL}"))?;
        let pid = child.id();
        info!(command = %self.command, pid, "started daemon");

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            loop {
                tokio::select! {
                    status = child.wait() => {
                        let status = status.context("waiting for daemon")?;
                        return Ok(exit_code(status));
                    }
                    _ = sigterm.recv() => forward(pid, Signal::SIGTERM),
                    _ = sigint.recv() => forward(pid, Signal::SIGINT),
                }
            }
        }

        #[cfg(not(unix))]
        {
            let status = child.wait().await.context("waiting for daemon")?;
            Ok(exit_code(status))
        }
    }
}

#[cfg(unix)]
fn forward(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    debug!(pid, ?signal, "forwarding signal to daemon");
    if let Err(e) = kill(Pid::from_raw(pid), signal) {
        tracing::warn!(pid, ?signal, "forwarding signal to daemon: {e}");
    }
}

/// The code to exit with once the daemon has exited. A daemon killed by a
/// signal maps to 128 plus the signal number, as in a shell.
fn exit_code(status: ExitStatus) -> i32 {
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

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn supervised_exit_code_is_mirrored() {
        let code = Launcher::new("exit 3")
            .mode(LaunchMode::Supervise)
            .launch()
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn extra_env_reaches_daemon() {
        let code = Launcher::new(r#"test "$IP_ADDRESS" = 10.0.0.4"#)
            .env("IP_ADDRESS", "10.0.0.4")
            .mode(LaunchMode::Supervise)
            .launch()
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn signalled_daemon_maps_to_shell_code() {
        let code = Launcher::new("kill -KILL $$")
            .mode(LaunchMode::Supervise)
            .launch()
            .await
            .unwrap();
        assert_eq!(code, 128 + 9);
    }
}
