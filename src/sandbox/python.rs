//! Python engine: one confined interpreter process per run.
//!
//! Every run goes through a bubblewrap launcher: all namespaces unshared
//! (no network), system directories mounted read-only, no host paths
//! writable and the process killed with its parent. The interpreter itself
//! runs with `-I` (isolated mode), `-B` and unbuffered output. Capability
//! overrides are not applicable here, so the context only relays output.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::engine::{IsolatedContext, LaunchRequest, LiveEngine};
use super::message::{ContextMessage, RelayedKind, RelayedLine};
use crate::error::RunFault;

/// Launcher used when none is configured.
pub const DEFAULT_SANDBOX: &str = "bwrap";

/// Directories mounted read-only next to `/usr` when the host has them.
const SYSTEM_DIRS: &[&str] = &["/lib", "/lib64", "/bin", "/sbin"];

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

pub struct PythonEngine {
    interpreter: String,
    sandbox: String,
}

impl PythonEngine {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            sandbox: DEFAULT_SANDBOX.to_string(),
        }
    }

    pub fn with_sandbox(mut self, launcher: impl Into<String>) -> Self {
        self.sandbox = launcher.into();
        self
    }

    /// Install prefix of an interpreter living outside the system
    /// directories (`/opt/python` for `/opt/python/bin/python3`).
    fn interpreter_prefix(&self) -> Option<&Path> {
        let path = Path::new(&self.interpreter);
        if !path.is_absolute()
            || path.starts_with("/usr")
            || SYSTEM_DIRS.iter().any(|dir| path.starts_with(dir))
        {
            return None;
        }
        path.parent()?.parent().filter(|prefix| *prefix != Path::new("/"))
    }

    /// Confined command running `source`.
    fn command(&self, source: &str) -> Command {
        let mut cmd = Command::new(&self.sandbox);
        cmd.arg("--unshare-all")
            .arg("--die-with-parent")
            .arg("--new-session");

        cmd.arg("--ro-bind").arg("/usr").arg("/usr");
        for dir in SYSTEM_DIRS {
            if Path::new(dir).exists() {
                cmd.arg("--ro-bind").arg(dir).arg(dir);
            }
        }
        if let Some(prefix) = self.interpreter_prefix() {
            cmd.arg("--ro-bind").arg(prefix).arg(prefix);
        }
        cmd.arg("--proc").arg("/proc");
        cmd.arg("--dev").arg("/dev");
        cmd.arg("--remount-ro").arg("/");
        cmd.arg("--chdir").arg("/");

        cmd.arg("--")
            .arg(&self.interpreter)
            .args(["-I", "-B", "-u", "-c"])
            .arg(source);

        cmd.env_clear()
            .env("PATH", SANDBOX_PATH)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LiveEngine for PythonEngine {
    fn language(&self) -> &str {
        "python"
    }

    fn label(&self) -> &str {
        "Python"
    }

    fn accepts_overrides(&self) -> bool {
        false
    }

    async fn launch(&self, request: LaunchRequest) -> Result<IsolatedContext, RunFault> {
        let started = Instant::now();
        let mut child = self.command(&request.source).spawn().map_err(|e| {
            RunFault::EngineUnavailable(format!(
                "Python runs are confined with {}, which could not be started: {e}",
                self.sandbox
            ))
        })?;
        debug!("Python context started under {}", self.sandbox);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunFault::EngineUnavailable("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunFault::EngineUnavailable("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(async move {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let mut lines = Vec::new();
            let (mut out_open, mut err_open) = (true, true);

            while out_open || err_open {
                tokio::select! {
                    line = out.next_line(), if out_open => match line {
                        Ok(Some(text)) if !text.is_empty() => lines.push(RelayedLine::out(text)),
                        Ok(Some(_)) => {}
                        _ => out_open = false,
                    },
                    line = err.next_line(), if err_open => match line {
                        Ok(Some(text)) if !text.is_empty() => lines.push(RelayedLine::err(text)),
                        Ok(Some(_)) => {}
                        _ => err_open = false,
                    },
                }
            }

            let status = child.wait().await;
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => mark_uncaught(&mut lines, &format!("process exited with {status}")),
                Err(e) => mark_uncaught(&mut lines, &format!("wait failed: {e}")),
            }

            let message = ContextMessage::RunComplete {
                output_lines: lines,
                elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
            if tx.send(message.to_json()).is_err() {
                debug!("Python context finished after the host stopped listening");
            }
        });

        Ok(IsolatedContext::new(rx, move || {
            // Aborting drops the child handle, which kills the process.
            relay.abort();
        }))
    }
}

/// Flags a failed run: the last stderr line (the exception summary of a
/// traceback) gets the `Uncaught ` prefix, or a line is appended when the
/// process failed silently.
fn mark_uncaught(lines: &mut Vec<RelayedLine>, fallback: &str) {
    match lines.iter_mut().rev().find(|l| l.kind == RelayedKind::Err) {
        Some(line) => line.text = format!("Uncaught {}", line.text),
        None => {
            warn!("Python process failed without stderr output");
            lines.push(RelayedLine::err(format!("Uncaught {fallback}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whether the launcher and interpreter both work on this host.
    async fn confined_python() -> bool {
        match PythonEngine::new("python3").command("print('ok')").output().await {
            Ok(output) => {
                output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "ok"
            }
            Err(_) => false,
        }
    }

    async fn run(source: &str) -> Vec<RelayedLine> {
        let engine = PythonEngine::new("python3");
        let mut context = engine
            .launch(LaunchRequest {
                source: source.to_string(),
                overrides: None,
            })
            .await
            .unwrap();
        let raw = context.recv().await.unwrap();
        match ContextMessage::parse(&raw) {
            Some(ContextMessage::RunComplete { output_lines, .. }) => output_lines,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_mark_uncaught_prefixes_last_error() {
        let mut lines = vec![
            RelayedLine::err("Traceback (most recent call last):"),
            RelayedLine::out("partial"),
            RelayedLine::err("ValueError: boom"),
        ];
        mark_uncaught(&mut lines, "unused");
        assert_eq!(lines[2].text, "Uncaught ValueError: boom");
        assert_eq!(lines[0].text, "Traceback (most recent call last):");
    }

    #[test]
    fn test_mark_uncaught_appends_when_silent() {
        let mut lines = vec![RelayedLine::out("partial")];
        mark_uncaught(&mut lines, "process exited with exit status: 3");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "Uncaught process exited with exit status: 3");
    }

    #[test]
    fn test_command_is_confined() {
        let engine = PythonEngine::new("python3");
        let cmd = engine.command("print(1)");
        let cmd = cmd.as_std();
        assert_eq!(cmd.get_program(), "bwrap");

        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"--unshare-all".to_string()));
        assert!(args.contains(&"--die-with-parent".to_string()));
        assert!(!args.iter().any(|a| a == "--share-net" || a == "--bind"));
        assert!(args.windows(2).any(|w| w == ["--remount-ro", "/"]));
        assert!(args.windows(3).any(|w| w == ["--ro-bind", "/usr", "/usr"]));
        assert_eq!(
            &args[args.len() - 7..],
            &["--", "python3", "-I", "-B", "-u", "-c", "print(1)"]
        );

        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].0, "PATH");
    }

    #[test]
    fn test_interpreter_prefix_is_mounted_only_outside_system_dirs() {
        assert_eq!(PythonEngine::new("python3").interpreter_prefix(), None);
        assert_eq!(PythonEngine::new("/usr/bin/python3").interpreter_prefix(), None);
        assert_eq!(
            PythonEngine::new("/opt/python/bin/python3").interpreter_prefix(),
            Some(Path::new("/opt/python"))
        );
        assert_eq!(PythonEngine::new("/python3").interpreter_prefix(), None);
    }

    #[tokio::test]
    async fn test_missing_sandbox_is_engine_unavailable() {
        let engine = PythonEngine::new("python3").with_sandbox("/nonexistent/bwrap-for-capshield");
        let result = engine
            .launch(LaunchRequest {
                source: "print(1)".to_string(),
                overrides: None,
            })
            .await;
        assert!(matches!(result, Err(RunFault::EngineUnavailable(_))));
    }

    #[tokio::test]
    async fn test_run_cannot_write_to_host_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("escape.txt");
        let source = format!("open({:?}, 'w').write('x')", target.to_string_lossy());

        let launched = PythonEngine::new("python3")
            .launch(LaunchRequest {
                source,
                overrides: None,
            })
            .await;
        match launched {
            // No launcher on this host: nothing ran at all.
            Err(RunFault::EngineUnavailable(_)) => {}
            Ok(mut context) => {
                let raw = context.recv().await.unwrap();
                match ContextMessage::parse(&raw) {
                    Some(ContextMessage::RunComplete { output_lines, .. }) => {
                        assert!(output_lines.last().unwrap().text.starts_with("Uncaught "));
                    }
                    other => panic!("unexpected message: {other:?}"),
                }
            }
            Err(other) => panic!("unexpected fault: {other:?}"),
        }
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_python_output_and_failure() {
        if !confined_python().await {
            eprintln!("confined python3 not available, skipping");
            return;
        }
        let lines = run("print('hello')\nprint()\nprint(2 ** 10)").await;
        assert_eq!(lines, vec![RelayedLine::out("hello"), RelayedLine::out("1024")]);

        let lines = run("print('before')\nraise ValueError('boom')").await;
        assert_eq!(lines[0], RelayedLine::out("before"));
        assert_eq!(lines.last().unwrap().text, "Uncaught ValueError: boom");
    }

    #[tokio::test]
    async fn test_python_has_no_network() {
        if !confined_python().await {
            eprintln!("confined python3 not available, skipping");
            return;
        }
        let lines = run("import socket\nsocket.create_connection(('1.1.1.1', 53), timeout=2)").await;
        assert!(lines.last().unwrap().text.starts_with("Uncaught OSError"));
    }
}
