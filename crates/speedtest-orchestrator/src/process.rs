//! Measurement worker running as a child process.
//!
//! The orchestrator spawns the worker binary for clean isolation. Commands
//! are written to its stdin one per line; every line it prints on stdout is
//! forwarded as a status message. stderr is inherited so the worker's own
//! diagnostics end up next to ours.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use speedtest_common::protocol::WorkerCommand;

use crate::worker::{Outbox, Worker, WorkerFactory};

/// Time a terminated worker gets to read commands already queued for it
/// (typically `abort`) before it is killed.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Spawns `program args...` for every test run.
#[derive(Debug, Clone)]
pub struct ProcessWorkerFactory {
    program: String,
    args: Vec<String>,
}

impl ProcessWorkerFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full command line: the first element is the program.
    pub fn from_command_line(parts: &[String]) -> anyhow::Result<Self> {
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty worker command"))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn spawn(&self, outbox: Outbox) -> anyhow::Result<Arc<dyn Worker>> {
        let runtime = tokio::runtime::Handle::try_current()?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to start worker {}: {e}", self.program))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("worker stdout not captured"))?;

        tracing::info!(program = %self.program, pid = ?child.id(), "measurement worker spawned");

        let (commands, rx) = mpsc::unbounded_channel();
        let writer = runtime.spawn(write_commands(stdin, rx));
        let reader = runtime.spawn(read_status(stdout, outbox));

        Ok(Arc::new(ProcessWorker {
            commands,
            running: Mutex::new(Some(Running { child, writer })),
            reader,
        }))
    }
}

struct ProcessWorker {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    running: Mutex<Option<Running>>,
    reader: JoinHandle<()>,
}

struct Running {
    child: Child,
    writer: JoinHandle<()>,
}

impl Worker for ProcessWorker {
    fn post(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            tracing::trace!("worker stdin closed, command dropped");
        }
    }

    fn terminate(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running { mut child, mut writer }) = running else {
            return;
        };

        // No status is read after this point.
        self.reader.abort();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            writer.abort();
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "worker already exited");
            }
            return;
        };

        // Let queued commands reach stdin, then kill and reap in the background.
        runtime.spawn(async move {
            if tokio::time::timeout(KILL_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "worker already exited");
            }
            match child.wait().await {
                Ok(status) => tracing::debug!(%status, "measurement worker exited"),
                Err(e) => tracing::warn!(error = %e, "failed to reap measurement worker"),
            }
        });
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn write_commands(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    while let Some(command) = rx.recv().await {
        let mut line = command.encode();
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(error = %e, "worker stdin write failed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::debug!(error = %e, "worker stdin flush failed");
            break;
        }
    }
}

async fn read_status(stdout: ChildStdout, outbox: Outbox) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!("worker stdout closed");
                break;
            }
            Ok(_) => {
                // Garbled output is dropped like any other malformed message.
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line.trim(),
                    Err(e) => {
                        tracing::trace!(error = %e, "dropping non-UTF-8 worker output");
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                if outbox.send(line.to_string()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "worker stdout read failed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    use speedtest_common::models::TestPhase;

    use crate::orchestrator::{Orchestrator, OrchestratorConfig};

    /// A tiny shell worker: reports download on the first status, finished
    /// on the next.
    const SCRIPT: &str = r#"
n=0
while read -r line; do
  case "$line" in
    status)
      n=$((n+1))
      if [ "$n" -eq 1 ]; then
        echo '{"testState":1,"dlStatus":"12.34","dlProgress":0.25,"clientIp":"10.1.2.3"}'
      else
        echo '{"testState":4,"dlStatus":"40.00","testId":"9"}'
      fi
      ;;
    abort) exit 0 ;;
  esac
done
"#;

    fn shell_factory() -> ProcessWorkerFactory {
        ProcessWorkerFactory::new("sh", vec!["-c".into(), SCRIPT.into()])
    }

    #[test]
    fn command_line_needs_a_program() {
        assert!(ProcessWorkerFactory::from_command_line(&[]).is_err());
        let f = ProcessWorkerFactory::from_command_line(&["worker".into(), "--fast".into()])
            .unwrap();
        assert_eq!(f.program, "worker");
        assert_eq!(f.args, ["--fast"]);
    }

    #[tokio::test]
    async fn child_process_worker_drives_a_run() {
        let mut orch = Orchestrator::new(Arc::new(shell_factory()), OrchestratorConfig::default());
        let mut rx = orch.subscribe();
        orch.start().unwrap();

        let run = tokio::time::timeout(
            Duration::from_secs(10),
            rx.wait_for(|run| run.phase.is_terminal()),
        )
        .await
        .expect("worker never finished")
        .unwrap()
        .clone();

        assert_eq!(run.phase, TestPhase::Finished);
        assert_eq!(run.download.value, "40.00");
        assert_eq!(run.client_ip, "10.1.2.3");
        assert_eq!(run.test_id.as_deref(), Some("9"));
        assert_eq!(run.history.len(), 1);
    }

    #[tokio::test]
    async fn non_utf8_output_is_dropped_and_the_run_continues() {
        let script = r#"
n=0
while read -r line; do
  case "$line" in
    status)
      n=$((n+1))
      case "$n" in
        1) printf '\377\376garbled\n' ;;
        2) echo '{"testState":1,"dlStatus":"12.34"}' ;;
        *) echo '{"testState":4,"dlStatus":"40.00"}' ;;
      esac
      ;;
    abort) exit 0 ;;
  esac
done
"#;
        let factory = ProcessWorkerFactory::new("sh", vec!["-c".into(), script.into()]);
        let mut orch = Orchestrator::new(Arc::new(factory), OrchestratorConfig::default());
        let mut rx = orch.subscribe();
        orch.start().unwrap();

        let run = tokio::time::timeout(
            Duration::from_secs(10),
            rx.wait_for(|run| run.phase.is_terminal()),
        )
        .await
        .expect("run stalled after garbled output")
        .unwrap()
        .clone();

        assert_eq!(run.phase, TestPhase::Finished);
        assert_eq!(run.download.value, "40.00");
        assert_eq!(run.history.len(), 1);
    }

    #[tokio::test]
    async fn queued_abort_reaches_the_worker_before_kill() {
        let marker = std::env::temp_dir().join(format!(
            "speedtest-abort-{}-{}",
            std::process::id(),
            speedtest_common::ids::run_id()
        ));
        let script = r#"
while read -r line; do
  case "$line" in
    abort) echo aborted > "$1"; exit 0 ;;
  esac
done
"#;
        let factory = ProcessWorkerFactory::new(
            "sh",
            vec![
                "-c".into(),
                script.into(),
                "sh".into(),
                marker.display().to_string(),
            ],
        );
        let (tx, _rx) = mpsc::channel(8);
        let worker = factory.spawn(tx).unwrap();
        worker.post(WorkerCommand::Abort);
        worker.terminate();

        let mut seen = false;
        for _ in 0..50 {
            if marker.exists() {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = std::fs::remove_file(&marker);
        assert!(seen, "worker never saw the abort command");
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let factory = ProcessWorkerFactory::new("/nonexistent/speedtest-worker", Vec::new());
        let (tx, _rx) = mpsc::channel(1);
        assert!(factory.spawn(tx).is_err());
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let (tx, _rx) = mpsc::channel(8);
        let worker = shell_factory().spawn(tx).unwrap();
        worker.terminate();
        worker.terminate();
        worker.post(WorkerCommand::Status);
    }
}
