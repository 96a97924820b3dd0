use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::build;
use super::service::{ExitState, ProcessHandle, ServiceSpec};
use crate::platform::{self, SignalOutcome, StopSignal};
use crate::ui::logs::{LogLine, LogSink, Stream};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("working directory {} does not exist", .path.display())]
    MissingDirectory { path: PathBuf },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn build `{command}`: {source}")]
    BuildSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build `{command}` failed ({})", describe_code(.code))]
    BuildFailed { command: String, code: Option<i32> },

    #[error("build `{command}` timed out after {}", describe_duration(.timeout))]
    BuildTimedOut { command: String, timeout: Duration },

    #[error("{} is a development build (found {})", .path.display(), .markers.join(", "))]
    DevArtifact { path: PathBuf, markers: Vec<String> },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "killed by signal".to_string(),
    }
}

fn describe_duration(d: &Duration) -> String {
    humantime::format_duration(*d).to_string()
}

/// Spawn boundary. The controller only talks to processes through this.
pub trait ProcessLauncher: Send + Sync {
    /// Start the service's process. The port is assumed to be free.
    fn launch(
        &self,
        spec: &ServiceSpec,
    ) -> impl Future<Output = Result<ProcessHandle, LaunchError>> + Send;

    /// Ask a launched process (and its group) to exit.
    fn interrupt(&self, handle: &ProcessHandle) -> impl Future<Output = SignalOutcome> + Send;
}

pub struct SystemLauncher {
    sink: LogSink,
    tracker: TaskTracker,
    signal_timeout: Duration,
}

impl SystemLauncher {
    pub fn new(sink: LogSink, tracker: TaskTracker, signal_timeout: Duration) -> Self {
        Self {
            sink,
            tracker,
            signal_timeout,
        }
    }
}

impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, spec: &ServiceSpec) -> Result<ProcessHandle, LaunchError> {
        if !spec.working_dir.is_dir() {
            return Err(LaunchError::MissingDirectory {
                path: spec.working_dir.clone(),
            });
        }

        if let Some(build_config) = &spec.build {
            build::run_build(spec, build_config, &self.sink, &self.tracker).await?;
        }

        let mut cmd = platform::shell_command(&spec.command);
        cmd.current_dir(&spec.working_dir)
            .envs(&spec.env)
            .env("PORT", spec.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        let spawn_error = |source| LaunchError::Spawn {
            command: spec.command.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error(std::io::Error::other("exited before its pid was known")))?;

        forward_output(&mut child, &spec.name, &self.sink, &self.tracker);
        let (tx, rx) = watch::channel(None);
        self.tracker.spawn(monitor(child, tx, spec.name.clone()));

        info!(
            service = %spec.name,
            pid,
            port = spec.port,
            shell = %platform::shell_name(),
            "spawned"
        );
        Ok(ProcessHandle::new(pid, rx))
    }

    async fn interrupt(&self, handle: &ProcessHandle) -> SignalOutcome {
        platform::signal_group(handle.pid(), StopSignal::Graceful, self.signal_timeout).await
    }
}

/// Owns the child until it exits, then publishes how it ended.
async fn monitor(mut child: Child, tx: watch::Sender<Option<ExitState>>, service: String) {
    let state = match child.wait().await {
        Ok(status) => ExitState::Exited(status.code()),
        Err(e) => ExitState::WaitFailed(e.to_string()),
    };
    debug!(service = %service, %state, "monitor observed exit");
    let _ = tx.send(Some(state));
}

/// Pipe the child's stdout and stderr into the log sink, one line at a time.
pub(crate) fn forward_output(child: &mut Child, source: &str, sink: &LogSink, tracker: &TaskTracker) {
    if let Some(stdout) = child.stdout.take() {
        tracker.spawn(pipe_lines(stdout, source.to_string(), Stream::Stdout, sink.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tracker.spawn(pipe_lines(stderr, source.to_string(), Stream::Stderr, sink.clone()));
    }
}

async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, source: String, stream: Stream, sink: LogSink) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut sink_open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Keep draining after the sink closes so the child never
                // blocks on a full pipe.
                if !sink_open {
                    continue;
                }
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\r', '\n']);
                if sink.send(LogLine::new(&source, stream, text)).await.is_err() {
                    sink_open = false;
                }
            }
            Err(e) => {
                debug!(source = %source, error = %e, "output pipe closed");
                break;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_commands;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn spec(dir: &TempDir, command: &str) -> ServiceSpec {
        ServiceSpec {
            name: "backend".into(),
            port: 5050,
            command: command.into(),
            working_dir: dir.path().to_path_buf(),
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            build: None,
        }
    }

    fn launcher() -> (SystemLauncher, tokio::sync::mpsc::Receiver<LogLine>) {
        let (tx, rx) = crate::ui::logs::channel();
        (
            SystemLauncher::new(tx, TaskTracker::new(), Duration::from_secs(2)),
            rx,
        )
    }

    #[test]
    fn error_messages() {
        let e = LaunchError::BuildFailed {
            command: "npm run build".into(),
            code: Some(2),
        };
        assert_eq!(e.to_string(), "build `npm run build` failed (exit code 2)");
        let e = LaunchError::BuildTimedOut {
            command: "npm run build".into(),
            timeout: Duration::from_secs(1200),
        };
        assert_eq!(e.to_string(), "build `npm run build` timed out after 20m");
        let e = LaunchError::DevArtifact {
            path: PathBuf::from("dist/index.html"),
            markers: vec!["@vite/client".into(), "/src/".into()],
        };
        assert_eq!(
            e.to_string(),
            "dist/index.html is a development build (found @vite/client, /src/)"
        );
    }

    #[tokio::test]
    async fn missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut s = spec(&dir, "true");
        s.working_dir = dir.path().join("nope");
        let (l, _rx) = launcher();
        let err = l.launch(&s).await.unwrap_err();
        assert!(matches!(err, LaunchError::MissingDirectory { .. }));
    }

    #[tokio::test]
    async fn output_is_forwarded_with_source() {
        let dir = TempDir::new().unwrap();
        let (l, mut rx) = launcher();
        let mut handle = l
            .launch(&spec(&dir, test_commands::echo_two_lines()))
            .await
            .unwrap();
        assert!(handle.wait_exit(Duration::from_secs(10)).await);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.source, "backend");
        assert_eq!(first.text, "hello");
        assert_eq!(second.text, "world");
        assert_eq!(first.stream, Stream::Stdout);
    }

    #[tokio::test]
    async fn stderr_is_tagged() {
        let dir = TempDir::new().unwrap();
        let (l, mut rx) = launcher();
        let mut handle = l.launch(&spec(&dir, test_commands::echo_stderr())).await.unwrap();
        assert!(handle.wait_exit(Duration::from_secs(10)).await);
        let line = rx.recv().await.unwrap();
        assert_eq!(line.stream, Stream::Stderr);
        assert_eq!(line.text, "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn port_and_env_are_injected() {
        let dir = TempDir::new().unwrap();
        let (l, mut rx) = launcher();
        let mut handle = l
            .launch(&spec(&dir, "echo \"$PORT $GREETING\""))
            .await
            .unwrap();
        assert!(handle.wait_exit(Duration::from_secs(10)).await);
        assert_eq!(rx.recv().await.unwrap().text, "5050 hi");
    }

    #[tokio::test]
    async fn exit_code_is_published() {
        let dir = TempDir::new().unwrap();
        let (l, _rx) = launcher();
        let mut handle = l.launch(&spec(&dir, test_commands::exit_failure())).await.unwrap();
        assert!(handle.wait_exit(Duration::from_secs(10)).await);
        assert_eq!(handle.exit_state(), Some(ExitState::Exited(Some(3))));
    }

    #[cfg(unix)]
    fn gated(dir: &TempDir, html: &str) -> ServiceSpec {
        use crate::config::model::{BuildConfig, DEFAULT_DEV_MARKERS};
        let mut s = spec(dir, "touch served");
        s.build = Some(BuildConfig {
            command: format!("mkdir -p dist && printf '%s' '{}' > dist/index.html", html),
            output_dir: "dist".into(),
            entry: "index.html".into(),
            dev_markers: DEFAULT_DEV_MARKERS.iter().map(|m| m.to_string()).collect(),
            timeout: Duration::from_secs(30),
            env: BTreeMap::new(),
        });
        s
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dev_build_blocks_the_launch() {
        let dir = TempDir::new().unwrap();
        let (l, _rx) = launcher();
        let html = r#"<script type="module" src="/@vite/client"></script>"#;
        let err = l.launch(&gated(&dir, html)).await.unwrap_err();
        assert!(matches!(err, LaunchError::DevArtifact { .. }), "{:?}", err);
        assert!(dir.path().join("dist/index.html").exists());
        assert!(!dir.path().join("served").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn production_build_is_served() {
        let dir = TempDir::new().unwrap();
        let (l, _rx) = launcher();
        let html = r#"<script type="module" src="/assets/index-3f9a.js"></script>"#;
        let mut handle = l.launch(&gated(&dir, html)).await.unwrap();
        assert!(handle.wait_exit(Duration::from_secs(10)).await);
        assert!(dir.path().join("served").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_stops_the_group() {
        let dir = TempDir::new().unwrap();
        let (l, _rx) = launcher();
        let mut handle = l.launch(&spec(&dir, "sleep 30")).await.unwrap();
        assert!(handle.is_running());
        assert_eq!(l.interrupt(&handle).await, SignalOutcome::Sent);
        assert!(handle.wait_exit(Duration::from_secs(5)).await);
    }
}
