use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, LogOutput, LogsOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;

use crate::catalog::LanguageSpec;
use crate::config::Settings;
use crate::error::ExecError;
use crate::executor::{ExecutionBackend, ExecutionRequest, ExecutionResult};
use crate::sandbox::{provision, Sandbox};

/// Grace period between SIGTERM and SIGKILL when a deadline fires.
const STOP_GRACE_SECS: i64 = 2;

/// Marker appended to a stream that hit the output cap.
const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Container-backed execution. Owns the full sandbox lifecycle: provision,
/// wait under the composed deadline, OOM inspection, log capture, teardown.
pub struct DockerExecutor {
    docker: Docker,
    settings: Settings,
}

impl DockerExecutor {
    pub fn new(docker: Docker, settings: Settings) -> Self {
        Self { docker, settings }
    }

    /// Wait for the workload and gather its outcome.
    ///
    /// Cleanup is not performed here; the caller tears the sandbox down on
    /// every path, this function included erroring out.
    async fn supervise(
        &self,
        sandbox: &Sandbox,
        deadline: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let mut wait_stream = self
            .docker
            .wait_container(&sandbox.container_id, None::<WaitContainerOptions<String>>);

        let (exit_code, timed_out) = match tokio::time::timeout(deadline, wait_stream.next()).await
        {
            Ok(Some(Ok(status))) => (status.status_code, false),
            // The engine reports a nonzero workload exit through the wait
            // error channel; it is still a natural termination.
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                (code, false)
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => (-1, false),
            Err(_) => {
                log::info!(
                    "container {} exceeded its {}s deadline, stopping",
                    sandbox.container_id,
                    deadline.as_secs()
                );
                let options = StopContainerOptions { t: STOP_GRACE_SECS };
                if let Err(e) = self
                    .docker
                    .stop_container(&sandbox.container_id, Some(options))
                    .await
                {
                    log::warn!(
                        "failed to stop timed-out container {}: {}",
                        sandbox.container_id,
                        e
                    );
                }
                (-1, true)
            }
        };

        let elapsed_ms = sandbox.started_at.elapsed().as_millis() as u64;

        let oom_killed = match self
            .docker
            .inspect_container(&sandbox.container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect
                .state
                .as_ref()
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                log::warn!(
                    "failed to inspect container {}: {}",
                    sandbox.container_id,
                    e
                );
                false
            }
        };

        let (stdout, stderr) = self.collect_logs(&sandbox.container_id).await?;

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code,
            oom_killed,
            timed_out,
            elapsed_ms,
        })
    }

    /// Demultiplex the container's log stream into separate stdout and
    /// stderr buffers, each capped at `MAX_OUTPUT_BYTES`.
    async fn collect_logs(&self, container_id: &str) -> Result<(String, String), ExecError> {
        let cap = self.settings.max_output_bytes;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_truncated = false;
        let mut stderr_truncated = false;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdOut { message } => {
                    append_capped(&mut stdout, &message, cap, &mut stdout_truncated)
                }
                LogOutput::StdErr { message } => {
                    append_capped(&mut stderr, &message, cap, &mut stderr_truncated)
                }
                _ => {}
            }
        }

        Ok((
            finish_stream(stdout, stdout_truncated),
            finish_stream(stderr, stderr_truncated),
        ))
    }
}

#[async_trait]
impl ExecutionBackend for DockerExecutor {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        spec: &LanguageSpec,
        permit: OwnedSemaphorePermit,
    ) -> Result<ExecutionResult, ExecError> {
        let deadline = self.settings.effective_timeout(request.timeout);
        let sandbox = provision(&self.docker, &self.settings, spec, request, permit).await?;

        log::debug!(
            "supervising container {} for {} (deadline {}s)",
            sandbox.container_id,
            spec.tag,
            deadline.as_secs()
        );

        let outcome = self.supervise(&sandbox, deadline).await;
        sandbox.destroy().await;
        outcome
    }
}

fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize, truncated: &mut bool) {
    if *truncated {
        return;
    }
    let remaining = cap.saturating_sub(buf.len());
    if chunk.len() <= remaining {
        buf.extend_from_slice(chunk);
    } else {
        buf.extend_from_slice(&chunk[..remaining]);
        *truncated = true;
    }
}

fn finish_stream(buf: Vec<u8>, truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_capped_under_limit() {
        let mut buf = Vec::new();
        let mut truncated = false;
        append_capped(&mut buf, b"hello\n", 64, &mut truncated);
        append_capped(&mut buf, b"world\n", 64, &mut truncated);
        assert_eq!(buf, b"hello\nworld\n");
        assert!(!truncated);
    }

    #[test]
    fn test_append_capped_cuts_at_limit() {
        let mut buf = Vec::new();
        let mut truncated = false;
        append_capped(&mut buf, b"0123456789", 4, &mut truncated);
        assert_eq!(buf, b"0123");
        assert!(truncated);

        // Further chunks are discarded once truncated.
        append_capped(&mut buf, b"more", 4, &mut truncated);
        assert_eq!(buf, b"0123");
    }

    #[test]
    fn test_finish_stream_marks_truncation() {
        assert_eq!(finish_stream(b"ok".to_vec(), false), "ok");
        let marked = finish_stream(b"partial".to_vec(), true);
        assert!(marked.starts_with("partial"));
        assert!(marked.ends_with("[output truncated]"));
    }

    #[test]
    fn test_streams_capped_independently() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut out_trunc = false;
        let mut err_trunc = false;
        append_capped(&mut stdout, &[b'a'; 10], 4, &mut out_trunc);
        append_capped(&mut stderr, b"err", 4, &mut err_trunc);
        assert!(out_trunc);
        assert!(!err_trunc);
        assert_eq!(stderr, b"err");
    }
}

// Lifecycle tests against a live engine. Each probes for the engine and the
// required executor image and skips when either is missing.
#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::admission::ConcurrencyGate;
    use crate::catalog::Catalog;
    use crate::config::Settings;

    async fn engine_with_image(image: &str) -> Option<Docker> {
        let docker = Docker::connect_with_local_defaults().ok()?;
        docker.ping().await.ok()?;
        docker.inspect_image(image).await.ok()?;
        Some(docker)
    }

    fn python_request(code: &str, stdin: Option<&str>, timeout: Option<u64>) -> ExecutionRequest {
        ExecutionRequest {
            language: "python".to_string(),
            code: code.to_string(),
            stdin: stdin.map(str::to_string),
            timeout,
        }
    }

    async fn run_python(
        docker: Docker,
        request: ExecutionRequest,
    ) -> (ExecutionResult, ConcurrencyGate) {
        let executor = DockerExecutor::new(docker, Settings::default());
        let catalog = Catalog::new();
        let spec = catalog.lookup("python").unwrap();
        let gate = ConcurrencyGate::new(1);
        let permit = gate.try_acquire().unwrap();
        let result = executor.execute(&request, spec, permit).await.unwrap();
        (result, gate)
    }

    #[tokio::test]
    async fn test_clean_run_captures_stdout() {
        let docker = match engine_with_image("python-executor").await {
            Some(docker) => docker,
            None => {
                println!("engine or python-executor image unavailable, skipping");
                return;
            }
        };
        let (result, gate) = run_python(docker, python_request("print('hello')", None, None)).await;
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert!(!result.oom_killed);
        assert!(result.elapsed_ms > 0);
        // Teardown released the permit.
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_stdin_reaches_the_workload() {
        let docker = match engine_with_image("python-executor").await {
            Some(docker) => docker,
            None => {
                println!("engine or python-executor image unavailable, skipping");
                return;
            }
        };
        let (result, _gate) =
            run_python(docker, python_request("print(input())", Some("abc"), None)).await;
        assert_eq!(result.stdout, "abc\n");
    }

    #[tokio::test]
    async fn test_streams_are_separated() {
        let docker = match engine_with_image("python-executor").await {
            Some(docker) => docker,
            None => {
                println!("engine or python-executor image unavailable, skipping");
                return;
            }
        };
        let code = "import sys\nprint('out')\nprint('err', file=sys.stderr)";
        let (result, _gate) = run_python(docker, python_request(code, None, None)).await;
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_deadline_terminates_the_workload() {
        let docker = match engine_with_image("python-executor").await {
            Some(docker) => docker,
            None => {
                println!("engine or python-executor image unavailable, skipping");
                return;
            }
        };
        let code = "import time\ntime.sleep(30)";
        let (result, gate) = run_python(docker, python_request(code, None, Some(2))).await;
        assert!(result.timed_out);
        assert!(result.elapsed_ms >= 2000);
        // Deadline plus the stop grace, with slack for engine latency.
        assert!(result.elapsed_ms < 10_000);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_oom_kill_is_detected() {
        let docker = match engine_with_image("python-executor").await {
            Some(docker) => docker,
            None => {
                println!("engine or python-executor image unavailable, skipping");
                return;
            }
        };
        let code = "a = [0] * (10 ** 9)";
        let (result, gate) = run_python(docker, python_request(code, None, Some(20))).await;
        assert!(result.oom_killed);
        assert_eq!(gate.available(), 1);
    }
}
