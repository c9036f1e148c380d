use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

use crate::catalog::LanguageSpec;
use crate::config::Settings;
use crate::error::ExecError;
use crate::fallback::FallbackExecutor;
use crate::supervisor::DockerExecutor;

/// One submission, decoded from the wire and immutable thereafter.
///
/// Unknown fields are rejected at decode time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// What happened inside the sandbox, before classification.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub oom_killed: bool,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// The single execution boundary.
///
/// Two implementations exist: the container-backed [`DockerExecutor`] and the
/// development-only [`FallbackExecutor`]. Which one serves traffic is decided
/// once at startup, never per request.
///
/// The concurrency permit is handed over with the request; the backend must
/// not release it before its sandbox (if any) is fully torn down.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        spec: &LanguageSpec,
        permit: OwnedSemaphorePermit,
    ) -> Result<ExecutionResult, ExecError>;

    /// True only for the degraded, synthetic backend.
    fn degraded(&self) -> bool {
        false
    }
}

/// Pick the backend for this process.
///
/// A reachable container engine wins. Without one, startup either fails hard
/// or, when `FALLBACK_ENABLED=true`, degrades to synthetic execution so the
/// surrounding stack can be developed without an engine.
pub async fn select_backend(
    settings: &Settings,
) -> Result<Arc<dyn ExecutionBackend>, BackendUnavailable> {
    match bollard::Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => {
                log::info!("container engine reachable, using sandboxed execution");
                return Ok(Arc::new(DockerExecutor::new(docker, settings.clone())));
            }
            Err(e) => log::error!("container engine ping failed: {}", e),
        },
        Err(e) => log::error!("container engine connection failed: {}", e),
    }

    if settings.fallback_enabled {
        log::warn!("FALLBACK_ENABLED is set: serving synthetic execution results");
        Ok(Arc::new(FallbackExecutor::new()))
    } else {
        Err(BackendUnavailable)
    }
}

/// No container engine and fallback not permitted.
#[derive(Debug, thiserror::Error)]
#[error("container engine is not reachable and FALLBACK_ENABLED is not set")]
pub struct BackendUnavailable;
