use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::catalog::LanguageSpec;
use crate::config::Settings;
use crate::error::ExecError;
use crate::executor::ExecutionRequest;

/// Per-sandbox resource envelope. Fixed by contract, not configuration.
pub const MEMORY_LIMIT_BYTES: i64 = 256 * 1024 * 1024;
pub const NANO_CPUS: i64 = 1_000_000_000; // 1.0 core
pub const PIDS_LIMIT: i64 = 50;

/// The name of the stdin file the shell redirect reads from.
pub const STDIN_FILENAME: &str = "input.txt";

/// A provisioned, running container plus its scratch directory.
///
/// Exclusively owned by one supervision flow. Dropping it without calling
/// [`Sandbox::destroy`] (the handler future was cancelled) detaches a cleanup
/// task that removes the container and scratch directory and only then
/// releases the concurrency permit.
pub struct Sandbox {
    pub container_id: String,
    pub scratch_dir: PathBuf,
    pub started_at: Instant,
    docker: Docker,
    permit: Option<OwnedSemaphorePermit>,
    armed: bool,
}

impl Sandbox {
    fn new(
        docker: Docker,
        container_id: String,
        scratch_dir: PathBuf,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            container_id,
            scratch_dir,
            started_at: Instant::now(),
            docker,
            permit: Some(permit),
            armed: true,
        }
    }

    /// Tear everything down, in order: container removal, scratch directory
    /// removal, permit release. The permit must go last so the global
    /// in-flight count never under-counts live containers.
    pub async fn destroy(mut self) {
        remove_container_and_scratch(&self.docker, &self.container_id, &self.scratch_dir).await;
        self.permit.take();
        self.armed = false;
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let id = std::mem::take(&mut self.container_id);
        let dir = std::mem::take(&mut self.scratch_dir);
        let permit = self.permit.take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                log::warn!("supervision cancelled, reclaiming sandbox {}", id);
                remove_container_and_scratch(&docker, &id, &dir).await;
                drop(permit);
            });
        } else {
            // No runtime to finish async teardown; release what we can.
            let _ = fs::remove_dir_all(&dir);
        }
    }
}

async fn remove_container_and_scratch(docker: &Docker, container_id: &str, scratch_dir: &Path) {
    let options = RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(container_id, Some(options)).await {
        log::warn!("failed to remove container {}: {}", container_id, e);
    }
    if let Err(e) = tokio::fs::remove_dir_all(scratch_dir).await {
        log::warn!(
            "failed to remove scratch dir {}: {}",
            scratch_dir.display(),
            e
        );
    }
}

/// Materialize the per-request filesystem and start the container.
///
/// Each request gets a unique scratch directory; no two sandboxes ever share
/// one. Any failure here releases everything already acquired and surfaces
/// as an internal error.
pub async fn provision(
    docker: &Docker,
    settings: &Settings,
    spec: &LanguageSpec,
    request: &ExecutionRequest,
    permit: OwnedSemaphorePermit,
) -> Result<Sandbox, ExecError> {
    let scratch_dir = settings
        .scratch_root
        .join(format!("execbox-{}", Uuid::new_v4()));
    fs::create_dir_all(&scratch_dir)
        .map_err(|e| ExecError::Provision(format!("scratch directory creation failed: {}", e)))?;

    if let Err(e) = write_workload_files(&scratch_dir, spec, request) {
        let _ = fs::remove_dir_all(&scratch_dir);
        return Err(e);
    }

    let has_stdin = request.stdin.as_deref().map_or(false, |s| !s.is_empty());
    let config = container_config(settings, spec, &scratch_dir, has_stdin);

    let options = CreateContainerOptions {
        name: format!("execbox-{}", Uuid::new_v4()),
        platform: None,
    };
    let created = match docker.create_container(Some(options), config).await {
        Ok(created) => created,
        Err(e) => {
            let _ = fs::remove_dir_all(&scratch_dir);
            return Err(e.into());
        }
    };

    // From here the guard owns cleanup, cancellation included.
    let sandbox = Sandbox::new(docker.clone(), created.id, scratch_dir, permit);

    if let Err(e) = docker
        .start_container::<String>(&sandbox.container_id, None)
        .await
    {
        sandbox.destroy().await;
        return Err(e.into());
    }

    Ok(sandbox)
}

fn write_workload_files(
    scratch_dir: &Path,
    spec: &LanguageSpec,
    request: &ExecutionRequest,
) -> Result<(), ExecError> {
    fs::write(scratch_dir.join(spec.source_filename), &request.code)?;
    if let Some(stdin) = request.stdin.as_deref() {
        if !stdin.is_empty() {
            fs::write(scratch_dir.join(STDIN_FILENAME), stdin)?;
        }
    }
    Ok(())
}

fn container_config(
    settings: &Settings,
    spec: &LanguageSpec,
    scratch_dir: &Path,
    has_stdin: bool,
) -> Config<String> {
    Config {
        image: Some(spec.image_name(&settings.image_prefix)),
        cmd: Some(spec.command(has_stdin)),
        working_dir: Some("/code".to_string()),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            binds: Some(vec![format!("{}:/code", scratch_dir.display())]),
            memory: Some(MEMORY_LIMIT_BYTES),
            nano_cpus: Some(NANO_CPUS),
            pids_limit: Some(PIDS_LIMIT),
            readonly_rootfs: Some(true),
            network_mode: Some("none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
