//! One long-running sandbox container per conversation.
//!
//! A `session_key` (the owning thread id, as a string) maps to exactly one
//! Docker container for the lifetime of that conversation. `exec` snapshots
//! the container's artifact-staging directory before and after running
//! user code, then hands any new files to the [`cx_artifacts::ArtifactRegistry`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use cx_artifacts::ArtifactRegistry;
use cx_domain::config::{SandboxConfig, SessionStorage};
use cx_domain::error::{Error, Result};

/// Path inside every session container where code execution output is
/// expected to be staged for ingestion.
const CONTAINER_ARTIFACTS_DIR: &str = "/session/artifacts";

struct SessionHandle {
    container_id: String,
    /// Host-side directory bind-mounted to `CONTAINER_ARTIFACTS_DIR`.
    host_artifacts_dir: PathBuf,
}

pub struct ExecResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub artifacts: Vec<cx_artifacts::IngestDescriptor>,
}

pub struct SessionManager {
    docker: Docker,
    config: SandboxConfig,
    /// Host directory under which each session gets its own staging
    /// subdirectory, named after its session key.
    staging_root: PathBuf,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(docker: Docker, config: SandboxConfig, staging_root: PathBuf) -> Self {
        Self {
            docker,
            config,
            staging_root,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn connect_local(config: SandboxConfig, staging_root: PathBuf) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Sandbox(format!("docker connect failed: {e}")))?;
        Ok(Self::new(docker, config, staging_root))
    }

    /// Idempotent: returns the existing container for `session_key` if it's
    /// still running, otherwise creates and starts a fresh one.
    pub async fn start(&self, session_key: &str) -> Result<String> {
        let mut sessions = self.sessions.lock().await;

        if let Some(handle) = sessions.get(session_key) {
            if self.is_running(&handle.container_id).await {
                return Ok(session_key.to_string());
            }
            tracing::warn!(session_key, "existing sandbox container is unhealthy, recreating");
            sessions.remove(session_key);
        }

        let handle = self.create_container(session_key).await?;
        sessions.insert(session_key.to_string(), handle);
        Ok(session_key.to_string())
    }

    async fn is_running(&self, container_id: &str) -> bool {
        match self.docker.inspect_container(container_id, None).await {
            Ok(inspect) => inspect
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn create_container(&self, session_key: &str) -> Result<SessionHandle> {
        let host_artifacts_dir = self.staging_root.join(session_key).join("artifacts");
        tokio::fs::create_dir_all(&host_artifacts_dir)
            .await
            .map_err(Error::Io)?;

        let mut binds = vec![format!(
            "{}:{}:rw",
            host_artifacts_dir.display(),
            CONTAINER_ARTIFACTS_DIR
        )];
        if let Some(ref heavy_data) = self.config.hybrid_local_path {
            binds.push(format!("{}:/heavy_data:ro", heavy_data.display()));
        }

        let tmpfs = match self.config.storage {
            SessionStorage::Ephemeral => {
                let mut m = HashMap::new();
                m.insert(
                    "/session/workdir".to_string(),
                    format!("size={}m", self.config.tmpfs_size_mb),
                );
                Some(m)
            }
            SessionStorage::Persistent => None,
        };

        let host_config = HostConfig {
            binds: Some(binds),
            tmpfs,
            network_mode: self.config.network.clone(),
            ..Default::default()
        };

        let container_name = format!("{}{}", self.config.container_prefix, session_key);
        let options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };
        let config = ContainerConfig {
            image: Some(self.config.image.clone()),
            tty: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::Sandbox(format!("create container failed: {e}")))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| Error::Sandbox(format!("start container failed: {e}")))?;

        tracing::info!(session_key, container_id = %created.id, "sandbox container started");

        Ok(SessionHandle {
            container_id: created.id,
            host_artifacts_dir,
        })
    }

    /// Executes `code` inside the session's container, capped at `timeout`,
    /// then ingests any new files found in the artifact-staging directory.
    #[allow(clippy::too_many_arguments)]
    pub async fn exec(
        &self,
        session_key: &str,
        code: &str,
        timeout: std::time::Duration,
        registry: &ArtifactRegistry,
        thread_id: Uuid,
        run_id: &str,
        tool_call_id: &str,
    ) -> Result<ExecResult> {
        self.start(session_key).await?;

        let (container_id, host_artifacts_dir) = {
            let sessions = self.sessions.lock().await;
            let handle = sessions.get(session_key).ok_or_else(|| {
                Error::Sandbox(format!("session '{session_key}' vanished after start"))
            })?;
            (handle.container_id.clone(), handle.host_artifacts_dir.clone())
        };

        let before = list_files(&host_artifacts_dir).await;

        let run = self.run_exec(&container_id, code);
        let (ok, stdout, stderr, error) = match tokio::time::timeout(timeout, run).await {
            Ok(Ok((stdout, stderr))) => (true, stdout, stderr, None),
            Ok(Err(e)) => (false, String::new(), String::new(), Some(e.to_string())),
            Err(_) => (
                false,
                String::new(),
                String::new(),
                Some(format!("execution timed out after {}s", timeout.as_secs())),
            ),
        };

        let after = list_files(&host_artifacts_dir).await;
        let new_files: Vec<PathBuf> = after.difference(&before).cloned().collect();

        let artifacts = if new_files.is_empty() {
            Vec::new()
        } else {
            registry
                .ingest(thread_id, session_key, run_id, tool_call_id, &new_files)
                .await
        };

        Ok(ExecResult {
            ok,
            stdout,
            stderr,
            error,
            artifacts,
        })
    }

    async fn run_exec(&self, container_id: &str, code: &str) -> Result<(String, String)> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec!["python3".to_string(), "-c".to_string(), code.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Sandbox(format!("create exec failed: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::Sandbox(format!("start exec failed: {e}")))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(Error::Sandbox(format!("exec stream error: {e}"))),
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        Ok((stdout, stderr))
    }

    pub async fn stop(&self, session_key: &str) -> Result<()> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(session_key)
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        self.docker
            .stop_container(&handle.container_id, None::<StopContainerOptions>)
            .await
            .map_err(|e| Error::Sandbox(format!("stop container failed: {e}")))?;
        self.docker
            .remove_container(
                &handle.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::Sandbox(format!("remove container failed: {e}")))?;

        tracing::info!(session_key, "sandbox container stopped");
        Ok(())
    }

    /// The Docker container id backing `session_key`, if a session is live.
    /// Used by dataset-staging helpers that need to write into the
    /// container's filesystem directly.
    pub async fn container_for(&self, session_key: &str) -> Option<String> {
        self.sessions
            .lock()
            .await
            .get(session_key)
            .map(|h| h.container_id.clone())
    }
}

async fn list_files(dir: &std::path::Path) -> HashSet<PathBuf> {
    let mut out = HashSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return out,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().is_file() {
            out.insert(entry.path());
        } else if let Ok(meta) = entry.metadata().await {
            if meta.is_file() {
                out.insert(entry.path());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_files_ignores_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hi").await.unwrap();
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let files = list_files(dir.path()).await;
        assert_eq!(files.len(), 1);
        assert!(files.contains(&dir.path().join("a.txt")));
    }

    #[tokio::test]
    async fn list_files_on_missing_dir_is_empty() {
        let files = list_files(std::path::Path::new("/nonexistent/path/for/test")).await;
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn exec_diff_detects_only_new_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("existing.txt"), b"old").await.unwrap();
        let before = list_files(dir.path()).await;

        tokio::fs::write(dir.path().join("new.txt"), b"new").await.unwrap();
        let after = list_files(dir.path()).await;

        let new_files: Vec<PathBuf> = after.difference(&before).cloned().collect();
        assert_eq!(new_files, vec![dir.path().join("new.txt")]);
    }
}
