//! Docker-backed container engine.
//!
//! Talks to the Docker API through `bollard`. Registry access checks go
//! through the OCI distribution client so they work against any registry,
//! not only the one the engine is logged into.

use std::collections::HashMap;
use std::pin::pin;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::{HostConfig, PortBinding as DockerPortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use oci_client::errors::OciDistributionError;
use oci_client::secrets::RegistryAuth as OciAuth;
use oci_client::{Reference, RegistryOperation};
use pipebox_shared::constants::{engine as const_engine, registry as const_registry};
use pipebox_shared::{EngineError, EngineResult};
use tokio::io::AsyncWriteExt;

use super::{
    AccessCheck, CommitRequest, ContainerEngine, ContainerHandle, ContainerSpec, HostSpec,
    ImageHandle, OutputStream, PullRequest, RegistryAuth, RemoveOptions, qualified_repository,
};
use crate::runtime::options::EngineOptions;

/// [`ContainerEngine`] over a Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    /// Registry client for access checks (stateless between calls)
    registry: oci_client::Client,
}

impl std::fmt::Debug for DockerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerEngine").finish()
    }
}

impl DockerEngine {
    /// Connect to the engine named by `options.host`.
    ///
    /// `unix://` hosts connect over the socket, `tcp://` and `http://` hosts
    /// over plain HTTP. Any other scheme is rejected.
    pub fn connect(options: &EngineOptions) -> EngineResult<Self> {
        let host = options.host.as_str();
        let timeout = const_engine::CONNECT_TIMEOUT_SECS;

        let docker = if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(path, timeout, API_DEFAULT_VERSION)
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION)
        } else {
            return Err(EngineError::Transport(format!(
                "unsupported engine host scheme in '{}'",
                host
            )));
        }
        .map_err(|e| EngineError::Transport(format!("connect to {}: {}", host, e)))?;

        tracing::debug!(host = %host, "Connected to container engine");

        Ok(Self {
            docker,
            registry: oci_client::Client::new(Default::default()),
        })
    }

    fn credentials(auth: &RegistryAuth, registry: &str) -> Option<DockerCredentials> {
        if auth.is_anonymous() {
            return None;
        }
        Some(DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            serveraddress: (!registry.is_empty()).then(|| registry.to_string()),
            ..Default::default()
        })
    }

    fn host_config(host: &HostSpec) -> HostConfig {
        let port_bindings = host
            .port_bindings
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|b| DockerPortBinding {
                        host_ip: b.host_ip.clone(),
                        host_port: Some(b.host_port.clone()),
                    })
                    .collect();
                (port.clone(), Some(bindings))
            })
            .collect::<HashMap<_, _>>();

        HostConfig {
            binds: Some(host.binds.iter().map(ToString::to_string).collect()),
            links: (!host.links.is_empty()).then(|| host.links.clone()),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            dns: (!host.dns.is_empty()).then(|| host.dns.clone()),
            ..Default::default()
        }
    }

    async fn inspect(&self, reference: &str) -> EngineResult<ImageHandle> {
        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| engine_error(e, "image", reference))?;

        let created = inspect
            .created
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(ImageHandle {
            id: inspect.id.unwrap_or_else(|| reference.to_string()),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            created,
            size: inspect.size,
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<ContainerHandle> {
        let exposed_ports = spec
            .exposed_ports
            .iter()
            .map(|port| (port.clone(), HashMap::new()))
            .collect::<HashMap<_, _>>();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            entrypoint: spec.entrypoint.clone(),
            env: Some(spec.env.clone()),
            tty: Some(spec.tty),
            open_stdin: Some(spec.open_stdin),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(Self::host_config(&spec.host)),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| engine_error(e, "container", &spec.name))?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Engine warning on create: {}", warning);
        }

        Ok(ContainerHandle {
            id: response.id,
            name: spec.name.clone(),
        })
    }

    async fn start_container(&self, id: &str, _host: &HostSpec) -> EngineResult<()> {
        // Host configuration was applied at create time
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error(e, "container", id))
    }

    async fn stop_container(&self, id: &str, grace_secs: u32) -> EngineResult<()> {
        let result = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: grace_secs as _ }))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Err(EngineError::NotRunning(id.to_string())),
            Err(e) => Err(engine_error(e, "container", id)),
        }
    }

    async fn restart_container(&self, id: &str, grace_secs: u32) -> EngineResult<()> {
        self.docker
            .restart_container(id, Some(RestartContainerOptions { t: grace_secs as _ }))
            .await
            .map_err(|e| engine_error(e, "container", id))
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> EngineResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: options.remove_volumes,
                    force: options.force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| engine_error(e, "container", id))
    }

    async fn remove_image(&self, id: &str) -> EngineResult<()> {
        self.docker
            .remove_image(id, None::<RemoveImageOptions>, None)
            .await
            .map(|_| ())
            .map_err(|e| engine_error(e, "image", id))
    }

    async fn pull_image(
        &self,
        request: &PullRequest,
        auth: &RegistryAuth,
        progress: OutputStream<'_>,
    ) -> EngineResult<()> {
        let from_image = if request.registry.is_empty() {
            request.repository.clone()
        } else {
            qualified_repository(&request.registry, &request.repository)
        };
        let options = CreateImageOptions {
            from_image,
            tag: request.tag.clone(),
            ..Default::default()
        };
        let credentials = Self::credentials(auth, &request.registry);

        let mut stream = pin!(self.docker.create_image(Some(options), None, credentials));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| engine_error(e, "image", &request.repository))?;
            let mut line = serde_json::to_vec(&info)
                .map_err(|e| EngineError::Stream(format!("encode pull progress: {}", e)))?;
            line.push(b'\n');
            progress.write_all(&line).await?;
        }
        progress.flush().await?;
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> EngineResult<ImageHandle> {
        self.inspect(reference).await
    }

    async fn commit_container(&self, request: &CommitRequest) -> EngineResult<ImageHandle> {
        let options = CommitContainerOptions {
            container: request.container.clone(),
            repo: request.repository.clone(),
            tag: request.tag.clone(),
            comment: request.message.clone(),
            author: request.author.clone(),
            pause: true,
            changes: None,
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| engine_error(e, "container", &request.container))?;

        self.inspect(&format!("{}:{}", request.repository, request.tag))
            .await
    }

    async fn export_image(&self, name: &str, output: OutputStream<'_>) -> EngineResult<()> {
        let mut stream = pin!(self.docker.export_image(name));
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| engine_error(e, "image", name))?;
            output.write_all(&chunk).await?;
        }
        output.flush().await?;
        Ok(())
    }

    async fn check_access(&self, check: &AccessCheck) -> EngineResult<bool> {
        let reference: Reference = qualified_repository(&check.registry, &check.repository)
            .parse()
            .map_err(|e| EngineError::Registry(format!("invalid repository reference: {e}")))?;

        let auth = if check.auth.is_anonymous() {
            OciAuth::Anonymous
        } else {
            OciAuth::Basic(check.auth.username.clone(), check.auth.password.clone())
        };
        let operation = if check.access == const_registry::ACCESS_READ {
            RegistryOperation::Pull
        } else {
            RegistryOperation::Push
        };

        match self.registry.auth(&reference, &auth, operation).await {
            Ok(_) => Ok(true),
            Err(
                OciDistributionError::AuthenticationFailure(_)
                | OciDistributionError::UnauthorizedError { .. },
            ) => Ok(false),
            Err(e) => Err(EngineError::Registry(e.to_string())),
        }
    }

    async fn attach_interactive(
        &self,
        id: &str,
        cmd: &[String],
        env: &[String],
    ) -> EngineResult<()> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| engine_error(e, "container", id))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| engine_error(e, "container", id))?;

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = started
        else {
            return Ok(());
        };

        for line in env {
            input.write_all(line.as_bytes()).await?;
            input.write_all(b"\n").await?;
        }
        input.flush().await?;

        let stdin_pump = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            if let Err(e) = tokio::io::copy(&mut stdin, &mut input).await {
                tracing::debug!("Interactive stdin closed: {}", e);
            }
        });

        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = output.next().await {
            let chunk = chunk.map_err(|e| engine_error(e, "container", id))?;
            stdout.write_all(&chunk.into_bytes()).await?;
            stdout.flush().await?;
        }

        stdin_pump.abort();
        Ok(())
    }
}

/// Classify a Docker API error.
fn engine_error(err: DockerError, kind: &'static str, id: &str) -> EngineError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            kind,
            id: id.to_string(),
        },
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            status: status_code,
            message,
        },
        DockerError::DockerStreamError { error } => EngineError::Stream(error),
        other => EngineError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::port_bindings;
    use crate::volumes::BindMount;

    #[test]
    fn test_not_found_classification() {
        let err = engine_error(
            DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such container: abc".into(),
            },
            "container",
            "abc",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_server_error_keeps_status_and_message() {
        let err = engine_error(
            DockerError::DockerResponseServerError {
                status_code: 409,
                message: "conflict".into(),
            },
            "container",
            "abc",
        );
        match err {
            EngineError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "conflict");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_stream_error_classification() {
        let err = engine_error(
            DockerError::DockerStreamError {
                error: "manifest unknown".into(),
            },
            "image",
            "busybox",
        );
        assert!(matches!(err, EngineError::Stream(ref m) if m == "manifest unknown"));
    }

    #[test]
    fn test_host_config_translation() {
        let host = HostSpec {
            binds: vec![BindMount::passthrough("/var/run/docker.sock")],
            links: vec!["pipeline-1-redis:redis".into()],
            port_bindings: port_bindings(&["10.0.0.1:8080:80".to_string()]),
            dns: vec!["8.8.8.8".into()],
        };
        let config = DockerEngine::host_config(&host);

        assert_eq!(
            config.binds,
            Some(vec!["/var/run/docker.sock:/var/run/docker.sock".to_string()])
        );
        assert_eq!(config.links, Some(vec!["pipeline-1-redis:redis".to_string()]));
        assert_eq!(config.dns, Some(vec!["8.8.8.8".to_string()]));

        let ports = config.port_bindings.unwrap();
        let binding = ports["80/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn test_empty_host_config_leaves_optional_fields_unset() {
        let config = DockerEngine::host_config(&HostSpec::default());
        assert_eq!(config.links, None);
        assert_eq!(config.dns, None);
        assert!(config.port_bindings.is_none());
    }

    #[test]
    fn test_connect_rejects_unhandled_schemes() {
        for host in ["https://remote.example.com:2376", "ssh://ci@build-host"] {
            let options = EngineOptions {
                host: host.into(),
                ..Default::default()
            };
            match DockerEngine::connect(&options) {
                Err(EngineError::Transport(message)) => {
                    assert!(message.contains("unsupported"), "{message}");
                    assert!(message.contains(host), "{message}");
                }
                other => panic!("expected a transport error for {host}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_anonymous_auth_sends_no_credentials() {
        assert!(DockerEngine::credentials(&RegistryAuth::default(), "").is_none());

        let auth = RegistryAuth {
            username: "ci".into(),
            password: "token".into(),
        };
        let creds = DockerEngine::credentials(&auth, "quay.io").unwrap();
        assert_eq!(creds.username.as_deref(), Some("ci"));
        assert_eq!(creds.serveraddress.as_deref(), Some("quay.io"));
    }
}
