//! Test doubles for pipebox: an in-memory engine that records every call and
//! a scripted service box.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipebox::engine::{
    AccessCheck, CommitRequest, ContainerEngine, ContainerHandle, ContainerSpec, HostSpec,
    ImageHandle, OutputStream, PullRequest, RegistryAuth, RemoveOptions,
};
use pipebox::{
    BoxError, BoxResult, EngineError, EngineOptions, EngineResult, Environment, PipelineOptions,
    RunContext, ServiceBox, SharedEngine,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

// ============================================================================
// RECORDING ENGINE
// ============================================================================

/// Engine operations, used to target injected failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Create,
    Start,
    Stop,
    Restart,
    RemoveContainer,
    RemoveImage,
    Pull,
    Inspect,
    Commit,
    Export,
    CheckAccess,
    Attach,
}

/// Kind of error an injected failure produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    NotRunning,
    NotFound,
    Api,
}

impl Failure {
    fn to_error(self, id: &str) -> EngineError {
        match self {
            Failure::NotRunning => EngineError::NotRunning(id.to_string()),
            Failure::NotFound => EngineError::NotFound {
                kind: "container",
                id: id.to_string(),
            },
            Failure::Api => EngineError::Api {
                status: 500,
                message: format!("injected failure for {}", id),
            },
        }
    }
}

/// One recorded engine call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCall {
    CreateContainer { name: String, image: String },
    StartContainer { id: String, links: Vec<String> },
    StopContainer(String),
    RestartContainer(String),
    RemoveContainer { id: String, options: RemoveOptions },
    RemoveImage(String),
    PullImage { repository: String, tag: String },
    InspectImage(String),
    CommitContainer { container: String, repository: String, tag: String },
    ExportImage(String),
    CheckAccess { repository: String, registry: String, auth: RegistryAuth },
    AttachInteractive { id: String, cmd: Vec<String>, env: Vec<String> },
}

struct Injected {
    op: Op,
    /// `None` matches every target
    target: Option<String>,
    failure: Failure,
}

#[derive(Default)]
struct State {
    calls: Vec<EngineCall>,
    specs: Vec<ContainerSpec>,
    commits: Vec<CommitRequest>,
    failures: Vec<Injected>,
    access_denied: bool,
    pull_progress: Vec<String>,
    hang_pulls: bool,
    export_bytes: Vec<u8>,
    next_container: usize,
    next_commit: usize,
}

/// In-memory [`ContainerEngine`] that records calls in order.
///
/// Container ids are `ctr-<n>`, committed image ids `img-<n>`, and inspected
/// images get the id `sha256:<reference>`.
#[derive(Default)]
pub struct RecordingEngine {
    state: Mutex<State>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The same engine as a trait object for boxes and services.
    pub fn shared(self: &Arc<Self>) -> SharedEngine {
        self.clone()
    }

    /// Make `op` fail for `target` (any target when `None`).
    pub fn fail(&self, op: Op, target: Option<&str>, failure: Failure) {
        self.state.lock().failures.push(Injected {
            op,
            target: target.map(str::to_string),
            failure,
        });
    }

    pub fn deny_access(&self) {
        self.state.lock().access_denied = true;
    }

    /// Raw progress lines written by every pull.
    pub fn set_pull_progress<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().pull_progress = lines.into_iter().map(Into::into).collect();
    }

    /// Pulls write their progress and then never complete.
    pub fn hang_pulls(&self) {
        self.state.lock().hang_pulls = true;
    }

    pub fn set_export_bytes(&self, bytes: &[u8]) {
        self.state.lock().export_bytes = bytes.to_vec();
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().specs.clone()
    }

    /// Commit requests that reached the engine, in order.
    pub fn commit_requests(&self) -> Vec<CommitRequest> {
        self.state.lock().commits.clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.filter_calls(|call| match call {
            EngineCall::RemoveContainer { id, .. } => Some(id.clone()),
            _ => None,
        })
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.filter_calls(|call| match call {
            EngineCall::RemoveImage(id) => Some(id.clone()),
            _ => None,
        })
    }

    pub fn stopped(&self) -> Vec<String> {
        self.filter_calls(|call| match call {
            EngineCall::StopContainer(id) => Some(id.clone()),
            _ => None,
        })
    }

    pub fn pulls(&self) -> usize {
        self.filter_calls(|call| match call {
            EngineCall::PullImage { .. } => Some(()),
            _ => None,
        })
        .len()
    }

    fn filter_calls<T>(&self, f: impl Fn(&EngineCall) -> Option<T>) -> Vec<T> {
        self.state.lock().calls.iter().filter_map(f).collect()
    }

    /// Record `call`, then return the injected failure for `op`/`target`, if any.
    fn record(&self, call: EngineCall, op: Op, target: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        let injected = state
            .failures
            .iter()
            .find(|f| f.op == op && f.target.as_deref().is_none_or(|t| t == target));
        match injected {
            Some(f) => Err(f.failure.to_error(target)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<ContainerHandle> {
        let call = EngineCall::CreateContainer {
            name: spec.name.clone(),
            image: spec.image.clone(),
        };
        self.record(call, Op::Create, &spec.name)?;

        let mut state = self.state.lock();
        state.specs.push(spec.clone());
        state.next_container += 1;
        Ok(ContainerHandle {
            id: format!("ctr-{}", state.next_container),
            name: spec.name.clone(),
        })
    }

    async fn start_container(&self, id: &str, host: &HostSpec) -> EngineResult<()> {
        let call = EngineCall::StartContainer {
            id: id.to_string(),
            links: host.links.clone(),
        };
        self.record(call, Op::Start, id)
    }

    async fn stop_container(&self, id: &str, _grace_secs: u32) -> EngineResult<()> {
        self.record(EngineCall::StopContainer(id.to_string()), Op::Stop, id)
    }

    async fn restart_container(&self, id: &str, _grace_secs: u32) -> EngineResult<()> {
        self.record(EngineCall::RestartContainer(id.to_string()), Op::Restart, id)
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> EngineResult<()> {
        let call = EngineCall::RemoveContainer {
            id: id.to_string(),
            options,
        };
        self.record(call, Op::RemoveContainer, id)
    }

    async fn remove_image(&self, id: &str) -> EngineResult<()> {
        self.record(EngineCall::RemoveImage(id.to_string()), Op::RemoveImage, id)
    }

    async fn pull_image(
        &self,
        request: &PullRequest,
        _auth: &RegistryAuth,
        progress: OutputStream<'_>,
    ) -> EngineResult<()> {
        let call = EngineCall::PullImage {
            repository: request.repository.clone(),
            tag: request.tag.clone(),
        };
        let target = format!("{}:{}", request.repository, request.tag);
        let outcome = self.record(call, Op::Pull, &target);

        let (lines, hang) = {
            let state = self.state.lock();
            (state.pull_progress.clone(), state.hang_pulls)
        };
        for line in lines {
            progress.write_all(line.as_bytes()).await?;
            progress.write_all(b"\n").await?;
        }
        progress.flush().await?;

        if hang {
            std::future::pending::<()>().await;
        }
        outcome
    }

    async fn inspect_image(&self, reference: &str) -> EngineResult<ImageHandle> {
        self.record(
            EngineCall::InspectImage(reference.to_string()),
            Op::Inspect,
            reference,
        )?;
        let mut image = ImageHandle::new(format!("sha256:{}", reference));
        image.repo_tags = vec![reference.to_string()];
        Ok(image)
    }

    async fn commit_container(&self, request: &CommitRequest) -> EngineResult<ImageHandle> {
        let call = EngineCall::CommitContainer {
            container: request.container.clone(),
            repository: request.repository.clone(),
            tag: request.tag.clone(),
        };
        self.record(call, Op::Commit, &request.container)?;

        let mut state = self.state.lock();
        state.commits.push(request.clone());
        state.next_commit += 1;
        let mut image = ImageHandle::new(format!("img-{}", state.next_commit));
        image.repo_tags = vec![format!("{}:{}", request.repository, request.tag)];
        Ok(image)
    }

    async fn export_image(&self, name: &str, output: OutputStream<'_>) -> EngineResult<()> {
        self.record(EngineCall::ExportImage(name.to_string()), Op::Export, name)?;
        let bytes = self.state.lock().export_bytes.clone();
        output.write_all(&bytes).await?;
        output.flush().await?;
        Ok(())
    }

    async fn check_access(&self, check: &AccessCheck) -> EngineResult<bool> {
        let call = EngineCall::CheckAccess {
            repository: check.repository.clone(),
            registry: check.registry.clone(),
            auth: check.auth.clone(),
        };
        self.record(call, Op::CheckAccess, &check.repository)?;
        Ok(!self.state.lock().access_denied)
    }

    async fn attach_interactive(
        &self,
        id: &str,
        cmd: &[String],
        env: &[String],
    ) -> EngineResult<()> {
        let call = EngineCall::AttachInteractive {
            id: id.to_string(),
            cmd: cmd.to_vec(),
            env: env.to_vec(),
        };
        self.record(call, Op::Attach, id)
    }
}

// ============================================================================
// SCRIPTED SERVICE
// ============================================================================

/// One `run` call observed by a [`ScriptedService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRun {
    pub service: String,
    pub links: Vec<String>,
}

/// Log shared by several scripted services to observe start order.
pub type ServiceLog = Arc<Mutex<Vec<ServiceRun>>>;

/// [`ServiceBox`] that records its runs and succeeds or fails on command.
///
/// A started service gets container `svc-<alias>` named
/// `pipeline-test-<alias>` and links as `pipeline-test-<alias>:<alias>`.
pub struct ScriptedService {
    alias: String,
    name: String,
    fail: bool,
    log: ServiceLog,
    container: Option<ContainerHandle>,
}

impl ScriptedService {
    pub fn new(alias: &str, log: &ServiceLog) -> Self {
        Self {
            alias: alias.to_string(),
            name: format!("{}:latest", alias),
            fail: false,
            log: log.clone(),
            container: None,
        }
    }

    pub fn failing(alias: &str, log: &ServiceLog) -> Self {
        Self {
            fail: true,
            ..Self::new(alias, log)
        }
    }

    /// Service that already owns a container, as after a successful run.
    pub fn started(alias: &str, log: &ServiceLog) -> Self {
        let mut service = Self::new(alias, log);
        service.container = Some(Self::handle(alias));
        service
    }

    fn handle(alias: &str) -> ContainerHandle {
        ContainerHandle {
            id: format!("svc-{}", alias),
            name: format!("pipeline-test-{}", alias),
        }
    }
}

#[async_trait]
impl ServiceBox for ScriptedService {
    fn name(&self) -> &str {
        &self.name
    }

    fn container_id(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.id.as_str())
    }

    fn link(&self) -> Option<String> {
        self.container
            .as_ref()
            .map(|c| format!("{}:{}", c.name, self.alias))
    }

    async fn run(
        &mut self,
        _ctx: &RunContext,
        _env: &Environment,
        links: &[String],
    ) -> BoxResult<ContainerHandle> {
        self.log.lock().push(ServiceRun {
            service: self.alias.clone(),
            links: links.to_vec(),
        });

        if self.fail {
            return Err(BoxError::Engine(EngineError::Api {
                status: 500,
                message: format!("service {} failed to start", self.alias),
            }));
        }

        let handle = Self::handle(&self.alias);
        self.container = Some(handle.clone());
        Ok(handle)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Host working directory with two directories and one plain file.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir(dir.path().join("source")).expect("Failed to create source dir");
        std::fs::create_dir(dir.path().join("cache")).expect("Failed to create cache dir");
        std::fs::write(dir.path().join("pipeline.yml"), "box: ubuntu")
            .expect("Failed to write file");
        Self { dir }
    }

    pub fn pipeline_options(&self, pipeline_id: &str) -> PipelineOptions {
        PipelineOptions::new(pipeline_id, self.dir.path())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine options with a fixed host and no infrastructure mounts.
pub fn engine_options() -> EngineOptions {
    EngineOptions {
        host: "unix:///var/run/docker.sock".to_string(),
        infrastructure_mounts: Vec::new(),
        ..Default::default()
    }
}

pub fn new_log() -> ServiceLog {
    Arc::new(Mutex::new(Vec::new()))
}
