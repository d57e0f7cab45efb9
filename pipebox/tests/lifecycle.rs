//! Integration tests for the box lifecycle (services, run, commit, restart).

use std::sync::Arc;

use std::path::PathBuf;

use pipebox::engine::ContainerSpec;
use pipebox::volumes::{BindMode, BindMount};
use pipebox::{
    BoxConfig, BoxError, EngineOptions, Environment, PipelineBox, RunContext, ServiceBox,
    ServiceContainer,
};
use pipebox_test_utils::{
    EngineCall, Failure, Op, RecordingEngine, ScriptedService, Workspace, engine_options, new_log,
};

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Box over a recording engine and a throwaway workspace.
struct TestBox {
    engine: Arc<RecordingEngine>,
    workspace: Workspace,
}

impl TestBox {
    fn new() -> Self {
        Self {
            engine: RecordingEngine::new(),
            workspace: Workspace::new(),
        }
    }

    fn build(&self, config: BoxConfig) -> PipelineBox {
        self.build_with(config, |_| {})
    }

    fn build_with(
        &self,
        config: BoxConfig,
        tweak: impl FnOnce(&mut pipebox::PipelineOptions),
    ) -> PipelineBox {
        let mut options = self.workspace.pipeline_options("42");
        tweak(&mut options);
        PipelineBox::new(config, options, engine_options(), self.engine.shared())
            .expect("Failed to create box")
    }

    fn build_on(&self, config: BoxConfig, engine_opts: EngineOptions) -> PipelineBox {
        PipelineBox::new(
            config,
            self.workspace.pipeline_options("42"),
            engine_opts,
            self.engine.shared(),
        )
        .expect("Failed to create box")
    }

    fn primary_spec(&self) -> ContainerSpec {
        self.engine
            .created_specs()
            .into_iter()
            .find(|spec| spec.name == "pipeline-42")
            .expect("primary container was not created")
    }
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

#[test]
fn new_resolves_name_and_defaults() {
    let t = TestBox::new();
    let b = t.build(BoxConfig::new("quay.io/acme/builder"));

    assert_eq!(b.name(), "quay.io/acme/builder:latest");
    assert_eq!(b.repository(), "quay.io/acme/builder");
    assert_eq!(b.tag(), "latest");
    assert_eq!(b.short_name(), "builder");
    assert_eq!(b.cmd(), "/bin/bash");
    assert_eq!(b.container_name(), "pipeline-42");
    assert!(b.container_id().is_none());
    assert!(b.link().is_none());
}

#[test]
fn new_rejects_at_sign() {
    let t = TestBox::new();
    let result = PipelineBox::new(
        BoxConfig::new("busybox@sha256:0123"),
        t.workspace.pipeline_options("42"),
        engine_options(),
        t.engine.shared(),
    );
    assert!(matches!(result, Err(BoxError::InvalidIdentifier(_))));
}

#[test]
fn new_rejects_invalid_engine_host() {
    let t = TestBox::new();
    let mut engine_opts = engine_options();
    engine_opts.host = "ftp://engine".into();
    let result = PipelineBox::new(
        BoxConfig::new("ubuntu"),
        t.workspace.pipeline_options("42"),
        engine_opts,
        t.engine.shared(),
    );
    assert!(matches!(result, Err(BoxError::Config(_))));
}

#[test]
fn explicit_tag_wins() {
    let t = TestBox::new();
    let mut config = BoxConfig::new("node:18");
    config.tag = Some("20".into());
    let b = t.build(config);
    assert_eq!(b.name(), "node:20");
}

// ============================================================================
// RUN SERVICES
// ============================================================================

#[tokio::test]
async fn services_start_in_order_with_accumulated_links() {
    let t = TestBox::new();
    let log = new_log();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.add_service(Box::new(ScriptedService::new("postgres", &log)));
    b.add_service(Box::new(ScriptedService::new("redis", &log)));
    b.add_service(Box::new(ScriptedService::new("app", &log)));

    b.run_services(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    let runs = log.lock().clone();
    let order: Vec<_> = runs.iter().map(|r| r.service.as_str()).collect();
    assert_eq!(order, vec!["postgres", "redis", "app"]);
    assert!(runs[0].links.is_empty());
    assert_eq!(runs[1].links, vec!["pipeline-test-postgres:postgres"]);
    assert_eq!(
        runs[2].links,
        vec![
            "pipeline-test-postgres:postgres",
            "pipeline-test-redis:redis"
        ]
    );
}

#[tokio::test]
async fn services_abort_on_first_failure() {
    let t = TestBox::new();
    let log = new_log();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.add_service(Box::new(ScriptedService::new("db", &log)));
    b.add_service(Box::new(ScriptedService::failing("cache", &log)));
    b.add_service(Box::new(ScriptedService::new("queue", &log)));

    let err = b
        .run_services(&RunContext::background(), &Environment::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BoxError::Engine(_)));

    let runs = log.lock().clone();
    assert_eq!(runs.len(), 2, "third service must never start");
    assert_eq!(runs[1].service, "cache");
    assert_eq!(runs[1].links, vec!["pipeline-test-db:db"]);
}

#[tokio::test]
async fn run_does_not_create_box_when_a_service_fails() {
    let t = TestBox::new();
    let log = new_log();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.add_service(Box::new(ScriptedService::failing("db", &log)));

    let result = b.run(&RunContext::background(), &Environment::new()).await;
    assert!(result.is_err());
    assert!(t.engine.created_specs().is_empty());
    assert!(b.container_id().is_none());
}

// ============================================================================
// RUN
// ============================================================================

#[tokio::test]
async fn run_creates_and_starts_primary_container() {
    let t = TestBox::new();
    let mut config = BoxConfig::new("ubuntu:22.04");
    config.cmd = Some("bash -c 'echo hello'".into());
    config.env = vec![("home_dir".into(), "$HOME_ROOT/ci".into())];
    let mut b = t.build_with(config, |o| o.publish_ports = vec!["8080:80".into()]);
    let env: Environment = [("HOME_ROOT", "/home")].into_iter().collect();

    let handle = b.run(&RunContext::background(), &env).await.unwrap();
    assert_eq!(handle.id, "ctr-1");
    assert_eq!(b.container_id(), Some("ctr-1"));
    assert_eq!(b.link().as_deref(), Some("pipeline-42:ubuntu"));

    let spec = t.primary_spec();
    assert_eq!(spec.image, "ubuntu:22.04");
    assert_eq!(spec.cmd, vec!["bash", "-c", "echo hello"]);
    assert_eq!(spec.entrypoint, None);
    assert_eq!(spec.env, vec!["HOME_DIR=/home/ci"]);
    assert!(!spec.tty);
    assert!(spec.open_stdin && spec.attach_stdin && spec.attach_stdout && spec.attach_stderr);
    assert!(spec.exposed_ports.contains("80/tcp"));

    let binding = &spec.host.port_bindings["80/tcp"][0];
    assert_eq!(binding.host_port, "8080");
    assert_eq!(binding.host_ip, None);

    assert_eq!(
        t.engine.calls().last(),
        Some(&EngineCall::StartContainer {
            id: "ctr-1".into(),
            links: Vec::new(),
        })
    );
}

#[tokio::test]
async fn run_stages_workspace_read_only() {
    let t = TestBox::new();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    let binds = t.primary_spec().host.binds;
    assert_eq!(binds.len(), 2, "plain files are not mounted");
    for bind in &binds {
        assert!(bind.container_path.starts_with("/mnt"));
        assert_eq!(bind.mode, Some(BindMode::ReadOnly));
    }
}

#[tokio::test]
async fn run_mounts_workspace_directly() {
    let t = TestBox::new();
    let mut b = t.build_with(BoxConfig::new("ubuntu"), |o| o.direct_mount = true);
    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    let binds = t.primary_spec().host.binds;
    assert_eq!(binds.len(), 2);
    for bind in &binds {
        assert!(bind.container_path.starts_with("/pipeline"));
        assert_eq!(bind.mode, Some(BindMode::ReadWrite));
    }
}

#[tokio::test]
async fn run_applies_engine_network_and_infrastructure_options() {
    let t = TestBox::new();
    let mut engine_opts = engine_options();
    engine_opts.dns = vec!["10.0.0.53".into(), "8.8.8.8".into()];
    engine_opts.network_disabled = true;
    engine_opts.infrastructure_mounts = vec![PathBuf::from("/var/run/docker.sock")];
    let mut b = t.build_on(BoxConfig::new("ubuntu"), engine_opts);

    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    let spec = t.primary_spec();
    assert!(spec.network_disabled);
    assert_eq!(spec.dns, vec!["10.0.0.53", "8.8.8.8"]);
    assert_eq!(spec.host.dns, vec!["10.0.0.53", "8.8.8.8"]);

    // Two workspace binds, then the passthrough
    let binds = &spec.host.binds;
    assert_eq!(binds.len(), 3);
    assert!(binds[..2].iter().all(|bind| bind.container_path.starts_with("/mnt")));
    assert_eq!(binds[2], BindMount::passthrough("/var/run/docker.sock"));
    assert_eq!(
        binds[2].to_string(),
        "/var/run/docker.sock:/var/run/docker.sock"
    );
}

#[tokio::test]
async fn run_creates_from_registry_qualified_image() {
    let t = TestBox::new();
    let mut config = BoxConfig::new("acme/app:v2");
    config.registry = Some("quay.io".into());
    let mut b = t.build(config);

    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    assert_eq!(t.primary_spec().image, "quay.io/acme/app:v2");
}

#[tokio::test]
async fn run_links_started_services() {
    let t = TestBox::new();
    let log = new_log();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.add_service(Box::new(ScriptedService::new("mysql", &log)));

    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    assert_eq!(
        t.primary_spec().host.links,
        vec!["pipeline-test-mysql:mysql"]
    );
}

#[tokio::test]
async fn run_interpolates_image_and_splits_entrypoint() {
    let t = TestBox::new();
    let mut config = BoxConfig::new("$REGISTRY/tools");
    config.entrypoint = Some("/usr/bin/env -i".into());
    let mut b = t.build(config);
    let env: Environment = [("REGISTRY", "quay.io")].into_iter().collect();

    b.run(&RunContext::background(), &env).await.unwrap();

    let spec = t.primary_spec();
    assert_eq!(spec.image, "quay.io/tools:latest");
    assert_eq!(
        spec.entrypoint,
        Some(vec!["/usr/bin/env".to_string(), "-i".to_string()])
    );
    assert_eq!(spec.cmd, vec!["/bin/bash"]);
}

#[tokio::test]
async fn run_rejects_untokenizable_command() {
    let t = TestBox::new();
    let mut config = BoxConfig::new("ubuntu");
    config.cmd = Some("bash -c \"unterminated".into());
    let mut b = t.build(config);

    let err = b
        .run(&RunContext::background(), &Environment::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BoxError::Config(_)));
    assert!(t.engine.calls().is_empty());
}

#[tokio::test]
async fn run_propagates_create_failure() {
    let t = TestBox::new();
    t.engine.fail(Op::Create, None, Failure::Api);
    let mut b = t.build(BoxConfig::new("ubuntu"));

    let err = b
        .run(&RunContext::background(), &Environment::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BoxError::Engine(_)));
    assert!(b.container_id().is_none());
}

#[tokio::test]
async fn run_keeps_created_container_when_start_fails() {
    let t = TestBox::new();
    t.engine.fail(Op::Start, Some("ctr-1"), Failure::Api);
    let mut b = t.build(BoxConfig::new("ubuntu"));

    assert!(
        b.run(&RunContext::background(), &Environment::new())
            .await
            .is_err()
    );
    assert_eq!(b.container_id(), Some("ctr-1"));

    b.clean().await.unwrap();
    assert_eq!(t.engine.removed_containers(), vec!["ctr-1"]);
}

#[tokio::test]
async fn run_aborts_when_cancelled() {
    let t = TestBox::new();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    let ctx = RunContext::background();
    ctx.cancel_token().cancel();

    let err = b.run(&ctx, &Environment::new()).await.unwrap_err();
    assert!(matches!(err, BoxError::Cancelled));
    assert!(b.container_id().is_none());
}

// ============================================================================
// COMMIT / EXPORT / RESTART
// ============================================================================

#[tokio::test]
async fn commit_requires_container() {
    let t = TestBox::new();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    let err = b.commit("acme/out", "v1", "").await.unwrap_err();
    assert!(matches!(err, BoxError::InvalidState(_)));
}

#[tokio::test]
async fn commits_are_recorded_in_order() {
    let t = TestBox::new();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    let first = b.commit("acme/out", "step-1", "").await.unwrap();
    let second = b.commit("acme/out", "step-2", "custom").await.unwrap();

    assert_eq!(first.repo_tags, vec!["acme/out:step-1"]);
    let ids: Vec<_> = b.images().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    assert!(t.engine.calls().contains(&EngineCall::CommitContainer {
        container: "ctr-1".into(),
        repository: "acme/out".into(),
        tag: "step-2".into(),
    }));
}

#[tokio::test]
async fn commit_uses_fixed_message_and_author() {
    let t = TestBox::new();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    b.commit("acme/out", "v1", "").await.unwrap();
    b.commit("acme/out", "v2", "nightly snapshot").await.unwrap();

    let requests = t.engine.commit_requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.message, "Build completed");
        assert_eq!(request.author, "pipebox");
    }
}

#[tokio::test]
async fn export_streams_into_sink() {
    let t = TestBox::new();
    t.engine.set_export_bytes(b"tar-bytes");
    let b = t.build(BoxConfig::new("ubuntu"));

    let mut sink: Vec<u8> = Vec::new();
    b.export_image("acme/out:v1", &mut sink).await.unwrap();
    assert_eq!(sink, b"tar-bytes");
}

#[tokio::test]
async fn export_propagates_failure() {
    let t = TestBox::new();
    t.engine.fail(Op::Export, None, Failure::NotFound);
    let b = t.build(BoxConfig::new("ubuntu"));

    let mut sink: Vec<u8> = Vec::new();
    let err = b.export_image("missing:v1", &mut sink).await.unwrap_err();
    assert!(matches!(err, BoxError::Engine(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn restart_requires_container() {
    let t = TestBox::new();
    let b = t.build(BoxConfig::new("ubuntu"));
    assert!(matches!(
        b.restart().await,
        Err(BoxError::InvalidState(_))
    ));
}

#[tokio::test]
async fn recover_interactive_restarts_then_attaches() {
    let t = TestBox::new();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    let exports = vec!["export CI=\"true\"".to_string()];
    b.recover_interactive("/pipeline/source", &exports)
        .await
        .unwrap();

    let calls = t.engine.calls();
    let n = calls.len();
    assert_eq!(calls[n - 2], EngineCall::RestartContainer("ctr-1".into()));
    assert_eq!(
        calls[n - 1],
        EngineCall::AttachInteractive {
            id: "ctr-1".into(),
            cmd: vec!["/bin/bash".into()],
            env: vec![
                "export CI=\"true\"".into(),
                "cd /pipeline/source".into(),
                "clear".into(),
            ],
        }
    );
}

#[tokio::test]
async fn recover_interactive_fails_without_attach_when_restart_fails() {
    let t = TestBox::new();
    t.engine.fail(Op::Restart, None, Failure::Api);
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    assert!(b.recover_interactive("/", &[]).await.is_err());
    assert!(
        !t.engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::AttachInteractive { .. }))
    );
}

#[test]
fn exposed_port_maps_use_engine_host() {
    let t = TestBox::new();
    let b = t.build_with(BoxConfig::new("ubuntu"), |o| {
        o.publish_ports = vec!["3000".into(), "10.0.0.1:8443:443".into()]
    });
    let maps = b.exposed_port_maps().unwrap();

    assert_eq!(maps.len(), 2);
    assert!(
        maps.iter()
            .any(|m| m.container_port == "3000" && m.host_uri == "localhost:3000")
    );
    assert!(
        maps.iter()
            .any(|m| m.container_port == "443" && m.host_uri == "localhost:8443")
    );
}

// ============================================================================
// SERVICE CONTAINER
// ============================================================================

#[tokio::test]
async fn service_container_fetches_creates_and_links() {
    let t = TestBox::new();
    let options = t.workspace.pipeline_options("42");
    let mut config = BoxConfig::new("library/postgres:15");
    config.env = vec![("postgres_password".into(), "$DB_PASS".into())];
    let mut service =
        ServiceContainer::new(config, &options, &engine_options(), t.engine.shared()).unwrap();
    let env: Environment = [("DB_PASS", "hunter2")].into_iter().collect();

    assert!(service.link().is_none());
    let links = vec!["pipeline-42-redis:redis".to_string()];
    let handle = service
        .run(&RunContext::background(), &env, &links)
        .await
        .unwrap();

    assert_eq!(handle.name, "pipeline-42-postgres");
    assert_eq!(service.container_id(), Some(handle.id.as_str()));
    assert_eq!(
        service.link().as_deref(),
        Some("pipeline-42-postgres:postgres")
    );

    let spec = &t.engine.created_specs()[0];
    assert_eq!(spec.image, "library/postgres:15");
    assert_eq!(spec.env, vec!["POSTGRES_PASSWORD=hunter2"]);
    assert!(spec.cmd.is_empty(), "image command is kept");

    let calls = t.engine.calls();
    assert!(matches!(calls[0], EngineCall::CheckAccess { .. }));
    assert!(matches!(calls[1], EngineCall::PullImage { .. }));
    assert_eq!(
        calls.last(),
        Some(&EngineCall::StartContainer {
            id: handle.id.clone(),
            links,
        })
    );
}

#[tokio::test]
async fn service_container_feeds_box_links() {
    let t = TestBox::new();
    let options = t.workspace.pipeline_options("42");
    let service = ServiceContainer::new(
        BoxConfig::new("redis:7"),
        &options,
        &engine_options(),
        t.engine.shared(),
    )
    .unwrap();
    let mut b = t.build(BoxConfig::new("ubuntu"));
    b.add_service(Box::new(service));

    b.run(&RunContext::background(), &Environment::new())
        .await
        .unwrap();

    assert_eq!(t.primary_spec().host.links, vec!["pipeline-42-redis:redis"]);
    assert_eq!(b.services().len(), 1);
}
