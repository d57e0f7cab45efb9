//! Box lifecycle: services, primary container, images.

use pipebox_shared::constants::{container as const_container, image as const_image};
use pipebox_shared::{BoxError, BoxResult};

use super::PipelineBox;
use crate::engine::{
    CommitRequest, ContainerHandle, ContainerSpec, HostSpec, ImageHandle, OutputStream,
};
use crate::net::{exposed_ports, port_bindings};
use crate::runtime::context::RunContext;
use crate::runtime::environment::Environment;
use crate::util::{container_env, split_command};
use crate::volumes::{infrastructure_binds, workspace_binds};

pub(super) async fn run_services(
    b: &mut PipelineBox,
    ctx: &RunContext,
    env: &Environment,
) -> BoxResult<()> {
    let mut links: Vec<String> = Vec::with_capacity(b.services.len());

    for service in b.services.iter_mut() {
        tracing::debug!(service = %service.name(), links = ?links, "Starting service");
        service.run(ctx, env, &links).await?;

        match service.link() {
            Some(link) => links.push(link),
            None => tracing::warn!(service = %service.name(), "Started service has no link"),
        }
    }
    Ok(())
}

/// Links of every service that has a container, in service order.
fn service_links(b: &PipelineBox) -> Vec<String> {
    b.services.iter().filter_map(|s| s.link()).collect()
}

pub(super) async fn run(
    b: &mut PipelineBox,
    ctx: &RunContext,
    env: &Environment,
) -> BoxResult<ContainerHandle> {
    run_services(b, ctx, env).await?;
    tracing::debug!(box_name = %b.identity.name, "Starting box");

    let image = b.identity.image_source(&b.config).reference(env);
    let cmd = split_command(&b.cmd)?;
    let entrypoint = b.entrypoint.as_deref().map(split_command).transpose()?;

    // Scan the workspace before anything is created on the engine
    let mut binds = workspace_binds(&b.options)?;
    binds.extend(infrastructure_binds(&b.engine_options.infrastructure_mounts));

    let host = HostSpec {
        binds,
        links: service_links(b),
        port_bindings: port_bindings(&b.options.publish_ports),
        dns: b.engine_options.dns.clone(),
    };

    let mut spec = ContainerSpec::attached(b.container_name(), image);
    spec.cmd = cmd;
    spec.entrypoint = entrypoint;
    spec.env = container_env(&b.config.env, env);
    spec.exposed_ports = exposed_ports(&b.options.publish_ports);
    spec.network_disabled = b.engine_options.network_disabled;
    spec.dns = b.engine_options.dns.clone();
    spec.host = host.clone();

    let container = ctx.guard(b.engine.create_container(&spec)).await?;
    tracing::debug!(
        box_name = %b.identity.name,
        container_id = %container.id,
        "Box container created"
    );
    // Recorded before start so a failed start is still cleaned up
    b.container = Some(container.clone());

    ctx.guard(b.engine.start_container(&container.id, &host)).await?;
    tracing::info!(
        box_name = %b.identity.name,
        container_id = %container.id,
        links = ?host.links,
        "Box started"
    );

    Ok(container)
}

pub(super) async fn fetch(
    b: &mut PipelineBox,
    ctx: &RunContext,
    env: &Environment,
) -> BoxResult<ImageHandle> {
    let source = b.identity.image_source(&b.config);
    let image = b.fetcher.fetch(ctx, env, &source).await?;
    b.image = Some(image.clone());
    Ok(image)
}

pub(super) async fn commit(
    b: &mut PipelineBox,
    name: &str,
    tag: &str,
    message: &str,
) -> BoxResult<ImageHandle> {
    let container = require_container(b)?;
    tracing::debug!(
        box_name = %b.identity.name,
        repository = %name,
        tag = %tag,
        note = %message,
        "Committing container"
    );

    let request = CommitRequest {
        container: container.id.clone(),
        repository: name.to_string(),
        tag: tag.to_string(),
        message: const_image::COMMIT_MESSAGE.to_string(),
        author: const_image::COMMIT_AUTHOR.to_string(),
    };

    let image = b.engine.commit_container(&request).await?;
    tracing::info!(image_id = %image.id, repository = %name, tag = %tag, "Container committed");
    b.images.push(image.clone());
    Ok(image)
}

pub(super) async fn export_image(
    b: &PipelineBox,
    name: &str,
    output: OutputStream<'_>,
) -> BoxResult<()> {
    tracing::info!(box_name = %b.identity.name, export_name = %name, "Storing image");
    b.engine.export_image(name, output).await?;
    Ok(())
}

pub(super) async fn restart(b: &PipelineBox) -> BoxResult<ContainerHandle> {
    let container = require_container(b)?;
    b.engine
        .restart_container(&container.id, const_container::RESTART_GRACE_SECS)
        .await?;
    tracing::debug!(container_id = %container.id, "Box restarted");
    Ok(container.clone())
}

pub(super) async fn recover_interactive(
    b: &PipelineBox,
    cwd: &str,
    exports: &[String],
) -> BoxResult<()> {
    let container = restart(b).await.inspect_err(|e| {
        tracing::error!(box_name = %b.identity.name, "Box restart failed: {}", e);
    })?;

    let mut lines = exports.to_vec();
    lines.push(format!("cd {}", cwd));
    lines.push("clear".to_string());

    b.engine
        .attach_interactive(&container.id, std::slice::from_ref(&b.cmd), &lines)
        .await?;
    Ok(())
}

fn require_container(b: &PipelineBox) -> BoxResult<&ContainerHandle> {
    b.container.as_ref().ok_or_else(|| {
        BoxError::InvalidState(format!("box {} has no container", b.identity.name))
    })
}
