//! Teardown: tolerant stop, strict clean.

use pipebox_shared::BoxResult;
use pipebox_shared::constants::container as const_container;

use super::PipelineBox;
use crate::engine::{ContainerEngine, RemoveOptions};

pub(super) async fn stop(b: &PipelineBox) {
    for service in &b.services {
        let Some(id) = service.container_id() else {
            tracing::debug!(service = %service.name(), "Service has no container, skipping stop");
            continue;
        };
        tracing::debug!(service = %service.name(), container_id = %id, "Stopping service");
        stop_tolerant(b.engine.as_ref(), id, "service").await;
    }

    if let Some(container) = &b.container {
        tracing::debug!(container_id = %container.id, "Stopping box container");
        stop_tolerant(b.engine.as_ref(), &container.id, "box").await;
    }
}

async fn stop_tolerant(engine: &dyn ContainerEngine, id: &str, role: &'static str) {
    match engine
        .stop_container(id, const_container::STOP_GRACE_SECS)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_running() => {
            tracing::warn!(container_id = %id, role, "Container has already stopped");
        }
        Err(e) => {
            tracing::warn!(container_id = %id, role, error = %e, "Failed to stop container");
        }
    }
}

pub(super) async fn clean(b: &PipelineBox) -> BoxResult<()> {
    let containers: Vec<&str> = b
        .container_id()
        .into_iter()
        .chain(b.services.iter().filter_map(|s| s.container_id()))
        .collect();

    for id in containers {
        tracing::debug!(container_id = %id, "Removing container");
        match b.engine.remove_container(id, RemoveOptions::purge()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(container_id = %id, "Container already removed");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if b.options.should_commit {
        return Ok(());
    }

    for image in b.images.iter().rev() {
        tracing::debug!(image_id = %image.id, "Removing image");
        if let Err(e) = b.engine.remove_image(&image.id).await {
            tracing::warn!(image_id = %image.id, error = %e, "Failed to remove image");
        }
    }
    Ok(())
}
