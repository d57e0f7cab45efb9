//! Image acquisition with registry authorization.

use pipebox_shared::constants::registry as const_registry;
use pipebox_shared::{BoxError, BoxResult};

use super::emitter::ProgressForwarder;
use crate::engine::{
    AccessCheck, ImageHandle, PullRequest, RegistryAuth, SharedEngine, qualified_repository,
};
use crate::runtime::context::RunContext;
use crate::runtime::environment::Environment;

/// Buffer between the engine's progress writer and the forwarder task.
const PROGRESS_PIPE_CAPACITY: usize = 64 * 1024;

/// Where an image comes from. Every field may hold `$VAR` references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageSource {
    /// `repository:tag`
    pub name: String,
    pub repository: String,
    pub tag: String,
    /// Registry host; empty for the default registry.
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl ImageSource {
    /// Interpolated repository, prefixed with the configured registry host
    /// when it does not already name one.
    pub fn repository(&self, env: &Environment) -> String {
        let registry = env.interpolate(&self.registry);
        let repository = env.interpolate(&self.repository);
        if registry.is_empty() {
            repository
        } else {
            qualified_repository(&registry, &repository)
        }
    }

    /// Reference the engine pulls, inspects and creates containers from.
    ///
    /// Without a configured registry this is the interpolated name.
    pub fn reference(&self, env: &Environment) -> String {
        if env.interpolate(&self.registry).is_empty() {
            return env.interpolate(&self.name);
        }
        format!("{}:{}", self.repository(env), env.interpolate(&self.tag))
    }
}

/// Fetches images for one pipeline run.
///
/// Shared by the primary box and its services so both follow the same
/// local/remote policy.
#[derive(Clone)]
pub struct ImageFetcher {
    engine: SharedEngine,
    pipeline_id: String,
    local: bool,
}

impl ImageFetcher {
    pub fn new(engine: SharedEngine, pipeline_id: impl Into<String>, local: bool) -> Self {
        Self {
            engine,
            pipeline_id: pipeline_id.into(),
            local,
        }
    }

    /// Make `source` available to the engine and return its handle.
    ///
    /// With the local shortcut enabled only the local image is inspected.
    /// Otherwise read access is checked, the image is pulled while progress
    /// is forwarded to the context's emitter, and the pulled image inspected.
    pub async fn fetch(
        &self,
        ctx: &RunContext,
        env: &Environment,
        source: &ImageSource,
    ) -> BoxResult<ImageHandle> {
        let name = source.reference(env);

        if self.local {
            tracing::debug!(image = %name, "Local shortcut, inspecting image");
            return ctx.guard(self.engine.inspect_image(&name)).await;
        }

        let registry = env.interpolate(&source.registry);
        let repository = source.repository(env);
        let auth = RegistryAuth {
            username: env.interpolate(&source.username),
            password: env.interpolate(&source.password),
        };

        let check = AccessCheck {
            auth: auth.clone(),
            access: const_registry::ACCESS_READ.to_string(),
            repository: repository.clone(),
            registry: registry.clone(),
        };
        if !ctx.guard(self.engine.check_access(&check)).await? {
            tracing::error!(repository = %repository, "Registry denied read access");
            return Err(BoxError::AccessDenied { repository });
        }

        let request = PullRequest {
            repository,
            tag: env.interpolate(&source.tag),
            registry,
        };
        tracing::info!(image = %name, "Pulling image");

        let (mut writer, reader) = tokio::io::duplex(PROGRESS_PIPE_CAPACITY);
        let forwarder = ProgressForwarder::spawn(
            reader,
            ctx.emitter().clone(),
            self.pipeline_id.clone(),
            ctx.cancel_token().clone(),
        );

        let pulled = ctx
            .guard(self.engine.pull_image(&request, &auth, &mut writer))
            .await;
        // Closing the writer lets the forwarder reach EOF on every path
        drop(writer);
        let delivered = forwarder.finish().await;
        tracing::debug!(image = %name, delivered, "Pull progress drained");
        pulled?;

        let image = ctx.guard(self.engine.inspect_image(&name)).await?;
        tracing::debug!(image = %name, image_id = %image.id, "Image fetched");
        Ok(image)
    }
}
