//! Dependent service containers.

use async_trait::async_trait;
use pipebox_shared::BoxResult;
use pipebox_shared::constants::container as const_container;

use super::naming::BoxIdentity;
use crate::engine::{ContainerHandle, ContainerSpec, HostSpec, SharedEngine};
use crate::images::ImageFetcher;
use crate::runtime::context::RunContext;
use crate::runtime::environment::Environment;
use crate::runtime::options::{BoxConfig, EngineOptions, PipelineOptions};
use crate::util::{container_env, split_command};

/// A box that must be running before the primary box starts.
///
/// Services are started in the order they were added to a
/// [`PipelineBox`](super::PipelineBox); each receives the links of the
/// services started before it.
#[async_trait]
pub trait ServiceBox: Send + Sync {
    /// Image name, `repository:tag`.
    fn name(&self) -> &str;

    /// Engine id of the service container, once created.
    fn container_id(&self) -> Option<&str>;

    /// `container-name:alias` link other containers use to reach this one.
    fn link(&self) -> Option<String>;

    /// Fetch, create and start the service, linked to `links`.
    async fn run(
        &mut self,
        ctx: &RunContext,
        env: &Environment,
        links: &[String],
    ) -> BoxResult<ContainerHandle>;
}

/// [`ServiceBox`] backed by a plain engine container.
pub struct ServiceContainer {
    identity: BoxIdentity,
    config: BoxConfig,
    container_name: String,
    dns: Vec<String>,
    network_disabled: bool,
    engine: SharedEngine,
    fetcher: ImageFetcher,
    container: Option<ContainerHandle>,
}

impl ServiceContainer {
    pub fn new(
        config: BoxConfig,
        options: &PipelineOptions,
        engine_options: &EngineOptions,
        engine: SharedEngine,
    ) -> BoxResult<Self> {
        let identity = BoxIdentity::from_config(&config)?;
        let container_name = format!(
            "{}{}-{}",
            const_container::NAME_PREFIX,
            options.pipeline_id,
            identity.short_name
        );
        let fetcher =
            ImageFetcher::new(engine.clone(), &options.pipeline_id, engine_options.local);

        Ok(Self {
            identity,
            config,
            container_name,
            dns: engine_options.dns.clone(),
            network_disabled: engine_options.network_disabled,
            engine,
            fetcher,
            container: None,
        })
    }

    pub fn identity(&self) -> &BoxIdentity {
        &self.identity
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }
}

#[async_trait]
impl ServiceBox for ServiceContainer {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn container_id(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.id.as_str())
    }

    fn link(&self) -> Option<String> {
        self.container
            .as_ref()
            .map(|c| format!("{}:{}", c.name, self.identity.short_name))
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        env: &Environment,
        links: &[String],
    ) -> BoxResult<ContainerHandle> {
        let source = self.identity.image_source(&self.config);
        self.fetcher.fetch(ctx, env, &source).await?;

        let cmd = match self.config.cmd.as_deref() {
            Some(cmd) if !cmd.is_empty() => split_command(cmd)?,
            _ => Vec::new(),
        };
        let entrypoint = match self.config.entrypoint.as_deref() {
            Some(entrypoint) if !entrypoint.is_empty() => Some(split_command(entrypoint)?),
            _ => None,
        };

        let host = HostSpec {
            links: links.to_vec(),
            dns: self.dns.clone(),
            ..Default::default()
        };
        let image = source.reference(env);
        let mut spec = ContainerSpec::attached(&self.container_name, image);
        spec.cmd = cmd;
        spec.entrypoint = entrypoint;
        spec.env = container_env(&self.config.env, env);
        spec.network_disabled = self.network_disabled;
        spec.dns = self.dns.clone();
        spec.host = host.clone();

        let container = ctx.guard(self.engine.create_container(&spec)).await?;
        tracing::debug!(
            service = %self.identity.name,
            container_id = %container.id,
            links = ?links,
            "Service container created"
        );
        self.container = Some(container.clone());

        ctx.guard(self.engine.start_container(&container.id, &host)).await?;
        tracing::info!(
            service = %self.identity.name,
            container_id = %container.id,
            "Service started"
        );

        Ok(container)
    }
}
