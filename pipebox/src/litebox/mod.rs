//! PipelineBox - lifecycle of one pipeline run's containers
//!
//! ## Architecture
//!
//! - `naming`: image name/tag resolution
//! - `service`: dependent service containers
//! - `lifecycle`: services, run, fetch, commit, export, restart
//! - `teardown`: best-effort stop and strict clean
//!
//! A box has a single owner. Nothing here is synchronized; callers that
//! share a box across tasks must serialize access themselves.

mod lifecycle;
mod naming;
mod service;
mod teardown;

pub use naming::BoxIdentity;
pub use service::{ServiceBox, ServiceContainer};

use pipebox_shared::BoxResult;
use pipebox_shared::constants::container as const_container;

use crate::engine::{ContainerHandle, ImageHandle, OutputStream, SharedEngine};
use crate::images::ImageFetcher;
use crate::net::{ExposedPortMap, exposed_port_maps};
use crate::runtime::context::RunContext;
use crate::runtime::environment::Environment;
use crate::runtime::options::{BoxConfig, EngineOptions, PipelineOptions};

/// The primary container of a pipeline run and the services it depends on.
///
/// Services are started in insertion order; that order is also the link
/// order and the stop order. Committed images are kept in commit order and
/// removed newest first on [`clean`](Self::clean).
pub struct PipelineBox {
    identity: BoxIdentity,
    config: BoxConfig,
    cmd: String,
    entrypoint: Option<String>,
    options: PipelineOptions,
    engine_options: EngineOptions,
    engine: SharedEngine,
    fetcher: ImageFetcher,
    container: Option<ContainerHandle>,
    image: Option<ImageHandle>,
    images: Vec<ImageHandle>,
    services: Vec<Box<dyn ServiceBox>>,
}

impl PipelineBox {
    /// Build a box from its declarative config.
    ///
    /// Fails with `InvalidIdentifier` when the image id contains `@`, and
    /// with `Config` when the engine options do not validate.
    pub fn new(
        config: BoxConfig,
        options: PipelineOptions,
        engine_options: EngineOptions,
        engine: SharedEngine,
    ) -> BoxResult<Self> {
        let identity = BoxIdentity::from_config(&config)?;
        engine_options.sanitize()?;

        let cmd = config
            .cmd
            .clone()
            .filter(|cmd| !cmd.is_empty())
            .unwrap_or_else(|| const_container::DEFAULT_CMD.to_string());
        let entrypoint = config.entrypoint.clone().filter(|e| !e.is_empty());
        let fetcher = ImageFetcher::new(engine.clone(), &options.pipeline_id, engine_options.local);

        tracing::debug!(
            box_name = %identity.name,
            short_name = %identity.short_name,
            pipeline_id = %options.pipeline_id,
            "Box created"
        );

        Ok(Self {
            identity,
            config,
            cmd,
            entrypoint,
            options,
            engine_options,
            engine,
            fetcher,
            container: None,
            image: None,
            images: Vec::new(),
            services: Vec::new(),
        })
    }

    pub fn identity(&self) -> &BoxIdentity {
        &self.identity
    }

    /// `repository:tag`
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn short_name(&self) -> &str {
        &self.identity.short_name
    }

    pub fn repository(&self) -> &str {
        &self.identity.repository
    }

    pub fn tag(&self) -> &str {
        &self.identity.tag
    }

    /// Command run in the container before tokenization.
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Name of the primary container: `pipeline-<id>`.
    pub fn container_name(&self) -> String {
        format!("{}{}", const_container::NAME_PREFIX, self.options.pipeline_id)
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.id.as_str())
    }

    /// Image handle from the last [`fetch`](Self::fetch).
    pub fn image(&self) -> Option<&ImageHandle> {
        self.image.as_ref()
    }

    /// Images produced by [`commit`](Self::commit), oldest first.
    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    pub fn services(&self) -> &[Box<dyn ServiceBox>] {
        &self.services
    }

    /// `container-name:short-name`, once the container exists.
    pub fn link(&self) -> Option<String> {
        self.container
            .as_ref()
            .map(|c| format!("{}:{}", c.name, self.identity.short_name))
    }

    /// Attach a service. It starts after every service added before it.
    pub fn add_service(&mut self, service: Box<dyn ServiceBox>) {
        tracing::debug!(
            box_name = %self.identity.name,
            service = %service.name(),
            "Adding service"
        );
        self.services.push(service);
    }

    /// Published ports paired with the engine host address.
    pub fn exposed_port_maps(&self) -> BoxResult<Vec<ExposedPortMap>> {
        exposed_port_maps(&self.engine_options.host, &self.options.publish_ports)
    }

    /// Start every service in order, handing each the links of those before it.
    pub async fn run_services(&mut self, ctx: &RunContext, env: &Environment) -> BoxResult<()> {
        lifecycle::run_services(self, ctx, env).await
    }

    /// Start the services, then create and start the primary container.
    pub async fn run(&mut self, ctx: &RunContext, env: &Environment) -> BoxResult<ContainerHandle> {
        lifecycle::run(self, ctx, env).await
    }

    /// Make the box image available to the engine.
    pub async fn fetch(&mut self, ctx: &RunContext, env: &Environment) -> BoxResult<ImageHandle> {
        lifecycle::fetch(self, ctx, env).await
    }

    /// Snapshot the primary container into `name:tag`.
    ///
    /// The image always records the fixed `Build completed` message and
    /// `pipebox` author; `message` only annotates the commit log line.
    pub async fn commit(&mut self, name: &str, tag: &str, message: &str) -> BoxResult<ImageHandle> {
        lifecycle::commit(self, name, tag, message).await
    }

    /// Stream a tar export of image `name` into `output`.
    pub async fn export_image(&self, name: &str, output: OutputStream<'_>) -> BoxResult<()> {
        lifecycle::export_image(self, name, output).await
    }

    /// Restart the primary container in place.
    pub async fn restart(&self) -> BoxResult<ContainerHandle> {
        lifecycle::restart(self).await
    }

    /// Restart the primary container and attach an interactive shell in `cwd`
    /// with `exports` replayed first.
    pub async fn recover_interactive(&self, cwd: &str, exports: &[String]) -> BoxResult<()> {
        lifecycle::recover_interactive(self, cwd, exports).await
    }

    /// Stop services, then the primary container. Never fails; problems are
    /// logged.
    pub async fn stop(&self) {
        teardown::stop(self).await
    }

    /// Remove the primary and service containers, then (unless images are
    /// kept) the committed images newest first.
    ///
    /// The first container removal failure aborts and is returned. Image
    /// removal failures are only logged.
    pub async fn clean(&self) -> BoxResult<()> {
        teardown::clean(self).await
    }
}

impl std::fmt::Debug for PipelineBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBox")
            .field("name", &self.identity.name)
            .field("container", &self.container)
            .field("images", &self.images.len())
            .field("services", &self.services.len())
            .finish()
    }
}
