//! Box name and tag resolution.

use pipebox_shared::constants::image as const_image;
use pipebox_shared::{BoxError, BoxResult};

use crate::images::ImageSource;
use crate::runtime::options::BoxConfig;

/// Normalized identity of a box image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxIdentity {
    /// `repository:tag`
    pub name: String,
    pub repository: String,
    pub tag: String,
    /// Last `/` segment of the repository, used as link alias.
    pub short_name: String,
}

impl BoxIdentity {
    /// Resolve `repository[:tag]`.
    ///
    /// A non-empty `tag_override` wins over an embedded tag; with neither the
    /// tag is `latest`. Identifiers containing `@` are rejected.
    pub fn resolve(id: &str, tag_override: Option<&str>) -> BoxResult<Self> {
        if id.contains('@') {
            return Err(BoxError::InvalidIdentifier(id.to_string()));
        }

        let mut parts = id.split(':');
        let repository = parts.next().unwrap_or_default().to_string();
        let embedded = parts.next();

        let tag = tag_override
            .filter(|t| !t.is_empty())
            .or(embedded)
            .unwrap_or(const_image::DEFAULT_TAG)
            .to_string();

        let short_name = repository
            .rsplit('/')
            .next()
            .unwrap_or(&repository)
            .to_string();

        Ok(Self {
            name: format!("{}:{}", repository, tag),
            repository,
            tag,
            short_name,
        })
    }

    /// Resolve the identity declared by a box config.
    pub fn from_config(config: &BoxConfig) -> BoxResult<Self> {
        Self::resolve(&config.id, config.tag.as_deref())
    }

    /// Image source for this identity, with the config's registry credentials.
    pub fn image_source(&self, config: &BoxConfig) -> ImageSource {
        ImageSource {
            name: self.name.clone(),
            repository: self.repository.clone(),
            tag: self.tag.clone(),
            registry: config.registry.clone().unwrap_or_default(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
        }
    }
}
