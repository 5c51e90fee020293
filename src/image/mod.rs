//! Image pipeline: presence checks, pulls, builds and reference-counted
//! removal.
//!
//! Pulls and builds stream engine progress to a [`ProgressSink`] and race
//! every stream item against a [`CancellationToken`]. Shared base images are
//! tracked in [`RuntimeState`] so removing one environment's images never
//! deletes an image another environment still references.
//!
//! [`ProgressSink`]: crate::channel::ProgressSink
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod archive;
mod build;
mod pull;
mod remove;


use std::sync::Arc;

use bollard::models::ImageSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::engine::labels::reference_filter;
use crate::engine::{EngineClient, Filters, is_not_found};
use crate::error::{ImageError, VulnlabError};
use crate::state::RuntimeState;

/// Placeholder name for images without a repository tag.
pub const UNTAGGED: &str = "<untagged>";

const SHORT_ID_LEN: usize = 12;

/// A locally stored image, as listed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalImage {
    /// Short (12 character) image id.
    pub id: String,
    /// First repository tag, or [`UNTAGGED`].
    pub name: String,
    /// Every repository tag.
    pub tags: Vec<String>,
    /// Size in bytes.
    pub size: i64,
    /// Creation time, when the engine reports a valid one.
    pub created: Option<DateTime<Utc>>,
}

impl From<ImageSummary> for LocalImage {
    fn from(summary: ImageSummary) -> Self {
        let id = summary
            .id
            .trim_start_matches("sha256:")
            .chars()
            .take(SHORT_ID_LEN)
            .collect();
        let name = summary
            .repo_tags
            .first()
            .cloned()
            .unwrap_or_else(|| String::from(UNTAGGED));
        Self {
            id,
            name,
            tags: summary.repo_tags,
            size: summary.size,
            created: DateTime::from_timestamp(summary.created, 0),
        }
    }
}

/// Pulls, builds and removes images through an [`EngineClient`].
#[derive(Debug)]
pub struct ImagePipeline<C> {
    client: Arc<C>,
    state: Arc<RuntimeState>,
    build_proxy: Option<String>,
}

impl<C> Clone for ImagePipeline<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            state: Arc::clone(&self.state),
            build_proxy: self.build_proxy.clone(),
        }
    }
}

impl<C: EngineClient> ImagePipeline<C> {
    /// Create a pipeline over `client`, sharing `state` with the deployer.
    pub const fn new(client: Arc<C>, state: Arc<RuntimeState>) -> Self {
        Self {
            client,
            state,
            build_proxy: None,
        }
    }

    /// Forward `proxy` to image builds as the `HTTP_PROXY` and `HTTPS_PROXY`
    /// build arguments.
    #[must_use]
    pub fn with_build_proxy(mut self, proxy: Option<String>) -> Self {
        self.build_proxy = proxy;
        self
    }

    /// The shared runtime state.
    #[must_use]
    pub const fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    /// Whether `image` is present locally.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::InspectFailed` when the engine fails for any
    /// reason other than the image being absent.
    pub async fn image_exists(&self, image: &str) -> Result<bool, VulnlabError> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(error) if is_not_found(&error) => Ok(false),
            Err(error) => Err(ImageError::InspectFailed {
                image: String::from(image),
                message: error.to_string(),
            }
            .into()),
        }
    }

    /// Resolve a reference to its full image id.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::NotFound` when no local image matches, or
    /// `ImageError::InspectFailed` when listing fails.
    pub async fn image_id(&self, image: &str) -> Result<String, VulnlabError> {
        let images = self
            .list_images(image, reference_filter(image))
            .await?;
        images
            .into_iter()
            .next()
            .map(|summary| summary.id)
            .ok_or_else(|| {
                ImageError::NotFound {
                    image: String::from(image),
                }
                .into()
            })
    }

    /// List every local image.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::InspectFailed` when listing fails.
    pub async fn list_local_images(&self) -> Result<Vec<LocalImage>, VulnlabError> {
        let images = self.list_images("*", Filters::new()).await?;
        debug!(count = images.len(), "listed local images");
        Ok(images.into_iter().map(LocalImage::from).collect())
    }

    async fn list_images(
        &self,
        image: &str,
        filters: Filters,
    ) -> Result<Vec<ImageSummary>, VulnlabError> {
        self.client
            .list_images(filters)
            .await
            .map_err(|error| {
                ImageError::InspectFailed {
                    image: String::from(image),
                    message: error.to_string(),
                }
                .into()
            })
    }
}
