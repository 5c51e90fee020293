//! Reference-counted image removal.

use tracing::{debug, info, warn};

use super::ImagePipeline;
use crate::compose::ServiceGraph;
use crate::engine::{EngineClient, Filters, is_not_found};
use crate::error::{ContainerError, ImageError, VulnlabError};
use crate::state::ImageRelease;

impl<C: EngineClient> ImagePipeline<C> {
    /// Release one reference to `image` and delete it once no references
    /// remain.
    ///
    /// An absent image is success. With more than one reference outstanding
    /// only the count is decremented. Removal is never forced and parent
    /// layers are pruned.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::InUse` when any container (running or not)
    /// references the image by id or name, and `ImageError::RemoveFailed`
    /// when the engine refuses the removal.
    pub async fn remove_image(&self, image: &str) -> Result<ImageRelease, VulnlabError> {
        if !self.image_exists(image).await? {
            debug!(image, "image already absent");
            return Ok(ImageRelease::Last);
        }
        if self.is_in_use(image).await? {
            return Err(ImageError::InUse {
                image: String::from(image),
            }
            .into());
        }

        let release = self.state.release_image_reference(image);
        if let ImageRelease::Kept { remaining } = release {
            info!(image, remaining, "image still referenced; keeping it");
            return Ok(release);
        }

        match self.client.remove_image(image, false).await {
            Ok(()) => {
                info!(image, "image removed");
                Ok(release)
            }
            Err(error) if is_not_found(&error) => Ok(release),
            Err(error) => Err(ImageError::RemoveFailed {
                image: String::from(image),
                message: error.to_string(),
            }
            .into()),
        }
    }

    /// Remove every image a compose project uses.
    ///
    /// Untagged references are treated as `:latest`. Absent and in-use
    /// images are skipped; other failures are logged and the sweep carries
    /// on.
    ///
    /// # Errors
    ///
    /// Returns the last failure encountered, if any.
    pub async fn remove_compose_images(&self, graph: &ServiceGraph) -> Result<(), VulnlabError> {
        let mut last_error = None;
        for image in graph.required_images()? {
            let reference = with_default_tag(&image);
            let result = self.remove_image(&reference).await;
            match result {
                Ok(_) => {}
                Err(VulnlabError::Image(ImageError::InUse { .. })) => {
                    info!(image = %reference, "image in use; skipping removal");
                }
                Err(error) => {
                    warn!(image = %reference, error = %error, "failed to remove compose image");
                    last_error = Some(error);
                }
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    async fn is_in_use(&self, image: &str) -> Result<bool, VulnlabError> {
        let image_id = self.image_id(image).await.ok();
        let containers = self
            .client
            .list_containers(Filters::new())
            .await
            .map_err(|error| ContainerError::ListFailed {
                resource: "containers",
                message: error.to_string(),
            })?;
        Ok(containers.iter().any(|container| {
            let by_id = image_id.is_some() && container.image_id == image_id;
            let by_name = container
                .image
                .as_deref()
                .is_some_and(|name| name == image || with_default_tag(name) == image);
            by_id || by_name
        }))
    }
}

/// Append `:latest` to a reference that carries neither a tag nor a digest.
pub(crate) fn with_default_tag(image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') || image.contains('@') {
        String::from(image)
    } else {
        format!("{image}:latest")
    }
}
