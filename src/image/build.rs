//! Image builds from Dockerfiles and compose build sections.

use std::collections::HashMap;

use bollard::query_parameters::BuildImageOptionsBuilder;
use camino::Utf8Path;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ImagePipeline;
use super::archive::{archive_path, context_archive};
use crate::channel::{ProgressMessage, ProgressSink};
use crate::compose::ServiceGraph;
use crate::compose::dockerfile::base_images_from_file;
use crate::engine::{EngineClient, Filters};
use crate::error::{ImageError, VulnlabError};

impl<C: EngineClient> ImagePipeline<C> {
    /// Build `tag` from the Dockerfile at `dockerfile`, using its directory
    /// as the build context.
    ///
    /// Each decoded `stream` line is forwarded as a `200` event and error
    /// lines as `500` events. When `cancel` fires the build is abandoned,
    /// containers running the Dockerfile's base images are force-removed and
    /// unreferenced base images are deleted.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::ContextArchive` when the context cannot be
    /// packaged, `ImageError::Cancelled` on cancellation and
    /// `ImageError::BuildFailed` when the engine reports an error.
    pub async fn build_image(
        &self,
        dockerfile: &Utf8Path,
        tag: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(), VulnlabError> {
        let context = dockerfile
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        self.build_with_context(context, dockerfile, tag, cancel, sink)
            .await
    }

    /// Build every build service of `graph` whose image is not yet present,
    /// returning the tags that were built.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first build error.
    pub async fn build_compose_images(
        &self,
        graph: &ServiceGraph,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>, VulnlabError> {
        let mut built = Vec::new();
        for (service, build) in graph.build_services() {
            if self.image_exists(&service.image).await? {
                debug!(
                    image = %service.image,
                    service = %service.name,
                    "build image already present"
                );
                continue;
            }
            self.build_with_context(
                &build.context,
                &build.dockerfile,
                &service.image,
                cancel,
                sink,
            )
            .await?;
            built.push(service.image.clone());
        }
        Ok(built)
    }

    /// Make every image `graph` needs available locally: build the build
    /// services, pull whatever is still missing, and record one reference
    /// per image.
    ///
    /// # Errors
    ///
    /// Returns the first build, pull or Dockerfile read error.
    pub async fn prepare_compose_images(
        &self,
        graph: &ServiceGraph,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>, VulnlabError> {
        self.build_compose_images(graph, cancel, sink).await?;
        let images = graph.required_images()?;
        for image in &images {
            self.ensure_image(image, cancel, sink).await?;
            let count = self.state.add_image_reference(image);
            debug!(image = %image, references = count, "recorded image reference");
        }
        Ok(images)
    }

    /// Build `tag` from `dockerfile` using `context` as the build root.
    ///
    /// # Errors
    ///
    /// As for [`build_image`](Self::build_image).
    pub async fn build_with_context(
        &self,
        context: &Utf8Path,
        dockerfile: &Utf8Path,
        tag: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(), VulnlabError> {
        let archive = context_archive(context)?;
        let relative = dockerfile
            .strip_prefix(context)
            .map_or_else(|_| String::from("Dockerfile"), archive_path);
        let mut builder = BuildImageOptionsBuilder::new()
            .dockerfile(&relative)
            .t(tag)
            .rm(true);
        if let Some(proxy) = self.build_proxy.as_deref() {
            builder = builder.buildargs(&proxy_build_args(proxy));
        }
        let options = builder.build();

        info!(image = tag, context = %context, dockerfile = %relative, "building image");
        let build_failed = |message: String| ImageError::BuildFailed {
            image: String::from(tag),
            message,
        };
        let mut stream = self.client.build_image(options, archive);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(image = tag, "build cancelled");
                    self.clean_up_cancelled_build(dockerfile).await;
                    return Err(ImageError::Cancelled {
                        image: String::from(tag),
                        operation: "build",
                    }
                    .into());
                }
                next_item = stream.next() => next_item,
            };

            match next {
                Some(Ok(event)) => {
                    if let Some(message) = event.error_detail.and_then(|detail| detail.message) {
                        warn!(image = tag, error = %message, "build failed");
                        sink.send(ProgressMessage::error(message.clone()));
                        return Err(build_failed(message).into());
                    }
                    let line = event.stream.unwrap_or_default();
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        sink.send(ProgressMessage::ok(trimmed, json!({ "stream": trimmed })));
                    }
                }
                Some(Err(error)) => {
                    warn!(image = tag, error = %error, "build stream failed");
                    sink.send(ProgressMessage::error(error.to_string()));
                    return Err(build_failed(error.to_string()).into());
                }
                None => break,
            }
        }

        info!(image = tag, "image built");
        Ok(())
    }

    async fn clean_up_cancelled_build(&self, dockerfile: &Utf8Path) {
        let bases = match base_images_from_file(dockerfile) {
            Ok(bases) => bases,
            Err(error) => {
                warn!(
                    dockerfile = %dockerfile,
                    error = %error,
                    "cannot read base images for cleanup"
                );
                return;
            }
        };
        let containers = match self.client.list_containers(Filters::new()).await {
            Ok(containers) => containers,
            Err(error) => {
                warn!(error = %error, "cannot list containers for build cleanup");
                Vec::new()
            }
        };

        for base in &bases {
            let Ok(base_id) = self.image_id(base).await else {
                continue;
            };
            let stale = containers
                .iter()
                .filter(|container| container.image_id.as_deref() == Some(base_id.as_str()))
                .filter_map(|container| container.id.as_deref());
            for container_id in stale {
                match self.client.remove_container(container_id, true).await {
                    Ok(()) => info!(container_id, image = %base, "removed build container"),
                    Err(error) => {
                        warn!(
                            container_id,
                            image = %base,
                            error = %error,
                            "failed to remove build container"
                        );
                    }
                }
            }

            if self.state.image_reference_count(base) == 0 {
                match self.client.remove_image(base, false).await {
                    Ok(()) => info!(image = %base, "removed unreferenced base image"),
                    Err(error) => {
                        warn!(
                            image = %base,
                            error = %error,
                            "failed to remove base image"
                        );
                    }
                }
            }
        }
    }
}

fn proxy_build_args(proxy: &str) -> HashMap<&'static str, String> {
    ["HTTP_PROXY", "HTTPS_PROXY"]
        .into_iter()
        .map(|key| (key, String::from(proxy)))
        .collect()
}
