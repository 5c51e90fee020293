//! Registry pulls with progress streaming and cancellation.

use bollard::errors::Error as BollardError;
use bollard::models::CreateImageInfo;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ImagePipeline;
use crate::channel::{ProgressMessage, ProgressSink};
use crate::engine::{EngineClient, is_not_found};
use crate::error::{ImageError, VulnlabError};

impl<C: EngineClient> ImagePipeline<C> {
    /// Pull `image` unless it is already present.
    ///
    /// # Errors
    ///
    /// Propagates every [`pull_image`](Self::pull_image) error.
    pub async fn ensure_image(
        &self,
        image: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(), VulnlabError> {
        if self.image_exists(image).await? {
            return Ok(());
        }
        self.pull_image(image, cancel, sink).await
    }

    /// Pull `image` from its registry, forwarding every progress event.
    ///
    /// Stream errors and the end of the stream re-check whether the image
    /// landed locally before deciding the outcome. Cancellation always
    /// reports [`ImageError::Cancelled`]; a later
    /// [`image_exists`](Self::image_exists) shows whether the layers arrived.
    ///
    /// # Errors
    ///
    /// Returns `ImageError::AlreadyPresent` when the image exists before the
    /// pull, `ImageError::Cancelled` when `cancel` fires first,
    /// `ImageError::NotFound` when the registry does not know the image and
    /// `ImageError::PullFailed` for any other failure.
    pub async fn pull_image(
        &self,
        image: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(), VulnlabError> {
        if self.image_exists(image).await? {
            return Err(ImageError::AlreadyPresent {
                image: String::from(image),
            }
            .into());
        }

        info!(image, "pulling image");
        let mut stream = self.client.pull_image(image);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.conclude_cancelled_pull(image).await,
                next_item = stream.next() => next_item,
            };

            match next {
                Some(Ok(event)) => match event
                    .error_detail
                    .as_ref()
                    .and_then(|detail| detail.message.clone())
                {
                    Some(message) => {
                        return self
                            .conclude_pull_failure(image, PullFailure::Reported(message))
                            .await;
                    }
                    None => sink.send(progress_event(&event)),
                },
                Some(Err(error)) => {
                    return self
                        .conclude_pull_failure(image, PullFailure::Engine(error))
                        .await;
                }
                None => break,
            }
        }

        if self.image_exists(image).await? {
            info!(image, "image pulled");
            sink.send(ProgressMessage::ok(
                format!("image '{image}' pulled"),
                json!({ "image": image }),
            ));
            Ok(())
        } else {
            Err(ImageError::PullFailed {
                image: String::from(image),
                message: String::from("pull finished without the image being present"),
            }
            .into())
        }
    }

    async fn conclude_cancelled_pull(&self, image: &str) -> Result<(), VulnlabError> {
        if self.image_exists(image).await.unwrap_or(false) {
            info!(image, "pull cancelled after the image landed");
        } else {
            info!(image, "pull cancelled");
        }
        Err(ImageError::Cancelled {
            image: String::from(image),
            operation: "pull",
        }
        .into())
    }

    async fn conclude_pull_failure(
        &self,
        image: &str,
        failure: PullFailure,
    ) -> Result<(), VulnlabError> {
        if self.image_exists(image).await? {
            warn!(image, error = %failure, "pull reported an error but the image is present");
            return Ok(());
        }
        warn!(image, error = %failure, "pull failed");
        let error = if failure.is_not_found() {
            ImageError::NotFound {
                image: String::from(image),
            }
        } else {
            ImageError::PullFailed {
                image: String::from(image),
                message: failure.to_string(),
            }
        };
        Err(error.into())
    }
}

enum PullFailure {
    Engine(BollardError),
    Reported(String),
}

impl PullFailure {
    fn is_not_found(&self) -> bool {
        match self {
            Self::Engine(error) => {
                is_not_found(error) || message_means_not_found(&error.to_string())
            }
            Self::Reported(message) => message_means_not_found(message),
        }
    }
}

impl std::fmt::Display for PullFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(error) => write!(f, "{error}"),
            Self::Reported(message) => f.write_str(message),
        }
    }
}

fn message_means_not_found(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("manifest unknown")
        || lowered.contains("not found")
        || lowered.contains("repository does not exist")
}

pub(super) fn progress_event(event: &CreateImageInfo) -> ProgressMessage {
    let status = event.status.clone().unwrap_or_default();
    ProgressMessage::ok(
        status.clone(),
        json!({
            "status": status,
            "progress": progress_text(event),
            "id": event.id,
        }),
    )
}

/// Render the layer byte counters as `current/total`.
fn progress_text(event: &CreateImageInfo) -> Option<String> {
    let detail = event.progress_detail.as_ref()?;
    match (detail.current, detail.total) {
        (Some(current), Some(total)) => Some(format!("{current}/{total}")),
        (Some(current), None) => Some(current.to_string()),
        _ => None,
    }
}
