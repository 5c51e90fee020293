//! Shared `mockall` double for the engine seam.

use std::collections::HashMap;

use bollard::models::{
    BuildInfo, ContainerCreateBody, ContainerCreateResponse, ContainerSummary, CreateImageInfo,
    ImageSummary, NetworkConnectRequest, NetworkCreateRequest,
};
use bollard::query_parameters::{BuildImageOptions, CreateContainerOptions};
use futures_util::StreamExt;
use mockall::mock;
use rstest::fixture;

use super::client::{
    ContainerDetails, EngineClient, EngineFuture, EngineStream, Filters, ImageDetails,
    NetworkDetails,
};

mock! {
    #[derive(Debug)]
    pub Engine {}

    impl EngineClient for Engine {
        fn ping<'a>(&'a self) -> EngineFuture<'a, ()>;
        fn inspect_image<'a>(&'a self, name: &str) -> EngineFuture<'a, ImageDetails>;
        fn list_images<'a>(&'a self, filters: Filters) -> EngineFuture<'a, Vec<ImageSummary>>;
        fn pull_image<'a>(&'a self, name: &str) -> EngineStream<'a, CreateImageInfo>;
        fn build_image<'a>(
            &'a self,
            options: BuildImageOptions,
            context: Vec<u8>,
        ) -> EngineStream<'a, BuildInfo>;
        fn remove_image<'a>(&'a self, name: &str, force: bool) -> EngineFuture<'a, ()>;
        fn create_container<'a>(
            &'a self,
            options: Option<CreateContainerOptions>,
            config: ContainerCreateBody,
        ) -> EngineFuture<'a, ContainerCreateResponse>;
        fn start_container<'a>(&'a self, id: &str) -> EngineFuture<'a, ()>;
        fn inspect_container<'a>(&'a self, id: &str) -> EngineFuture<'a, ContainerDetails>;
        fn list_containers<'a>(
            &'a self,
            filters: Filters,
        ) -> EngineFuture<'a, Vec<ContainerSummary>>;
        fn remove_container<'a>(&'a self, id: &str, force: bool) -> EngineFuture<'a, ()>;
        fn create_network<'a>(&'a self, request: NetworkCreateRequest) -> EngineFuture<'a, ()>;
        fn connect_network<'a>(
            &'a self,
            network: &str,
            request: NetworkConnectRequest,
        ) -> EngineFuture<'a, ()>;
        fn list_networks<'a>(&'a self, filters: Filters) -> EngineFuture<'a, Vec<NetworkDetails>>;
        fn remove_network<'a>(&'a self, name: &str) -> EngineFuture<'a, ()>;
        fn create_volume<'a>(
            &'a self,
            name: &str,
            labels: HashMap<String, String>,
        ) -> EngineFuture<'a, ()>;
        fn list_volumes<'a>(&'a self, filters: Filters) -> EngineFuture<'a, Vec<String>>;
        fn remove_volume<'a>(&'a self, name: &str) -> EngineFuture<'a, ()>;
    }
}

/// An engine error carrying an HTTP status, as bollard reports server errors.
pub(crate) fn server_error(status_code: u16, message: &str) -> bollard::errors::Error {
    bollard::errors::Error::DockerResponseServerError {
        status_code,
        message: String::from(message),
    }
}

/// A ready future resolving to `value`.
pub(crate) fn ready<T: Send + 'static>(
    value: Result<T, bollard::errors::Error>,
) -> EngineFuture<'static, T> {
    Box::pin(async move { value })
}

/// A stream yielding `items` then ending.
pub(crate) fn stream_of<T: Send + 'static>(
    items: Vec<Result<T, bollard::errors::Error>>,
) -> EngineStream<'static, T> {
    futures_util::stream::iter(items).boxed()
}

/// A stream that never yields.
pub(crate) fn pending_stream<T: Send + 'static>() -> EngineStream<'static, T> {
    futures_util::stream::pending().boxed()
}

/// A container summary with the given id, name, image id and labels.
pub(crate) fn container_summary(
    id: &str,
    name: &str,
    image_id: &str,
    labels: HashMap<String, String>,
) -> ContainerSummary {
    ContainerSummary {
        id: Some(String::from(id)),
        names: Some(vec![format!("/{name}")]),
        image_id: Some(String::from(image_id)),
        image: Some(String::from(image_id)),
        labels: Some(labels),
        ..ContainerSummary::default()
    }
}

#[fixture]
pub(crate) fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
}
