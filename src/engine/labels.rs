//! Compose-compatible resource labels and the filters built from them.
//!
//! Stacks are labelled exactly like `docker compose` labels its projects so
//! that `docker compose ls` and vulnlab see the same set of stacks.

use std::collections::HashMap;

use super::client::Filters;

/// Label carrying the stack (compose project) name.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label carrying the compose service name.
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Label marking one-off containers; always `False` for stack services.
pub const ONEOFF_LABEL: &str = "com.docker.compose.oneoff";

/// Labels for a stack-level resource (network or volume).
#[must_use]
pub fn project_labels(stack: &str) -> HashMap<String, String> {
    HashMap::from([(String::from(PROJECT_LABEL), String::from(stack))])
}

/// Labels for a service container in a stack.
#[must_use]
pub fn service_labels(stack: &str, service: &str) -> HashMap<String, String> {
    HashMap::from([
        (String::from(PROJECT_LABEL), String::from(stack)),
        (String::from(SERVICE_LABEL), String::from(service)),
        (String::from(ONEOFF_LABEL), String::from("False")),
    ])
}

/// Filter matching every resource of a stack.
#[must_use]
pub fn project_filter(stack: &str) -> Filters {
    HashMap::from([(
        String::from("label"),
        vec![format!("{PROJECT_LABEL}={stack}")],
    )])
}

/// Filter matching the containers of one service in a stack.
#[must_use]
pub fn service_filter(stack: &str, service: &str) -> Filters {
    HashMap::from([(
        String::from("label"),
        vec![
            format!("{PROJECT_LABEL}={stack}"),
            format!("{SERVICE_LABEL}={service}"),
        ],
    )])
}

/// Filter matching any resource that carries a project label.
#[must_use]
pub fn any_project_filter() -> Filters {
    HashMap::from([(String::from("label"), vec![String::from(PROJECT_LABEL)])])
}

/// Filter matching images by reference.
#[must_use]
pub fn reference_filter(reference: &str) -> Filters {
    HashMap::from([(String::from("reference"), vec![String::from(reference)])])
}

/// Whether a label map satisfies every `key=value` (or bare `key`) entry of a
/// `label` filter.
///
/// This mirrors the engine's own label filter semantics and lets in-process
/// engine doubles answer filtered list calls.
#[must_use]
pub fn labels_match(labels: &HashMap<String, String>, filters: &Filters) -> bool {
    filters.get("label").is_none_or(|wanted| {
        wanted.iter().all(|entry| match entry.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|actual| actual == value),
            None => labels.contains_key(entry.as_str()),
        })
    })
}
