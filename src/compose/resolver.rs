//! Compose document loading, interpolation and validation.

use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::document::{
    BuildSection, CommandLine, ComposeDocument, DependsOn, Environment, HealthcheckSection,
    PortEntry, ResourcesSection, ServiceDocument, VolumeEntry,
};
use super::graph::{
    BuildSpec, HealthcheckSpec, PortSpec, ResourceSpec, RestartSpec, ServiceGraph, ServiceSpec,
    VolumeSpec,
};
use super::interpolate::interpolate;
use super::project_name::{default_project_name, normalize_project_name};
use super::read_text;
use super::units::{parse_bytes, parse_duration_nanos, parse_nano_cpus};
use crate::error::ComposeError;

/// Variable bound to the normalized project name during interpolation.
pub const PROJECT_NAME_VAR: &str = "COMPOSE_PROJECT_NAME";

/// Loads compose files into [`ServiceGraph`]s.
///
/// Variables other than [`PROJECT_NAME_VAR`] come from `env`.
#[derive(Debug, Clone)]
pub struct ComposeResolver<E> {
    env: E,
}

impl<E: mockable::Env> ComposeResolver<E> {
    /// Create a resolver reading variables from `env`.
    pub const fn new(env: E) -> Self {
        Self { env }
    }

    /// Load, interpolate and type-check the compose file at `path`, using
    /// the normalized form of `project_name` as the stack namespace.
    ///
    /// Build services are tagged `{dir}-{service}` where `{dir}` is the
    /// compose file's [`default_project_name`], so one build serves every
    /// stack deployed from the same file.
    ///
    /// # Errors
    ///
    /// Returns a `ComposeError` when the file cannot be read or parsed, a
    /// service lacks both `image` and `build`, a dependency is undefined, or
    /// a port, duration, size or cpu value is malformed.
    pub fn resolve_project(
        &self,
        path: &Utf8Path,
        project_name: &str,
    ) -> Result<ServiceGraph, ComposeError> {
        let project = normalize_project_name(project_name);
        let image_project = default_project_name(path);
        let read_error = |message: String| ComposeError::Read {
            path: path.as_std_path().to_path_buf(),
            message,
        };

        let raw = read_text(path).map_err(|e| read_error(e.to_string()))?;
        let compose_dir = path
            .canonicalize_utf8()
            .map_err(|e| read_error(e.to_string()))?
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();

        let overrides = HashMap::from([(String::from(PROJECT_NAME_VAR), project.clone())]);
        let interpolated = interpolate(&raw, &overrides, &self.env)?;
        let document: ComposeDocument =
            serde_yaml::from_str(&interpolated).map_err(|e| ComposeError::Parse {
                path: path.as_std_path().to_path_buf(),
                message: e.to_string(),
            })?;

        let volumes: Vec<String> = document.volumes.keys().cloned().collect();
        let services = document
            .services
            .iter()
            .map(|(name, service)| {
                ServiceContext {
                    name,
                    compose_dir: &compose_dir,
                    image_project: &image_project,
                    declared_services: &document.services,
                    declared_volumes: &volumes,
                    home: self.env.string("HOME"),
                }
                .resolve(service)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            compose = %path,
            project = %project,
            services = services.len(),
            "resolved compose project"
        );
        Ok(ServiceGraph {
            project,
            compose_dir,
            services,
            volumes,
        })
    }

    /// List every image a compose file needs: prebuilt images, synthesized
    /// tags of build services and the base images their Dockerfiles pull.
    ///
    /// The result is de-duplicated, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns a `ComposeError` when the file does not resolve.
    pub fn list_images(&self, path: &Utf8Path) -> Result<Vec<String>, ComposeError> {
        self.resolve_project(path, &default_project_name(path))?
            .required_images()
    }
}

struct ServiceContext<'a> {
    name: &'a str,
    compose_dir: &'a Utf8Path,
    image_project: &'a str,
    declared_services: &'a BTreeMap<String, ServiceDocument>,
    declared_volumes: &'a [String],
    home: Option<String>,
}

impl ServiceContext<'_> {
    fn resolve(&self, service: &ServiceDocument) -> Result<ServiceSpec, ComposeError> {
        let build = service.build.as_ref().map(|section| self.build_spec(section));
        let image = match (&build, service.image.as_deref()) {
            (Some(_), _) => format!("{}-{}", self.image_project, self.name),
            (None, Some(image)) if !image.trim().is_empty() => String::from(image.trim()),
            (None, _) => {
                return Err(ComposeError::MissingImage {
                    service: String::from(self.name),
                });
            }
        };

        Ok(ServiceSpec {
            name: String::from(self.name),
            image,
            build,
            depends_on: self.dependencies(service.depends_on.as_ref())?,
            environment: environment_entries(service.environment.as_ref()),
            volumes: service
                .volumes
                .iter()
                .map(|entry| self.volume(entry))
                .collect::<Result<_, _>>()?,
            ports: service
                .ports
                .iter()
                .map(|entry| self.port(entry))
                .collect::<Result<_, _>>()?,
            command: service.command.as_ref().map(command_words),
            entrypoint: service.entrypoint.as_ref().map(command_words),
            working_dir: service.working_dir.clone(),
            user: service.user.as_ref().map(super::document::Scalar::render),
            healthcheck: service
                .healthcheck
                .as_ref()
                .map(|section| self.healthcheck(section))
                .transpose()?,
            resources: self.resources(service)?,
            restart: restart_policy(service),
        })
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ComposeError {
        ComposeError::InvalidValue {
            service: String::from(self.name),
            field,
            reason: reason.into(),
        }
    }

    fn build_spec(&self, section: &BuildSection) -> BuildSpec {
        let (context, dockerfile) = match section {
            BuildSection::Context(context) => (context.as_str(), None),
            BuildSection::Detailed {
                context,
                dockerfile,
            } => (
                context.as_deref().unwrap_or("."),
                dockerfile.as_deref(),
            ),
        };
        let context_dir = clean_path(&self.compose_dir.join(context));
        let dockerfile_path = clean_path(&context_dir.join(dockerfile.unwrap_or("Dockerfile")));
        BuildSpec {
            context: context_dir,
            dockerfile: dockerfile_path,
        }
    }

    fn dependencies(&self, depends_on: Option<&DependsOn>) -> Result<Vec<String>, ComposeError> {
        let names = depends_on.map(DependsOn::names).unwrap_or_default();
        if let Some(unknown) = names
            .iter()
            .find(|dependency| !self.declared_services.contains_key(dependency.as_str()))
        {
            return Err(ComposeError::UnknownDependency {
                service: String::from(self.name),
                dependency: unknown.clone(),
            });
        }
        Ok(names)
    }

    fn port(&self, entry: &PortEntry) -> Result<PortSpec, ComposeError> {
        match entry {
            PortEntry::Long { target, protocol } => Ok(PortSpec {
                container_port: *target,
                protocol: protocol.clone().unwrap_or_else(|| String::from("tcp")),
            }),
            PortEntry::Short(value) => {
                let text = value.render();
                let (mapping, protocol) = text.split_once('/').unwrap_or((text.as_str(), "tcp"));
                let container = mapping.rsplit(':').next().unwrap_or_default();
                if container.contains('-') {
                    return Err(self.invalid(
                        "ports",
                        format!("port ranges are not supported: '{text}'"),
                    ));
                }
                let container_port = container
                    .parse::<u16>()
                    .map_err(|_| self.invalid("ports", format!("invalid port '{text}'")))?;
                Ok(PortSpec {
                    container_port,
                    protocol: protocol.to_ascii_lowercase(),
                })
            }
        }
    }

    fn volume(&self, entry: &VolumeEntry) -> Result<VolumeSpec, ComposeError> {
        match entry {
            VolumeEntry::Short(spec) => {
                let (source, target, read_only) = split_short_volume(spec)
                    .ok_or_else(|| self.invalid("volumes", format!("invalid volume '{spec}'")))?;
                match source {
                    None => Ok(VolumeSpec::Anonymous { target }),
                    Some(source_text) => self.classify_source(source_text, target, read_only),
                }
            }
            VolumeEntry::Long {
                kind,
                source,
                target,
                read_only,
            } => match (kind.as_deref(), source) {
                (Some("bind"), Some(source_text)) => Ok(VolumeSpec::Bind {
                    source: self.expand_home(source_text),
                    target: target.clone(),
                    read_only: *read_only,
                }),
                (Some("bind"), None) => Err(self.invalid("volumes", "bind mount without source")),
                (Some("volume") | None, None) => Ok(VolumeSpec::Anonymous {
                    target: target.clone(),
                }),
                (Some("volume"), Some(source_text)) => {
                    self.named_volume(source_text, target.clone(), *read_only)
                }
                (None, Some(source_text)) => {
                    self.classify_source(source_text.clone(), target.clone(), *read_only)
                }
                (Some(other), _) => Err(self.invalid(
                    "volumes",
                    format!("unsupported volume type '{other}'"),
                )),
            },
        }
    }

    fn classify_source(
        &self,
        source: String,
        target: String,
        read_only: bool,
    ) -> Result<VolumeSpec, ComposeError> {
        if looks_like_path(&source) {
            Ok(VolumeSpec::Bind {
                source: self.expand_home(&source),
                target,
                read_only,
            })
        } else {
            self.named_volume(&source, target, read_only)
        }
    }

    fn named_volume(
        &self,
        name: &str,
        target: String,
        read_only: bool,
    ) -> Result<VolumeSpec, ComposeError> {
        if !self.declared_volumes.iter().any(|declared| declared == name) {
            return Err(self.invalid(
                "volumes",
                format!("named volume '{name}' is not declared at top level"),
            ));
        }
        Ok(VolumeSpec::Named {
            name: String::from(name),
            target,
            read_only,
        })
    }

    fn expand_home(&self, source: &str) -> String {
        match (source.strip_prefix('~'), self.home.as_deref()) {
            (Some(rest), Some(home)) => format!("{home}{rest}"),
            _ => String::from(source),
        }
    }

    fn healthcheck(&self, section: &HealthcheckSection) -> Result<HealthcheckSpec, ComposeError> {
        let test = match &section.test {
            _ if section.disable => vec![String::from("NONE")],
            Some(CommandLine::Shell(shell)) => vec![String::from("CMD-SHELL"), shell.clone()],
            Some(CommandLine::Exec(words)) => words.clone(),
            None => Vec::new(),
        };
        if test.first().is_some_and(|word| word == "NONE") {
            return Ok(HealthcheckSpec {
                test,
                ..HealthcheckSpec::default()
            });
        }

        let duration = |value: Option<&String>| {
            value
                .map(|text| {
                    parse_duration_nanos(text).map_err(|reason| self.invalid("healthcheck", reason))
                })
                .transpose()
        };
        Ok(HealthcheckSpec {
            test,
            interval: duration(section.interval.as_ref())?,
            timeout: duration(section.timeout.as_ref())?,
            retries: section.retries,
            start_period: duration(section.start_period.as_ref())?,
        })
    }

    fn resources(&self, service: &ServiceDocument) -> Result<ResourceSpec, ComposeError> {
        let Some(ResourcesSection {
            limits,
            reservations,
        }) = service.deploy.as_ref().and_then(|deploy| deploy.resources.as_ref())
        else {
            return Ok(ResourceSpec::default());
        };

        let nano_cpus = limits
            .as_ref()
            .and_then(|values| values.cpus.as_ref())
            .map(|cpus| parse_nano_cpus(&cpus.render()))
            .transpose()
            .map_err(|reason| self.invalid("deploy.resources.limits.cpus", reason))?
            .unwrap_or(0);
        let memory = limits
            .as_ref()
            .and_then(|values| values.memory.as_ref())
            .map(|memory| parse_bytes(&memory.render()))
            .transpose()
            .map_err(|reason| self.invalid("deploy.resources.limits.memory", reason))?
            .unwrap_or(0);
        let memory_reservation = reservations
            .as_ref()
            .and_then(|values| values.memory.as_ref())
            .map(|memory| parse_bytes(&memory.render()))
            .transpose()
            .map_err(|reason| self.invalid("deploy.resources.reservations.memory", reason))?
            .unwrap_or(0);

        Ok(ResourceSpec {
            nano_cpus,
            memory,
            memory_reservation,
        })
    }
}

fn environment_entries(environment: Option<&Environment>) -> Vec<String> {
    match environment {
        None => Vec::new(),
        Some(Environment::List(entries)) => entries.clone(),
        Some(Environment::Map(entries)) => entries
            .iter()
            .map(|(key, value)| match value {
                Some(scalar) => format!("{key}={}", scalar.render()),
                None => key.clone(),
            })
            .collect(),
    }
}

fn command_words(command: &CommandLine) -> Vec<String> {
    match command {
        CommandLine::Exec(words) => words.clone(),
        CommandLine::Shell(line) => split_words(line),
    }
}

/// Split a shell-style command line on whitespace, honouring single quotes,
/// double quotes and backslash escapes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (Some('\''), _) => current.push(c),
            (_, '\\') => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                in_word = true;
            }
            (Some(_), _) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, _) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, _) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn restart_policy(service: &ServiceDocument) -> Option<RestartSpec> {
    let deploy_policy = service
        .deploy
        .as_ref()
        .and_then(|deploy| deploy.restart_policy.as_ref());
    if let Some(policy) = deploy_policy {
        let condition = policy.condition.as_deref().unwrap_or("any");
        let name = match condition {
            "any" => "always",
            "none" => "no",
            other => other,
        };
        return Some(RestartSpec {
            policy: String::from(name),
            max_attempts: policy.max_attempts,
        });
    }

    service.restart.as_deref().map(|restart| {
        let (policy, attempts) = restart.split_once(':').unwrap_or((restart, ""));
        RestartSpec {
            policy: String::from(policy),
            max_attempts: attempts.parse().ok(),
        }
    })
}

/// Split `source:target[:mode]`, keeping a Windows drive prefix on the
/// source. Returns `(source, target, read_only)`.
fn split_short_volume(spec: &str) -> Option<(Option<String>, String, bool)> {
    let (drive, rest) = if has_drive_prefix(spec) {
        spec.split_at(2)
    } else {
        ("", spec)
    };
    let parts: Vec<&str> = rest.split(':').collect();
    let read_only = |mode: &str| mode.split(',').any(|flag| flag == "ro");

    match parts.as_slice() {
        [target] if drive.is_empty() && !target.is_empty() => {
            Some((None, String::from(*target), false))
        }
        [source, target] if !target.is_empty() => {
            Some((Some(format!("{drive}{source}")), String::from(*target), false))
        }
        [source, target, mode] if !target.is_empty() => Some((
            Some(format!("{drive}{source}")),
            String::from(*target),
            read_only(mode),
        )),
        _ => None,
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), Some('\\' | '/')) if letter.is_ascii_alphabetic()
    )
}

fn looks_like_path(source: &str) -> bool {
    source.starts_with('.')
        || source.starts_with('/')
        || source.starts_with('~')
        || source.starts_with('\\')
        || source.contains('/')
        || source.contains('\\')
        || has_drive_prefix(source)
}

/// Lexically normalize `.` and `..` components.
pub(crate) fn clean_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut cleaned = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            camino::Utf8Component::CurDir => {}
            camino::Utf8Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_str()),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("nginx -g 'daemon off;'", vec!["nginx", "-g", "daemon off;"])]
    #[case("sh -c \"echo $HOME\"", vec!["sh", "-c", "echo $HOME"])]
    #[case("  java   -jar app.jar ", vec!["java", "-jar", "app.jar"])]
    #[case("echo a\\ b ''", vec!["echo", "a b", ""])]
    fn split_words_honours_quotes(#[case] line: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_words(line), expected);
    }

    #[rstest]
    #[case("/data", Some((None, "/data", false)))]
    #[case("./html:/var/www/html", Some((Some("./html"), "/var/www/html", false)))]
    #[case("db-data:/var/lib/mysql:ro", Some((Some("db-data"), "/var/lib/mysql", true)))]
    #[case("C:\\lab\\data:/data:rw", Some((Some("C:\\lab\\data"), "/data", false)))]
    #[case("a:b:c:d", None)]
    fn split_short_volume_cases(
        #[case] spec: &str,
        #[case] expected: Option<(Option<&str>, &str, bool)>,
    ) {
        let parsed = split_short_volume(spec);
        let normalized = parsed
            .as_ref()
            .map(|(source, target, ro)| (source.as_deref(), target.as_str(), *ro));
        assert_eq!(normalized, expected);
    }

    #[rstest]
    #[case("/srv/lab/./web/../db", "/srv/lab/db")]
    #[case("/srv/lab/html", "/srv/lab/html")]
    fn clean_path_removes_dot_segments(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(clean_path(Utf8Path::new(raw)), Utf8PathBuf::from(expected));
    }
}
