//! Compilation of a linted definition into an executable step graph.
//!
//! The compiler owns every decision about how a container definition maps
//! onto a backend [`Step`]: naming, stage grouping, environment layering,
//! script generation, workspace mounts and privilege escalation.

use crate::yaml::{Config, Container};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use kestrel_core::backend::{self, Conn, Network, Stage, Step, Volume};
use kestrel_core::secrets::image_name;
use kestrel_core::{Error, Metadata, Result, Secret};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Image used for the implicit clone step.
pub const DEFAULT_CLONE_IMAGE: &str = "plugins/git:latest";

const PROXY_KEYS: [&str; 3] = ["no_proxy", "http_proxy", "https_proxy"];

/// Credentials handed to the clone step.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Netrc {
    pub machine: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Netrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Netrc")
            .field("machine", &self.machine)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Builder-style compiler.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    escalated: Vec<String>,
    volumes: Vec<String>,
    networks: Vec<String>,
    prefix: String,
    base: String,
    path: String,
    proxy: BTreeMap<String, String>,
    local: bool,
    netrc: Option<Netrc>,
    metadata: Metadata,
    secrets: Vec<Secret>,
    environ: BTreeMap<String, String>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images that run privileged when used as command-less plugins.
    pub fn with_escalated(mut self, images: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.escalated = images.into_iter().map(Into::into).collect();
        self
    }

    /// Volumes mounted into every step.
    pub fn with_volumes(mut self, volumes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.volumes = volumes.into_iter().map(Into::into).collect();
        self
    }

    /// Default workspace; values from the definition take precedence.
    pub fn with_workspace(mut self, base: impl Into<String>, path: impl Into<String>) -> Self {
        self.base = base.into();
        self.path = path.into();
        self
    }

    /// External networks every step joins.
    pub fn with_networks(mut self, networks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.networks = networks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Pass the host proxy configuration through to every step.
    pub fn with_proxy(self) -> Self {
        self.with_proxy_from(|key| std::env::var(key).ok())
    }

    /// Pass proxy configuration obtained from `lookup` through to every
    /// step. Both lower and upper case variants are consulted and set.
    pub fn with_proxy_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for key in PROXY_KEYS {
            let value = lookup(key).or_else(|| lookup(&key.to_uppercase()));
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                self.proxy.insert(key.to_string(), value.clone());
                self.proxy.insert(key.to_uppercase(), value);
            }
        }
        self
    }

    /// Local builds skip the clone stage.
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn with_netrc(
        mut self,
        machine: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let netrc = Netrc {
            machine: machine.into(),
            username: username.into(),
            password: password.into(),
        };
        self.netrc = (!netrc.machine.is_empty()).then_some(netrc);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_secrets(mut self, secrets: impl IntoIterator<Item = Secret>) -> Self {
        self.secrets = secrets.into_iter().collect();
        self
    }

    /// Environment overrides applied to every step.
    pub fn with_environ(mut self, environ: BTreeMap<String, String>) -> Self {
        self.environ = environ;
        self
    }

    /// Compile a definition into a step graph.
    pub fn compile(&self, config: &Config) -> Result<backend::Config> {
        let workspace = self.workspace(config);
        let mut builder = GraphBuilder {
            compiler: self,
            workspace: &workspace,
            count: 0,
        };

        let mut stages = Vec::new();

        if !self.local {
            let clone_steps = if config.clone.is_empty() {
                let container = Container {
                    name: "clone".to_string(),
                    image: DEFAULT_CLONE_IMAGE.to_string(),
                    ..Default::default()
                };
                vec![builder.step(&container, Section::Clone)?]
            } else {
                config
                    .clone
                    .iter()
                    .map(|c| builder.step(c, Section::Clone))
                    .collect::<Result<Vec<_>>>()?
            };
            stages.push(self.stage(stages.len(), "clone", clone_steps));
        }

        if !config.services.is_empty() {
            let steps = config
                .services
                .iter()
                .map(|c| builder.step(c, Section::Services))
                .collect::<Result<Vec<_>>>()?;
            stages.push(self.stage(stages.len(), "services", steps));
        }

        let mut group: Option<&str> = None;
        for container in config.pipeline.iter() {
            let step = builder.step(container, Section::Pipeline)?;
            let joins_previous = matches!(
                (group, container.group.as_deref()),
                (Some(prev), Some(next)) if prev == next
            );
            if joins_previous && let Some(stage) = stages.last_mut() {
                stage.steps.push(step);
            } else {
                stages.push(self.stage(stages.len(), &container.name, vec![step]));
            }
            group = container.group.as_deref();
        }

        debug!(stages = stages.len(), steps = builder.count, "Compiled pipeline");

        Ok(backend::Config {
            stages,
            networks: vec![Network {
                name: self.default_resource(),
                driver: "bridge".to_string(),
            }],
            volumes: vec![Volume {
                name: self.default_resource(),
                driver: "local".to_string(),
            }],
        })
    }

    fn workspace(&self, config: &Config) -> Workspace {
        let base = if config.workspace.base.is_empty() {
            self.base.clone()
        } else {
            config.workspace.base.clone()
        };
        let path = if config.workspace.path.is_empty() {
            self.path.clone()
        } else {
            config.workspace.path.clone()
        };
        Workspace { base, path }
    }

    fn stage(&self, index: usize, alias: &str, steps: Vec<Step>) -> Stage {
        Stage {
            name: format!("{}_stage_{}", self.prefix, index),
            alias: alias.to_string(),
            steps,
        }
    }

    fn default_resource(&self) -> String {
        format!("{}_default", self.prefix)
    }
}

struct Workspace {
    base: String,
    path: String,
}

impl Workspace {
    fn dir(&self) -> String {
        if self.path.is_empty() {
            return self.base.clone();
        }
        format!(
            "{}/{}",
            self.base.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Clone,
    Services,
    Pipeline,
}

struct GraphBuilder<'a> {
    compiler: &'a Compiler,
    workspace: &'a Workspace,
    count: usize,
}

impl GraphBuilder<'_> {
    fn step(&mut self, container: &Container, section: Section) -> Result<Step> {
        let compiler = self.compiler;
        let name = format!("{}_step_{}", compiler.prefix, self.count);
        self.count += 1;

        let image = with_default_tag(&container.image);
        let workspace_dir = self.workspace.dir();

        let mut environment: BTreeMap<String, String> = container.environment.0.clone();
        environment.extend(compiler.metadata.environ());
        for (key, value) in compiler.metadata.job.matrix.iter() {
            environment.insert(key.to_string(), value.to_string());
        }
        environment.extend(compiler.environ.clone());
        environment.extend(compiler.proxy.clone());
        for (key, value) in settings_environ(container)? {
            environment.insert(key, value);
        }
        for requested in &container.secrets.0 {
            match compiler.secret(requested, &image) {
                Some(secret) => {
                    environment.insert(requested.to_uppercase(), secret.value.clone());
                }
                None => debug!(step = %container.name, secret = %requested, "Secret not available"),
            }
        }
        if section == Section::Clone
            && let Some(netrc) = &compiler.netrc
        {
            environment.insert("CI_NETRC_MACHINE".to_string(), netrc.machine.clone());
            environment.insert("CI_NETRC_USERNAME".to_string(), netrc.username.clone());
            environment.insert("CI_NETRC_PASSWORD".to_string(), netrc.password.clone());
        }
        environment.insert("CI_WORKSPACE".to_string(), workspace_dir.clone());
        environment.insert("CI_WORKSPACE_BASE".to_string(), self.workspace.base.clone());
        environment.insert("CI_WORKSPACE_PATH".to_string(), self.workspace.path.clone());

        let (entrypoint, command) = if container.commands.is_empty() {
            (container.entrypoint.0.clone(), Vec::new())
        } else {
            let script = generate_script(&container.commands.0);
            environment.insert("CI_SCRIPT".to_string(), STANDARD.encode(script));
            environment.insert("HOME".to_string(), "/root".to_string());
            environment.insert("SHELL".to_string(), "/bin/sh".to_string());
            (
                vec!["/bin/sh".to_string(), "-c".to_string()],
                vec!["echo $CI_SCRIPT | base64 -d | /bin/sh -e".to_string()],
            )
        };

        let mut volumes = vec![format!("{}:{}", compiler.default_resource(), self.workspace.base)];
        for spec in compiler.volumes.iter().chain(container.volumes.0.iter()) {
            validate_volume(&container.name, spec)?;
            if !volumes.contains(spec) {
                volumes.push(spec.clone());
            }
        }

        let aliases = vec![container.name.clone()];
        let networks = std::iter::once(compiler.default_resource())
            .chain(compiler.networks.iter().cloned())
            .map(|name| Conn {
                name,
                aliases: aliases.clone(),
            })
            .collect();

        let privileged = container.privileged
            || (container.commands.is_empty() && compiler.is_escalated(&image));

        let (on_success, on_failure) = if container.when.status.is_empty() {
            (true, false)
        } else {
            (
                container.when.status.contains("success"),
                container.when.status.contains("failure"),
            )
        };

        Ok(Step {
            name,
            alias: container.name.clone(),
            image,
            pull: container.pull,
            detached: section == Section::Services || container.detach,
            privileged,
            working_dir: workspace_dir,
            environment,
            entrypoint,
            command,
            volumes,
            networks,
            network_mode: container.network_mode.clone(),
            on_success,
            on_failure,
        })
    }
}

impl Compiler {
    fn secret(&self, requested: &str, image: &str) -> Option<&Secret> {
        let wanted = requested.to_lowercase();
        self.secrets
            .iter()
            .find(|s| s.name.to_lowercase() == wanted && s.matches_image(image))
    }

    fn is_escalated(&self, image: &str) -> bool {
        let name = image_name(image);
        self.escalated.iter().any(|e| image_name(e) == name)
    }
}

fn with_default_tag(image: &str) -> String {
    if image_name(image) == image {
        format!("{}:latest", image)
    } else {
        image.to_string()
    }
}

fn generate_script(commands: &[String]) -> String {
    let mut script = String::from("unset CI_SCRIPT\n");
    for command in commands {
        let escaped = command.replace('\'', r#"'"'"'"#);
        script.push_str(&format!("echo + '{}'\n{}\n", escaped, command));
    }
    script
}

fn settings_environ(container: &Container) -> Result<Vec<(String, String)>> {
    container
        .settings
        .iter()
        .map(|(key, value)| {
            let key = format!("PLUGIN_{}", key.to_uppercase().replace(['-', '.'], "_"));
            Ok((key, setting_value(value)?))
        })
        .collect()
}

fn setting_value(value: &serde_yaml::Value) -> Result<String> {
    use serde_yaml::Value;

    let scalar = |value: &Value| match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    };

    if let Some(text) = scalar(value) {
        return Ok(text);
    }
    if let Value::Sequence(items) = value
        && let Some(parts) = items.iter().map(scalar).collect::<Option<Vec<_>>>()
    {
        return Ok(parts.join(","));
    }
    serde_json::to_string(value).map_err(|e| Error::Compile(format!("invalid setting: {}", e)))
}

fn validate_volume(container: &str, spec: &str) -> Result<()> {
    let parts: Vec<&str> = spec.split(':').collect();
    let valid = match parts.as_slice() {
        [src, dst] | [src, dst, _] => !src.is_empty() && dst.starts_with('/'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Compile(format!(
            "{}: invalid volume specification '{}'",
            container, spec
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::parse_str;
    use base64::Engine as _;
    use kestrel_core::Axis;
    use pretty_assertions::assert_eq;

    fn compiler() -> Compiler {
        Compiler::new()
            .with_prefix("kestrel")
            .with_workspace("/kestrel", "src")
            .with_local(true)
    }

    #[test]
    fn test_local_build_has_no_clone_stage() {
        let config = parse_str("pipeline:\n  build:\n    image: golang\n    commands: [go build]\n").unwrap();
        let compiled = compiler().compile(&config).unwrap();
        assert_eq!(compiled.stages.len(), 1);
        assert_eq!(compiled.stages[0].alias, "build");
        assert_eq!(compiled.networks[0].name, "kestrel_default");
        assert_eq!(compiled.volumes[0].name, "kestrel_default");

        let step = &compiled.stages[0].steps[0];
        assert_eq!(step.name, "kestrel_step_0");
        assert_eq!(step.image, "golang:latest");
        assert_eq!(step.working_dir, "/kestrel/src");
        assert_eq!(step.volumes, vec!["kestrel_default:/kestrel"]);
        assert_eq!(step.networks[0].aliases, vec!["build"]);
    }

    #[test]
    fn test_remote_build_clones_with_netrc() {
        let config = parse_str("pipeline:\n  build:\n    image: golang\n").unwrap();
        let compiled = compiler()
            .with_local(false)
            .with_netrc("github.com", "octocat", "hunter2")
            .compile(&config)
            .unwrap();
        assert_eq!(compiled.stages.len(), 2);

        let clone = &compiled.stages[0].steps[0];
        assert_eq!(clone.image, DEFAULT_CLONE_IMAGE);
        assert_eq!(clone.environment["CI_NETRC_PASSWORD"], "hunter2");

        let build = &compiled.stages[1].steps[0];
        assert!(!build.environment.contains_key("CI_NETRC_PASSWORD"));
    }

    #[test]
    fn test_commands_become_script() {
        let config = parse_str("pipeline:\n  build:\n    image: golang:1.21\n    commands: [go build, go test]\n").unwrap();
        let step = compiler().compile(&config).unwrap().stages[0].steps[0].clone();
        assert_eq!(step.entrypoint, vec!["/bin/sh", "-c"]);
        assert_eq!(step.command, vec!["echo $CI_SCRIPT | base64 -d | /bin/sh -e"]);

        let decoded = STANDARD.decode(&step.environment["CI_SCRIPT"]).unwrap();
        let script = String::from_utf8(decoded).unwrap();
        assert!(script.contains("echo + 'go build'\ngo build\n"));
        assert!(script.contains("go test\n"));
    }

    #[test]
    fn test_environment_precedence() {
        let text = r#"
pipeline:
  build:
    image: golang
    environment:
      CI_REPO: from-container
      GO_VERSION: from-container
      DEBUG: from-container
      ONLY_CONTAINER: kept
    secrets: [go_version]
"#;
        let config = parse_str(text).unwrap();
        let mut metadata = Metadata::default();
        metadata.repo.name = "octocat/hello".to_string();
        metadata.job.matrix = [("GO_VERSION", "1.21")].into_iter().collect::<Axis>();

        let mut environ = BTreeMap::new();
        environ.insert("DEBUG".to_string(), "override".to_string());

        let step = compiler()
            .with_metadata(metadata)
            .with_environ(environ)
            .with_secrets([Secret::new("GO_VERSION", "secret-1.21")])
            .compile(&config)
            .unwrap()
            .stages[0]
            .steps[0]
            .clone();

        assert_eq!(step.environment["ONLY_CONTAINER"], "kept");
        assert_eq!(step.environment["CI_REPO"], "octocat/hello");
        assert_eq!(step.environment["DEBUG"], "override");
        assert_eq!(step.environment["GO_VERSION"], "secret-1.21");
        assert_eq!(step.environment["CI_WORKSPACE"], "/kestrel/src");
    }

    #[test]
    fn test_secret_image_restriction() {
        let config = parse_str("pipeline:\n  build:\n    image: golang\n    secrets: [token]\n").unwrap();
        let step = compiler()
            .with_secrets([Secret::new("TOKEN", "abc").with_matches(["plugins/docker"])])
            .compile(&config)
            .unwrap()
            .stages[0]
            .steps[0]
            .clone();
        assert!(!step.environment.contains_key("TOKEN"));
    }

    #[test]
    fn test_proxy_passthrough() {
        let config = parse_str("pipeline:\n  build:\n    image: golang\n").unwrap();
        let step = compiler()
            .with_proxy_from(|key| (key == "HTTP_PROXY").then(|| "http://proxy:3128".to_string()))
            .compile(&config)
            .unwrap()
            .stages[0]
            .steps[0]
            .clone();
        assert_eq!(step.environment["http_proxy"], "http://proxy:3128");
        assert_eq!(step.environment["HTTP_PROXY"], "http://proxy:3128");
        assert!(!step.environment.contains_key("NO_PROXY"));
    }

    #[test]
    fn test_plugin_settings_and_escalation() {
        let text = r#"
pipeline:
  publish:
    image: plugins/docker
    settings:
      repo: octocat/hello
      tags: [latest, "1.0"]
      build-args:
        VERSION: 1
"#;
        let config = parse_str(text).unwrap();
        let step = compiler()
            .with_escalated(["plugins/docker"])
            .compile(&config)
            .unwrap()
            .stages[0]
            .steps[0]
            .clone();
        assert!(step.privileged);
        assert_eq!(step.environment["PLUGIN_REPO"], "octocat/hello");
        assert_eq!(step.environment["PLUGIN_TAGS"], "latest,1.0");
        assert_eq!(step.environment["PLUGIN_BUILD_ARGS"], r#"{"VERSION":1}"#);
        assert!(step.entrypoint.is_empty());
    }

    #[test]
    fn test_escalation_requires_no_commands() {
        let text = "pipeline:\n  publish:\n    image: plugins/docker\n    commands: [docker ps]\n";
        let config = parse_str(text).unwrap();
        let step = compiler()
            .with_escalated(["plugins/docker"])
            .compile(&config)
            .unwrap()
            .stages[0]
            .steps[0]
            .clone();
        assert!(!step.privileged);
    }

    #[test]
    fn test_groups_form_parallel_stages() {
        let text = r#"
services:
  redis:
    image: redis
pipeline:
  lint:
    image: golang
    group: checks
  vet:
    image: golang
    group: checks
  build:
    image: golang
  notify:
    image: plugins/slack
    when:
      status: [failure]
"#;
        let config = parse_str(text).unwrap();
        let compiled = compiler().compile(&config).unwrap();
        let layout: Vec<(String, usize)> = compiled
            .stages
            .iter()
            .map(|s| (s.alias.clone(), s.steps.len()))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("services".to_string(), 1),
                ("lint".to_string(), 2),
                ("build".to_string(), 1),
                ("notify".to_string(), 1),
            ]
        );
        assert!(compiled.stages[0].steps[0].detached);

        let notify = &compiled.stages[3].steps[0];
        assert!(!notify.on_success);
        assert!(notify.on_failure);
    }

    #[test]
    fn test_volumes_are_validated_and_deduplicated() {
        let config = parse_str("pipeline:\n  build:\n    image: golang\n    volumes: [/tmp/cache:/cache:ro]\n").unwrap();
        let step = compiler()
            .with_volumes(["kestrel_default:/kestrel", "/src:/kestrel/src"])
            .compile(&config)
            .unwrap()
            .stages[0]
            .steps[0]
            .clone();
        assert_eq!(
            step.volumes,
            vec!["kestrel_default:/kestrel", "/src:/kestrel/src", "/tmp/cache:/cache:ro"]
        );

        let bad = parse_str("pipeline:\n  build:\n    image: golang\n    volumes: [cache]\n").unwrap();
        let err = compiler().compile(&bad).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));

        let relative = parse_str("pipeline:\n  build:\n    image: golang\n    volumes: [/a:relative]\n").unwrap();
        assert!(compiler().compile(&relative).is_err());
    }

    #[test]
    fn test_definition_workspace_wins() {
        let text = "workspace:\n  base: /go\n  path: src/app\npipeline:\n  build:\n    image: golang\n";
        let config = parse_str(text).unwrap();
        let step = compiler().compile(&config).unwrap().stages[0].steps[0].clone();
        assert_eq!(step.working_dir, "/go/src/app");
        assert_eq!(step.environment["CI_WORKSPACE_BASE"], "/go");
    }
}
