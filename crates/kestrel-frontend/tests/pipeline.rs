//! End-to-end frontend tests: raw definition text to compiled step graph.

use kestrel_core::{Axis, Metadata, Secret};
use kestrel_frontend::{Compiler, Linter, Template, matrix, yaml};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

const DEFINITION: &str = r#"
workspace:
  base: /go
  path: src/github.com/octocat/hello

pipeline:
  test:
    image: golang:${GO_VERSION}
    environment:
      BRANCH: ${CI_COMMIT_BRANCH}
    secrets: [go_version]
    commands:
      - go version
      - go test ./...

matrix:
  GO_VERSION:
    - 1.20
    - 1.21
"#;

fn compile_axis(axis: &Axis) -> kestrel_core::backend::Config {
    let mut metadata = Metadata::default();
    metadata.curr.commit.branch = "main".to_string();
    metadata.job.matrix = axis.clone();

    let mut environ = metadata.environ();
    for (key, value) in axis.iter() {
        environ.insert(key.to_string(), value.to_string());
    }
    let secrets: Vec<Secret> = axis.iter().map(|(k, v)| Secret::new(k, v)).collect();

    let text = Template::parse(DEFINITION).unwrap().execute_map(&environ);
    let config = yaml::parse_str(&text).unwrap();
    Linter::new().with_trusted(true).lint(&config).unwrap();

    Compiler::new()
        .with_prefix("kestrel")
        .with_workspace("/kestrel", "src")
        .with_local(true)
        .with_metadata(metadata)
        .with_secrets(secrets)
        .with_environ(BTreeMap::new())
        .compile(&config)
        .unwrap()
}

#[test]
fn test_matrix_axes_compile_independently() {
    let axes = matrix::parse(DEFINITION).unwrap();
    assert_eq!(axes.len(), 2);

    let images: Vec<String> = axes
        .iter()
        .map(|axis| compile_axis(axis).stages[0].steps[0].image.clone())
        .collect();
    assert_eq!(images, vec!["golang:1.20", "golang:1.21"]);
}

#[test]
fn test_axis_values_reach_step_environment() {
    let axes = matrix::parse(DEFINITION).unwrap();
    let compiled = compile_axis(&axes[1]);
    let step = &compiled.stages[0].steps[0];

    assert_eq!(step.environment["GO_VERSION"], "1.21");
    assert_eq!(step.environment["BRANCH"], "main");
    assert_eq!(step.working_dir, "/go/src/github.com/octocat/hello");
}

#[test]
fn test_substitution_is_deterministic() {
    let axes = matrix::parse(DEFINITION).unwrap();
    let first = compile_axis(&axes[0]);
    let second = compile_axis(&axes[0]);
    assert_eq!(first, second);
}
