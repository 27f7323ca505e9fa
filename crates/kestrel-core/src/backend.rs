//! Executable step graph handed to a backend engine.
//!
//! A [`Config`] is the output of the compiler. Stages run in order; the
//! steps of a single stage run concurrently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub stages: Vec<Stage>,
    pub networks: Vec<Network>,
    pub volumes: Vec<Volume>,
}

impl Config {
    /// Iterate over every step of every stage.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|stage| stage.steps.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub alias: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique container name.
    pub name: String,
    /// Display name, as written in the pipeline definition.
    pub alias: String,
    pub image: String,
    pub pull: bool,
    pub detached: bool,
    pub privileged: bool,
    pub working_dir: String,
    pub environment: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<Conn>,
    pub network_mode: Option<String>,
    pub on_success: bool,
    pub on_failure: bool,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            name: String::new(),
            alias: String::new(),
            image: String::new(),
            pull: false,
            detached: false,
            privileged: false,
            working_dir: String::new(),
            environment: BTreeMap::new(),
            entrypoint: Vec::new(),
            command: Vec::new(),
            volumes: Vec::new(),
            networks: Vec::new(),
            network_mode: None,
            on_success: true,
            on_failure: false,
        }
    }
}

/// Network attachment for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conn {
    pub name: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub driver: String,
}

/// Final state of a step container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State {
    pub exit_code: i64,
    pub exited: bool,
    pub oom_killed: bool,
}
