//! Runtime metadata describing the repository, builds, job and system.
//!
//! A [`Metadata`] snapshot is built once per axis and never mutated. It is
//! flattened into `CI_*` environment variables for template substitution
//! and for injection into step containers.

use crate::axis::Axis;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const EVENT_PUSH: &str = "push";
pub const EVENT_PULL: &str = "pull_request";
pub const EVENT_TAG: &str = "tag";
pub const EVENT_DEPLOY: &str = "deployment";

static PULL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("static regex is valid"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub repo: Repo,
    pub curr: Build,
    pub prev: Build,
    pub job: Job,
    pub sys: System,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    pub link: String,
    pub remote: String,
    pub private: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub number: i64,
    pub parent: i64,
    pub created: i64,
    pub started: i64,
    pub finished: i64,
    pub status: String,
    pub event: String,
    pub link: String,
    pub target: String,
    pub commit: Commit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub refspec: String,
    pub branch: String,
    pub message: String,
    pub author: Author,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub number: i64,
    pub matrix: Axis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub name: String,
    pub link: String,
    pub arch: String,
}

impl Metadata {
    /// Flatten the metadata into conventionally named `CI_*` variables.
    ///
    /// Matrix bindings are not included; callers layer them on top.
    pub fn environ(&self) -> BTreeMap<String, String> {
        let (repo_owner, repo_name) = match self.repo.name.split_once('/') {
            Some((owner, name)) if !name.contains('/') => (owner, name),
            _ => ("", self.repo.name.as_str()),
        };
        let (source_branch, target_branch) = self
            .curr
            .commit
            .refspec
            .split_once(':')
            .unwrap_or(("", ""));

        let mut env = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            env.insert(key.to_string(), value);
        };

        set("CI", self.sys.name.clone());
        set("CI_REPO", self.repo.name.clone());
        set("CI_REPO_NAME", repo_name.to_string());
        set("CI_REPO_OWNER", repo_owner.to_string());
        set("CI_REPO_LINK", self.repo.link.clone());
        set("CI_REPO_REMOTE", self.repo.remote.clone());
        set("CI_REPO_PRIVATE", self.repo.private.to_string());

        set("CI_BUILD_NUMBER", self.curr.number.to_string());
        set("CI_PARENT_BUILD_NUMBER", self.curr.parent.to_string());
        set("CI_BUILD_CREATED", self.curr.created.to_string());
        set("CI_BUILD_STARTED", self.curr.started.to_string());
        set("CI_BUILD_FINISHED", self.curr.finished.to_string());
        set("CI_BUILD_STATUS", self.curr.status.clone());
        set("CI_BUILD_EVENT", self.curr.event.clone());
        set("CI_BUILD_LINK", self.curr.link.clone());
        set("CI_BUILD_TARGET", self.curr.target.clone());

        set("CI_COMMIT_SHA", self.curr.commit.sha.clone());
        set("CI_COMMIT_REF", self.curr.commit.git_ref.clone());
        set("CI_COMMIT_REFSPEC", self.curr.commit.refspec.clone());
        set("CI_COMMIT_BRANCH", self.curr.commit.branch.clone());
        set("CI_COMMIT_MESSAGE", self.curr.commit.message.clone());
        set("CI_COMMIT_AUTHOR", self.curr.commit.author.name.clone());
        set("CI_COMMIT_AUTHOR_NAME", self.curr.commit.author.name.clone());
        set("CI_COMMIT_AUTHOR_EMAIL", self.curr.commit.author.email.clone());
        set("CI_COMMIT_AUTHOR_AVATAR", self.curr.commit.author.avatar.clone());
        set("CI_SOURCE_BRANCH", source_branch.to_string());
        set("CI_TARGET_BRANCH", target_branch.to_string());

        set("CI_PREV_BUILD_NUMBER", self.prev.number.to_string());
        set("CI_PREV_BUILD_CREATED", self.prev.created.to_string());
        set("CI_PREV_BUILD_STARTED", self.prev.started.to_string());
        set("CI_PREV_BUILD_FINISHED", self.prev.finished.to_string());
        set("CI_PREV_BUILD_STATUS", self.prev.status.clone());
        set("CI_PREV_BUILD_EVENT", self.prev.event.clone());
        set("CI_PREV_BUILD_LINK", self.prev.link.clone());
        set("CI_PREV_COMMIT_SHA", self.prev.commit.sha.clone());
        set("CI_PREV_COMMIT_REF", self.prev.commit.git_ref.clone());
        set("CI_PREV_COMMIT_REFSPEC", self.prev.commit.refspec.clone());
        set("CI_PREV_COMMIT_BRANCH", self.prev.commit.branch.clone());
        set("CI_PREV_COMMIT_MESSAGE", self.prev.commit.message.clone());
        set("CI_PREV_COMMIT_AUTHOR", self.prev.commit.author.name.clone());
        set("CI_PREV_COMMIT_AUTHOR_NAME", self.prev.commit.author.name.clone());
        set("CI_PREV_COMMIT_AUTHOR_EMAIL", self.prev.commit.author.email.clone());
        set("CI_PREV_COMMIT_AUTHOR_AVATAR", self.prev.commit.author.avatar.clone());

        set("CI_JOB_NUMBER", self.job.number.to_string());

        set("CI_SYSTEM", self.sys.name.clone());
        set("CI_SYSTEM_NAME", self.sys.name.clone());
        set("CI_SYSTEM_LINK", self.sys.link.clone());
        set("CI_SYSTEM_ARCH", self.sys.arch.clone());
        set("CI_SYSTEM_VERSION", env!("CARGO_PKG_VERSION").to_string());

        if self.curr.event == EVENT_TAG {
            let tag = self.curr.commit.git_ref.trim_start_matches("refs/tags/");
            set("CI_TAG", tag.to_string());
        }
        if self.curr.event == EVENT_PULL {
            let number = PULL_NUMBER
                .find(&self.curr.commit.git_ref)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            set("CI_PULL_REQUEST", number);
        }

        env
    }
}
