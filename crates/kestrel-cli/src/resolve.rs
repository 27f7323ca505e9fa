//! Variable resolution for a single axis.
//!
//! Precedence, lowest first: the flattened metadata environment, then the
//! axis values. Every axis value is also handed to the compiler as a
//! secret. User overrides are kept apart; they never take part in
//! template substitution and are applied to the step environment by the
//! compiler.

use crate::commands::MetadataArgs;
use kestrel_core::metadata::{Author, Build, Commit, Job, Repo, System};
use kestrel_core::{Axis, Error, Metadata, Result, Secret};
use std::collections::BTreeMap;

/// Result of resolving one axis.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub metadata: Metadata,
    /// Variables available to template substitution.
    pub environ: BTreeMap<String, String>,
    pub secrets: Vec<Secret>,
    /// User-supplied overrides for the step environment.
    pub overrides: BTreeMap<String, String>,
}

impl MetadataArgs {
    /// Build the metadata snapshot for `axis`.
    pub fn to_metadata(&self, axis: &Axis) -> Metadata {
        Metadata {
            repo: Repo {
                name: self.repo_name.clone(),
                link: self.repo_link.clone(),
                remote: self.repo_remote_url.clone(),
                private: self.repo_private,
            },
            curr: Build {
                number: self.build_number,
                parent: self.parent_build_number,
                created: self.build_created,
                started: self.build_started,
                finished: self.build_finished,
                status: self.build_status.clone(),
                event: self.build_event.clone(),
                link: self.build_link.clone(),
                target: self.build_target.clone(),
                commit: Commit {
                    sha: self.commit_sha.clone(),
                    git_ref: self.commit_ref.clone(),
                    refspec: self.commit_refspec.clone(),
                    branch: self.commit_branch.clone(),
                    message: self.commit_message.clone(),
                    author: Author {
                        name: self.commit_author_name.clone(),
                        email: self.commit_author_email.clone(),
                        avatar: self.commit_author_avatar.clone(),
                    },
                },
            },
            prev: Build {
                number: self.prev_build_number,
                created: self.prev_build_created,
                started: self.prev_build_started,
                finished: self.prev_build_finished,
                status: self.prev_build_status.clone(),
                event: self.prev_build_event.clone(),
                link: self.prev_build_link.clone(),
                commit: Commit {
                    sha: self.prev_commit_sha.clone(),
                    git_ref: self.prev_commit_ref.clone(),
                    refspec: self.prev_commit_refspec.clone(),
                    branch: self.prev_commit_branch.clone(),
                    message: self.prev_commit_message.clone(),
                    author: Author {
                        name: self.prev_commit_author_name.clone(),
                        email: self.prev_commit_author_email.clone(),
                        avatar: self.prev_commit_author_avatar.clone(),
                    },
                },
                ..Default::default()
            },
            job: Job {
                number: self.job_number,
                matrix: axis.clone(),
            },
            sys: System {
                name: self.system_name.clone(),
                link: self.system_link.clone(),
                arch: self.system_arch.clone(),
            },
        }
    }
}

/// Resolve the substitution environment, secrets and overrides for the
/// axis carried by `metadata`.
pub fn resolve(metadata: Metadata, overrides: &[String]) -> Result<Resolved> {
    let mut environ = metadata.environ();
    let mut secrets = Vec::with_capacity(metadata.job.matrix.len());
    for (key, value) in metadata.job.matrix.iter() {
        environ.insert(key.to_string(), value.to_string());
        secrets.push(Secret::new(key, value));
    }

    Ok(Resolved {
        overrides: parse_overrides(overrides)?,
        metadata,
        environ,
        secrets,
    })
}

/// Parse `KEY=value` entries, splitting on the first `=`.
pub fn parse_overrides(entries: &[String]) -> Result<BTreeMap<String, String>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(Error::Config(format!(
                "invalid environment override '{}', expected KEY=value",
                entry
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata(axis: &Axis) -> Metadata {
        let args = MetadataArgs {
            repo_name: "octocat/hello".to_string(),
            commit_branch: "main".to_string(),
            system_name: "kestrel".to_string(),
            ..Default::default()
        };
        args.to_metadata(axis)
    }

    #[test]
    fn test_axis_values_become_environ_and_secrets() {
        let axis: Axis = [("GO_VERSION", "1.21"), ("REDIS", "7")].into_iter().collect();
        let resolved = resolve(metadata(&axis), &[]).unwrap();

        assert_eq!(resolved.environ["GO_VERSION"], "1.21");
        assert_eq!(resolved.environ["REDIS"], "7");
        assert_eq!(resolved.environ["CI_REPO_NAME"], "hello");
        assert_eq!(
            resolved.secrets,
            vec![Secret::new("GO_VERSION", "1.21"), Secret::new("REDIS", "7")]
        );
        assert!(resolved.overrides.is_empty());
    }

    #[test]
    fn test_axis_overwrites_metadata() {
        let axis: Axis = [("CI_COMMIT_BRANCH", "release")].into_iter().collect();
        let resolved = resolve(metadata(&axis), &[]).unwrap();
        assert_eq!(resolved.environ["CI_COMMIT_BRANCH"], "release");
        assert_eq!(resolved.metadata.curr.commit.branch, "main");
    }

    #[test]
    fn test_overrides_stay_out_of_substitution() {
        let overrides = vec!["DEBUG=true".to_string(), "CI_COMMIT_BRANCH=other".to_string()];
        let resolved = resolve(metadata(&Axis::new()), &overrides).unwrap();
        assert_eq!(resolved.overrides["DEBUG"], "true");
        assert_eq!(resolved.environ["CI_COMMIT_BRANCH"], "main");
        assert!(!resolved.environ.contains_key("DEBUG"));
    }

    #[test]
    fn test_override_splits_on_first_equals() {
        let parsed = parse_overrides(&["URL=https://x?a=b".to_string(), "EMPTY=".to_string()]).unwrap();
        assert_eq!(parsed["URL"], "https://x?a=b");
        assert_eq!(parsed["EMPTY"], "");
    }

    #[test]
    fn test_malformed_override() {
        for entry in ["DEBUG", "=value", ""] {
            let err = resolve(metadata(&Axis::new()), &[entry.to_string()]).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{entry:?} accepted");
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let axis: Axis = [("GO_VERSION", "1.20")].into_iter().collect();
        let first = resolve(metadata(&axis), &[]).unwrap();
        let second = resolve(metadata(&axis), &[]).unwrap();
        assert_eq!(first.environ, second.environ);
    }
}
