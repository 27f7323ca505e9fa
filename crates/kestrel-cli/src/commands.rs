//! CLI command definitions.

use crate::config::DEFAULT_FILE;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Kestrel - run CI pipelines locally
#[derive(Parser, Debug)]
#[command(name = "kestrel", author, version, about = "Run Kestrel pipelines locally", long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true, env = "KESTREL_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true, env = "KESTREL_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a pipeline locally
    Exec(ExecArgs),

    /// Lint a pipeline definition
    Lint(LintArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LintArgs {
    /// Path to pipeline file
    #[arg(default_value = DEFAULT_FILE)]
    pub path: PathBuf,

    /// Permit privileged containers, host volumes and network modes
    #[arg(long, env = "KESTREL_LINT_TRUSTED")]
    pub trusted: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// Path to pipeline file
    #[arg(default_value = DEFAULT_FILE)]
    pub file: PathBuf,

    #[command(flatten)]
    pub settings: ExecSettings,
}

/// Execution settings shared by every axis of a run.
#[derive(Args, Debug, Clone)]
pub struct ExecSettings {
    /// Build from the local directory
    #[arg(
        long,
        env = "KESTREL_LOCAL",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub local: bool,

    /// Build timeout (e.g. 90s, 30m, 1h30m)
    #[arg(long, env = "KESTREL_TIMEOUT", default_value = "1h", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Build volumes
    #[arg(long = "volumes", env = "KESTREL_VOLUMES", value_delimiter = ',')]
    pub volumes: Vec<String>,

    /// External networks
    #[arg(long = "network", env = "KESTREL_NETWORKS", value_delimiter = ',')]
    pub networks: Vec<String>,

    /// Prefix for containers, volumes and networks
    #[arg(long, env = "KESTREL_DOCKER_PREFIX", default_value = "kestrel")]
    pub prefix: String,

    /// Plugin images allowed to run privileged
    #[arg(
        long,
        env = "KESTREL_PLUGINS_PRIVILEGED",
        value_delimiter = ',',
        default_values = ["plugins/docker", "plugins/gcr", "plugins/ecr"]
    )]
    pub privileged: Vec<String>,

    /// Default workspace base
    #[arg(long, env = "KESTREL_WORKSPACE_BASE", default_value = "/kestrel")]
    pub workspace_base: String,

    /// Default workspace path
    #[arg(long, env = "KESTREL_WORKSPACE_PATH", default_value = "src")]
    pub workspace_path: String,

    #[arg(long, env = "KESTREL_NETRC_USERNAME", default_value_t)]
    pub netrc_username: String,

    #[arg(long, env = "KESTREL_NETRC_PASSWORD", default_value_t, hide_env_values = true)]
    pub netrc_password: String,

    #[arg(long, env = "KESTREL_NETRC_MACHINE", default_value_t)]
    pub netrc_machine: String,

    #[command(flatten)]
    pub metadata: MetadataArgs,

    /// Environment overrides as KEY=value
    #[arg(short = 'e', long = "env", env = "KESTREL_ENV")]
    pub env: Vec<String>,
}

/// Runtime metadata of the build being simulated.
#[derive(Args, Debug, Clone, Default)]
pub struct MetadataArgs {
    #[arg(long, env = "KESTREL_SYSTEM_ARCH", default_value = "linux/amd64")]
    pub system_arch: String,
    #[arg(long, env = "KESTREL_SYSTEM_NAME", default_value = "kestrel")]
    pub system_name: String,
    #[arg(long, env = "KESTREL_SYSTEM_LINK", default_value = "https://github.com/kestrel-ci/kestrel")]
    pub system_link: String,

    #[arg(long, env = "KESTREL_REPO_NAME", default_value_t)]
    pub repo_name: String,
    #[arg(long, env = "KESTREL_REPO_LINK", default_value_t)]
    pub repo_link: String,
    #[arg(long, env = "KESTREL_REPO_REMOTE", default_value_t)]
    pub repo_remote_url: String,
    #[arg(long, env = "KESTREL_REPO_PRIVATE")]
    pub repo_private: bool,

    #[arg(long, env = "KESTREL_BUILD_NUMBER", default_value_t)]
    pub build_number: i64,
    #[arg(long, env = "KESTREL_PARENT_BUILD_NUMBER", default_value_t)]
    pub parent_build_number: i64,
    #[arg(long, env = "KESTREL_BUILD_CREATED", default_value_t)]
    pub build_created: i64,
    #[arg(long, env = "KESTREL_BUILD_STARTED", default_value_t)]
    pub build_started: i64,
    #[arg(long, env = "KESTREL_BUILD_FINISHED", default_value_t)]
    pub build_finished: i64,
    #[arg(long, env = "KESTREL_BUILD_STATUS", default_value_t)]
    pub build_status: String,
    #[arg(long, env = "KESTREL_BUILD_EVENT", default_value_t)]
    pub build_event: String,
    #[arg(long, env = "KESTREL_BUILD_LINK", default_value_t)]
    pub build_link: String,
    #[arg(long, env = "KESTREL_BUILD_TARGET", default_value_t)]
    pub build_target: String,

    #[arg(long, env = "KESTREL_COMMIT_SHA", default_value_t)]
    pub commit_sha: String,
    #[arg(long, env = "KESTREL_COMMIT_REF", default_value_t)]
    pub commit_ref: String,
    #[arg(long, env = "KESTREL_COMMIT_REFSPEC", default_value_t)]
    pub commit_refspec: String,
    #[arg(long, env = "KESTREL_COMMIT_BRANCH", default_value_t)]
    pub commit_branch: String,
    #[arg(long, env = "KESTREL_COMMIT_MESSAGE", default_value_t)]
    pub commit_message: String,
    #[arg(long, env = "KESTREL_COMMIT_AUTHOR_NAME", default_value_t)]
    pub commit_author_name: String,
    #[arg(long, env = "KESTREL_COMMIT_AUTHOR_AVATAR", default_value_t)]
    pub commit_author_avatar: String,
    #[arg(long, env = "KESTREL_COMMIT_AUTHOR_EMAIL", default_value_t)]
    pub commit_author_email: String,

    #[arg(long, env = "KESTREL_PREV_BUILD_NUMBER", default_value_t)]
    pub prev_build_number: i64,
    #[arg(long, env = "KESTREL_PREV_BUILD_CREATED", default_value_t)]
    pub prev_build_created: i64,
    #[arg(long, env = "KESTREL_PREV_BUILD_STARTED", default_value_t)]
    pub prev_build_started: i64,
    #[arg(long, env = "KESTREL_PREV_BUILD_FINISHED", default_value_t)]
    pub prev_build_finished: i64,
    #[arg(long, env = "KESTREL_PREV_BUILD_STATUS", default_value_t)]
    pub prev_build_status: String,
    #[arg(long, env = "KESTREL_PREV_BUILD_EVENT", default_value_t)]
    pub prev_build_event: String,
    #[arg(long, env = "KESTREL_PREV_BUILD_LINK", default_value_t)]
    pub prev_build_link: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_SHA", default_value_t)]
    pub prev_commit_sha: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_REF", default_value_t)]
    pub prev_commit_ref: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_REFSPEC", default_value_t)]
    pub prev_commit_refspec: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_BRANCH", default_value_t)]
    pub prev_commit_branch: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_MESSAGE", default_value_t)]
    pub prev_commit_message: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_AUTHOR_NAME", default_value_t)]
    pub prev_commit_author_name: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_AUTHOR_AVATAR", default_value_t)]
    pub prev_commit_author_avatar: String,
    #[arg(long, env = "KESTREL_PREV_COMMIT_AUTHOR_EMAIL", default_value_t)]
    pub prev_commit_author_email: String,

    #[arg(long, env = "KESTREL_JOB_NUMBER", default_value_t)]
    pub job_number: i64,
}

/// Parse a duration such as `90`, `90s`, `30m`, `1h30m` or `500ms`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(input).map_err(|e| format!("invalid duration '{}': {}", input, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1.5h").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        assert!(parse_duration("9999999999999999h").is_err());
        assert!(parse_duration("99999999999999999999").is_err());
    }

    #[test]
    fn test_exec_defaults() {
        let cli = Cli::parse_from(["kestrel", "exec"]);
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec command");
        };
        assert_eq!(args.file, PathBuf::from(DEFAULT_FILE));
        assert!(args.settings.local);
        assert_eq!(args.settings.timeout, Duration::from_secs(3600));
        assert_eq!(args.settings.prefix, "kestrel");
        assert_eq!(
            args.settings.privileged,
            vec!["plugins/docker", "plugins/gcr", "plugins/ecr"]
        );
        assert_eq!(args.settings.metadata.system_arch, "linux/amd64");
    }

    #[test]
    fn test_exec_flags() {
        let cli = Cli::parse_from([
            "kestrel",
            "exec",
            "ci.yml",
            "--local",
            "false",
            "--timeout",
            "10m",
            "-e",
            "DEBUG=1",
            "--env",
            "TOKEN=abc",
            "--commit-branch",
            "main",
        ]);
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec command");
        };
        assert_eq!(args.file, PathBuf::from("ci.yml"));
        assert!(!args.settings.local);
        assert_eq!(args.settings.timeout, Duration::from_secs(600));
        assert_eq!(args.settings.env, vec!["DEBUG=1", "TOKEN=abc"]);
        assert_eq!(args.settings.metadata.commit_branch, "main");
    }

    #[test]
    fn test_env_override_keeps_commas() {
        let cli = Cli::parse_from(["kestrel", "exec", "-e", "GOFLAGS=-tags=a,b", "-e", "X=1"]);
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec command");
        };
        assert_eq!(args.settings.env, vec!["GOFLAGS=-tags=a,b", "X=1"]);
    }

    #[test]
    fn test_bare_local_flag() {
        let cli = Cli::parse_from(["kestrel", "exec", "--local"]);
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec command");
        };
        assert!(args.settings.local);
    }
}
