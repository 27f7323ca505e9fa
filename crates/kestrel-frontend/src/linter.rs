//! Structural validation of a parsed pipeline definition.

use crate::yaml::{Config, Container};
use kestrel_core::{Error, Result};

/// Validator for pipeline definitions.
///
/// A trusted linter permits containers that request host-level
/// capabilities (privileged mode, host volumes, custom network modes).
#[derive(Debug, Clone, Default)]
pub struct Linter {
    trusted: bool,
}

impl Linter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Lint the definition, failing on the first violation.
    pub fn lint(&self, config: &Config) -> Result<()> {
        if config.pipeline.is_empty() {
            return Err(Error::Lint("Invalid or missing pipeline section".to_string()));
        }
        for container in config
            .clone
            .iter()
            .chain(config.services.iter())
            .chain(config.pipeline.iter())
        {
            self.lint_container(container)?;
        }
        Ok(())
    }

    fn lint_container(&self, container: &Container) -> Result<()> {
        let violation = |message: &str| Err(Error::Lint(format!("{}: {}", container.name, message)));

        if container.image.trim().is_empty() {
            return violation("Invalid or missing image");
        }
        if !container.commands.is_empty() && !container.entrypoint.is_empty() {
            return violation("Cannot configure both commands and entrypoint attributes");
        }
        if self.trusted {
            return Ok(());
        }
        if container.privileged {
            return violation("Insufficient privileges to use privileged mode");
        }
        if !container.volumes.is_empty() {
            return violation("Insufficient privileges to use volumes");
        }
        if container.network_mode.is_some() {
            return violation("Insufficient privileges to use network_mode");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::parse_str;

    fn lint(text: &str, trusted: bool) -> Result<()> {
        let config = parse_str(text).unwrap();
        Linter::new().with_trusted(trusted).lint(&config)
    }

    #[test]
    fn test_valid_pipeline() {
        let text = "pipeline:\n  build:\n    image: golang\n    commands: [go build]\n";
        assert!(lint(text, false).is_ok());
    }

    #[test]
    fn test_missing_pipeline() {
        let err = lint("services:\n  redis:\n    image: redis\n", true).unwrap_err();
        assert!(matches!(err, Error::Lint(_)));
    }

    #[test]
    fn test_missing_image_names_container() {
        let err = lint("pipeline:\n  build:\n    commands: [make]\n", true).unwrap_err();
        match err {
            Error::Lint(message) => assert!(message.starts_with("build:")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_commands_and_entrypoint_are_exclusive() {
        let text = "pipeline:\n  build:\n    image: alpine\n    commands: [ls]\n    entrypoint: [/bin/sh]\n";
        assert!(lint(text, true).is_err());
    }

    #[test]
    fn test_untrusted_privileges() {
        let privileged = "pipeline:\n  dind:\n    image: docker:dind\n    privileged: true\n";
        assert!(lint(privileged, false).is_err());
        assert!(lint(privileged, true).is_ok());

        let volumes = "pipeline:\n  build:\n    image: alpine\n    volumes: [/tmp:/tmp]\n";
        assert!(lint(volumes, false).is_err());
        assert!(lint(volumes, true).is_ok());

        let network = "pipeline:\n  build:\n    image: alpine\n    network_mode: host\n";
        assert!(lint(network, false).is_err());
        assert!(lint(network, true).is_ok());
    }

    #[test]
    fn test_services_are_linted() {
        let text = "services:\n  db:\n    privileged: true\npipeline:\n  build:\n    image: alpine\n";
        assert!(lint(text, true).is_err());
    }
}
