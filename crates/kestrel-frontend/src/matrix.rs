//! Matrix expansion for multi-axis builds.
//!
//! The `matrix` block is read from the raw definition text, before any
//! variable substitution. Two forms are accepted:
//!
//! ```yaml
//! matrix:
//!   GO_VERSION: [1.20, 1.21]
//!   REDIS: [6, 7]
//! ```
//!
//! which expands to the cartesian product of all dimensions, and
//!
//! ```yaml
//! matrix:
//!   include:
//!     - GO_VERSION: 1.21
//!       REDIS: 7
//! ```
//!
//! which lists the axes explicitly.

use kestrel_core::{Axis, Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Maximum number of variables considered per axis.
pub const MAX_VARIABLES: usize = 10;

/// Maximum number of axes produced by a dimension matrix.
pub const MAX_AXES: usize = 25;

#[derive(Debug, Default, Deserialize)]
struct IncludeDocument {
    #[serde(default)]
    matrix: Option<IncludeBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct IncludeBlock {
    #[serde(default)]
    include: Vec<Axis>,
}

#[derive(Debug, Default, Deserialize)]
struct DimensionDocument {
    #[serde(default)]
    matrix: Option<BTreeMap<String, Vec<String>>>,
}

/// Parse the matrix block of a definition into its ordered axes.
///
/// Returns an empty list when the definition declares no matrix; callers
/// substitute a single empty axis in that case.
pub fn parse(raw: &str) -> Result<Vec<Axis>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let listed: IncludeDocument =
        serde_yaml::from_str(raw).map_err(|e| Error::MatrixParse(e.to_string()))?;
    if let Some(block) = listed.matrix {
        if !block.include.is_empty() {
            return Ok(block.include);
        }
    }

    let dimensions: DimensionDocument =
        serde_yaml::from_str(raw).map_err(|e| Error::MatrixParse(e.to_string()))?;
    match dimensions.matrix {
        Some(dims) if !dims.is_empty() => Ok(combinations(&dims)),
        _ => Ok(Vec::new()),
    }
}

/// Expand dimensions into axes. The first dimension (in key order) varies
/// slowest.
fn combinations(dimensions: &BTreeMap<String, Vec<String>>) -> Vec<Axis> {
    if dimensions.len() > MAX_VARIABLES {
        warn!(
            declared = dimensions.len(),
            limit = MAX_VARIABLES,
            "Matrix declares too many variables, extra variables ignored"
        );
    }
    let tags: Vec<(&String, &Vec<String>)> = dimensions.iter().take(MAX_VARIABLES).collect();

    let total = tags
        .iter()
        .map(|(_, values)| values.len())
        .try_fold(1usize, usize::checked_mul)
        .unwrap_or(usize::MAX);
    if total > MAX_AXES {
        warn!(
            combinations = total,
            limit = MAX_AXES,
            "Matrix expands to too many axes, extra axes dropped"
        );
    }

    let count = total.min(MAX_AXES);
    let mut indices = vec![0usize; tags.len()];
    let mut axes = Vec::with_capacity(count);
    while axes.len() < count {
        axes.push(
            tags.iter()
                .zip(&indices)
                .map(|((key, values), &i)| (key.as_str(), values[i].as_str()))
                .collect(),
        );
        for (slot, (_, values)) in indices.iter_mut().zip(&tags).rev() {
            *slot += 1;
            if *slot < values.len() {
                break;
            }
            *slot = 0;
        }
    }
    axes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn axis(pairs: &[(&str, &str)]) -> Axis {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_no_matrix_block() {
        let raw = "pipeline:\n  build:\n    image: golang\n";
        assert!(parse(raw).unwrap().is_empty());
    }

    #[test]
    fn test_empty_document() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("   \n").unwrap().is_empty());
    }

    #[test]
    fn test_dimension_matrix_keeps_source_text() {
        let raw = r#"
pipeline:
  test:
    image: golang:${GO_VERSION}
matrix:
  GO_VERSION:
    - 1.20
    - 1.21
"#;
        let axes = parse(raw).unwrap();
        assert_eq!(
            axes,
            vec![axis(&[("GO_VERSION", "1.20")]), axis(&[("GO_VERSION", "1.21")])]
        );
    }

    #[test]
    fn test_dimension_matrix_cartesian_product() {
        let raw = r#"
matrix:
  GO_VERSION: [1.20, 1.21]
  REDIS: [6, 7]
"#;
        let axes = parse(raw).unwrap();
        assert_eq!(
            axes,
            vec![
                axis(&[("GO_VERSION", "1.20"), ("REDIS", "6")]),
                axis(&[("GO_VERSION", "1.20"), ("REDIS", "7")]),
                axis(&[("GO_VERSION", "1.21"), ("REDIS", "6")]),
                axis(&[("GO_VERSION", "1.21"), ("REDIS", "7")]),
            ]
        );
    }

    #[test]
    fn test_include_matrix() {
        let raw = r#"
matrix:
  include:
    - GO_VERSION: 1.21
      REDIS: 7
    - GO_VERSION: 1.20
"#;
        let axes = parse(raw).unwrap();
        assert_eq!(
            axes,
            vec![
                axis(&[("GO_VERSION", "1.21"), ("REDIS", "7")]),
                axis(&[("GO_VERSION", "1.20")]),
            ]
        );
    }

    #[test]
    fn test_empty_dimension_yields_no_axes() {
        let raw = "matrix:\n  GO_VERSION: []\n";
        assert!(parse(raw).unwrap().is_empty());
    }

    #[test]
    fn test_axis_limit() {
        let raw = r#"
matrix:
  A: [1, 2, 3]
  B: [1, 2, 3]
  C: [1, 2, 3, 4]
"#;
        assert_eq!(parse(raw).unwrap().len(), MAX_AXES);
    }

    #[test]
    fn test_huge_matrix_is_capped() {
        let values: Vec<String> = (0..90).map(|v| v.to_string()).collect();
        let raw: String = (0..10)
            .map(|k| format!("  V{}: [{}]\n", k, values.join(", ")))
            .fold("matrix:\n".to_string(), |acc, line| acc + &line);

        let axes = parse(&raw).unwrap();
        assert_eq!(axes.len(), MAX_AXES);
        assert_eq!(axes[0].iter().map(|(_, v)| v).collect::<Vec<_>>(), vec!["0"; 10]);
        assert_eq!(axes[1].get("V9"), Some("1"));
        assert_eq!(axes[1].get("V0"), Some("0"));
    }

    #[test]
    fn test_malformed_matrix() {
        let err = parse("matrix: [1, 2]\n").unwrap_err();
        assert!(matches!(err, Error::MatrixParse(_)));

        let err = parse("matrix:\n  GO_VERSION: 1.21\n").unwrap_err();
        assert!(matches!(err, Error::MatrixParse(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = parse("matrix: {GO_VERSION: [1.20\n").unwrap_err();
        assert!(matches!(err, Error::MatrixParse(_)));
    }
}
