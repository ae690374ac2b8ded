use serde::Deserialize;
use std::fs::read_to_string;
use std::path::Path;

use crate::{Error, Result};

/// Budget and verbosity handed to the MILP solver.
///
/// Every field has a default, so a settings file only needs to list what it
/// overrides:
///
/// ```yaml
/// mipGap: 0.01
/// timeLimit: 60
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SolverSettings {
    /// Relative optimality gap at which the search stops (0.005 is 0.5%).
    pub mip_gap: f64,
    /// Wall-clock budget in seconds.
    pub time_limit: f64,
    /// Let the solver print its own progress log.
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            mip_gap: 0.005,
            time_limit: 300.0,
            verbose: false,
        }
    }
}

impl SolverSettings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |reason: String| Error::Config {
            path: path.to_path_buf(),
            reason,
        };
        let buf = read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let settings: SolverSettings =
            serde_yaml::from_str(&buf).map_err(|e| config_error(e.to_string()))?;
        settings.validate().map_err(config_error)?;
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.mip_gap.is_finite() || self.mip_gap < 0.0 {
            return Err(format!("mipGap must be a non-negative number, got {}", self.mip_gap));
        }
        if !self.time_limit.is_finite() || self.time_limit <= 0.0 {
            return Err(format!("timeLimit must be a positive number, got {}", self.time_limit));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_keeps_defaults() {
        let settings: SolverSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings, SolverSettings::default());
        assert_eq!(settings.mip_gap, 0.005);
        assert_eq!(settings.time_limit, 300.0);
    }

    #[test]
    fn partial_override() {
        let settings: SolverSettings = serde_yaml::from_str("timeLimit: 12.5\nverbose: true").unwrap();
        assert_eq!(settings.mip_gap, 0.005);
        assert_eq!(settings.time_limit, 12.5);
        assert!(settings.verbose);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<SolverSettings>("gap: 0.1").is_err());
    }

    #[test]
    fn reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mipGap: 0.0\ntimeLimit: 5").unwrap();
        let settings = SolverSettings::from_path(file.path()).unwrap();
        assert_eq!(settings.mip_gap, 0.0);
        assert_eq!(settings.time_limit, 5.0);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeLimit: 0").unwrap();
        let err = SolverSettings::from_path(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn negative_gap_is_invalid() {
        let settings = SolverSettings {
            mip_gap: -0.1,
            ..SolverSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
