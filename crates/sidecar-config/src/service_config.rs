use crate::{
    ConfigError, ConfigErrorResult, DEFAULT_HEALTH_PATH, DEFAULT_MODE, DEFAULT_READINESS_MARKER,
    ENCODING_ENV_VALUE, ENCODING_ENV_VAR, LAUNCH_CONTEXT_ENV_VALUE, LAUNCH_CONTEXT_ENV_VAR,
};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// How to find and invoke the supervised service executable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Candidate executable locations, tried in order (packaged first, dev tree second)
    pub executable_paths: Vec<PathBuf>,
    /// Process name used for by-name reaping; defaults to the executable's file stem
    pub process_name: Option<String>,
    /// Value passed as `--env <mode>`
    pub mode: String,
    /// Working directory for the child; inherits ours when unset
    pub working_dir: Option<PathBuf>,
    /// Substring on stdout/stderr announcing the service is ready
    pub readiness_marker: String,
    /// Liveness endpoint path
    pub health_path: String,
    /// Extra environment, merged over the defaults
    pub env: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            executable_paths: Vec::new(),
            process_name: None,
            mode: String::from(DEFAULT_MODE),
            working_dir: None,
            readiness_marker: String::from(DEFAULT_READINESS_MARKER),
            health_path: String::from(DEFAULT_HEALTH_PATH),
            env: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> ConfigErrorResult<()> {
        if self.mode.trim().is_empty() {
            return Err(ConfigError::service("service.mode must not be empty"));
        }

        if self.readiness_marker.is_empty() {
            return Err(ConfigError::service(
                "service.readiness_marker must not be empty",
            ));
        }

        if !self.health_path.starts_with('/') {
            return Err(ConfigError::service(format!(
                "service.health_path must start with '/', got {:?}",
                self.health_path
            )));
        }

        if let Some(name) = &self.process_name
            && name.trim().is_empty()
        {
            return Err(ConfigError::service(
                "service.process_name must not be blank when set",
            ));
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigError::service(format!(
                    "service.env has invalid variable name {key:?}"
                )));
            }
        }

        Ok(())
    }

    /// Environment handed to the child on top of the inherited one.
    ///
    /// The encoding and launch-context variables are always present;
    /// entries in `env` override them.
    pub fn launch_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(ENCODING_ENV_VAR.into(), ENCODING_ENV_VALUE.into());
        env.insert(
            LAUNCH_CONTEXT_ENV_VAR.into(),
            LAUNCH_CONTEXT_ENV_VALUE.into(),
        );
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Name used for by-name reaping of the given executable.
    pub fn process_name_for(&self, executable: &Path) -> Option<String> {
        if let Some(name) = &self.process_name {
            return Some(name.clone());
        }
        executable
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }
}
