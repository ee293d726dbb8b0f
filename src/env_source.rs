//! Recover variables from a shell vars file
//!
//! easy-rsa 2 keeps its settings in a `vars` script that has to be sourced.
//! We source it in a child `bash`, dump the resulting environment with `env`
//! and parse that output into a [`VarsMapping`].
//!
//! Parsing constraint: each output line is split on its first `=`. A value
//! containing a newline spills into the following line(s), which are then
//! read as separate (usually malformed) entries.

use crate::exec::{CommandExecutor, Invocation, shell_escape};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment of a shell after sourcing a vars file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarsMapping(BTreeMap<String, String>);

impl VarsMapping {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a variable that later steps cannot run without
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .with_context(|| format!("Variable {} not set after sourcing vars file", key))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for VarsMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parse `KEY=VALUE` lines as printed by `env`
pub fn parse_env_output(output: &str) -> VarsMapping {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Source `vars_file` in a `bash` running in `cwd` and return its environment
pub fn source_vars(
    exec: &dyn CommandExecutor,
    vars_file: &Path,
    cwd: &Path,
) -> Result<VarsMapping> {
    let script = format!(
        "source {} && env",
        shell_escape(&vars_file.display().to_string())
    );
    let invocation = Invocation::new("bash")
        .args(["-c", script.as_str()])
        .current_dir(cwd)
        .capture_output();

    let output = exec
        .run(&invocation)
        .with_context(|| format!("Failed to source vars file: {}", vars_file.display()))?;

    let stdout = String::from_utf8(output.stdout)
        .with_context(|| format!("Environment of {} is not valid UTF-8", vars_file.display()))?;
    let vars = parse_env_output(&stdout);
    log::debug!(
        "sourced {} variables from {}",
        vars.len(),
        vars_file.display()
    );
    Ok(vars)
}
