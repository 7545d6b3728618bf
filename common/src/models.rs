// Core data models for triggers, environments and causes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use tracing::warn;

/// Placeholder shown instead of password parameter values
const MASK: &str = "********";

/// Cause is the reason string a script reported for triggering a build.
///
/// Stored trimmed. A cause is present iff it is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cause(String);

impl Cause {
    pub fn new(description: impl AsRef<str>) -> Self {
        Self(description.as_ref().trim().to_string())
    }

    /// The absent cause: do not trigger a build
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn is_present(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Present cause as an `Option`
    pub fn into_option(self) -> Option<Self> {
        self.is_present().then_some(self)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ParameterKind decides how a job parameter is shown in logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    String,
    Password,
}

/// A named job parameter exported to the script environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub kind: ParameterKind,
}

impl Parameter {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: ParameterKind::String,
        }
    }

    pub fn password(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: ParameterKind::Password,
        }
    }
}

/// ExecutionEnvironment is the ordered set of variables handed to a script.
///
/// The host assembles it before a run; the script runner only reads it.
/// `Debug` masks the values of password parameters.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    vars: BTreeMap<String, String>,
    masked: Vec<String>,
}

impl ExecutionEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment seeded with the variables of the current process.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    pub fn inherit() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        vars.into_iter()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (Ok(name), Err(_)) => {
                    warn!(name = %name, "Skipping environment variable with non-UTF-8 value");
                    None
                }
                (Err(name), _) => {
                    warn!(name = %name.to_string_lossy(), "Skipping environment variable with non-UTF-8 name");
                    None
                }
            })
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Add job parameters, later values overriding earlier ones
    pub fn with_parameters<'a>(mut self, parameters: impl IntoIterator<Item = &'a Parameter>) -> Self {
        for parameter in parameters {
            if parameter.kind == ParameterKind::Password && !self.masked.contains(&parameter.name) {
                self.masked.push(parameter.name.clone());
            }
            self.insert(parameter.name.clone(), parameter.value.clone());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn is_masked(&self, name: &str) -> bool {
        self.masked.iter().any(|m| m == name)
    }
}

impl FromIterator<(String, String)> for ExecutionEnvironment {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
            masked: Vec::new(),
        }
    }
}

impl fmt::Debug for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.vars.iter().map(|(k, v)| {
                let shown = if self.is_masked(k) { MASK } else { v.as_str() };
                (k, shown)
            }))
            .finish()
    }
}

/// What a single poll of a trigger amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The host is quieting down; the script was not run
    Skipped,
    /// The script ran and reported no cause
    NoCause,
    /// A build was scheduled with this cause
    Triggered(Cause),
    /// The poll failed; the next tick starts fresh
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_is_trimmed() {
        let cause = Cause::new("  disk full \r\n");
        assert_eq!(cause.as_str(), "disk full");
        assert!(cause.is_present());
    }

    #[test]
    fn test_whitespace_cause_is_absent() {
        assert!(!Cause::new(" \t ").is_present());
        assert!(!Cause::none().is_present());
        assert_eq!(Cause::new("   ").into_option(), None);
    }

    #[test]
    fn test_parameters_override_inherited_values() {
        let env: ExecutionEnvironment = vec![("BUILD_NUMBER".to_string(), "1".to_string())]
            .into_iter()
            .collect();
        let params = [Parameter::string("BUILD_NUMBER", "42")];
        let env = env.with_parameters(&params);
        assert_eq!(env.get("BUILD_NUMBER"), Some("42"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_debug_masks_passwords() {
        let params = [
            Parameter::string("USER", "builder"),
            Parameter::password("SECRET", "hunter2"),
        ];
        let env = ExecutionEnvironment::new().with_parameters(&params);
        let shown = format!("{:?}", env);
        assert!(shown.contains("builder"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains(MASK));
        assert_eq!(env.get("SECRET"), Some("hunter2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("PATH"), OsString::from("/usr/bin")),
            (OsString::from("LEGACY"), OsString::from_vec(b"caf\xe9".to_vec())),
            (OsString::from_vec(b"BAD\xff".to_vec()), OsString::from("x")),
        ];
        let env = ExecutionEnvironment::from_os_vars(vars);
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
        assert_eq!(env.get("LEGACY"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_inherit_tolerates_non_utf8_process_variable() {
        use std::os::unix::ffi::OsStrExt;

        std::env::set_var(
            "DOS_TRIGGER_NON_UTF8",
            std::ffi::OsStr::from_bytes(b"caf\xe9"),
        );
        let env = ExecutionEnvironment::inherit();
        std::env::remove_var("DOS_TRIGGER_NON_UTF8");

        assert_eq!(env.get("DOS_TRIGGER_NON_UTF8"), None);
    }

    #[test]
    fn test_iteration_is_ordered() {
        let mut env = ExecutionEnvironment::new();
        env.insert("B", "2");
        env.insert("A", "1");
        let names: Vec<&str> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
