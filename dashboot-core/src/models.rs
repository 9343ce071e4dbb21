use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT_ENV: &str = "PORT";

/// A complete deployment: extraction steps followed by the server launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub name: String,
    pub version: String,
    pub steps: Vec<Step>,
    pub serve: ServeSpec,
}

/// What to do when a step exits with a non-zero status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Exit status is not inspected
    #[default]
    Ignore,
    /// Print a warning and carry on
    Warn,
    /// Stop the sequence; the server is not launched
    Halt,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Ignore => "ignore",
            FailurePolicy::Warn => "warn",
            FailurePolicy::Halt => "halt",
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(FailurePolicy::Ignore),
            "warn" => Ok(FailurePolicy::Warn),
            "halt" => Ok(FailurePolicy::Halt),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

/// A single subprocess invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Variables visible to this invocation only
    pub env: BTreeMap<String, String>,
    pub on_failure: FailurePolicy,
    pub announce: Option<String>,
}

/// The long-running server the sequence hands over to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServeSpec {
    pub program: String,
    /// May contain `{host}` and `{port}` placeholders
    pub args: Vec<String>,
    pub host: String,
    pub port_env: String,
    pub env: BTreeMap<String, String>,
    pub announce: Option<String>,
}

/// Execution status of a step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Result of step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub warning: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Overall status of a sequence run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SequenceStatus {
    Running,
    Succeeded,
    CompletedWithFailures,
    Halted,
}

impl SequenceStatus {
    /// Whether the server may be launched after this run
    pub fn may_launch(&self) -> bool {
        matches!(
            self,
            SequenceStatus::Succeeded | SequenceStatus::CompletedWithFailures
        )
    }
}

/// Record of one pass over a deployment's steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceExecution {
    pub id: Uuid,
    pub deployment_name: String,
    pub deployment_version: String,
    pub status: SequenceStatus,
    pub step_results: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fully resolved server command, ready to exec
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerLaunch {
    pub program: String,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub env: BTreeMap<String, String>,
}

impl ServerLaunch {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Step {
    pub fn new<I, S>(name: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            on_failure: FailurePolicy::Ignore,
            announce: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn with_announce(mut self, message: impl Into<String>) -> Self {
        self.announce = Some(message.into());
        self
    }

    /// Program and arguments as a single display line
    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

impl ServeSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            host: DEFAULT_HOST.to_string(),
            port_env: DEFAULT_PORT_ENV.to_string(),
            env: BTreeMap::new(),
            announce: None,
        }
    }

    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

impl Deployment {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

fn command_line(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(program));
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_new() {
        let step = Step::new("extract", "python", ["defectsextraction.py"]);
        assert_eq!(step.name, "extract");
        assert_eq!(step.program, "python");
        assert_eq!(step.args, vec!["defectsextraction.py"]);
        assert!(step.env.is_empty());
        assert_eq!(step.on_failure, FailurePolicy::Ignore);
    }

    #[test]
    fn test_step_builders() {
        let step = Step::new("jira", "python", ["jiraextraction.py"])
            .with_env("JIRA_PROJECT_KEY", "Emirates Transport")
            .with_on_failure(FailurePolicy::Warn)
            .with_announce("Running Jira extraction");
        assert_eq!(
            step.env.get("JIRA_PROJECT_KEY").map(String::as_str),
            Some("Emirates Transport")
        );
        assert_eq!(step.on_failure, FailurePolicy::Warn);
        assert_eq!(step.announce.as_deref(), Some("Running Jira extraction"));
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("warn".parse::<FailurePolicy>(), Ok(FailurePolicy::Warn));
        assert_eq!("halt".parse::<FailurePolicy>(), Ok(FailurePolicy::Halt));
        assert!("stop".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_command_line_quotes_whitespace() {
        let step = Step::new("s", "sh", ["-c", "exit 1"]);
        assert_eq!(step.command_line(), "sh -c \"exit 1\"");
    }

    #[test]
    fn test_serve_spec_defaults() {
        let serve = ServeSpec::new("waitress-serve", ["app:server"]);
        assert_eq!(serve.host, "0.0.0.0");
        assert_eq!(serve.port_env, "PORT");
    }

    #[test]
    fn test_may_launch() {
        assert!(SequenceStatus::Succeeded.may_launch());
        assert!(SequenceStatus::CompletedWithFailures.may_launch());
        assert!(!SequenceStatus::Halted.may_launch());
    }

    #[test]
    fn test_failure_policy_serializes_lowercase() {
        let json = serde_json::to_string(&FailurePolicy::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
    }
}
