use crate::process::{OutputMode, ProcessConfig};
use chrono::Utc;
use dashboot_core::{
    Deployment, FailurePolicy, Result, SequenceExecution, SequenceStatus, Step, StepResult,
    StepStatus,
};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs a deployment's steps one after another
#[derive(Debug, Clone, Default)]
pub struct SequenceExecutor {
    work_dir: Option<PathBuf>,
    output: OutputMode,
    quiet: bool,
}

impl SequenceExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Suppress the console progress lines
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Execute every step in order, applying each step's failure policy
    pub async fn execute(&self, deployment: &Deployment) -> Result<SequenceExecution> {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = deployment.steps.len();

        info!(
            execution_id = %execution_id,
            deployment = %deployment.name,
            steps = total,
            "Starting deployment sequence"
        );

        let mut step_results = Vec::with_capacity(total);
        let mut halted = false;

        for (idx, step) in deployment.steps.iter().enumerate() {
            if halted {
                step_results.push(skipped(step));
                continue;
            }

            self.announce_step(idx, total, step);
            let mut result = self.execute_step(step).await;

            if result.status == StepStatus::Failed {
                match step.on_failure {
                    FailurePolicy::Ignore => {
                        debug!(
                            execution_id = %execution_id,
                            step_name = %step.name,
                            exit_code = ?result.exit_code,
                            "Step failed, exit status not checked"
                        );
                    }
                    FailurePolicy::Warn => {
                        let message = format!("{}, continuing", failure_summary(step, &result));
                        warn!(
                            execution_id = %execution_id,
                            step_name = %step.name,
                            exit_code = ?result.exit_code,
                            "Step failed, continuing"
                        );
                        self.say(&format!("⚠ {}", message));
                        result.warning = Some(message);
                    }
                    FailurePolicy::Halt => {
                        error!(
                            execution_id = %execution_id,
                            step_name = %step.name,
                            exit_code = ?result.exit_code,
                            "Step failed with on_failure = halt, stopping sequence"
                        );
                        self.say(&format!("✗ {}, stopping", failure_summary(step, &result)));
                        halted = true;
                    }
                }
            }

            self.say(&format!("    {} finished in {}ms", step.name, result.duration_ms));
            step_results.push(result);
        }

        let status = if halted {
            SequenceStatus::Halted
        } else if step_results.iter().any(|r| r.status == StepStatus::Failed) {
            SequenceStatus::CompletedWithFailures
        } else {
            SequenceStatus::Succeeded
        };

        info!(
            execution_id = %execution_id,
            deployment = %deployment.name,
            status = ?status,
            "Deployment sequence completed"
        );

        Ok(SequenceExecution {
            id: execution_id,
            deployment_name: deployment.name.clone(),
            deployment_version: deployment.version.clone(),
            status,
            step_results,
            started_at,
            completed_at: Some(Utc::now()),
        })
    }

    async fn execute_step(&self, step: &Step) -> StepResult {
        let started_at = Utc::now();
        let start_instant = std::time::Instant::now();

        info!(
            step_name = %step.name,
            command = %step.command_line(),
            overrides = step.env.len(),
            "Executing step command"
        );

        let config = ProcessConfig {
            working_directory: self.work_dir.clone(),
            output: self.output,
            ..Default::default()
        }
        .with_env(step.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut cmd = config.command(&step.program, &step.args);
        let outcome = match self.output {
            OutputMode::Inherit => cmd.status().await.map(|status| (status, Vec::new(), Vec::new())),
            OutputMode::Capture => cmd
                .output()
                .await
                .map(|output| (output.status, output.stdout, output.stderr)),
        };

        let duration_ms = start_instant.elapsed().as_millis() as u64;
        let completed_at = Utc::now();

        match outcome {
            Ok((exit_status, stdout, stderr)) => {
                let status = if exit_status.success() {
                    StepStatus::Success
                } else {
                    StepStatus::Failed
                };
                let exit_code = exit_status.code();

                info!(
                    step_name = %step.name,
                    status = ?status,
                    exit_code = ?exit_code,
                    signal = ?signal_of(&exit_status),
                    "Step execution completed"
                );

                StepResult {
                    step_name: step.name.clone(),
                    status,
                    exit_code,
                    stdout: String::from_utf8_lossy(&stdout).to_string(),
                    stderr: String::from_utf8_lossy(&stderr).to_string(),
                    warning: None,
                    duration_ms,
                    started_at,
                    completed_at: Some(completed_at),
                }
            }
            Err(e) => {
                error!(
                    step_name = %step.name,
                    program = %step.program,
                    error = %e,
                    "Step could not be started"
                );

                StepResult {
                    step_name: step.name.clone(),
                    status: StepStatus::Failed,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Failed to execute {}: {}", step.program, e),
                    warning: None,
                    duration_ms,
                    started_at,
                    completed_at: Some(completed_at),
                }
            }
        }
    }

    fn announce_step(&self, idx: usize, total: usize, step: &Step) {
        let headline = step
            .announce
            .clone()
            .unwrap_or_else(|| format!("Running {}", step.name));
        self.say(&format!("==> [{}/{}] {}", idx + 1, total, headline));
        self.say(&format!("    $ {}", step.command_line()));
        for (key, value) in &step.env {
            self.say(&format!("      {}={:?}", key, value));
        }
    }

    fn say(&self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }
}

fn skipped(step: &Step) -> StepResult {
    let now = Utc::now();
    StepResult {
        step_name: step.name.clone(),
        status: StepStatus::Skipped,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        warning: None,
        duration_ms: 0,
        started_at: now,
        completed_at: None,
    }
}

fn failure_summary(step: &Step, result: &StepResult) -> String {
    match result.exit_code {
        Some(code) => format!("{} exited with status {}", step.name, code),
        None if result.stderr.is_empty() => format!("{} was terminated", step.name),
        None => format!("{} failed: {}", step.name, result.stderr),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::ServerLauncher;
    use dashboot_core::variants::{JIRA_LABEL_FILTER, JIRA_PROJECT_KEY};
    use dashboot_core::{ServeSpec, Variant};
    use std::collections::HashMap;

    fn capture_executor() -> SequenceExecutor {
        SequenceExecutor::new()
            .with_output(OutputMode::Capture)
            .quiet(true)
    }

    fn sh(name: &str, script: &str) -> Step {
        Step::new(name, "sh", ["-c", script])
    }

    fn deployment(steps: Vec<Step>) -> Deployment {
        Deployment {
            name: "test".to_string(),
            version: "1.0".to_string(),
            steps,
            serve: ServeSpec::new("true", Vec::<String>::new()),
        }
    }

    #[tokio::test]
    async fn test_executor_runs_steps_in_order() {
        let deployment = deployment(vec![
            sh("step1", "echo step1"),
            sh("step2", "echo step2"),
            sh("step3", "echo step3"),
        ]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert_eq!(execution.status, SequenceStatus::Succeeded);
        assert_eq!(execution.step_results.len(), 3);
        for (idx, result) in execution.step_results.iter().enumerate() {
            let expected = format!("step{}", idx + 1);
            assert_eq!(result.step_name, expected);
            assert_eq!(result.stdout.trim(), expected);
            assert_eq!(result.exit_code, Some(0));
        }
    }

    #[tokio::test]
    async fn test_steps_observe_previous_side_effects() {
        let dir = tempfile::tempdir().unwrap();

        let deployment = deployment(vec![
            sh("first", "echo first >> order.log"),
            sh("second", "echo second >> order.log"),
        ]);
        capture_executor()
            .with_work_dir(dir.path())
            .execute(&deployment)
            .await
            .unwrap();

        let log = std::fs::read_to_string(dir.path().join("order.log")).unwrap();
        assert_eq!(log, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_ignored_failure_does_not_stop_sequence() {
        let deployment = deployment(vec![sh("failing", "exit 1"), sh("after", "echo after")]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert_eq!(execution.status, SequenceStatus::CompletedWithFailures);
        assert!(execution.status.may_launch());
        assert_eq!(execution.step_results[0].status, StepStatus::Failed);
        assert_eq!(execution.step_results[0].exit_code, Some(1));
        assert!(execution.step_results[0].warning.is_none());
        assert_eq!(execution.step_results[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_warn_policy_records_warning_and_continues() {
        let deployment = deployment(vec![
            sh("devops-extraction", "exit 3").with_on_failure(FailurePolicy::Warn),
            sh("jira-extraction", "echo jira"),
        ]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert!(execution.status.may_launch());
        assert_eq!(execution.step_results.len(), 2);
        let warning = execution.step_results[0].warning.as_deref().unwrap();
        assert!(warning.contains("devops-extraction exited with status 3"));
        assert_eq!(execution.step_results[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_warn_policy_silent_on_success() {
        let deployment = deployment(vec![sh("ok", "true").with_on_failure(FailurePolicy::Warn)]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert_eq!(execution.status, SequenceStatus::Succeeded);
        assert!(execution.step_results[0].warning.is_none());
    }

    #[tokio::test]
    async fn test_halt_policy_skips_remaining_steps() {
        let deployment = deployment(vec![
            sh("failing", "exit 2").with_on_failure(FailurePolicy::Halt),
            sh("should_not_run", "echo should not run"),
        ]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert_eq!(execution.status, SequenceStatus::Halted);
        assert!(!execution.status.may_launch());
        assert_eq!(execution.step_results.len(), 2);
        assert_eq!(execution.step_results[1].status, StepStatus::Skipped);
        assert!(execution.step_results[1].stdout.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_failed_step() {
        let deployment = deployment(vec![
            Step::new("missing", "dashboot-definitely-missing-binary", Vec::<String>::new())
                .with_on_failure(FailurePolicy::Warn),
            sh("after", "echo after"),
        ]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        let missing = &execution.step_results[0];
        assert_eq!(missing.status, StepStatus::Failed);
        assert_eq!(missing.exit_code, None);
        assert!(missing.stderr.contains("dashboot-definitely-missing-binary"));
        assert!(missing.warning.is_some());
        assert_eq!(execution.step_results[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_env_overrides_are_scoped_to_their_step() {
        let print_vars = "printf '%s|%s' \"$JIRA_PROJECT_KEY\" \"$JIRA_LABEL_FILTER\"";
        let deployment = deployment(vec![
            sh("scoped", print_vars)
                .with_env(JIRA_PROJECT_KEY, "Emirates Transport")
                .with_env(JIRA_LABEL_FILTER, "Gitex-2025"),
            sh("sibling", print_vars),
        ]);

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert_eq!(execution.step_results[0].stdout, "Emirates Transport|Gitex-2025");
        assert!(!execution.step_results[1].stdout.contains("Emirates Transport"));
        assert!(!execution.step_results[1].stdout.contains("Gitex-2025"));
        assert_ne!(
            std::env::var(JIRA_PROJECT_KEY).ok().as_deref(),
            Some("Emirates Transport")
        );
    }

    /// Swap the python scripts for a shell command that echoes the Jira variables
    fn echo_jira_env(mut deployment: Deployment) -> Deployment {
        for step in &mut deployment.steps {
            step.program = "sh".to_string();
            step.args = vec![
                "-c".to_string(),
                "printf '%s|%s' \"$JIRA_PROJECT_KEY\" \"$JIRA_LABEL_FILTER\"".to_string(),
            ];
        }
        deployment
    }

    fn port_8050(key: &str) -> Option<String> {
        HashMap::from([("PORT", "8050")])
            .get(key)
            .map(|v| v.to_string())
    }

    #[tokio::test]
    async fn test_standard_variant_end_to_end() {
        let deployment = echo_jira_env(Variant::Standard.deployment("python"));

        let execution = capture_executor().execute(&deployment).await.unwrap();
        let names: Vec<_> = execution.step_results.iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(names, vec!["devops-extraction", "jira-extraction"]);

        let launch = ServerLauncher::resolve(&deployment.serve, None, port_8050).unwrap();
        assert_eq!(launch.bind_address(), "0.0.0.0:8050");
        assert_eq!(launch.args, vec!["--listen=0.0.0.0:8050", "app:server"]);
    }

    #[tokio::test]
    async fn test_multi_tenant_variant_end_to_end() {
        let deployment = echo_jira_env(Variant::MultiTenant.deployment("python"));

        let execution = capture_executor().execute(&deployment).await.unwrap();

        assert_eq!(execution.step_results.len(), 3);
        assert_eq!(execution.step_results[0].step_name, "devops-extraction");
        assert_eq!(
            execution.step_results[1].stdout,
            "techcarrot Time Sheet|techcarrot-timesheet-build1"
        );
        assert_eq!(execution.step_results[2].stdout, "Emirates Transport|Gitex-2025");

        let launch = ServerLauncher::resolve(&deployment.serve, None, port_8050).unwrap();
        assert_eq!(launch.program, "waitress-serve");
        assert_eq!(launch.bind_address(), "0.0.0.0:8050");
    }
}
