//! Deployment variants shipped with the binary.
//!
//! Each variant runs the DevOps extraction, one or more Jira extractions and
//! then serves `app:server` through waitress on `0.0.0.0:$PORT`.

use crate::models::{Deployment, FailurePolicy, ServeSpec, Step};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PYTHON: &str = "python";
pub const DEVOPS_SCRIPT: &str = "defectsextraction.py";
pub const JIRA_SCRIPT: &str = "jiraextraction.py";

pub const JIRA_PROJECT_KEY: &str = "JIRA_PROJECT_KEY";
pub const JIRA_LABEL_FILTER: &str = "JIRA_LABEL_FILTER";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// DevOps then Jira extraction, exit statuses ignored
    Standard,
    /// Like `Standard`, but a failed DevOps extraction prints a warning
    Checked,
    /// DevOps extraction then one Jira extraction per tenant
    MultiTenant,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Standard, Variant::Checked, Variant::MultiTenant];

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Standard => "standard",
            Variant::Checked => "checked",
            Variant::MultiTenant => "multi-tenant",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Variant::Standard => "DevOps + Jira extraction, then serve",
            Variant::Checked => "DevOps extraction (warn on failure) + Jira extraction, then serve",
            Variant::MultiTenant => "DevOps extraction + Jira extraction per tenant, then serve",
        }
    }

    /// Build the deployment using `python` as the interpreter
    pub fn deployment(&self, python: &str) -> Deployment {
        let steps = match self {
            Variant::Standard => vec![devops_step(python), jira_step("jira-extraction", python)],
            Variant::Checked => vec![
                devops_step(python).with_on_failure(FailurePolicy::Warn),
                jira_step("jira-extraction", python),
            ],
            Variant::MultiTenant => {
                let mut steps = vec![devops_step(python)];
                steps.extend(TENANTS.iter().map(|tenant| {
                    jira_step(tenant.step_name, python)
                        .with_env(JIRA_PROJECT_KEY, tenant.project_key)
                        .with_env(JIRA_LABEL_FILTER, tenant.label_filter)
                        .with_announce(format!(
                            "Running Jira extraction for {}",
                            tenant.project_key
                        ))
                }));
                steps
            }
        };

        Deployment {
            name: self.name().to_string(),
            version: "1.0".to_string(),
            steps,
            serve: waitress_serve(),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::ALL
            .iter()
            .copied()
            .find(|v| v.name() == s)
            .ok_or_else(|| format!("unknown variant: {}", s))
    }
}

struct Tenant {
    step_name: &'static str,
    project_key: &'static str,
    label_filter: &'static str,
}

const TENANTS: [Tenant; 2] = [
    Tenant {
        step_name: "jira-extraction-timesheet",
        project_key: "techcarrot Time Sheet",
        label_filter: "techcarrot-timesheet-build1",
    },
    Tenant {
        step_name: "jira-extraction-emirates-transport",
        project_key: "Emirates Transport",
        label_filter: "Gitex-2025",
    },
];

fn devops_step(python: &str) -> Step {
    Step::new("devops-extraction", python, [DEVOPS_SCRIPT])
        .with_announce("Running Azure DevOps defects extraction")
}

fn jira_step(name: &str, python: &str) -> Step {
    Step::new(name, python, [JIRA_SCRIPT]).with_announce("Running Jira defects extraction")
}

/// `waitress-serve --listen={host}:{port} app:server`
pub fn waitress_serve() -> ServeSpec {
    let mut serve = ServeSpec::new("waitress-serve", ["--listen={host}:{port}", "app:server"]);
    serve.announce = Some("Starting dashboard server".to_string());
    serve
}
