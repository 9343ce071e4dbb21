use crate::launch::ServerLauncher;
use crate::process::resolve_program;
use dashboot_core::{DashbootError, Deployment};
use std::collections::BTreeSet;
use std::path::Path;

/// Everything that would make a run fail before the server is up: programs
/// missing from PATH and a missing or malformed port variable.
pub fn preflight<F>(
    deployment: &Deployment,
    work_dir: Option<&Path>,
    port_override: Option<u16>,
    lookup: F,
) -> Vec<DashbootError>
where
    F: Fn(&str) -> Option<String>,
{
    let programs: BTreeSet<&str> = deployment
        .steps
        .iter()
        .map(|s| s.program.as_str())
        .chain(std::iter::once(deployment.serve.program.as_str()))
        .collect();

    let mut problems: Vec<DashbootError> = programs
        .into_iter()
        .filter_map(|program| resolve_program(program, work_dir).err())
        .collect();

    if let Err(e) = ServerLauncher::resolve(&deployment.serve, port_override, lookup) {
        problems.push(e);
    }

    problems
}
