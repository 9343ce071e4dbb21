use crate::grammar::{DeployfileParser, Rule};
use dashboot_core::{
    DashbootError, Deployment, FailurePolicy, Result, ServeSpec, Step, DEFAULT_HOST,
    DEFAULT_PORT_ENV,
};
use pest::iterators::Pair;
use pest::Parser;
use std::collections::{BTreeMap, HashSet};

/// Parse a Deployfile string into a Deployment structure
pub fn parse_deployfile(input: &str) -> Result<Deployment> {
    let mut pairs = DeployfileParser::parse(Rule::file, input)
        .map_err(|e| DashbootError::ParseError(format!("Parse error: {}", e)))?;

    let deployment_pair = pairs
        .next()
        .and_then(|file| file.into_inner().find(|p| p.as_rule() == Rule::deployment))
        .ok_or_else(|| DashbootError::ParseError("No deployment found in file".to_string()))?;

    parse_deployment(deployment_pair)
}

fn parse_deployment(pair: Pair<Rule>) -> Result<Deployment> {
    let mut name = String::new();
    let mut version = String::new();
    let mut steps = None;
    let mut serve = None;

    for inner_pair in pair.into_inner() {
        let (line, _) = inner_pair.as_span().start_pos().line_col();
        match inner_pair.as_rule() {
            Rule::name_field => name = first_string(inner_pair),
            Rule::version_field => version = first_string(inner_pair),
            Rule::steps => {
                if steps.is_some() {
                    return Err(duplicate_block(line, "steps"));
                }
                steps = Some(parse_steps(inner_pair)?);
            }
            Rule::serve => {
                if serve.is_some() {
                    return Err(duplicate_block(line, "serve"));
                }
                serve = Some(parse_serve(inner_pair)?);
            }
            _ => {}
        }
    }

    let serve = serve.ok_or_else(|| {
        DashbootError::InvalidConfiguration("deployment has no serve block".to_string())
    })?;

    Ok(Deployment {
        name: if name.is_empty() { "default".to_string() } else { name },
        version: if version.is_empty() { "1.0".to_string() } else { version },
        steps: steps.unwrap_or_default(),
        serve,
    })
}

fn duplicate_block(line: usize, block: &str) -> DashbootError {
    DashbootError::InvalidConfiguration(format!("line {}: duplicate {} block", line, block))
}

fn parse_steps(pair: Pair<Rule>) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    let mut seen = HashSet::new();

    for step_pair in pair.into_inner() {
        if step_pair.as_rule() != Rule::step {
            continue;
        }
        let (line, _) = step_pair.as_span().start_pos().line_col();
        let step = parse_step(step_pair)?;
        if !seen.insert(step.name.clone()) {
            return Err(DashbootError::InvalidConfiguration(format!(
                "line {}: duplicate step name {:?}",
                line, step.name
            )));
        }
        steps.push(step);
    }

    Ok(steps)
}

fn parse_step(pair: Pair<Rule>) -> Result<Step> {
    let (line, _) = pair.as_span().start_pos().line_col();
    let mut name = String::new();
    let mut command = None;
    let mut env = BTreeMap::new();
    let mut on_failure = FailurePolicy::default();
    let mut announce = None;

    for inner_pair in pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::string => name = unquote_string(inner_pair),
            Rule::run_field => command = Some(parse_run(inner_pair)?),
            Rule::announce_field => announce = Some(first_string(inner_pair)),
            Rule::on_failure_field => on_failure = parse_policy(inner_pair)?,
            Rule::env_block => env.extend(parse_env(inner_pair)),
            _ => {}
        }
    }

    let (program, args) = command.ok_or_else(|| {
        DashbootError::InvalidConfiguration(format!(
            "line {}: step {:?} has no run command",
            line, name
        ))
    })?;

    Ok(Step {
        name,
        program,
        args,
        env,
        on_failure,
        announce,
    })
}

fn parse_serve(pair: Pair<Rule>) -> Result<ServeSpec> {
    let (line, _) = pair.as_span().start_pos().line_col();
    let mut command = None;
    let mut host = DEFAULT_HOST.to_string();
    let mut port_env = DEFAULT_PORT_ENV.to_string();
    let mut env = BTreeMap::new();
    let mut announce = None;

    for inner_pair in pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::run_field => command = Some(parse_run(inner_pair)?),
            Rule::host_field => host = first_string(inner_pair),
            Rule::port_env_field => port_env = first_string(inner_pair),
            Rule::announce_field => announce = Some(first_string(inner_pair)),
            Rule::env_block => env.extend(parse_env(inner_pair)),
            _ => {}
        }
    }

    let (program, args) = command.ok_or_else(|| {
        DashbootError::InvalidConfiguration(format!("line {}: serve has no run command", line))
    })?;

    if port_env.is_empty() {
        return Err(DashbootError::InvalidConfiguration(format!(
            "line {}: port_env must not be empty",
            line
        )));
    }

    Ok(ServeSpec {
        program,
        args,
        host,
        port_env,
        env,
        announce,
    })
}

/// `run: ["program", "arg", ...];` into the program and its arguments
fn parse_run(pair: Pair<Rule>) -> Result<(String, Vec<String>)> {
    let (line, _) = pair.as_span().start_pos().line_col();
    let mut words = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::string_list)
        .flat_map(|list| list.into_inner())
        .map(unquote_string);

    let program = words
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            DashbootError::InvalidConfiguration(format!(
                "line {}: run needs at least a program name",
                line
            ))
        })?;

    Ok((program, words.collect()))
}

fn parse_policy(pair: Pair<Rule>) -> Result<FailurePolicy> {
    let text = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::policy)
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();

    text.parse().map_err(DashbootError::ParseError)
}

fn parse_env(pair: Pair<Rule>) -> Vec<(String, String)> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::env_entry)
        .filter_map(|entry| {
            let mut inner = entry.into_inner();
            let key = inner.next()?.as_str().to_string();
            let value = unquote_string(inner.next()?);
            Some((key, value))
        })
        .collect()
}

/// First string literal inside a `key: "value";` field
fn first_string(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::string)
        .map(unquote_string)
        .unwrap_or_default()
}

fn unquote_string(pair: Pair<Rule>) -> String {
    let raw = pair
        .into_inner()
        .next()
        .map(|inner| inner.as_str())
        .unwrap_or("");

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
