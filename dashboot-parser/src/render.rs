use dashboot_core::{Deployment, FailurePolicy};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Render a deployment back into Deployfile syntax
pub fn render_deployfile(deployment: &Deployment) -> String {
    let mut out = String::new();
    out.push_str("# Deployfile - dashboot deployment definition\n\n");
    out.push_str("deployment {\n");
    let _ = writeln!(out, "  name: {};", quote(&deployment.name));
    let _ = writeln!(out, "  version: {};", quote(&deployment.version));
    out.push('\n');

    out.push_str("  steps {\n");
    for (idx, step) in deployment.steps.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "    step {} {{", quote(&step.name));
        write_run(&mut out, 6, &step.program, &step.args);
        if let Some(announce) = &step.announce {
            let _ = writeln!(out, "      announce: {};", quote(announce));
        }
        if step.on_failure != FailurePolicy::Ignore {
            let _ = writeln!(out, "      on_failure: {};", step.on_failure.as_str());
        }
        write_env(&mut out, 6, &step.env);
        out.push_str("    }\n");
    }
    out.push_str("  }\n\n");

    let serve = &deployment.serve;
    out.push_str("  serve {\n");
    write_run(&mut out, 4, &serve.program, &serve.args);
    let _ = writeln!(out, "    host: {};", quote(&serve.host));
    let _ = writeln!(out, "    port_env: {};", quote(&serve.port_env));
    if let Some(announce) = &serve.announce {
        let _ = writeln!(out, "    announce: {};", quote(announce));
    }
    write_env(&mut out, 4, &serve.env);
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}

fn write_run(out: &mut String, indent: usize, program: &str, args: &[String]) {
    let words: Vec<String> = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(quote)
        .collect();
    let _ = writeln!(out, "{:indent$}run: [{}];", "", words.join(", "), indent = indent);
}

fn write_env(out: &mut String, indent: usize, env: &BTreeMap<String, String>) {
    if env.is_empty() {
        return;
    }
    let _ = writeln!(out, "{:indent$}env {{", "", indent = indent);
    for (key, value) in env {
        let _ = writeln!(
            out,
            "{:indent$}{}: {};",
            "",
            key,
            quote(value),
            indent = indent + 2
        );
    }
    let _ = writeln!(out, "{:indent$}}}", "", indent = indent);
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_deployfile;
    use dashboot_core::variants::DEFAULT_PYTHON;
    use dashboot_core::Variant;

    #[test]
    fn test_rendered_variants_parse_back() {
        for variant in Variant::ALL {
            let deployment = variant.deployment(DEFAULT_PYTHON);
            let text = render_deployfile(&deployment);
            let parsed = parse_deployfile(&text).unwrap();
            assert_eq!(parsed, deployment, "variant {}", variant);
        }
    }

    #[test]
    fn test_render_multi_tenant_env_block() {
        let text = render_deployfile(&Variant::MultiTenant.deployment(DEFAULT_PYTHON));
        assert!(text.contains("JIRA_PROJECT_KEY: \"techcarrot Time Sheet\";"));
        assert!(text.contains("JIRA_LABEL_FILTER: \"Gitex-2025\";"));
        assert!(text.contains("run: [\"waitress-serve\", \"--listen={host}:{port}\", \"app:server\"];"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a \"b\"\\"), "\"a \\\"b\\\"\\\\\"");
    }
}
