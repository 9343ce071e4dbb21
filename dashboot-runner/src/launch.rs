//! Hand-over to the long-running dashboard server.
//!
//! The port is looked up when the server is about to start, after every
//! extraction step has finished. With [`LaunchMode::Exec`] the sequencer's
//! process image is replaced, so the server's exit code becomes ours.

use dashboot_core::{DashbootError, Result, ServeSpec, ServerLaunch};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Replace the current process (unix only)
    Exec,
    /// Run as a child and wait for it
    Spawn,
}

impl Default for LaunchMode {
    fn default() -> Self {
        if cfg!(unix) {
            LaunchMode::Exec
        } else {
            LaunchMode::Spawn
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerLauncher {
    work_dir: Option<PathBuf>,
}

impl ServerLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Resolve host, port and placeholders. `lookup` reads environment
    /// variables; an explicit `port_override` wins over it.
    pub fn resolve<F>(serve: &ServeSpec, port_override: Option<u16>, lookup: F) -> Result<ServerLaunch>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match port_override {
            Some(port) => port,
            None => {
                let raw = lookup(&serve.port_env)
                    .ok_or_else(|| DashbootError::MissingPort(serve.port_env.clone()))?;
                parse_port(&serve.port_env, &raw)?
            }
        };
        if port == 0 {
            return Err(DashbootError::InvalidPort {
                variable: serve.port_env.clone(),
                value: port.to_string(),
            });
        }

        let host = if serve.host.is_empty() {
            dashboot_core::DEFAULT_HOST.to_string()
        } else {
            serve.host.clone()
        };
        let port_text = port.to_string();
        let args = serve
            .args
            .iter()
            .map(|arg| arg.replace("{host}", &host).replace("{port}", &port_text))
            .collect();

        Ok(ServerLaunch {
            program: serve.program.clone(),
            args,
            host,
            port,
            env: serve.env.clone(),
        })
    }

    /// Start the server. In `Exec` mode this only returns on failure.
    pub async fn launch(&self, launch: &ServerLaunch, mode: LaunchMode) -> Result<ExitStatus> {
        info!(
            program = %launch.program,
            bind = %launch.bind_address(),
            mode = ?mode,
            "Launching server"
        );

        match mode {
            LaunchMode::Exec => self.exec(launch),
            LaunchMode::Spawn => {
                let mut cmd = tokio::process::Command::new(&launch.program);
                cmd.args(&launch.args)
                    .envs(&launch.env)
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
                if let Some(dir) = &self.work_dir {
                    cmd.current_dir(dir);
                }
                cmd.status()
                    .await
                    .map_err(|e| DashbootError::LaunchFailed(format!("{}: {}", launch.program, e)))
            }
        }
    }

    #[cfg(unix)]
    fn exec(&self, launch: &ServerLaunch) -> Result<ExitStatus> {
        use std::os::unix::process::CommandExt;

        let mut cmd = std::process::Command::new(&launch.program);
        cmd.args(&launch.args).envs(&launch.env);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        let err = cmd.exec();
        Err(DashbootError::LaunchFailed(format!("{}: {}", launch.program, err)))
    }

    #[cfg(not(unix))]
    fn exec(&self, launch: &ServerLaunch) -> Result<ExitStatus> {
        let mut cmd = std::process::Command::new(&launch.program);
        cmd.args(&launch.args).envs(&launch.env);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd.status()
            .map_err(|e| DashbootError::LaunchFailed(format!("{}: {}", launch.program, e)))
    }
}

fn parse_port(variable: &str, raw: &str) -> Result<u16> {
    raw.trim().parse::<u16>().map_err(|_| DashbootError::InvalidPort {
        variable: variable.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashboot_core::variants::waitress_serve;

    fn env_with(port: Option<&'static str>) -> impl Fn(&str) -> Option<String> {
        move |key: &str| match (key, port) {
            ("PORT", Some(value)) => Some(value.to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_resolve_binds_all_interfaces_on_port_env() {
        let launch = ServerLauncher::resolve(&waitress_serve(), None, env_with(Some("8050"))).unwrap();
        assert_eq!(launch.host, "0.0.0.0");
        assert_eq!(launch.port, 8050);
        assert_eq!(launch.args, vec!["--listen=0.0.0.0:8050", "app:server"]);
    }

    #[test]
    fn test_resolve_override_wins() {
        let launch =
            ServerLauncher::resolve(&waitress_serve(), Some(9000), env_with(Some("8050"))).unwrap();
        assert_eq!(launch.bind_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_resolve_missing_port() {
        let err = ServerLauncher::resolve(&waitress_serve(), None, env_with(None)).unwrap_err();
        assert!(matches!(err, DashbootError::MissingPort(ref v) if v == "PORT"));
    }

    #[test]
    fn test_resolve_invalid_port() {
        for bad in ["abc", "70000", "0", ""] {
            let lookup = move |_: &str| Some(bad.to_string());
            let err = ServerLauncher::resolve(&waitress_serve(), None, lookup).unwrap_err();
            assert!(matches!(err, DashbootError::InvalidPort { .. }), "port {:?}", bad);
        }
    }

    #[test]
    fn test_resolve_custom_port_env_and_host() {
        let mut serve = waitress_serve();
        serve.port_env = "DASH_PORT".to_string();
        serve.host = "127.0.0.1".to_string();
        let lookup = |key: &str| (key == "DASH_PORT").then(|| "8080".to_string());
        let launch = ServerLauncher::resolve(&serve, None, lookup).unwrap();
        assert_eq!(launch.args[0], "--listen=127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_spawn_returns_server_exit_status() {
        let serve = ServeSpec::new("sh", ["-c", "test \"$1\" = 0.0.0.0:8050 && exit 7", "sh", "{host}:{port}"]);
        let launch = ServerLauncher::resolve(&serve, Some(8050), env_with(None)).unwrap();
        let status = ServerLauncher::new()
            .launch(&launch, LaunchMode::Spawn)
            .await
            .unwrap();
        assert_eq!(status.code(), Some(7));
    }

    #[tokio::test]
    async fn test_spawn_missing_server_program() {
        let serve = ServeSpec::new("dashboot-definitely-missing-server", Vec::<String>::new());
        let launch = ServerLauncher::resolve(&serve, Some(8050), env_with(None)).unwrap();
        let err = ServerLauncher::new()
            .launch(&launch, LaunchMode::Spawn)
            .await
            .unwrap_err();
        assert!(matches!(err, DashbootError::LaunchFailed(_)));
    }
}
