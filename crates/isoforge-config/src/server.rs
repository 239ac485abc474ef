//! Server configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "isoforge.kdl";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "/tmp/webui_data";
const DEFAULT_PROFILE_DIR: &str = "/workdir";
const DEFAULT_OUTPUT_DIR: &str = "/workdir/out";
const DEFAULT_IDLE_POLL_MS: u64 = 1000;
const DEFAULT_STEP_DELAY_MS: u64 = 2000;

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,
    /// Directory with the web frontend, served as a fallback.
    pub static_dir: Option<PathBuf>,
    /// archiso profile whose package list and settings are exposed.
    pub profile_dir: PathBuf,
    /// Directory holding the persisted queue and history.
    pub data_dir: PathBuf,
    /// Longest the worker sleeps between queue checks when idle.
    pub idle_poll: Duration,
    /// Which executor runs builds.
    pub executor: ExecutorConfig,
    /// Log output format.
    pub log_format: LogFormat,
}

/// Executor selection and its settings.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorConfig {
    /// Run the build command as a child process.
    Process {
        command: Vec<String>,
        working_dir: Option<PathBuf>,
        output_dir: PathBuf,
    },
    /// Replay a staged fake build.
    Simulated {
        step_delay: Duration,
        output_dir: PathBuf,
    },
}

impl ExecutorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorConfig::Process { .. } => "process",
            ExecutorConfig::Simulated { .. } => "simulated",
        }
    }

    pub fn output_dir(&self) -> &Path {
        match self {
            ExecutorConfig::Process { output_dir, .. } => output_dir,
            ExecutorConfig::Simulated { output_dir, .. } => output_dir,
        }
    }

    fn default_process(output_dir: PathBuf) -> Self {
        ExecutorConfig::Process {
            command: ["/entrypoint.sh", "build", "out", "work"]
                .into_iter()
                .map(String::from)
                .collect(),
            working_dir: Some(PathBuf::from("/workdir")),
            output_dir,
        }
    }

    fn default_simulated(output_dir: PathBuf) -> Self {
        ExecutorConfig::Simulated {
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
            output_dir,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::default_process(PathBuf::from(DEFAULT_OUTPUT_DIR))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            static_dir: None,
            profile_dir: PathBuf::from(DEFAULT_PROFILE_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            idle_poll: Duration::from_millis(DEFAULT_IDLE_POLL_MS),
            executor: ExecutorConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path`, or from `isoforge.kdl` in the working
    /// directory if it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => parse_server_config(&std::fs::read_to_string(path)?),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                parse_server_config(&std::fs::read_to_string(DEFAULT_CONFIG_FILE)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply overrides from the process environment.
    pub fn with_process_env(self) -> ConfigResult<Self> {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `PORT`, `ISOFORGE_BIND`, `ISOFORGE_DATA_DIR` and
    /// `ISOFORGE_EXECUTOR` from the given lookup.
    pub fn with_env_overrides<F>(mut self, var: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                message: format!("not a port number: {}", port),
            })?;
            self.bind.set_port(port);
        }

        if let Some(bind) = var("ISOFORGE_BIND") {
            self.bind = parse_socket_addr("ISOFORGE_BIND", &bind)?;
        }

        if let Some(dir) = var("ISOFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(kind) = var("ISOFORGE_EXECUTOR") {
            if kind != self.executor.kind() {
                let output_dir = self.executor.output_dir().to_path_buf();
                self.executor = match kind.as_str() {
                    "process" => ExecutorConfig::default_process(output_dir),
                    "simulated" => ExecutorConfig::default_simulated(output_dir),
                    other => {
                        return Err(ConfigError::InvalidValue {
                            field: "ISOFORGE_EXECUTOR".to_string(),
                            message: format!("unknown executor: {}", other),
                        });
                    }
                };
            }
        }

        Ok(self)
    }
}

/// Parse server configuration from KDL text.
pub fn parse_server_config(kdl: &str) -> ConfigResult<ServerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = ServerConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                for child in children(node) {
                    match child.name().value() {
                        "bind" => {
                            let bind = get_first_string_arg(child)
                                .ok_or_else(|| ConfigError::MissingField("server.bind".to_string()))?;
                            config.bind = parse_socket_addr("server.bind", &bind)?;
                        }
                        "static-dir" => {
                            config.static_dir = get_first_string_arg(child).map(PathBuf::from);
                        }
                        "profile-dir" => {
                            config.profile_dir = get_first_string_arg(child)
                                .map(PathBuf::from)
                                .ok_or_else(|| {
                                    ConfigError::MissingField("server.profile-dir".to_string())
                                })?;
                        }
                        _ => {}
                    }
                }
            }
            "storage" => {
                for child in children(node) {
                    if child.name().value() == "data-dir" {
                        config.data_dir = get_first_string_arg(child)
                            .map(PathBuf::from)
                            .ok_or_else(|| {
                                ConfigError::MissingField("storage.data-dir".to_string())
                            })?;
                    }
                }
            }
            "worker" => {
                for child in children(node) {
                    if child.name().value() == "idle-poll-ms" {
                        let ms = get_millis_arg(child, "worker.idle-poll-ms")?;
                        if ms == 0 {
                            return Err(ConfigError::InvalidValue {
                                field: "worker.idle-poll-ms".to_string(),
                                message: "must be greater than zero".to_string(),
                            });
                        }
                        config.idle_poll = Duration::from_millis(ms);
                    }
                }
            }
            "executor" => {
                config.executor = parse_executor(node)?;
            }
            "log" => {
                for child in children(node) {
                    if child.name().value() == "format" {
                        config.log_format = match get_first_string_arg(child).as_deref() {
                            Some("pretty") | None => LogFormat::Pretty,
                            Some("json") => LogFormat::Json,
                            Some(other) => {
                                return Err(ConfigError::InvalidValue {
                                    field: "log.format".to_string(),
                                    message: format!("unknown format: {}", other),
                                });
                            }
                        };
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_executor(node: &KdlNode) -> ConfigResult<ExecutorConfig> {
    let kind = get_first_string_arg(node).unwrap_or_else(|| "process".to_string());
    let output_dir = children(node)
        .find(|c| c.name().value() == "output-dir")
        .and_then(get_first_string_arg)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

    match kind.as_str() {
        "process" => {
            let mut executor = ExecutorConfig::default_process(output_dir);
            if let ExecutorConfig::Process {
                command,
                working_dir,
                ..
            } = &mut executor
            {
                for child in children(node) {
                    match child.name().value() {
                        "command" => {
                            *command = get_all_string_args(child);
                            if command.is_empty() {
                                return Err(ConfigError::MissingField(
                                    "executor.command".to_string(),
                                ));
                            }
                        }
                        "working-dir" => {
                            *working_dir = get_first_string_arg(child).map(PathBuf::from);
                        }
                        _ => {}
                    }
                }
            }
            Ok(executor)
        }
        "simulated" => {
            let mut step_delay = Duration::from_millis(DEFAULT_STEP_DELAY_MS);
            for child in children(node) {
                if child.name().value() == "step-delay-ms" {
                    step_delay = Duration::from_millis(get_millis_arg(child, "executor.step-delay-ms")?);
                }
            }
            Ok(ExecutorConfig::Simulated {
                step_delay,
                output_dir,
            })
        }
        other => Err(ConfigError::InvalidValue {
            field: "executor".to_string(),
            message: format!("unknown executor: {}", other),
        }),
    }
}

fn parse_socket_addr(field: &str, value: &str) -> ConfigResult<SocketAddr> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("not a socket address: {}", value),
    })
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes().iter())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_millis_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("must be a non-negative integer, got {}", value),
    })
}
