//! Configuration management for the Kandalf server
//!
//! Values come from, in increasing priority: the YAML file, `KANDALF_*`
//! environment variables, then command line flags.

use std::path::PathBuf;

use clap::Parser;
use config::{Config, Environment, File};
use kandalf_cluster::ClusterSettings;
use kandalf_common::WorkerFactory;

use crate::startup::{LogRotation, LoggingConfig};
use crate::worker::CommandWorker;

pub const DEFAULT_CONFIG_FILE: &str = "conf/kandalf.yml";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "kandalf", version, about = "Runs the message relay on the cluster leader")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "KANDALF_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Seed peer `host:port`; repeat for every cluster member
    #[arg(short = 'p', long = "peer")]
    pub peers: Vec<String>,

    /// Directory for the raft log, snapshots and peer registry
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(File::with_name(&args.config).required(false))
            .add_source(
                Environment::with_prefix("KANDALF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.data_dir {
            config_builder = config_builder.set_override("cluster.data_dir", v)?;
        }
        if !args.peers.is_empty() {
            config_builder = config_builder.set_override("cluster.nodes", args.peers)?;
        }

        let app_config = config_builder.build()?;
        Ok(Configuration { config: app_config })
    }

    // ========================================================================
    // Cluster Configuration
    // ========================================================================

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings::from_config(&self.config)
    }

    pub fn nodes(&self) -> Vec<String> {
        ClusterSettings::nodes_from_config(&self.config)
    }

    // ========================================================================
    // Worker Configuration
    // ========================================================================

    pub fn worker_command(&self) -> Option<String> {
        self.config
            .get_string("worker.command")
            .ok()
            .map(|command| command.trim().to_string())
            .filter(|command| !command.is_empty())
    }

    /// Arguments of the relay command; a plain string is split on whitespace
    pub fn worker_args(&self) -> Vec<String> {
        match self.config.get_array("worker.args") {
            Ok(values) => values
                .into_iter()
                .filter_map(|value| value.into_string().ok())
                .collect(),
            Err(_) => self
                .config
                .get_string("worker.args")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    pub fn worker_factory(&self) -> WorkerFactory {
        CommandWorker::factory(self.worker_command(), self.worker_args())
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let level = self
            .config
            .get_string("logging.level")
            .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

        let log_dir = self
            .config
            .get_string("logging.dir")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let rotation = self
            .config
            .get_string("logging.rotation")
            .ok()
            .and_then(|raw| LogRotation::parse(&raw))
            .unwrap_or(LogRotation::Daily);

        LoggingConfig {
            level,
            log_dir,
            rotation,
        }
    }
}
