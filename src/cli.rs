//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// taskwire - follow a task's progress stream over a self-healing WebSocket
///
/// Opens a channel to the backend's task endpoint, prints every message as
/// it arrives, and reconnects with exponential backoff when the connection
/// drops.
#[derive(Parser, Debug)]
#[command(name = "taskwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a task's messages until Ctrl-C or the channel gives up
    Watch {
        /// Task identifier (the <id> in /task/<id>)
        task_id: String,

        /// Path to configuration file
        #[arg(short, long, env = "TASKWIRE_CONFIG")]
        config: Option<String>,

        /// Base WebSocket URL, overriding the configured one
        #[arg(short, long)]
        url: Option<String>,

        /// Print raw JSON instead of the rendered view
        #[arg(long)]
        raw: bool,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_command() {
        let cli = Cli::parse_from(["taskwire", "watch", "task-42"]);
        match cli.command {
            Commands::Watch { task_id, config, url, raw } => {
                assert_eq!(task_id, "task-42");
                assert!(config.is_none());
                assert!(url.is_none());
                assert!(!raw);
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_watch_with_overrides() {
        let cli = Cli::parse_from([
            "taskwire",
            "watch",
            "abc",
            "--url",
            "wss://backend.example.com",
            "--config",
            "/etc/taskwire.toml",
            "--raw",
        ]);
        match cli.command {
            Commands::Watch { url, config, raw, .. } => {
                assert_eq!(url.as_deref(), Some("wss://backend.example.com"));
                assert_eq!(config.as_deref(), Some("/etc/taskwire.toml"));
                assert!(raw);
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_watch_requires_task_id() {
        assert!(Cli::try_parse_from(["taskwire", "watch"]).is_err());
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["taskwire", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["taskwire", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["taskwire", "config", "show"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Show { config } } => {
                assert!(config.is_none());
            }
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["taskwire", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
