use clap::{Parser, Subcommand};

use claw_pwa_core::config::Config;

mod commands;
mod logging;

#[derive(Parser)]
#[command(
    name = "claw-pwa",
    about = "Browser bridge and command-line client for the OpenClaw gateway",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Gateway WebSocket URL (overrides config)
    #[arg(short, long, global = true)]
    gateway: Option<String>,

    /// Gateway auth token (overrides config)
    #[arg(short, long, global = true)]
    token: Option<String>,

    /// Bridge server port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server
    Serve,

    /// Send a message and stream the agent's reply
    Chat {
        /// Message to send
        message: String,

        /// Session key (default from config)
        #[arg(long)]
        session: Option<String>,

        /// Thinking mode: true, false, or a mode name such as "auto"
        #[arg(long)]
        thinking: Option<String>,

        /// Do not ask the gateway to deliver the reply to other channels
        #[arg(long)]
        no_deliver: bool,
    },

    /// Print a session's message history
    History {
        /// Session key (default from config)
        #[arg(long)]
        session: Option<String>,

        /// Maximum number of messages
        #[arg(long)]
        limit: Option<u32>,

        /// Print raw JSON records
        #[arg(long)]
        json: bool,
    },

    /// Connect, authenticate, and print gateway metadata
    Probe,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// PWA channel plugin
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[derive(Subcommand)]
enum ChannelAction {
    /// Print the channel descriptor registered with the gateway
    Describe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load(&config_path)?;
    config.apply_overrides(cli.gateway, cli.token, cli.port);

    logging::init_logging(cli.verbose, &config.logging.clone().unwrap_or_default());
    tracing::debug!(path = %config_path.display(), "Using config");

    match cli.command {
        Commands::Serve => commands::serve(&config).await?,
        Commands::Chat {
            message,
            session,
            thinking,
            no_deliver,
        } => {
            commands::chat(
                &config,
                commands::ChatArgs {
                    message,
                    session,
                    thinking,
                    no_deliver,
                },
            )
            .await?
        }
        Commands::History {
            session,
            limit,
            json,
        } => commands::history(&config, session, limit, json).await?,
        Commands::Probe => commands::probe(&config).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config)?,
            ConfigAction::Get { key } => commands::config_get(&config, &key)?,
            ConfigAction::Validate => commands::config_validate(&config)?,
        },
        Commands::Channel { action } => match action {
            ChannelAction::Describe => commands::channel_describe()?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "claw-pwa",
            "chat",
            "hello",
            "--gateway",
            "ws://gw:1/",
            "-t",
            "tok",
            "--session",
            "s1",
        ])
        .unwrap();
        assert_eq!(cli.gateway.as_deref(), Some("ws://gw:1/"));
        assert_eq!(cli.token.as_deref(), Some("tok"));
        match cli.command {
            Commands::Chat {
                message, session, ..
            } => {
                assert_eq!(message, "hello");
                assert_eq!(session.as_deref(), Some("s1"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_serve_port_override() {
        let cli = Cli::try_parse_from(["claw-pwa", "-p", "8080", "serve"]).unwrap();
        let mut config = Config::default();
        config.apply_overrides(cli.gateway, cli.token, cli.port);
        assert_eq!(config.server().port, 8080);
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["claw-pwa", "config", "get", "gateway.url"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Get { ref key }
            } if key == "gateway.url"
        ));
        assert!(Cli::try_parse_from(["claw-pwa", "history", "--limit", "x"]).is_err());
    }
}
