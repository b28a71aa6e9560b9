use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "llm-relay", version, about = "Translating proxy for LLM providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay server
    Run(RunArgs),
    /// Authenticate an OAuth provider interactively
    Login(LoginArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "llm-relay.yaml")]
    pub config: String,

    /// Override the configured listen host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the configured listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: "llm-relay.yaml".to_string(),
            host: None,
            port: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "llm-relay.yaml")]
    pub config: String,

    /// Provider to authenticate (must be configured with oauth settings)
    pub provider: String,
}
