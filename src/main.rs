mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Command, LoginArgs, RunArgs};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));
    match command {
        Command::Run(args) => cmd_run(args),
        Command::Login(args) => cmd_login(args),
    }
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    init_logging(&args.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let application = app::Application::build(&args)?;
        application.serve().await
    })
}

fn cmd_login(args: LoginArgs) -> anyhow::Result<()> {
    init_logging("info");

    let config = llm_relay_core::config::Config::load(&args.config)?;
    let entry = config
        .providers
        .iter()
        .find(|p| p.name == args.provider)
        .ok_or_else(|| anyhow::anyhow!("provider '{}' is not configured", args.provider))?;
    let settings = entry.oauth.clone().ok_or_else(|| {
        anyhow::anyhow!("provider '{}' has no oauth settings", args.provider)
    })?;

    let store = llm_relay_oauth::store::CredentialStore::new(config.credentials_root());
    let flow = llm_relay_oauth::login::LoginFlow::new(args.provider.clone(), settings, store);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        tokio::select! {
            result = flow.run() => {
                let record = result?;
                println!(
                    "Authenticated '{}' (account: {}).",
                    args.provider,
                    record.account_id.as_deref().unwrap_or("unknown")
                );
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                anyhow::bail!("login cancelled")
            }
        }
    })
}
