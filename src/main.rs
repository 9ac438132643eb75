//! DaVinci CLI entry point.

use anyhow::Result;
use clap::Parser;
use davinci::cli::{commands, Cli, Commands};
use davinci::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env supplies DB_* and S3_BUCKET_NAME before the settings read them
    dotenv::dotenv().ok();

    let config_path = cli.config.as_deref().map(Settings::expand_path);
    let settings = Settings::load_from(config_path.as_ref())?;

    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Logs go to stderr so `mcp` keeps stdout for JSON-RPC
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("davinci={}", log_level))))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    std::fs::create_dir_all(settings.temp_dir())?;

    match &cli.command {
        Commands::Ask {
            question,
            show_tasks,
            json,
            call_id,
        } => {
            commands::run_ask(question, *show_tasks, *json, call_id.clone(), settings).await?;
        }

        Commands::Tool { name, args } => {
            commands::run_tool(name, args, settings).await?;
        }

        Commands::Tools => {
            commands::run_tools()?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, config_path.as_deref()).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, *port, settings).await?;
        }

        Commands::Mcp => {
            commands::run_mcp(settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings, config_path)?;
        }
    }

    Ok(())
}
