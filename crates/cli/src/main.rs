use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use shelf_db::{Session, SnowflakeConnector};
use shelf_kernel::settings::Settings;

/// Operate the shelf books service.
#[derive(Debug, Parser)]
#[command(name = "shelf", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Load and print the effective settings (password redacted)
    CheckConfig,
    /// Open and close one warehouse session to verify credentials
    Ping,
}

async fn ping(settings: &Settings) -> anyhow::Result<()> {
    let connector =
        SnowflakeConnector::new(&settings.warehouse).context("failed to build warehouse client")?;
    let session = Session::open(&connector)
        .await
        .with_context(|| format!("could not open a session on {}", settings.warehouse.account))?;
    session.close().await;
    Ok(())
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load shelf settings")?;
    shelf_telemetry::init(&settings.telemetry)?;

    match cli.command {
        Command::Serve => shelf_app::run(settings).await,
        Command::CheckConfig => {
            tracing::info!(env = ?settings.environment, "settings loaded");
            println!("{:#?}", settings);
            Ok(())
        }
        Command::Ping => {
            ping(&settings).await?;
            tracing::info!(
                account = %settings.warehouse.account,
                "warehouse session opened and closed"
            );
            println!(
                "connected to {} ({}/{}/{})",
                settings.warehouse.account,
                settings.warehouse.warehouse,
                settings.warehouse.database,
                settings.warehouse.schema
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
