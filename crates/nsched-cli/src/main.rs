//! nsched-cli: thin clap-derive command dispatch for operator tooling.

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "nsched")]
#[command(about = "Notification Scheduler Core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Schedule store inspection/escape-hatch commands
    Schedule {
        #[command(subcommand)]
        cmd: ScheduleCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Run embedded migrations.
    Migrate {
        /// Run even if rows are due within the next minute.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ScheduleCmd {
    /// Print the current `peek_next_due` result.
    Peek,
    /// Delete all rows for a game (operator escape hatch).
    Clear {
        #[arg(long)]
        game: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Migrate { force } => {
                let pool = nsched_db::connect_from_env().await?;

                if !force {
                    let now = Utc::now();
                    if let Some((due, row_id)) = nsched_db::peek_next_due(&pool, now).await? {
                        if due <= now + Duration::minutes(1) {
                            bail!(
                                "refusing to migrate: row {row_id} is due at {due} (within the next minute); pass --force to override"
                            );
                        }
                    }
                }

                nsched_db::migrate(&pool).await?;
                println!("migrations_applied=true");
            }
        },

        Commands::Schedule { cmd } => match cmd {
            ScheduleCmd::Peek => {
                let pool = nsched_db::connect_from_env().await?;
                match nsched_db::peek_next_due(&pool, Utc::now()).await? {
                    Some((due, row_id)) => println!("next_due={due} row_id={row_id}"),
                    None => println!("next_due=none"),
                }
            }
            ScheduleCmd::Clear { game } => {
                let pool = nsched_db::connect_from_env().await?;
                let mut tx = pool.begin().await?;
                nsched_populator::clear(&mut tx, game).await?;
                tx.commit().await?;
                println!("cleared game_id={game}");
            }
        },
    }

    Ok(())
}
