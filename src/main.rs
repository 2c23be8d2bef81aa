use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod attendance;
mod client;
mod commands;
mod config;
mod error;
mod import;
mod models;
mod report;
mod schedule;
mod sequence;
mod store;

use crate::client::ErpClient;
use crate::commands::SyncKind;
use crate::config::Config;
use crate::models::Credentials;
use crate::store::{Cache, SqliteStore};

#[derive(Parser)]
#[command(name = "erp-companion")]
#[command(about = "Timetable, attendance and exam companion for the university ERP portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the local store
    InitStore,
    /// Save the portal login used for syncing
    Credentials {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Fetch a CAPTCHA image to solve before syncing
    Captcha {
        #[arg(long, default_value = "captcha.png")]
        out: PathBuf,
    },
    /// Fetch data from the portal using the solved CAPTCHA
    Sync {
        #[arg(value_enum)]
        kind: SyncKind,
        #[arg(long)]
        captcha: String,
        /// Sync a Maddy's timetable instead of your own
        #[arg(long)]
        maddy: Option<String>,
    },
    /// Show cached attendance with guidance
    Attendance {
        #[arg(long)]
        target: Option<f64>,
    },
    /// Set the attendance target percentage
    Target { percentage: f64 },
    /// Attendance calculator
    Calc {
        #[arg(long)]
        present: i64,
        #[arg(long)]
        total: i64,
        #[arg(long)]
        target: Option<f64>,
        /// Sessions you plan to attend
        #[arg(long, default_value_t = 0)]
        attend: u32,
        /// Sessions you plan to miss
        #[arg(long, default_value_t = 0)]
        miss: u32,
    },
    /// Show the timetable for a day (defaults to today)
    Timetable {
        #[arg(long)]
        day: Option<String>,
        /// Also write the full timetable as CSV
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Show exam seating
    Seating {
        /// Include past exams
        #[arg(long)]
        all: bool,
    },
    /// List course handouts
    Handouts,
    /// Manage Maddys
    Maddy {
        #[command(subcommand)]
        command: MaddyCommands,
    },
    /// Import attendance from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate a markdown attendance report
    Report {
        #[arg(long)]
        target: Option<f64>,
        #[arg(long, default_value = "attendance-report.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum MaddyCommands {
    Add {
        name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Remove {
        name: String,
    },
    List,
    /// Slots where you and the Maddy are both free
    Compare {
        name: String,
        #[arg(long)]
        day: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "erp_companion=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let sqlite = SqliteStore::connect(&config.store_url)
        .await
        .with_context(|| format!("failed to open local store at {}", config.store_url))?;
    let cache = Cache::new(sqlite);

    match cli.command {
        Commands::InitStore => {
            println!("Store ready.");
        }
        Commands::Credentials { username, password } => {
            cache
                .set(&store::CREDENTIALS, &Credentials { username, password })
                .await?;
            println!("Credentials saved.");
        }
        Commands::Captcha { out } => {
            let client = erp_client(&config)?;
            commands::save_captcha(&cache, &client, &out).await?;
            println!("CAPTCHA written to {}.", out.display());
        }
        Commands::Sync {
            kind,
            captcha,
            maddy,
        } => {
            let client = erp_client(&config)?;
            let summary =
                commands::sync(&cache, &client, kind, &captcha, maddy.as_deref()).await?;
            println!("{summary}");
        }
        Commands::Attendance { target } => {
            let target = commands::resolve_target(&cache, target, config.default_target).await?;
            let (records, notice) =
                commands::load_attendance(&cache, config.attendance_ttl).await?;
            let courses = attendance::aggregate_courses(&records);
            print!("{}", commands::render_attendance(&courses, target));
            if let Some(notice) = notice {
                println!("{notice}");
            }
        }
        Commands::Target { percentage } => {
            commands::set_target(&cache, percentage).await?;
            println!("Attendance target set to {percentage}%.");
        }
        Commands::Calc {
            present,
            total,
            target,
            attend,
            miss,
        } => {
            let target = commands::resolve_target(&cache, target, config.default_target).await?;
            print!("{}", commands::calculate(present, total, target, attend, miss)?);
        }
        Commands::Timetable { day, export } => {
            let output =
                commands::show_timetable(&cache, day.as_deref(), export.as_deref()).await?;
            print!("{output}");
            if let Some(path) = export {
                println!("Timetable exported to {}.", path.display());
            }
        }
        Commands::Seating { all } => {
            print!("{}", commands::show_seating(&cache, all).await?);
        }
        Commands::Handouts => {
            let handouts = cache
                .get(&store::HANDOUTS)
                .await?
                .context("no handouts cached; run `erp-companion sync handouts` first")?;
            if handouts.is_empty() {
                println!("No handouts published.");
            }
            for handout in handouts {
                println!(
                    "- {} {}: {}",
                    handout.course_code, handout.course_name, handout.url
                );
            }
        }
        Commands::Maddy { command } => match command {
            MaddyCommands::Add {
                name,
                username,
                password,
            } => {
                commands::add_maddy(&cache, &name, &Credentials { username, password }).await?;
                println!("Added {name}.");
            }
            MaddyCommands::Remove { name } => {
                commands::remove_maddy(&cache, &name).await?;
                println!("Removed {name}.");
            }
            MaddyCommands::List => {
                let maddys = cache.get(&store::MADDYS).await?.unwrap_or_default();
                if maddys.is_empty() {
                    println!("No Maddys yet.");
                }
                for maddy in maddys {
                    let synced = if maddy.timetable.is_some() {
                        "timetable synced"
                    } else {
                        "not synced"
                    };
                    println!("- {} ({}, {})", maddy.name, maddy.username, synced);
                }
            }
            MaddyCommands::Compare { name, day } => {
                let free = commands::compare_with_maddy(&cache, &name, &day).await?;
                if free.is_empty() {
                    println!("No common free slots on {day}.");
                } else {
                    println!("Free with {name} on {day}: {}", free.join(", "));
                }
            }
        },
        Commands::Import { csv } => {
            let inserted = commands::import_attendance(&cache, &csv).await?;
            println!("Imported {inserted} attendance sections from {}.", csv.display());
        }
        Commands::Report { target, out } => {
            let target = commands::resolve_target(&cache, target, config.default_target).await?;
            let (records, notice) =
                commands::load_attendance(&cache, config.attendance_ttl).await?;
            let report =
                report::build_report(&records, target, chrono::Local::now().date_naive());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
            if let Some(notice) = notice {
                println!("{notice}");
            }
        }
    }

    Ok(())
}

fn erp_client(config: &Config) -> anyhow::Result<ErpClient> {
    let api_url = config.require_api_url()?;
    Ok(ErpClient::new(api_url, config.captcha_timeout))
}
