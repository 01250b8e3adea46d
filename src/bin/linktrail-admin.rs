use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use linktrail::analytics::{AggregateStore, AnalyticsRange, AnalyticsService};
use linktrail::config::Config;
use linktrail::directory::LinkDirectory;
use linktrail::models::NewLink;
use linktrail::storage;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "linktrail-admin")]
#[command(about = "Linktrail link and analytics management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a short link
    Create {
        /// Destination URL
        url: String,
        /// Custom short code (random 6 characters when omitted)
        #[arg(long)]
        code: Option<String>,
        /// Require this password before redirecting
        #[arg(long)]
        password: Option<String>,
        /// Expiry as a unix timestamp
        #[arg(long)]
        expires_at: Option<i64>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Re-enable a deactivated link
    Activate { code: String },
    /// Stop a link from redirecting
    Deactivate { code: String },
    /// Soft-delete a link
    Delete { code: String },
    /// Print analytics for a link as JSON
    Stats {
        code: String,
        #[arg(long, default_value_t = 15)]
        days: u32,
    },
    /// Recompute daily aggregates from enriched clicks
    Rebuild {
        code: String,
        /// Day to rebuild (YYYY-MM-DD); defaults to the last `--days` days
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::connect(&config.database).await?;
    let directory = LinkDirectory::new(Arc::clone(&storage), &config.cache);

    match cli.command {
        Commands::Create {
            url,
            code,
            password,
            expires_at,
            owner,
        } => {
            let link = directory
                .create(NewLink {
                    original_url: url,
                    short_code: code,
                    owner_id: owner,
                    expires_at,
                    password,
                })
                .await?;
            println!("✓ Created '{}' -> {}", link.short_code, link.original_url);
        }
        Commands::Activate { code } => report(directory.set_active(&code, true).await?, &code, "activated"),
        Commands::Deactivate { code } => {
            report(directory.set_active(&code, false).await?, &code, "deactivated")
        }
        Commands::Delete { code } => report(directory.soft_delete(&code).await?, &code, "deleted"),
        Commands::Stats { code, days } => {
            if !(1..=linktrail::analytics::query::MAX_RANGE_DAYS).contains(&days) {
                bail!("--days must be between 1 and {}", linktrail::analytics::query::MAX_RANGE_DAYS);
            }
            let link = directory
                .resolve_fresh(&code)
                .await
                .with_context(|| format!("link '{code}'"))?;
            let analytics = AnalyticsService::new(Arc::clone(&storage));
            let summary = analytics
                .get_analytics(&link, AnalyticsRange::last_days(days, Utc::now().date_naive()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Rebuild { code, date, days } => {
            let link = directory
                .resolve_fresh(&code)
                .await
                .with_context(|| format!("link '{code}'"))?;
            let range = match date {
                Some(date) => AnalyticsRange::new(date, date)?,
                None => AnalyticsRange::last_days(days, Utc::now().date_naive()),
            };

            let aggregates = AggregateStore::new(Arc::clone(&storage));
            let now = Utc::now().timestamp();
            for date in range.dates() {
                let day = aggregates.rebuild(link.id, date, now).await?;
                println!(
                    "✓ {} {}: {} clicks, {} unique",
                    code, date, day.total_clicks, day.unique_clicks
                );
            }
        }
    }

    Ok(())
}

fn report(changed: bool, code: &str, action: &str) {
    if changed {
        println!("✓ Link '{}' {}", code, action);
    } else {
        println!("⚠ Link '{}' not found or already {}", code, action);
    }
}
