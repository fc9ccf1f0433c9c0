mod commands;
mod config;
mod server;
mod webdriver;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    SearchArgs, cmd_dates, cmd_fetch, cmd_menu, cmd_rebuild, cmd_search, cmd_show, cmd_sweep,
    cmd_week,
};
use crate::config::{Config, DEFAULT_WEBDRIVER_URL};
use canteen_core::week::DEFAULT_LOCATION;

#[derive(Parser)]
#[command(
    name = "canteen",
    version,
    about = "Fetch, store and query the weekly cafeteria menu"
)]
struct Cli {
    /// Directory for the per-week databases (default: platform data dir)
    #[arg(long, global = true, env = "CANTEEN_DATA_DIR", value_name = "PATH")]
    data_dir: Option<PathBuf>,
    /// Location token used in week keys
    #[arg(long, global = true, env = "CANTEEN_LOCATION", default_value = DEFAULT_LOCATION)]
    location: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the menu from the source page and store it
    Fetch {
        /// Menu page URL
        #[arg(long, env = "CANTEEN_MENU_URL")]
        url: Option<String>,
        /// WebDriver endpoint driving a headless browser
        #[arg(long, env = "CANTEEN_WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
        webdriver: String,
        /// Store under the week containing this date (default: the upcoming menu week)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the menu served on a date
    Menu {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Meal type: breakfast, lunch
        #[arg(short, long)]
        meal: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search menu items by name, dietary label, meal and date range
    Search {
        /// Case-sensitive substring of the item name
        query: Option<String>,
        /// Dietary label, e.g. Vegan
        #[arg(short, long)]
        dietary: Option<String>,
        /// Meal type: breakfast, lunch
        #[arg(short, long)]
        meal: Option<String>,
        /// First date to include (also selects the week, default: today)
        #[arg(long)]
        start: Option<String>,
        /// Last date to include
        #[arg(long)]
        end: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show every menu stored for a week
    Week {
        /// Any date in the week (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored document for a week key
    Show {
        /// Week key, e.g. london-2026-01-12-2026-01-16
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List indexed dates and meals for a week key
    Dates {
        /// Week key, e.g. london-2026-01-12-2026-01-16
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild a week's search index from its stored document
    Rebuild {
        /// Week key, e.g. london-2026-01-12-2026-01-16
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Expire every week whose retention period has passed
    Sweep {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the read-only HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canteen=info,canteen_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "loaded config");
    let registry = config.registry()?;
    let location = cli.location.as_str();

    match cli.command {
        Commands::Fetch {
            url,
            webdriver,
            date,
            json,
        } => cmd_fetch(&registry, url, &webdriver, location, date.as_deref(), json).await,
        Commands::Menu { date, meal, json } => {
            cmd_menu(&registry, location, date.as_deref(), meal.as_deref(), json)
        }
        Commands::Search {
            query,
            dietary,
            meal,
            start,
            end,
            json,
        } => cmd_search(
            &registry,
            location,
            SearchArgs {
                query,
                dietary,
                meal,
                start,
                end,
            },
            json,
        ),
        Commands::Week { date, json } => cmd_week(&registry, location, date.as_deref(), json),
        Commands::Show { key, json } => cmd_show(&registry, &key, json),
        Commands::Dates { key, json } => cmd_dates(&registry, &key, json),
        Commands::Rebuild { key, json } => cmd_rebuild(&registry, &key, json),
        Commands::Sweep { json } => cmd_sweep(&registry, json),
        Commands::Serve { port, bind } => server::start_server(registry, port, &bind).await,
    }
}
