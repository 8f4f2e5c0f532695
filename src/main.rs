use cassa::cache::{CacheStorage, SqliteStorage};
use cassa::config::Config;
use cassa::ledger::{LedgerService, SqliteRowStore};
use cassa::net::HttpNetwork;
use cassa::worker::{purge_stale_generations, Registration};
use cassa::logging;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cassa")]
#[command(about = "Expense ledger with a versioned offline cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cassa/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured cache version
  Install,
  /// Fetch a path or URL through the offline cache and print the body
  Fetch {
    /// Path relative to the origin, or an absolute URL
    target: String,
  },
  /// List cache generations and their entries
  Status,
  /// Delete every cache generation except the configured version
  Purge,
  /// Ledger maintenance
  Ledger {
    #[command(subcommand)]
    action: LedgerAction,
  },
}

#[derive(Subcommand, Debug)]
enum LedgerAction {
  /// Create the ledger sheets and seed default categories
  Setup,
  /// Print the records of one kind as JSON
  List {
    #[arg(value_enum)]
    kind: RecordKind,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RecordKind {
  Transactions,
  Personal,
  Categories,
}

type HttpRegistration = Registration<SqliteStorage, HttpNetwork>;

fn open_registration(config: &Config) -> Result<HttpRegistration> {
  let path = match &config.offline.cache_path {
    Some(path) => path.clone(),
    None => SqliteStorage::default_path()?,
  };
  let storage = SqliteStorage::open(&path)?;
  let network = HttpNetwork::new(config.offline.timeout())?;
  Ok(Registration::new(Arc::new(storage), Arc::new(network)))
}

fn open_ledger(config: &Config) -> Result<LedgerService<SqliteRowStore>> {
  let path = match &config.ledger.db_path {
    Some(path) => path.clone(),
    None => SqliteRowStore::default_path()?,
  };
  Ok(LedgerService::new(SqliteRowStore::open(&path)?))
}

fn print_generation(storage: &SqliteStorage, tag: &str, current: &str) -> Result<()> {
  let marker = if tag == current { "*" } else { " " };
  println!("{} {}", marker, tag);
  for key in storage.keys(tag)? {
    println!("    {}", key);
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  match args.command {
    Command::Install => {
      let registration = open_registration(&config)?;
      let controller = registration
        .register(config.offline.controller_config()?)
        .await?;
      print_generation(registration.storage(), controller.version(), controller.version())?;
    }
    Command::Fetch { target } => {
      let registration = open_registration(&config)?;
      let controller = registration
        .ensure(config.offline.controller_config()?)
        .await?;
      let request = controller.config().resolve(&target)?;

      let result = registration.fetch(request).await?;
      info!(
        "Served {} from {:?} (status {})",
        result.data.url(),
        result.source,
        result.data.status()
      );
      controller.wait_until_idle().await;

      std::io::stdout()
        .write_all(&result.data.into_body())
        .map_err(|e| eyre!("Failed to write response body: {}", e))?;
    }
    Command::Status => {
      let current = config.offline.controller_config()?;
      let registration = open_registration(&config)?;
      let storage = registration.storage();
      let tags = storage.generations()?;
      if tags.is_empty() {
        println!("No cache generations");
      }
      for tag in tags {
        print_generation(storage, &tag, current.version())?;
      }
    }
    Command::Purge => {
      let current = config.offline.controller_config()?;
      let registration = open_registration(&config)?;
      let removed = purge_stale_generations(registration.storage().as_ref(), current.version());
      println!("Removed {} stale generation(s)", removed);
    }
    Command::Ledger { action } => {
      let ledger = open_ledger(&config)?;
      match action {
        LedgerAction::Setup => {
          ledger.setup_transactions()?;
          ledger.setup_personal()?;
          ledger.setup_categories()?;
          println!("Ledger sheets ready");
        }
        LedgerAction::List { kind } => {
          let response = match kind {
            RecordKind::Transactions => ledger.get_transactions(),
            RecordKind::Personal => ledger.get_personal(),
            RecordKind::Categories => ledger.get_categories(),
          };
          println!("{}", response.to_json());
        }
      }
    }
  }

  Ok(())
}
