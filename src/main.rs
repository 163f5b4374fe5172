use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tc_core::logging::{self, token_fingerprint};
use tc_core::{CacheKey, JsonSerializer, RecordKind, RequestContext};
use tc_store::{EnvSecretProvider, FileCacheStore, StoreConfig, TokenCacheStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Store records are logged through `tc_core::logging`, so it stays at info
/// while the rest of `tc_core` only reports warnings.
const DEFAULT_LOG_FILTER: &str = "tokencache=info,tc_store=info,tc_core=warn,tc_core::logging=info";

#[derive(Parser)]
#[command(name = "tokencache")]
#[command(about = "Inspect and maintain the encrypted token cache", long_about = None)]
struct Cli {
    /// Path to the configuration file (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show where the cache lives and what it holds
    Info,
    /// List cached credentials without revealing secrets
    Credentials {
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        realm: Option<String>,
        #[arg(long)]
        home_account_id: Option<String>,
    },
    /// Remove an account and every credential issued to it
    RemoveAccount {
        #[arg(long)]
        home_account_id: String,
        #[arg(long)]
        environment: Option<String>,
    },
    /// Clear every record and leave a wipe marker
    Wipe,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    logging::init_defaults(config.logger_config());

    let store = FileCacheStore::from_config(config, &EnvSecretProvider::default())
        .context("Failed to open token cache")?;
    let context = RequestContext::new().component("tokencache-cli");

    match cli.command {
        Commands::Info => show_info(&store, &context)?,
        Commands::Credentials {
            client_id,
            realm,
            home_account_id,
        } => {
            let mut query = CacheKey::any();
            if let Some(client_id) = client_id {
                query = query.with_client_id(client_id);
            }
            if let Some(realm) = realm {
                query = query.with_realm(realm);
            }
            if let Some(home_account_id) = home_account_id {
                query = query.with_home_account_id(home_account_id);
            }
            list_credentials(&store, &query, &context)?;
        }
        Commands::RemoveAccount {
            home_account_id,
            environment,
        } => {
            let mut query = CacheKey::any().with_home_account_id(home_account_id);
            if let Some(environment) = environment {
                query = query.with_environment(environment);
            }
            store
                .remove_by_token_key(&query, &context)
                .context("Failed to remove credentials")?;
            store
                .remove_by_account_key(&query, &context)
                .context("Failed to remove account")?;
            println!("Removed account and its credentials");
        }
        Commands::Wipe => {
            store.wipe(&context).context("Failed to wipe token cache")?;
            println!("Token cache wiped");
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<StoreConfig> {
    let path = match path {
        Some(path) => path,
        None => {
            let default = StoreConfig::default_path()?;
            if !default.exists() {
                return Ok(StoreConfig::default());
            }
            default
        }
    };

    StoreConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn show_info(store: &FileCacheStore, context: &RequestContext) -> Result<()> {
    println!("Storage: {}", store.storage_dir().display());

    for kind in RecordKind::ALL {
        println!("{:>14}: {}", kind, store.count(kind, context)?);
    }

    match store.get_wipe_info(context)? {
        Some(wipe) => println!(
            "Last wipe: {} by {} (pid {})",
            wipe.wiped_at, wipe.app_id, wipe.process_id
        ),
        None => println!("Last wipe: never"),
    }

    Ok(())
}

fn list_credentials(
    store: &FileCacheStore,
    query: &CacheKey,
    context: &RequestContext,
) -> Result<()> {
    let mut credentials = store.get_credentials(query, &JsonSerializer, context)?;
    credentials.sort_by(|a, b| {
        (&a.client_id, a.credential_type).cmp(&(&b.client_id, b.credential_type))
    });

    if credentials.is_empty() {
        println!("No matching credentials");
        return Ok(());
    }

    for credential in credentials {
        let expiry = match credential.expires_on {
            Some(_) if credential.is_expired() => "expired".to_string(),
            Some(at) => at.to_rfc3339(),
            None => "-".to_string(),
        };
        println!(
            "{:<24} {:<36} {:<28} {:<12} {} {}",
            credential.credential_type.as_str(),
            credential.client_id,
            credential.environment,
            credential.realm.as_deref().unwrap_or("-"),
            expiry,
            token_fingerprint(&credential.secret),
        );
    }

    Ok(())
}
