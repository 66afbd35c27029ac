use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notecfg::api::ApiClient;
use notecfg::{AjaxBackend, ConfigRecord, LocalStore, MemoryBackend, NotepadBackend, Session, Settings};

/// notecfg - script settings stored in notepad files on the host site
#[derive(Parser)]
#[command(name = "notecfg")]
#[command(version)]
struct Cli {
    /// Host site root (overrides hostUrl from the settings file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// User whose settings are used (overrides userId)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Local cache directory (overrides storageDir)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Use an in-process notepad instead of the host. Nothing leaves the machine.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one value
    Get {
        script: String,
        key: String,
        /// JSON printed when the key is unset
        #[arg(long, default_value = "null")]
        default: String,
    },
    /// Change one value locally (use `persist` to upload)
    Set {
        script: String,
        key: String,
        /// JSON value; bare words are stored as strings
        value: String,
    },
    /// Remove one value locally
    Remove { script: String, key: String },
    /// Print a script's whole record
    Show { script: String },
    /// Upload a script's record to the host
    Persist { script: String },
    /// Replace the local copy with the host's
    Sync { script: String },
    /// List the scripts that have a settings file
    Files,
    /// Fetch from the site API through the local cache
    Api {
        path: String,
        /// Cache lifetime in seconds
        #[arg(long, default_value_t = 300)]
        ttl: u64,
    },
    /// Write the effective options back to ~/.notecfg/config.json
    Init,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notecfg=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Command-line values win over the settings file.
fn effective_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::load();
    if let Some(ref host) = cli.host {
        settings.host_url = Some(host.clone());
    }
    if let Some(ref user) = cli.user {
        settings.user_id = Some(user.clone());
    }
    if let Some(ref storage) = cli.storage {
        settings.storage_dir = Some(storage.to_string_lossy().to_string());
    }
    settings
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The in-process backend hands out ids that mean nothing on the host, so a
/// dry run caches into a throwaway directory, never the real one.
fn open_store(
    settings: &Settings,
    user: String,
    memory: bool,
) -> anyhow::Result<(LocalStore, Option<tempfile::TempDir>)> {
    if memory {
        let scratch = tempfile::tempdir().context("creating scratch cache")?;
        let store = LocalStore::open(scratch.path(), user)?;
        return Ok((store, Some(scratch)));
    }
    Ok((LocalStore::open(settings.storage_dir()?, user)?, None))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = effective_settings(&cli);

    if let Commands::Init = cli.command {
        settings.save()?;
        eprintln!("[notecfg] settings saved");
        return Ok(());
    }

    let user = settings
        .user_id
        .clone()
        .context("no user id: pass --user or set userId in ~/.notecfg/config.json")?;
    let (store, _scratch) = open_store(&settings, user, cli.memory)?;

    if let Commands::Api { ref path, ttl } = cli.command {
        let (Some(url), Some(key)) = (settings.api_url.clone(), settings.api_key.clone()) else {
            bail!("apiUrl and apiKey must be set in ~/.notecfg/config.json");
        };
        let api = ApiClient::new(url, key, store);
        return print_json(&api.get_cached(path, Duration::from_secs(ttl)).await?);
    }

    let backend: Arc<dyn NotepadBackend> = if cli.memory {
        Arc::new(MemoryBackend::new())
    } else {
        let host = settings
            .host_url
            .clone()
            .context("no host: pass --host or set hostUrl in ~/.notecfg/config.json")?;
        Arc::new(AjaxBackend::new(host, settings.session_cookie.clone()))
    };
    let session = Session::new(backend, store);

    match cli.command {
        Commands::Get { script, key, default } => {
            let record = ConfigRecord::open(session, script).await?;
            print_json(&record.get(&key, parse_value(&default))?)?;
        }
        Commands::Set { script, key, value } => {
            let mut record = ConfigRecord::open(session, script).await?;
            record.set(&key, parse_value(&value))?;
        }
        Commands::Remove { script, key } => {
            let mut record = ConfigRecord::open(session, script).await?;
            if record.remove(&key)?.is_none() {
                eprintln!("[notecfg] {key} was not set");
            }
        }
        Commands::Show { script } => {
            let record = ConfigRecord::open(session, script).await?;
            print_json(&record.snapshot()?)?;
        }
        Commands::Persist { script } => {
            let record = ConfigRecord::open(session, script).await?;
            record.persist().await?;
        }
        Commands::Sync { script } => {
            let mut record = ConfigRecord::new(session, script);
            record.sync().await?;
            print_json(&record.snapshot()?)?;
        }
        Commands::Files => {
            for (name, id) in session.file_index().await?.iter() {
                println!("{name}\t{}", id.0);
            }
        }
        Commands::Api { .. } | Commands::Init => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_mode_leaves_real_cache_alone() {
        let real = tempfile::tempdir().unwrap();
        let settings = Settings {
            version: 1,
            storage_dir: Some(real.path().to_string_lossy().to_string()),
            ..Settings::default()
        };

        let (store, scratch) = open_store(&settings, "1001".into(), true).unwrap();
        assert!(scratch.is_some());
        let session = Session::new(Arc::new(MemoryBackend::new()), store);
        let mut record = ConfigRecord::open(session, "eggs").await.unwrap();
        record.set("count", 3).unwrap();

        assert!(!real.path().join("local-storage.json").exists());
        let (real_store, none) = open_store(&settings, "1001".into(), false).unwrap();
        assert!(none.is_none());
        assert_eq!(real_store.get("userscript-config-dir-id"), None);
        assert_eq!(real_store.get("userscript-config.eggs"), None);
    }

    #[test]
    fn test_parse_value_falls_back_to_string() {
        assert_eq!(parse_value("3"), serde_json::json!(3));
        assert_eq!(parse_value("hello"), serde_json::json!("hello"));
    }
}
