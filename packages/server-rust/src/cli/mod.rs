//! Command-line interface: `serve` plus local store management.
//!
//! Store commands operate directly on the configured stores root through
//! the manager; they do not require a running server. Exit code 0 on
//! success, non-zero on error.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use engram_core::plugin::PluginRegistry;
use engram_core::store_id::StoreId;

use crate::config::AppConfig;
use crate::error::EngramError;
use crate::store::{StoreInfo, StoreManager};

#[derive(Debug, Parser)]
#[command(name = "engram-server", about = "Engram lore synchronization server", version)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, env = "ENGRAM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server until SIGINT/SIGTERM.
    Serve,
    /// Manage stores on the local stores root.
    #[command(subcommand)]
    Store(StoreCommand),
}

#[derive(Debug, Subcommand)]
pub enum StoreCommand {
    /// Create a new store.
    Create {
        /// Store id, e.g. `org/team/project`.
        id: String,
        /// Store type selecting the domain plugin.
        #[arg(long = "type", default_value = engram_core::DEFAULT_STORE_TYPE)]
        store_type: String,
        /// Free-form description recorded in meta.yaml.
        #[arg(long)]
        description: Option<String>,
        /// Succeed quietly when the store already exists.
        #[arg(long)]
        if_not_exists: bool,
        /// Emit JSON instead of human-readable output.
        #[arg(long)]
        json: bool,
    },
    /// List all stores under the root.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one store's metadata.
    Info {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete a store and its directory. `default` is non-deletable.
    Delete {
        id: String,
        /// Skip the interactive confirmation.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
}

fn open_manager(config: &AppConfig) -> anyhow::Result<StoreManager> {
    let registry = Arc::new(PluginRegistry::with_defaults());
    Ok(StoreManager::new(config.stores.root_path(), registry)?)
}

fn render_info(info: &StoreInfo, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(info)?);
    }
    let mut out = format!(
        "id:            {}\ntype:          {}\nsize:          {} bytes\ncreated:       {}\nlast_accessed: {}",
        info.id,
        info.store_type,
        info.size_bytes,
        info.created.to_rfc3339(),
        info.last_accessed.to_rfc3339(),
    );
    if let Some(description) = &info.description {
        out.push_str(&format!("\ndescription:   {description}"));
    }
    Ok(out)
}

fn find_info(manager: &StoreManager, id: &StoreId) -> anyhow::Result<StoreInfo> {
    manager
        .list_stores()?
        .into_iter()
        .find(|info| info.id == id.as_str())
        .ok_or_else(|| {
            EngramError::StoreNotFound {
                store_id: id.to_string(),
            }
            .into()
        })
}

/// Executes a store command, returning the text to print.
///
/// `confirm` supplies interactive input for `delete`; production wires it
/// to stdin, tests inject answers.
///
/// # Errors
///
/// Any manager failure; callers translate into a non-zero exit code.
pub fn run_store_command(
    command: &StoreCommand,
    config: &AppConfig,
    confirm: &mut dyn FnMut(&str) -> anyhow::Result<String>,
) -> anyhow::Result<String> {
    let manager = open_manager(config)?;
    let output = match command {
        StoreCommand::Create {
            id,
            store_type,
            description,
            if_not_exists,
            json,
        } => {
            let id = StoreId::parse(id)?;
            match manager.create_store(&id, store_type, description.clone()) {
                Ok(_) => {}
                Err(EngramError::StoreAlreadyExists { .. }) if *if_not_exists => {}
                Err(e) => return Err(e.into()),
            }
            let info = find_info(&manager, &id)?;
            if *json {
                render_info(&info, true)?
            } else {
                format!("store {} ready ({})", info.id, info.store_type)
            }
        }
        StoreCommand::List { json } => {
            let infos = manager.list_stores()?;
            if *json {
                serde_json::to_string_pretty(&infos)?
            } else if infos.is_empty() {
                "no stores".to_string()
            } else {
                infos
                    .iter()
                    .map(|info| {
                        format!(
                            "{:<40} {:<8} {:>12} bytes",
                            info.id, info.store_type, info.size_bytes
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        StoreCommand::Info { id, json } => {
            let id = StoreId::parse(id)?;
            let info = find_info(&manager, &id)?;
            render_info(&info, *json)?
        }
        StoreCommand::Delete { id, force, json } => {
            let id = StoreId::parse(id)?;
            if !force {
                let answer = confirm(&format!(
                    "This permanently deletes store {id} and all its data.\nType the store id to confirm: "
                ))?;
                if answer.trim() != id.as_str() {
                    anyhow::bail!("confirmation did not match store id; aborted");
                }
            }
            manager.delete_store(&id)?;
            if *json {
                serde_json::json!({"deleted": id.as_str()}).to_string()
            } else {
                format!("store {id} deleted")
            }
        }
    };

    manager.close()?;
    Ok(output)
}

/// Interactive confirmation reading one line from stdin.
///
/// # Errors
///
/// Fails on I/O errors reading stdin.
pub fn stdin_confirm(prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.stores.root = dir.path().to_string_lossy().into_owned();
        config
    }

    fn no_confirm(_prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("confirmation should not be requested")
    }

    #[test]
    fn cli_shape_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_with_flags() {
        let cli = Cli::try_parse_from([
            "engram-server",
            "store",
            "create",
            "org/proj",
            "--type",
            "tract",
            "--description",
            "planning",
            "--json",
        ])
        .unwrap();
        let Command::Store(StoreCommand::Create {
            id,
            store_type,
            description,
            if_not_exists,
            json,
        }) = cli.command
        else {
            panic!("expected create");
        };
        assert_eq!(id, "org/proj");
        assert_eq!(store_type, "tract");
        assert_eq!(description.as_deref(), Some("planning"));
        assert!(!if_not_exists);
        assert!(json);
    }

    #[test]
    fn create_then_list_then_info() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);

        let out = run_store_command(
            &StoreCommand::Create {
                id: "alpha".to_string(),
                store_type: "recall".to_string(),
                description: None,
                if_not_exists: false,
                json: false,
            },
            &config,
            &mut no_confirm,
        )
        .unwrap();
        assert!(out.contains("alpha"));

        let out = run_store_command(
            &StoreCommand::List { json: true },
            &config,
            &mut no_confirm,
        )
        .unwrap();
        let infos: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0]["id"], "alpha");

        let out = run_store_command(
            &StoreCommand::Info {
                id: "alpha".to_string(),
                json: false,
            },
            &config,
            &mut no_confirm,
        )
        .unwrap();
        assert!(out.contains("type:          recall"));
    }

    #[test]
    fn create_twice_respects_if_not_exists() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let create = |if_not_exists: bool| StoreCommand::Create {
            id: "dup".to_string(),
            store_type: "recall".to_string(),
            description: None,
            if_not_exists,
            json: false,
        };

        run_store_command(&create(false), &config, &mut no_confirm).unwrap();
        assert!(run_store_command(&create(false), &config, &mut no_confirm).is_err());
        assert!(run_store_command(&create(true), &config, &mut no_confirm).is_ok());
    }

    #[test]
    fn delete_requires_matching_confirmation() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        run_store_command(
            &StoreCommand::Create {
                id: "victim".to_string(),
                store_type: "recall".to_string(),
                description: None,
                if_not_exists: false,
                json: false,
            },
            &config,
            &mut no_confirm,
        )
        .unwrap();

        // Wrong confirmation aborts.
        let mut wrong = |_: &str| -> anyhow::Result<String> { Ok("not-it".to_string()) };
        assert!(run_store_command(
            &StoreCommand::Delete {
                id: "victim".to_string(),
                force: false,
                json: false,
            },
            &config,
            &mut wrong,
        )
        .is_err());
        assert!(dir.path().join("victim").exists());

        // Retyping the id goes through.
        let mut right = |_: &str| -> anyhow::Result<String> { Ok("victim\n".to_string()) };
        run_store_command(
            &StoreCommand::Delete {
                id: "victim".to_string(),
                force: false,
                json: false,
            },
            &config,
            &mut right,
        )
        .unwrap();
        assert!(!dir.path().join("victim").exists());
    }

    #[test]
    fn delete_default_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let err = run_store_command(
            &StoreCommand::Delete {
                id: "default".to_string(),
                force: true,
                json: false,
            },
            &config,
            &mut no_confirm,
        )
        .unwrap_err();
        assert!(err.to_string().contains("default"));
    }
}
