//! Haven CLI - Command line interface for the secrets vault.
//!
//! This tool provides a command-line interface for initializing the key
//! pair, storing and retrieving encrypted secrets, managing key custody,
//! and rotating keys.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use haven_common::{Capabilities, SecretName};
use haven_storage::{ConfigStore, StorePaths};
use haven_vault::{select_custodian, CustodyState, Haven};

#[derive(Parser)]
#[command(name = "haven")]
#[command(about = "Haven - Encrypted secrets with key custody")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: ~/.haven).
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key pair.
    Init {
        /// Protect the private key file with a passphrase.
        #[arg(short, long)]
        passphrase: bool,
    },

    /// Add a new secret. Omit VALUE to be prompted without echo.
    Add {
        /// Secret name.
        name: String,

        /// Secret value. Passing it as an argument exposes it to process
        /// listings and shell history; prefer the prompt.
        value: Option<String>,

        /// Overwrite if the secret already exists.
        #[arg(short, long)]
        overwrite: bool,
    },

    /// Print a secret value to stdout.
    Get {
        /// Secret name.
        name: String,
    },

    /// List all stored secret names.
    List,

    /// List secret names containing a substring (case-insensitive).
    Search {
        /// Substring to match.
        query: String,
    },

    /// Delete a stored secret.
    Delete {
        /// Secret name.
        name: String,
    },

    /// Show vault status.
    Status,

    /// Re-encrypt every secret under a freshly generated key pair.
    Rotate,

    /// Securely erase all private key material.
    Destroy {
        /// Confirm the destruction.
        #[arg(long)]
        yes: bool,
    },

    /// Manage custodian protection of the private key.
    Custodian {
        #[command(subcommand)]
        command: CustodianCommands,
    },

    /// Export or import a backup archive.
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
}

#[derive(Subcommand)]
enum CustodianCommands {
    /// Move the private key into custodian custody.
    Enable,
    /// Recover the private key from the custodian to a local file.
    Disable,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Write the vault files into a .tar.gz archive.
    Export {
        /// Archive path.
        path: PathBuf,
    },
    /// Restore vault files from a .tar.gz archive.
    Import {
        /// Archive path.
        path: PathBuf,

        /// Replace existing files.
        #[arg(short, long)]
        overwrite: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let haven = open_haven(cli.dir)?;

    match cli.command {
        Commands::Init { passphrase } => cmd_init(&haven, passphrase),
        Commands::Add {
            name,
            value,
            overwrite,
        } => cmd_add(&haven, &name, value, overwrite),
        Commands::Get { name } => cmd_get(&haven, &name),
        Commands::List => cmd_list(&haven),
        Commands::Search { query } => cmd_search(&haven, &query),
        Commands::Delete { name } => cmd_delete(&haven, &name),
        Commands::Status => cmd_status(&haven),
        Commands::Rotate => cmd_rotate(&haven),
        Commands::Destroy { yes } => cmd_destroy(&haven, yes),
        Commands::Custodian { command } => match command {
            CustodianCommands::Enable => cmd_custodian_enable(&haven),
            CustodianCommands::Disable => cmd_custodian_disable(&haven),
        },
        Commands::Backup { command } => match command {
            BackupCommands::Export { path } => cmd_backup_export(&haven, &path),
            BackupCommands::Import { path, overwrite } => {
                cmd_backup_import(&haven, &path, overwrite)
            }
        },
    }
}

/// Resolve paths and capabilities, then wire in whichever custodian
/// backend the configuration asks for.
fn open_haven(dir: Option<PathBuf>) -> Result<Haven> {
    let caps = Capabilities::detect();
    let paths = match dir {
        Some(dir) => StorePaths::new(dir),
        None => StorePaths::default_base()?,
    };

    let requested = ConfigStore::new(paths.clone(), caps).load()?.custodian;
    let custodian = select_custodian(requested, &caps).ok();

    Ok(Haven::open(paths, caps, custodian))
}

/// Prompt for a passphrase without echo.
fn prompt_passphrase(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read passphrase")
}

/// Prompt for the unlock passphrase when the custody mode needs one.
fn unlock_passphrase(haven: &Haven) -> Result<Option<String>> {
    if haven.vault().state()? == CustodyState::PassphraseProtectedFile {
        Ok(Some(prompt_passphrase("Passphrase: ")?))
    } else {
        Ok(None)
    }
}

fn cmd_init(haven: &Haven, protect: bool) -> Result<()> {
    let passphrase = if protect {
        let first = prompt_passphrase("New passphrase: ")?;
        let second = prompt_passphrase("Confirm passphrase: ")?;
        if first != second {
            anyhow::bail!("Passphrases do not match");
        }
        Some(first)
    } else {
        None
    };

    haven.init(passphrase.as_deref())?;
    println!("Key pair initialized.");
    if passphrase.is_none() {
        println!("The private key is stored unprotected; consider 'haven custodian enable'.");
    }
    Ok(())
}

fn cmd_add(haven: &Haven, name: &str, value: Option<String>, overwrite: bool) -> Result<()> {
    let name = SecretName::new(name)?;
    let value = match value {
        Some(value) => value,
        None => prompt_passphrase(&format!("Enter secret value for '{}': ", name))?,
    };

    haven.add_secret(&name, value.as_bytes(), overwrite)?;
    println!("Secret '{}' stored.", name);
    Ok(())
}

fn cmd_get(haven: &Haven, name: &str) -> Result<()> {
    let name = SecretName::new(name)?;
    let passphrase = unlock_passphrase(haven)?;
    let value = haven.get_secret(&name, passphrase.as_deref())?;

    // Raw bytes, no trailing newline: the value may be piped onward.
    let mut stdout = std::io::stdout();
    stdout.write_all(value.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn cmd_list(haven: &Haven) -> Result<()> {
    let names = haven.list_secrets()?;
    if names.is_empty() {
        println!("No secrets stored.");
        return Ok(());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_search(haven: &Haven, query: &str) -> Result<()> {
    for name in haven.search_secrets(query)? {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_delete(haven: &Haven, name: &str) -> Result<()> {
    let name = SecretName::new(name)?;
    haven.delete_secret(&name)?;
    println!("Secret '{}' deleted.", name);
    Ok(())
}

fn cmd_status(haven: &Haven) -> Result<()> {
    let status = haven.status()?;
    println!("Custody state:  {}", status.state);
    println!("Custodian:      {}", status.custodian);
    println!(
        "Private key:    {}",
        if status.private_key_on_disk {
            "on disk"
        } else {
            "not on disk"
        }
    );
    println!("Secrets stored: {}", status.secret_count);
    Ok(())
}

fn cmd_rotate(haven: &Haven) -> Result<()> {
    let passphrase = unlock_passphrase(haven)?;
    let outcome = haven.rotate(passphrase.as_deref())?;
    println!("Rotated {} secrets.", outcome.rotated);
    println!("Previous key pair backed up to {}", outcome.backup_dir.display());
    Ok(())
}

fn cmd_destroy(haven: &Haven, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "Destroying the key pair makes every stored secret unrecoverable; pass --yes to confirm"
        );
    }
    haven.destroy_keys()?;
    println!("Key pair destroyed.");
    Ok(())
}

fn cmd_custodian_enable(haven: &Haven) -> Result<()> {
    let passphrase = unlock_passphrase(haven)?;
    haven.enable_custodian(passphrase.as_deref())?;
    println!("Custodian protection enabled; local private key erased.");
    Ok(())
}

fn cmd_custodian_disable(haven: &Haven) -> Result<()> {
    haven.disable_custodian()?;
    println!("Custodian protection disabled; private key restored to file.");
    Ok(())
}

fn cmd_backup_export(haven: &Haven, path: &std::path::Path) -> Result<()> {
    haven.export_archive(path)?;
    println!("Backup written to {}", path.display());
    Ok(())
}

fn cmd_backup_import(haven: &Haven, path: &std::path::Path, overwrite: bool) -> Result<()> {
    let imported = haven.import_archive(path, overwrite)?;
    println!("Imported {} files:", imported.len());
    for name in imported {
        println!("  {}", name);
    }
    Ok(())
}
