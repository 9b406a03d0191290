//! vaultkey: client-side key custody CLI
//!
//! Commands:
//!   init                   - create the vault (master key + identity)
//!   unlock                 - check the password opens the vault
//!   status                 - show whether the vault and recovery exist
//!   recovery setup|rotate  - print a new 12-word recovery phrase (once)
//!   recover                - forgot password: phrase + new password
//!   passwd                 - change the vault password
//!   encrypt <in> <out>     - encrypt a file into a JSON container
//!   decrypt <in> <out>     - decrypt a JSON container
//!   config show            - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};

use vaultkey_core::config::{expand_home, VaultConfig};
use vaultkey_core::{base64_encode, EncryptedFile};
use vaultkey_crypto::RecoveryPhrase;
use vaultkey_session::{JsonFileStore, LockReason, ManagerOptions, VaultManager, VaultSession};

const PASSWORD_ENV: &str = "VAULTKEY_PASSWORD";
const NEW_PASSWORD_ENV: &str = "VAULTKEY_NEW_PASSWORD";
const PHRASE_ENV: &str = "VAULTKEY_PHRASE";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vaultkey",
    version,
    about = "Client-side key custody for the encrypted file vault"
)]
struct Cli {
    /// Path to the vaultkey.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "VAULTKEY_CONFIG",
        default_value = "~/.config/vaultkey/config.toml"
    )]
    config: PathBuf,

    /// Account whose vault to operate on
    #[arg(long, short = 'a', env = "VAULTKEY_ACCOUNT", default_value = "default")]
    account: String,

    /// Envelope store directory (overrides store.dir)
    #[arg(long, env = "VAULTKEY_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault protected by a password
    Init {
        /// Also enable recovery and print the phrase
        #[arg(long)]
        with_recovery: bool,
    },

    /// Verify that the password unlocks the vault
    Unlock,

    /// Show vault and recovery status
    Status,

    /// Recovery phrase management
    Recovery {
        #[command(subcommand)]
        action: RecoveryAction,
    },

    /// Reset a forgotten password using the recovery phrase
    Recover,

    /// Change the vault password
    Passwd,

    /// Encrypt a file into a JSON container
    Encrypt { input: PathBuf, output: PathBuf },

    /// Decrypt a JSON container back to the original bytes
    Decrypt { input: PathBuf, output: PathBuf },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum RecoveryAction {
    /// Enable recovery (fails if already enabled)
    Setup,
    /// Replace the recovery phrase; the old one stops working
    Rotate,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

type Manager = VaultManager<JsonFileStore>;

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_home(&cli.config);
    let config = VaultConfig::load(&config_path).context("loading configuration")?;
    init_logging(&config.log.level, &config.log.format);

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        return cmd_config_show(&config, &config_path);
    }

    let store_dir = cli
        .store_dir
        .clone()
        .unwrap_or_else(|| expand_home(&config.store.dir));
    let options = ManagerOptions::from_config(&config)?;
    let manager = VaultManager::new(cli.account.clone(), JsonFileStore::new(store_dir), options)?;

    let result = match cli.command {
        Commands::Init { with_recovery } => cmd_init(&manager, with_recovery).await,
        Commands::Unlock => cmd_unlock(&manager).await,
        Commands::Status => cmd_status(&manager, &config).await,
        Commands::Recovery { action } => cmd_recovery(&manager, action).await,
        Commands::Recover => cmd_recover(&manager).await,
        Commands::Passwd => cmd_passwd(&manager).await,
        Commands::Encrypt { input, output } => cmd_encrypt(&manager, &input, &output).await,
        Commands::Decrypt { input, output } => cmd_decrypt(&manager, &input, &output).await,
        Commands::Config { .. } => Ok(()),
    };

    manager.lock(LockReason::Explicit).await;
    result
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is reserved for command output (the recovery phrase included)
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Secret input ──────────────────────────────────────────────────────────────

/// Read a secret from `env_var` if set, otherwise prompt without echo.
fn read_secret(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        tracing::debug!("using secret from ${env_var}");
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading secret from terminal")?;
    Ok(SecretString::from(value))
}

/// New passwords are confirmed when typed interactively.
fn read_new_password() -> Result<SecretString> {
    if std::env::var(NEW_PASSWORD_ENV).is_ok() {
        return read_secret(NEW_PASSWORD_ENV, "");
    }
    let first = read_secret(NEW_PASSWORD_ENV, "New password: ")?;
    let second = SecretString::from(
        rpassword::prompt_password("Confirm new password: ")
            .context("reading secret from terminal")?,
    );
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

async fn unlock_with_password(manager: &Manager) -> Result<VaultSession> {
    let password = read_secret(PASSWORD_ENV, "Vault password: ")?;
    Ok(manager.unlock(Some(password)).await?)
}

fn print_phrase(phrase: &RecoveryPhrase) {
    println!("Recovery phrase (shown once; write it down and keep it offline):");
    println!();
    for (i, word) in phrase.expose().split(' ').enumerate() {
        println!("  {:>2}. {word}", i + 1);
    }
    println!();
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_init(manager: &Manager, with_recovery: bool) -> Result<()> {
    let status = manager.probe().await?;
    if status.initialized {
        anyhow::bail!(
            "vault for account '{}' is already initialized",
            manager.account()
        );
    }
    let password = read_new_password()?;
    let session = manager.initialize(password).await?;

    println!("vault initialized for account '{}'", manager.account());
    if let Some(public_key) = session.public_key()? {
        println!("public key: {}", base64_encode(&public_key));
    }
    if with_recovery {
        let phrase = manager.setup_recovery(&session).await?;
        print_phrase(&phrase);
    }
    Ok(())
}

async fn cmd_unlock(manager: &Manager) -> Result<()> {
    let session = unlock_with_password(manager).await?;
    println!("password accepted for account '{}'", manager.account());
    if let Some(public_key) = session.public_key()? {
        println!("public key: {}", base64_encode(&public_key));
    }
    Ok(())
}

async fn cmd_status(manager: &Manager, config: &VaultConfig) -> Result<()> {
    let status = manager.probe().await?;
    println!("account:          {}", manager.account());
    println!("initialized:      {}", status.initialized);
    println!("recovery enabled: {}", status.recovery_enabled);
    println!("kdf profile:      {}", config.kdf.profile);
    println!("store:            {}", manager.store().dir().display());
    Ok(())
}

async fn cmd_recovery(manager: &Manager, action: RecoveryAction) -> Result<()> {
    let session = unlock_with_password(manager).await?;
    let phrase = match action {
        RecoveryAction::Setup => manager.setup_recovery(&session).await?,
        RecoveryAction::Rotate => manager.rotate_recovery_phrase(&session).await?,
    };
    print_phrase(&phrase);
    Ok(())
}

async fn cmd_recover(manager: &Manager) -> Result<()> {
    let phrase = read_secret(PHRASE_ENV, "Recovery phrase: ")?;
    let new_password = read_new_password()?;
    manager
        .reset_password_with_phrase(phrase, new_password)
        .await?;
    println!("password reset for account '{}'", manager.account());
    Ok(())
}

async fn cmd_passwd(manager: &Manager) -> Result<()> {
    let session = unlock_with_password(manager).await?;
    let new_password = read_new_password()?;
    manager.change_password(&session, new_password).await?;
    println!("password changed for account '{}'", manager.account());
    Ok(())
}

async fn cmd_encrypt(manager: &Manager, input: &Path, output: &Path) -> Result<()> {
    let session = unlock_with_password(manager).await?;
    let plaintext = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let encrypted = tokio::task::spawn_blocking(move || session.encrypt_file(&plaintext))
        .await
        .context("encryption task failed")??;
    let json = encrypted.to_json()?;
    tokio::fs::write(output, json)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "encrypted {} ({} bytes, {} chunk(s)) -> {}",
        input.display(),
        encrypted.plaintext_size,
        encrypted.chunks.len(),
        output.display()
    );
    Ok(())
}

async fn cmd_decrypt(manager: &Manager, input: &Path, output: &Path) -> Result<()> {
    let session = unlock_with_password(manager).await?;
    let json = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let encrypted = EncryptedFile::from_json(&json)?;

    let plaintext = tokio::task::spawn_blocking(move || session.decrypt_file(&encrypted))
        .await
        .context("decryption task failed")??;
    tokio::fs::write(output, &plaintext)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "decrypted {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        plaintext.len()
    );
    Ok(())
}

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
