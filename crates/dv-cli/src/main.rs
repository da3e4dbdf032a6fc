//! dv: DiaryVault key-management CLI
//!
//! Drives the encryption core against a local JSON key store:
//!   signup --tier e2e|uce      - create key material (E2E prints recovery codes once)
//!   unlock <user>              - check a UCE password
//!   passwd <user>              - change a UCE password (master key re-wrapped)
//!   encrypt <user> [file]      - encrypt a record, prints JSON
//!   decrypt <user> <record>    - decrypt a record (E2E needs --secret-key-file)
//!   recover <user> <code>      - redeem an E2E recovery code
//!   capabilities <user|tier>   - show the tier capability table
//!   self-test                  - run the built-in crypto checks
//!   config show                - display current configuration

mod blocking;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use dv_core::config::DvConfig;
use dv_core::types::{
    Capability, EncryptedRecord, EncryptionTier, TierKeyMaterial, UserId, UserKeys,
};
use dv_core::DvError;
use dv_crypto::{recovery, vault, E2eStrategy, KeyPair, Session, TierRouter};
use dv_store::{JsonKeyStore, KeyStore};

use crate::blocking::derive_blocking_with_timeout;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dv",
    version,
    about = "DiaryVault encryption core",
    long_about = "dv: manage DiaryVault tier keys, encrypt and decrypt records, redeem recovery codes"
)]
struct Cli {
    /// Path to diaryvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "DV_CONFIG",
        default_value = "~/.config/diaryvault/config.toml"
    )]
    config: PathBuf,

    /// Key store JSON file (overrides config)
    #[arg(long, env = "DV_STORE_PATH")]
    store: Option<PathBuf>,

    /// Password for UCE operations (prompted when unset)
    #[arg(long, env = "DV_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a user with the chosen tier. The tier can never change.
    Signup {
        /// e2e or uce
        #[arg(long)]
        tier: EncryptionTier,
        /// E2E: where to write the device secret key (base64, mode 0600)
        #[arg(long, default_value = "dv-device.key")]
        secret_key_out: PathBuf,
    },

    /// Check a UCE password without changing anything
    Unlock { user: UserId },

    /// Change a UCE password; existing records stay readable
    Passwd {
        user: UserId,
        /// New password (prompted when unset)
        #[arg(long, env = "DV_NEW_PASSWORD", hide_env_values = true)]
        new_password: Option<String>,
    },

    /// Encrypt a record from a file or stdin and print it as JSON
    Encrypt {
        user: UserId,
        /// Plaintext file (default: stdin)
        input: Option<PathBuf>,
    },

    /// Decrypt a JSON record produced by `dv encrypt`
    Decrypt {
        user: UserId,
        /// Record JSON file
        record: PathBuf,
        /// E2E: device secret key file; decryption happens locally
        #[arg(long)]
        secret_key_file: Option<PathBuf>,
    },

    /// Redeem a single-use E2E recovery code
    Recover { user: UserId, code: String },

    /// Show the capability table for a user or a tier
    Capabilities {
        /// User id, or a tier name (e2e / uce)
        subject: String,
    },

    /// Run the built-in encryption self-test
    #[command(name = "self-test")]
    SelfTest,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);

    let config = match DvConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("dv: config {}: {e}", config_path.display());
            std::process::exit(2);
        }
    };
    init_logging(&config.logging.level, &config.logging.format);

    if let Err(e) = run(cli, &config, &config_path).await {
        report_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &DvConfig, config_path: &Path) -> Result<()> {
    let store_path = expand_tilde(cli.store.as_deref().unwrap_or(config.store.path.as_path()));
    let password = cli.password.map(SecretString::from);

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(config, config_path),
        Commands::SelfTest => cmd_self_test(config).await,
        Commands::Capabilities { subject } => {
            cmd_capabilities(&open_store(&store_path)?, &subject)
        }
        Commands::Signup {
            tier,
            secret_key_out,
        } => {
            let store = open_store(&store_path)?;
            cmd_signup(config, &store, tier, password, &secret_key_out).await
        }
        Commands::Unlock { user } => {
            cmd_unlock(config, &open_store(&store_path)?, &user, password).await
        }
        Commands::Passwd { user, new_password } => {
            let store = open_store(&store_path)?;
            let new_password = new_password.map(SecretString::from);
            cmd_passwd(config, &store, &user, password, new_password).await
        }
        Commands::Encrypt { user, input } => {
            let store = open_store(&store_path)?;
            cmd_encrypt(config, &store, &user, password, input.as_deref()).await
        }
        Commands::Decrypt {
            user,
            record,
            secret_key_file,
        } => {
            let store = open_store(&store_path)?;
            cmd_decrypt(
                config,
                &store,
                &user,
                password,
                &record,
                secret_key_file.as_deref(),
            )
            .await
        }
        Commands::Recover { user, code } => cmd_recover(&open_store(&store_path)?, &user, &code),
    }
}

/// Core errors print their generic public message; details go to the log.
fn report_error(e: &anyhow::Error) {
    match e.downcast_ref::<DvError>() {
        Some(dv) => {
            tracing::debug!(error = %dv, "command failed");
            eprintln!("dv: {}", dv.public_message());
        }
        None => eprintln!("dv: {e:#}"),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

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

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

fn open_store(path: &Path) -> Result<JsonKeyStore> {
    JsonKeyStore::open(path).with_context(|| format!("opening key store {}", path.display()))
}

fn load_user(store: &JsonKeyStore, user: &UserId) -> Result<UserKeys> {
    store
        .get_user(user)?
        .ok_or_else(|| anyhow::anyhow!("no such user: {user}"))
}

fn kdf_timeout(config: &DvConfig) -> Duration {
    Duration::from_secs(config.crypto.kdf_timeout_secs)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn prompt_password(prompt: &str, given: Option<SecretString>) -> Result<SecretString> {
    match given {
        Some(p) => Ok(p),
        None => rpassword::prompt_password(prompt)
            .map(SecretString::from)
            .context("reading password"),
    }
}

fn prompt_new_password(given: Option<SecretString>) -> Result<SecretString> {
    if let Some(p) = given {
        return Ok(p);
    }
    let first = prompt_password("New password: ", None)?;
    let second = prompt_password("Repeat new password: ", None)?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

/// Unlock a UCE session off the runtime, bounded by the configured timeout.
async fn open_session(
    config: &DvConfig,
    user: UserKeys,
    password: Option<SecretString>,
) -> Result<Session> {
    match user.tier() {
        EncryptionTier::E2e => Ok(Session::for_e2e(&user)?),
        EncryptionTier::Uce => {
            let password = prompt_password("Password: ", password)?;
            let session = derive_blocking_with_timeout(kdf_timeout(config), move || {
                Session::unlock_uce(&user, &password)
            })
            .await?;
            Ok(session)
        }
    }
}

fn write_secret_file(path: &Path, contents: &str) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("creating {} (refusing to overwrite)", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Write the secret key to `path`, then run `f`. If `f` fails the key file
/// is removed again so no key is left behind for an account that was never
/// stored.
fn with_secret_file<T>(
    path: &Path,
    contents: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    write_secret_file(path, contents)?;
    f().inspect_err(|_| {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "could not remove orphaned secret key"
            );
        }
    })
}

fn read_secret_key(path: &Path) -> Result<KeyPair> {
    let encoded = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("reading secret key {}", path.display()))?,
    );
    let raw = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| DvError::InvalidKey("secret key file is not base64".into()))?,
    );
    Ok(KeyPair::from_secret_bytes(&raw)?)
}

// ── `dv signup` ───────────────────────────────────────────────────────────────

async fn cmd_signup(
    config: &DvConfig,
    store: &JsonKeyStore,
    tier: EncryptionTier,
    password: Option<SecretString>,
    secret_key_out: &Path,
) -> Result<()> {
    let user_id = UserId::new();

    match tier {
        EncryptionTier::Uce => {
            let password = match password {
                Some(p) => p,
                None => prompt_new_password(None)?,
            };
            let params = config.crypto.kdf_params();
            let salt_len = config.crypto.salt_len;
            let record = derive_blocking_with_timeout(kdf_timeout(config), move || {
                vault::create_vault(&password, &params, salt_len)
            })
            .await?;

            store.create_user(
                UserKeys {
                    user_id,
                    material: TierKeyMaterial::Uce { vault: record },
                    created_at: unix_now(),
                },
                Vec::new(),
            )?;
            println!("user:  {user_id}");
            println!("tier:  uce");
        }
        EncryptionTier::E2e => {
            let keypair = KeyPair::generate();
            let secret_b64 = Zeroizing::new(STANDARD.encode(&keypair.secret_bytes()[..]));
            let codes = recovery::generate_batch(config.crypto.recovery_code_count);
            let hashes = recovery::store_hashes(&codes)?;
            with_secret_file(secret_key_out, &secret_b64, || {
                store.create_user(
                    UserKeys {
                        user_id,
                        material: TierKeyMaterial::E2e {
                            public_key: keypair.public_base64(),
                        },
                        created_at: unix_now(),
                    },
                    hashes,
                )?;
                Ok(())
            })?;

            println!("user:        {user_id}");
            println!("tier:        e2e");
            println!("secret key:  {}", secret_key_out.display());
            println!();
            println!("Recovery codes (shown once, each works one time):");
            for code in &codes {
                println!("  {}", code.expose_secret());
            }
        }
    }

    tracing::info!(user = %user_id, %tier, "signup complete");
    Ok(())
}

// ── `dv unlock` / `dv passwd` ─────────────────────────────────────────────────

async fn cmd_unlock(
    config: &DvConfig,
    store: &JsonKeyStore,
    user: &UserId,
    password: Option<SecretString>,
) -> Result<()> {
    let keys = load_user(store, user)?;
    if keys.tier() != EncryptionTier::Uce {
        anyhow::bail!("user {user} is on the e2e tier and has no password");
    }
    let session = open_session(config, keys, password).await?;
    println!("unlocked: {} ({})", session.user_id(), session.tier());
    Ok(())
}

async fn cmd_passwd(
    config: &DvConfig,
    store: &JsonKeyStore,
    user: &UserId,
    password: Option<SecretString>,
    new_password: Option<SecretString>,
) -> Result<()> {
    let keys = load_user(store, user)?;
    let current = keys
        .vault()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("user {user} is on the e2e tier and has no password"))?;

    let old = prompt_password("Current password: ", password)?;
    let new = prompt_new_password(new_password)?;
    let params = config.crypto.kdf_params();

    let expected = current.clone();
    let rewrapped = derive_blocking_with_timeout(kdf_timeout(config), move || {
        vault::rewrap(&old, &new, &current, &params)
    })
    .await?;

    if !store.compare_and_swap_vault(user, &expected, rewrapped)? {
        anyhow::bail!("password was changed concurrently; nothing was updated");
    }
    tracing::info!(user = %user, "password changed");
    println!("password changed");
    Ok(())
}

// ── `dv encrypt` / `dv decrypt` ───────────────────────────────────────────────

async fn cmd_encrypt(
    config: &DvConfig,
    store: &JsonKeyStore,
    user: &UserId,
    password: Option<SecretString>,
    input: Option<&Path>,
) -> Result<()> {
    let plaintext = Zeroizing::new(match input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            buf
        }
    });

    let keys = load_user(store, user)?;
    let session = open_session(config, keys, password).await?;
    let record = TierRouter::encrypt_record(&session, &plaintext)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("serializing record")?
    );
    Ok(())
}

async fn cmd_decrypt(
    config: &DvConfig,
    store: &JsonKeyStore,
    user: &UserId,
    password: Option<SecretString>,
    record_path: &Path,
    secret_key_file: Option<&Path>,
) -> Result<()> {
    let content = std::fs::read_to_string(record_path)
        .with_context(|| format!("reading record {}", record_path.display()))?;
    let record: EncryptedRecord = serde_json::from_str(&content)
        .with_context(|| format!("parsing record {}", record_path.display()))?;

    let keys = load_user(store, user)?;
    let plaintext = match (keys.tier(), secret_key_file) {
        (EncryptionTier::E2e, Some(path)) => {
            // Device-side open; the server path below never sees this key.
            let keypair = read_secret_key(path)?;
            E2eStrategy::open_on_device(keypair.secret(), &record)?
        }
        _ => {
            let session = open_session(config, keys, password).await?;
            TierRouter::decrypt_record(&session, &record)?
        }
    };

    std::io::stdout()
        .write_all(&plaintext)
        .context("writing plaintext")?;
    Ok(())
}

// ── `dv recover` ──────────────────────────────────────────────────────────────

fn cmd_recover(store: &JsonKeyStore, user: &UserId, code: &str) -> Result<()> {
    recovery::validate_and_consume(store, user, code)?;
    let remaining = store
        .recovery_codes(user)?
        .iter()
        .filter(|r| !r.used)
        .count();
    println!("recovery code accepted ({remaining} remaining)");
    Ok(())
}

// ── `dv capabilities` ─────────────────────────────────────────────────────────

fn cmd_capabilities(store: &JsonKeyStore, subject: &str) -> Result<()> {
    let tier = match subject.parse::<EncryptionTier>() {
        Ok(tier) => tier,
        Err(_) => {
            let user: UserId = subject
                .parse()
                .with_context(|| format!("not a tier or user id: {subject}"))?;
            load_user(store, &user)?.tier()
        }
    };

    println!("tier: {tier}");
    let caps = tier.capabilities();
    for cap in Capability::ALL {
        let mark = if caps.allows(cap) { "yes" } else { "no" };
        println!("  {:<24} {mark}", cap.to_string());
    }
    Ok(())
}

// ── `dv self-test` ────────────────────────────────────────────────────────────

async fn cmd_self_test(config: &DvConfig) -> Result<()> {
    let params = config.crypto.kdf_params();
    // Two derivations plus one vault create and two unlocks at production cost.
    let timeout = kdf_timeout(config) * 5;
    let report = derive_blocking_with_timeout(timeout, move || {
        Ok(dv_crypto::run_self_test(&params))
    })
    .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing self-test report")?
    );
    if !report.passed() {
        anyhow::bail!("self-test failed");
    }
    Ok(())
}

// ── `dv config show` ──────────────────────────────────────────────────────────

fn cmd_config_show(config: &DvConfig, config_path: &Path) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_signup_tier_parses() {
        let cli = Cli::try_parse_from(["dv", "signup", "--tier", "UCE"]).unwrap();
        match cli.command {
            Commands::Signup { tier, .. } => assert_eq!(tier, EncryptionTier::Uce),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["dv", "signup", "--tier", "plain"]).is_err());
    }

    #[test]
    fn test_user_id_must_be_uuid() {
        assert!(Cli::try_parse_from(["dv", "unlock", "not-a-uuid"]).is_err());
        let id = UserId::new().to_string();
        assert!(Cli::try_parse_from(["dv", "unlock", id.as_str()]).is_ok());
    }

    #[test]
    fn test_expand_tilde() {
        std::env::set_var("HOME", "/home/diarist");
        assert_eq!(
            expand_tilde(Path::new("~/.config/diaryvault/config.toml")),
            PathBuf::from("/home/diarist/.config/diaryvault/config.toml")
        );
        assert_eq!(expand_tilde(Path::new("/etc/dv.toml")), PathBuf::from("/etc/dv.toml"));
    }

    #[test]
    fn test_secret_key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.key");
        let keypair = KeyPair::generate();
        write_secret_file(&path, &STANDARD.encode(&keypair.secret_bytes()[..])).unwrap();

        let restored = read_secret_key(&path).unwrap();
        assert_eq!(restored.public().as_bytes(), keypair.public().as_bytes());
        // never overwrites an existing key
        assert!(write_secret_file(&path, "x").is_err());
    }

    #[test]
    fn test_secret_key_removed_when_signup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.key");
        let store = JsonKeyStore::open(&dir.path().join("keys.json")).unwrap();
        let keys = UserKeys {
            user_id: UserId::new(),
            material: TierKeyMaterial::E2e {
                public_key: KeyPair::generate().public_base64(),
            },
            created_at: 0,
        };
        store.create_user(keys.clone(), Vec::new()).unwrap();

        // same id again: the store refuses and the key file must not survive
        let result = with_secret_file(&path, "secret", || {
            store.create_user(keys.clone(), Vec::new())?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!path.exists());

        with_secret_file(&path, "secret", || Ok(())).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "secret");
    }

    #[test]
    fn test_core_errors_downcast_for_reporting() {
        let e: anyhow::Error = DvError::InvalidPasswordOrCorruptVault.into();
        let dv = e.downcast_ref::<DvError>().unwrap();
        assert_eq!(dv.public_message(), "invalid credentials");
    }
}
