mod cli;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use ias_auth::{
    Account, AccountStore, AuthContext, CancelFlag, Crypt, CryptKind, DummyCrypt, OfflineAccount,
    PasswordCrypt,
};
use ias_config::IasConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::cli::{Outcome, TerminalHandler, read_password, render};

#[derive(Parser, Debug)]
#[command(name = "ias", version, about = "Minecraft account switcher")]
struct Args {
    /// Config file. Defaults to the platform config folder.
    #[arg(long, env = "IAS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored accounts
    List,
    /// Add a Microsoft account
    Add {
        /// Sign in through the browser instead of a device code
        #[arg(long)]
        browser: bool,
        /// Encrypt the store with a password if it holds no Microsoft account yet
        #[arg(long)]
        password: bool,
    },
    /// Add an offline account
    Offline {
        name: String,
        /// Player whose skin the account shows
        #[arg(long)]
        skin: Option<String>,
    },
    /// Log in with a stored account
    Login {
        index: usize,
        /// Print the access token
        #[arg(long)]
        show_token: bool,
    },
    /// Remove a stored account
    Remove { index: usize },
    /// Move an account to another position
    Move { from: usize, to: usize },
    /// Re-encrypt every Microsoft account, under a new password or none
    Recrypt {
        #[arg(long)]
        password: bool,
    },
    /// Look up a player's UUID
    Lookup { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ias=info,ias_auth=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => IasConfig::default_path()?,
    };
    let config = IasConfig::load(&config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    debug!(?config, "Loaded configuration");

    let root = match &config.storage_dir {
        Some(dir) => dir.clone(),
        None => AccountStore::default_root()?,
    };
    let store = Arc::new(AccountStore::new(root));
    let context = AuthContext::new(config.auth_config())?;

    let cancel = CancelFlag::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let result = run(args.command, &config, &context, &store, cancel).await;
    tokio::task::spawn_blocking(move || context.close()).await?;
    result
}

async fn run(
    command: Command,
    config: &IasConfig,
    context: &AuthContext,
    store: &Arc<AccountStore>,
    cancel: CancelFlag,
) -> Result<()> {
    on_worker(context, {
        let store = Arc::clone(store);
        move || async move { store.load().await.map(|_| ()) }
    })
    .await?;
    if store.partially_loaded().await {
        eprintln!("Some accounts could not be read and were skipped");
    }

    match command {
        Command::List => {
            let accounts = store.accounts().await;
            if accounts.is_empty() {
                println!("No accounts");
            }
            for (index, account) in accounts.iter().enumerate() {
                let kind = match account {
                    Account::Microsoft(_) => "microsoft",
                    Account::Offline(_) => "offline",
                };
                let warning = if account.insecure() { " (unencrypted)" } else { "" };
                println!("{index}: {} [{kind}] {}{warning}", account.name(), account.uuid());
            }
        }
        Command::Add { browser, password } => {
            let crypt: Arc<dyn Crypt> = Arc::from(store_crypt(store, password, config).await?);
            let (handler, outcomes) = TerminalHandler::new(cancel.clone(), true);
            if browser || config.browser_flow {
                context.create_browser(crypt, Arc::new(handler), cli::open);
            } else {
                context.create_device(crypt, Arc::new(handler));
            }
            if let Some(Outcome::Created(account)) = wait(outcomes, &cancel).await? {
                let name = account.name().to_string();
                on_worker(context, {
                    let store = Arc::clone(store);
                    move || async move { store.add(account.into()).await }
                })
                .await?;
                println!("Added {name}");
            }
        }
        Command::Offline { name, skin } => {
            let skin = match skin {
                Some(player) => Some(lookup(context, player).await?),
                None => None,
            };
            let account = OfflineAccount::new(name, skin);
            println!("Adding {} ({})", account.name(), account.uuid());
            on_worker(context, {
                let store = Arc::clone(store);
                move || async move { store.add(account.into()).await }
            })
            .await?;
        }
        Command::Login { index, show_token } => {
            let (handler, outcomes) = TerminalHandler::new(cancel.clone(), false);
            context.login(Arc::clone(store), index, Arc::new(handler));
            if let Some(Outcome::LoggedIn(data, changed)) = wait(outcomes, &cancel).await? {
                println!("Logged in as {} ({})", data.name, data.uuid);
                if changed {
                    println!("Stored tokens were refreshed");
                }
                if show_token {
                    println!("{}", data.token);
                }
            }
        }
        Command::Remove { index } => {
            let removed = on_worker(context, {
                let store = Arc::clone(store);
                move || async move { store.remove(index).await }
            })
            .await?;
            println!("Removed {}", removed.name());
        }
        Command::Move { from, to } => {
            on_worker(context, {
                let store = Arc::clone(store);
                move || async move { store.reorder(from, to).await }
            })
            .await?;
        }
        Command::Recrypt { password } => {
            let from = current_crypt(store).await?;
            let to = new_crypt(password, config)?;
            on_worker(context, {
                let store = Arc::clone(store);
                move || async move { store.recrypt(from.as_ref(), to.as_ref()).await }
            })
            .await?;
            println!("Accounts re-encrypted");
        }
        Command::Lookup { name } => {
            let uuid = lookup(context, name.clone()).await?;
            println!("{name}: {uuid}");
        }
    }
    Ok(())
}

/// Runs `job` on the worker and waits for its result.
async fn on_worker<F, Fut, T, E>(context: &AuthContext, job: F) -> Result<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + 'static,
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let result = context
        .execute(move |_| job())
        .await
        .map_err(|_| anyhow!("Worker stopped before the job ran"))?;
    Ok(result?)
}

async fn lookup(context: &AuthContext, name: String) -> Result<Uuid> {
    let profile = context
        .execute(move |client| async move { client.profile_by_name(&name).await.map(|p| (name, p)) })
        .await
        .map_err(|_| anyhow!("Worker stopped before the lookup ran"))??;
    match profile {
        (_, Some(profile)) => Ok(profile.uuid),
        (name, None) => bail!("No player named {name}"),
    }
}

/// Crypt the stored Microsoft accounts are sealed with, checked against the store.
async fn current_crypt(store: &AccountStore) -> Result<Box<dyn Crypt>> {
    if !store.has_sealed().await {
        return Ok(Box::new(DummyCrypt));
    }
    let crypt: Box<dyn Crypt> = match store.crypt_kind().await {
        CryptKind::Password { iterations } => {
            let password = read_password("Store password: ")?;
            Box::new(PasswordCrypt::with_iterations(password.as_str(), iterations)?)
        }
        CryptKind::Dummy => Box::new(DummyCrypt),
    };
    store.check_crypt(crypt.as_ref()).await?;
    Ok(crypt)
}

fn new_crypt(password: bool, config: &IasConfig) -> Result<Box<dyn Crypt>> {
    if !password {
        return Ok(Box::new(DummyCrypt));
    }
    let password = read_password("New store password: ")?;
    Ok(Box::new(PasswordCrypt::with_iterations(
        password.as_str(),
        config.crypt.pbkdf2_iterations,
    )?))
}

/// Crypt a new account is sealed with. Once the store holds a Microsoft
/// account its crypt is reused.
async fn store_crypt(store: &AccountStore, password: bool, config: &IasConfig) -> Result<Box<dyn Crypt>> {
    let kind = store.crypt_kind().await;
    if !store.has_sealed().await {
        return new_crypt(password || kind.needs_password(), config);
    }
    if password && !kind.needs_password() {
        bail!("Stored accounts are not encrypted, run `ias recrypt --password` first");
    }
    current_crypt(store).await
}

/// Waits for the handler's outcome. `None` when the run was cancelled.
async fn wait(mut outcomes: mpsc::UnboundedReceiver<Outcome>, cancel: &CancelFlag) -> Result<Option<Outcome>> {
    let cancelled = async {
        while !cancel.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };
    tokio::select! {
        outcome = outcomes.recv() => match outcome {
            Some(Outcome::Failed(error)) => match render(&error) {
                Some(message) => bail!(message),
                None => Ok(None),
            },
            Some(outcome) => Ok(Some(outcome)),
            None => Ok(None),
        },
        () = cancelled => Ok(None),
    }
}
