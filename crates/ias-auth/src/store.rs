use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::account::{Account, MicrosoftAccount};
use crate::codec::{Reader, Writer};
use crate::crypt::{Crypt, CryptKind};
use crate::errors::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

pub const MAGIC: &[u8; 4] = b"IASS";
pub const FORMAT_VERSION: u16 = 1;

const DIR_NAME: &str = "_IAS_ACCOUNTS_DO_NOT_SEND_TO_ANYONE";
const HIDDEN_DIR: &str = ".hidden";
const DATA_FILE: &str = "accounts_v1.do_not_send_to_anyone";
const README_FILE: &str = "READ_ME_IMPORTANT.txt";
const LOCK_FILE: &str = ".lock";

const README: &str = "\
DO NOT SEND THIS FOLDER OR ANY FILE IN IT TO ANYONE.

This folder contains the accounts added to In-Game Account Switcher.
Anyone holding these files can log in as your accounts. Accounts stored
without a password can be read by anyone with access to this folder.

If someone asks you for these files, they are trying to steal your accounts.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Unloaded,
    Loading,
    /// In sync with the disk.
    Ready,
    /// The file could not be read; an empty list is used.
    Failed,
    /// Mutated, save in progress.
    Dirty,
    /// The last save failed; the in-memory list is kept and the next save retries.
    SaveFailed,
}

#[derive(Debug)]
struct Inner {
    state: StoreState,
    /// Kind every Microsoft record is sealed with.
    crypt: CryptKind,
    accounts: Vec<Account>,
    partially_loaded: bool,
}

/// Result of [`AccountStore::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Ordered on-disk account list.
///
/// All Microsoft accounts of a store are sealed with the same [`CryptKind`],
/// recorded in the file header. A store without Microsoft accounts takes the
/// kind of the first one added.
///
/// # Directory Structure
/// ```text
/// <root>/_IAS_ACCOUNTS_DO_NOT_SEND_TO_ANYONE/
/// ├── READ_ME_IMPORTANT.txt
/// └── .hidden/
///     ├── .lock
///     └── accounts_v1.do_not_send_to_anyone
/// ```
#[derive(Debug)]
pub struct AccountStore {
    dir: PathBuf,
    hidden_dir: PathBuf,
    data_file: PathBuf,
    lock_file: PathBuf,
    inner: Mutex<Inner>,
}

impl AccountStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let dir = root.as_ref().join(DIR_NAME);
        let hidden_dir = dir.join(HIDDEN_DIR);
        Self {
            data_file: hidden_dir.join(DATA_FILE),
            lock_file: hidden_dir.join(LOCK_FILE),
            hidden_dir,
            dir,
            inner: Mutex::new(Inner {
                state: StoreState::Unloaded,
                crypt: CryptKind::Dummy,
                accounts: Vec::new(),
                partially_loaded: false,
            }),
        }
    }

    /// Get default storage root for the current platform
    pub fn default_root() -> Result<PathBuf> {
        let project_dirs =
            directories::ProjectDirs::from("", "", "ias").ok_or(StoreError::NoConfigDir)?;
        Ok(project_dirs.config_dir().to_path_buf())
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub async fn state(&self) -> StoreState {
        self.inner.lock().await.state
    }

    pub async fn crypt_kind(&self) -> CryptKind {
        self.inner.lock().await.crypt
    }

    /// Whether any Microsoft account is stored.
    pub async fn has_sealed(&self) -> bool {
        self.inner.lock().await.sealed().next().is_some()
    }

    /// Fails unless `crypt` opens the stored Microsoft accounts.
    pub async fn check_crypt(&self, crypt: &dyn Crypt) -> Result<()> {
        let inner = self.inner.lock().await;
        let Some(first) = inner.sealed().next() else {
            return Ok(());
        };
        if crypt.kind() != inner.crypt {
            return Err(StoreError::CryptMismatch {
                store: inner.crypt,
                account: crypt.kind(),
            });
        }
        first.tokens().open(crypt)?;
        Ok(())
    }

    /// Whether some records were skipped by the last load.
    pub async fn partially_loaded(&self) -> bool {
        self.inner.lock().await.partially_loaded
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.inner.lock().await.accounts.clone()
    }

    pub async fn get(&self, index: usize) -> Option<Account> {
        self.inner.lock().await.accounts.get(index).cloned()
    }

    /// Reads the store file. A missing file is an empty store; an unreadable
    /// one leaves the store `Failed` with an empty list.
    pub async fn load(&self) -> Result<LoadReport> {
        let mut inner = self.inner.lock().await;
        inner.state = StoreState::Loading;

        let data = match fs::read(&self.data_file).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.data_file.display(), "No account store yet");
                inner.accounts.clear();
                inner.crypt = CryptKind::Dummy;
                inner.partially_loaded = false;
                inner.state = StoreState::Ready;
                return Ok(LoadReport {
                    loaded: 0,
                    skipped: 0,
                    duplicates: 0,
                });
            }
            Err(e) => return Err(Self::fail(&mut inner, e.into())),
        };

        match decode(&data) {
            Ok((crypt, accounts, report)) => {
                if report.skipped > 0 {
                    warn!(
                        "Loaded {} accounts, skipped {} unreadable records",
                        report.loaded, report.skipped
                    );
                } else {
                    info!("Loaded {} accounts", report.loaded);
                }
                inner.crypt = crypt;
                inner.accounts = accounts;
                inner.partially_loaded = report.skipped > 0;
                inner.state = StoreState::Ready;
                Ok(report)
            }
            Err(e) => Err(Self::fail(&mut inner, e)),
        }
    }

    fn fail(inner: &mut Inner, e: StoreError) -> StoreError {
        error!("Failed to load account store: {}", e);
        inner.accounts.clear();
        inner.crypt = CryptKind::Dummy;
        inner.partially_loaded = false;
        inner.state = StoreState::Failed;
        e
    }

    /// Adds an account, replacing an equal one in place. A Microsoft account
    /// sealed with another kind than the store's is rejected.
    pub async fn add(&self, account: Account) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let existing = inner.accounts.iter().position(|a| *a == account);
        inner.admit(&account, existing)?;
        match existing {
            Some(index) => {
                debug!(index, "Replacing existing account");
                inner.accounts[index] = account;
            }
            None => inner.accounts.push(account),
        }
        self.persist(&mut inner).await
    }

    pub async fn remove(&self, index: usize) -> Result<Account> {
        let mut inner = self.inner.lock().await;
        check_index(index, inner.accounts.len())?;
        let removed = inner.accounts.remove(index);
        self.persist(&mut inner).await?;
        Ok(removed)
    }

    /// Moves the account at `from` to position `to`.
    pub async fn reorder(&self, from: usize, to: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let len = inner.accounts.len();
        check_index(from, len)?;
        check_index(to, len)?;
        let account = inner.accounts.remove(from);
        inner.accounts.insert(to, account);
        self.persist(&mut inner).await
    }

    /// Swaps the stored record equal to `current` for `replacement`, which must
    /// be sealed with the store's crypt kind.
    /// Returns `false` when `current` is no longer stored.
    pub async fn replace(&self, current: &MicrosoftAccount, replacement: MicrosoftAccount) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let current = Account::Microsoft(current.clone());
        let Some(index) = inner.accounts.iter().position(|a| *a == current) else {
            warn!("Account to replace is no longer stored");
            return Ok(false);
        };
        if replacement.tokens().kind() != inner.crypt {
            return Err(StoreError::CryptMismatch {
                store: inner.crypt,
                account: replacement.tokens().kind(),
            });
        }
        inner.accounts[index] = Account::Microsoft(replacement);
        self.persist(&mut inner).await?;
        Ok(true)
    }

    /// Re-seals every Microsoft account from `from` to `to`. Nothing changes if any account fails.
    pub async fn recrypt(&self, from: &dyn Crypt, to: &dyn Crypt) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let resealed = inner
            .accounts
            .iter()
            .map(|account| match account {
                Account::Microsoft(ms) => ms.reseal(from, to).map(Account::Microsoft),
                Account::Offline(_) => Ok(account.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        inner.accounts = resealed;
        inner.crypt = to.kind();
        info!(crypt = to.kind().tag(), "Accounts re-sealed");
        self.persist(&mut inner).await
    }

    /// Writes the current list, e.g. on shutdown or to retry a failed save.
    pub async fn save(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.persist(&mut inner).await
    }

    async fn persist(&self, inner: &mut Inner) -> Result<()> {
        inner.state = StoreState::Dirty;
        let result = match encode(inner.crypt, &inner.accounts) {
            Ok(data) => self.write(&data).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                inner.state = StoreState::Ready;
                debug!(accounts = inner.accounts.len(), "Account store saved");
                Ok(())
            }
            Err(e) => {
                error!("Failed to save account store: {}", e);
                inner.state = StoreState::SaveFailed;
                Err(e)
            }
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.hidden_dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&self.dir, perms.clone())?;
            std::fs::set_permissions(&self.hidden_dir, perms)?;
        }

        let readme = self.dir.join(README_FILE);
        if !fs::try_exists(&readme).await? {
            fs::write(&readme, README).await?;
        }

        let _lock = self.acquire_lock()?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.data_file.with_extension("tmp");
        fs::write(&temp_path, data).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::File::open(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, &self.data_file).await?;
        Ok(())
    }

    /// Acquire an exclusive lock on the storage
    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::LockTimeout)?;
        Ok(lock_file)
    }
}

impl Inner {
    fn sealed(&self) -> impl Iterator<Item = &MicrosoftAccount> {
        self.accounts.iter().filter_map(|account| match account {
            Account::Microsoft(ms) => Some(ms),
            Account::Offline(_) => None,
        })
    }

    /// Checks the crypt kind of `account` before it is stored, ignoring the
    /// record at `replacing`. Adopts the kind when no other Microsoft account is stored.
    fn admit(&mut self, account: &Account, replacing: Option<usize>) -> Result<()> {
        let Account::Microsoft(ms) = account else {
            return Ok(());
        };
        let kind = ms.tokens().kind();
        if kind == self.crypt {
            return Ok(());
        }
        let others = self
            .accounts
            .iter()
            .enumerate()
            .any(|(index, a)| Some(index) != replacing && matches!(a, Account::Microsoft(_)));
        if others {
            return Err(StoreError::CryptMismatch {
                store: self.crypt,
                account: kind,
            });
        }
        debug!(crypt = kind.tag(), "Store adopts the crypt of its first Microsoft account");
        self.crypt = kind;
        Ok(())
    }
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(StoreError::OutOfRange { index, len });
    }
    Ok(())
}

/// `MAGIC`, `u16` version, store crypt kind, `u32` count, then
/// `{tag, u32 length, payload}` records.
pub fn encode(crypt: CryptKind, accounts: &[Account]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.put_raw(MAGIC);
    w.put_u16(FORMAT_VERSION);
    crypt.write(&mut w)?;
    w.put_u32(u32::try_from(accounts.len()).map_err(|_| StoreError::OutOfRange {
        index: accounts.len(),
        len: u32::MAX as usize,
    })?);
    for account in accounts {
        let mut payload = Writer::new();
        account.write_payload(&mut payload)?;
        w.put_utf(account.type_tag())?;
        w.put_blob(&payload.into_vec())?;
    }
    Ok(w.into_vec())
}

/// Decodes a store file. Records that fail to parse or are sealed with another
/// kind than the header's are skipped, duplicates dropped.
pub fn decode(data: &[u8]) -> Result<(CryptKind, Vec<Account>, LoadReport)> {
    let mut r = Reader::new(data);
    if r.get_raw(MAGIC.len())? != MAGIC {
        return Err(StoreError::BadMagic);
    }
    let version = r.get_u16()?;
    if version != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }

    let crypt = CryptKind::read(&mut r)?;
    let count = r.get_u32()?;
    let mut accounts: Vec<Account> = Vec::new();
    let mut skipped = 0;
    let mut duplicates = 0;
    for index in 0..count {
        let tag = r.get_utf()?;
        let payload = r.get_blob()?;
        match Account::read(&tag, payload) {
            Ok(Account::Microsoft(ms)) if ms.tokens().kind() != crypt => {
                warn!(index, "Skipping account {} sealed with {:?}, store uses {:?}", ms.name(), ms.tokens().kind(), crypt);
                skipped += 1;
            }
            Ok(account) if accounts.contains(&account) => {
                warn!(index, "Dropping duplicate account {}", account.name());
                duplicates += 1;
            }
            Ok(account) => accounts.push(account),
            Err(e) => {
                warn!(index, tag = %tag, "Failed to read account record: {}. Skipping...", e);
                skipped += 1;
            }
        }
    }
    r.finish()?;

    let report = LoadReport {
        loaded: accounts.len(),
        skipped,
        duplicates,
    };
    Ok((crypt, accounts, report))
}
