use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::account::{AuthData, MicrosoftAccount};
use crate::errors::{AuthError, Result};

/// Progress stage keys, in the order a full run reports them.
pub mod stages {
    pub const INITIALIZING: &str = "ias.login.initializing";
    pub const SERVER: &str = "ias.login.server";
    /// Browser flow: args are `[authorize_url]`.
    pub const LINK: &str = "ias.login.link";
    /// Device flow: args are `[verification_uri, user_code]`.
    pub const LINK_CLIENT: &str = "ias.login.linkClient";
    pub const PROCESSING: &str = "ias.login.processing";
    pub const DECRYPTING: &str = "ias.login.decrypting";
    pub const MSAC_TO_MSA_MSR: &str = "ias.login.msacToMsaMsr";
    pub const MSR_TO_MSA_MSR: &str = "ias.login.msrToMsaMsr";
    pub const MSA_TO_XBL: &str = "ias.login.msaToXbl";
    pub const XBL_TO_XSTS: &str = "ias.login.xblToXsts";
    pub const XSTS_TO_MCA: &str = "ias.login.xstsToMca";
    pub const ENTITLEMENTS: &str = "ias.login.entitlements";
    pub const MCA_TO_MCP: &str = "ias.login.mcaToMcp";
    pub const ENCRYPTING: &str = "ias.login.encrypting";
    pub const FINALIZING: &str = "ias.login.finalizing";
}

/// A progress report: a translation key plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub key: &'static str,
    pub args: Vec<String>,
}

impl Stage {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            args: Vec::new(),
        }
    }

    pub fn with_args(key: &'static str, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            key,
            args: args.into_iter().collect(),
        }
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callbacks shared by every pipeline run. Called from the worker thread and
/// must return quickly.
pub trait Progress: Send + Sync {
    fn cancelled(&self) -> bool;

    fn stage(&self, stage: Stage);
}

/// Receives the result of adding a Microsoft account.
pub trait CreateHandler: Progress {
    fn success(&self, account: MicrosoftAccount);

    fn error(&self, error: AuthError);
}

/// Receives the result of logging in with a stored account.
#[async_trait]
pub trait LoginHandler: Progress {
    /// Asks the user for the store password. `None` cancels the login.
    async fn password(&self) -> Option<Zeroizing<String>>;

    /// `changed` is set when the stored tokens were rotated.
    fn success(&self, data: AuthData, changed: bool);

    fn error(&self, error: AuthError);
}

/// Fails with [`AuthError::Cancelled`] once the handler reports cancellation.
pub(crate) fn checkpoint<P: Progress + ?Sized>(progress: &P) -> Result<()> {
    if progress.cancelled() {
        return Err(AuthError::Cancelled);
    }
    Ok(())
}

/// Cancellation check followed by a stage report.
pub(crate) fn enter<P: Progress + ?Sized>(progress: &P, stage: Stage) -> Result<()> {
    checkpoint(progress)?;
    progress.stage(stage);
    Ok(())
}
