//! Terminal implementations of the pipeline handlers.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use ias_auth::{
    AuthData, AuthError, CancelFlag, CreateHandler, LoginHandler, MicrosoftAccount, Progress,
    Stage, stages,
};
use tokio::sync::mpsc;
use tracing::debug;
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "IAS_PASSWORD";

#[derive(Debug)]
pub enum Outcome {
    Created(MicrosoftAccount),
    LoggedIn(AuthData, bool),
    Failed(AuthError),
}

pub struct TerminalHandler {
    cancel: CancelFlag,
    open_links: bool,
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl TerminalHandler {
    pub fn new(cancel: CancelFlag, open_links: bool) -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let handler = Self {
            cancel,
            open_links,
            outcomes,
        };
        (handler, rx)
    }
}

impl Progress for TerminalHandler {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn stage(&self, stage: Stage) {
        debug!(key = stage.key, "Stage changed");
        match (stage.key, stage.args.as_slice()) {
            (stages::LINK_CLIENT, [uri, code]) => {
                eprintln!("Open {uri} and enter the code {code}");
                if self.open_links {
                    open(uri);
                }
            }
            // The browser flow opens the link itself.
            (stages::LINK, [url]) => eprintln!("Sign in at {url}"),
            (key, _) => eprintln!("{}", describe(key)),
        }
    }
}

impl CreateHandler for TerminalHandler {
    fn success(&self, account: MicrosoftAccount) {
        let _ = self.outcomes.send(Outcome::Created(account));
    }

    fn error(&self, error: AuthError) {
        let _ = self.outcomes.send(Outcome::Failed(error));
    }
}

#[async_trait]
impl LoginHandler for TerminalHandler {
    async fn password(&self) -> Option<Zeroizing<String>> {
        tokio::task::spawn_blocking(|| read_password("Store password: "))
            .await
            .ok()
            .and_then(Result::ok)
    }

    fn success(&self, data: AuthData, changed: bool) {
        let _ = self.outcomes.send(Outcome::LoggedIn(data, changed));
    }

    fn error(&self, error: AuthError) {
        let _ = self.outcomes.send(Outcome::Failed(error));
    }
}

pub fn open(url: &str) {
    if let Err(e) = webbrowser::open(url) {
        eprintln!("Unable to open a browser ({e}), open the link manually");
    }
}

fn describe(key: &str) -> &'static str {
    match key {
        stages::INITIALIZING => "Initializing...",
        stages::SERVER => "Starting local server...",
        stages::PROCESSING => "Processing response...",
        stages::DECRYPTING => "Decrypting account...",
        stages::MSAC_TO_MSA_MSR => "Exchanging authorization code...",
        stages::MSR_TO_MSA_MSR => "Refreshing Microsoft token...",
        stages::MSA_TO_XBL => "Authenticating with Xbox Live...",
        stages::XBL_TO_XSTS => "Authorizing with XSTS...",
        stages::XSTS_TO_MCA => "Logging in to Minecraft...",
        stages::ENTITLEMENTS => "Checking game ownership...",
        stages::MCA_TO_MCP => "Fetching profile...",
        stages::ENCRYPTING => "Encrypting account...",
        stages::FINALIZING => "Finalizing...",
        _ => "Working...",
    }
}

/// Friendly errors show their key, unknown ones their cause chain. Cancellation shows nothing.
pub fn render(error: &AuthError) -> Option<String> {
    match error {
        AuthError::Cancelled => None,
        AuthError::Friendly { key, message } => Some(format!("{message} ({key})")),
        AuthError::Unknown(cause) => Some(format!(
            "An unexpected error occurred. Please include the following when reporting it:\n{cause:?}"
        )),
    }
}

/// Reads a password from `IAS_PASSWORD`, or else from one line of stdin.
pub fn read_password(prompt: &str) -> io::Result<Zeroizing<String>> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(password));
    }
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    Ok(Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string()))
}
