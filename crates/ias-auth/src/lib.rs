//! Credential core of the In-Game Account Switcher
//!
//! This crate signs Microsoft accounts into Minecraft, keeps the resulting
//! credentials in an encrypted on-disk store and revalidates them on login.
//!
//! # Authentication Flow
//!
//! Adding an account runs the following chain:
//!
//! 1. Microsoft OAuth2, through the device code flow or a browser redirect
//!    to a one-shot loopback listener
//! 2. Xbox Live authentication
//! 3. XSTS authorization
//! 4. Minecraft Services login
//! 5. Entitlement check and profile retrieval
//!
//! Logging in with a stored account first retries the stored Minecraft token
//! and falls back to refreshing the Microsoft token and re-running steps 2 to 5.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ias_auth::{
//!     AuthConfig, AuthContext, AuthError, CreateHandler, DummyCrypt, MicrosoftAccount, Progress,
//!     Stage,
//! };
//!
//! struct Printer;
//!
//! impl Progress for Printer {
//!     fn cancelled(&self) -> bool {
//!         false
//!     }
//!
//!     fn stage(&self, stage: Stage) {
//!         println!("{} {:?}", stage.key, stage.args);
//!     }
//! }
//!
//! impl CreateHandler for Printer {
//!     fn success(&self, account: MicrosoftAccount) {
//!         println!("Added {}", account.name());
//!     }
//!
//!     fn error(&self, error: AuthError) {
//!         eprintln!("{error}");
//!     }
//! }
//!
//! # fn main() -> ias_auth::Result<()> {
//! let context = AuthContext::new(AuthConfig::default())?;
//! context.create_device(Arc::new(DummyCrypt), Arc::new(Printer));
//! context.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Credential Storage
//!
//! [`AccountStore`] keeps the ordered account list in a versioned binary file.
//! Microsoft secrets are sealed by a [`Crypt`]: [`DummyCrypt`] stores them in
//! the clear, [`PasswordCrypt`] encrypts them with a key derived from a password.
//! One crypt kind is used per store and is recorded in the file header.

mod account;
mod client;
pub mod codec;
pub mod config;
mod context;
mod crypt;
mod errors;
mod fields;
mod handler;
mod http;
mod models;
mod pipeline;
mod server;
mod store;

pub use account::{
    Account, AccountTokens, AuthData, AuthType, LoginOutcome, MICROSOFT_V1, MicrosoftAccount,
    OFFLINE_V1, OFFLINE_V2, OfflineAccount, SealedTokens, offline_uuid,
};
pub use client::AuthClient;
pub use config::{AuthConfig, Endpoints, HttpTimeouts, UserAgentInfo, XstsErrorMap};
pub use context::AuthContext;
pub use crypt::{Crypt, CryptKind, DummyCrypt, PasswordCrypt};
pub use errors::{AuthError, CodecError, CryptError, Result, StoreError, XstsError, keys};
pub use fields::{DeviceAuth, FieldError, McProfile, MsTokens, XHashedToken};
pub use handler::{CancelFlag, CreateHandler, LoginHandler, Progress, Stage, stages};
pub use http::{StatusError, user_agent};
pub use server::LoopbackServer;
pub use store::{AccountStore, FORMAT_VERSION, LoadReport, MAGIC, StoreState, decode, encode};
