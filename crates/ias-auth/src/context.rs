//! The worker that runs every pipeline run and store job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use zeroize::Zeroizing;

use crate::account::{Account, AuthData, MicrosoftAccount};
use crate::client::AuthClient;
use crate::config::AuthConfig;
use crate::crypt::Crypt;
use crate::errors::{AuthError, Result};
use crate::handler::{CancelFlag, CreateHandler, LoginHandler, Progress, Stage};
use crate::pipeline;
use crate::store::AccountStore;

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;
type Job = Box<dyn FnOnce(AuthClient) -> LocalFuture + Send>;

/// Forwards to the host handler, also reporting cancellation once the context closes.
struct Supervised<H: ?Sized> {
    handler: Arc<H>,
    shutdown: CancelFlag,
}

impl<H: Progress + ?Sized> Progress for Supervised<H> {
    fn cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.handler.cancelled()
    }

    fn stage(&self, stage: Stage) {
        debug!(stage = stage.key, "Stage");
        self.handler.stage(stage);
    }
}

#[async_trait]
impl<H: LoginHandler + ?Sized> LoginHandler for Supervised<H> {
    async fn password(&self) -> Option<Zeroizing<String>> {
        self.handler.password().await
    }

    fn success(&self, data: AuthData, changed: bool) {
        self.handler.success(data, changed);
    }

    fn error(&self, error: AuthError) {
        self.handler.error(error);
    }
}

/// Owns the worker thread, the HTTP client and the configuration.
///
/// All jobs run one at a time on a single-threaded runtime. Handler callbacks
/// are invoked from that thread and must return quickly.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ias_auth::{AccountStore, AuthConfig, AuthContext};
///
/// # fn example() -> ias_auth::Result<()> {
/// let context = AuthContext::new(AuthConfig::default())?;
/// let store = Arc::new(AccountStore::new("/tmp/ias"));
/// let loaded = context.execute({
///     let store = Arc::clone(&store);
///     move |_| async move { store.load().await }
/// });
/// context.close();
/// # Ok(())
/// # }
/// ```
pub struct AuthContext {
    config: Arc<AuthConfig>,
    sender: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    shutdown: CancelFlag,
    span: Span,
}

impl AuthContext {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let config = Arc::new(config);
        let client = AuthClient::new(Arc::clone(&config))?;
        let span = info_span!("ias");
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker_span = span.clone();
        let worker = thread::Builder::new()
            .name("ias-worker".to_string())
            .spawn(move || run_worker(client, receiver, worker_span))
            .map_err(|e| AuthError::unknown(anyhow!(e).context("Failed to start worker thread")))?;

        info!(parent: &span, "Auth context started");
        Ok(Self {
            config,
            sender: Some(sender),
            worker: Some(worker),
            shutdown: CancelFlag::new(),
            span,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn submit(&self, job: Job) -> bool {
        match &self.sender {
            Some(sender) if !self.shutdown.is_cancelled() => sender.send(job).is_ok(),
            _ => false,
        }
    }

    /// Runs an arbitrary job on the worker, e.g. store I/O or a name lookup.
    /// The receiver errors if the context closes before the job runs.
    pub fn execute<F, Fut, T>(&self, job: F) -> oneshot::Receiver<T>
    where
        F: FnOnce(AuthClient) -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let span = self.span.clone();
        let submitted = self.submit(Box::new(move |client| {
            Box::pin(
                async move {
                    let _ = tx.send(job(client).await);
                }
                .instrument(span),
            )
        }));
        if !submitted {
            warn!(parent: &self.span, "Job rejected, context is closed");
        }
        rx
    }

    /// Adds a Microsoft account with the device code flow.
    pub fn create_device(&self, crypt: Arc<dyn Crypt>, handler: Arc<dyn CreateHandler>) {
        let progress = Supervised {
            handler: Arc::clone(&handler),
            shutdown: self.shutdown.clone(),
        };
        let span = info_span!(parent: &self.span, "create", flow = "device");
        let submitted = self.submit(Box::new(move |client| {
            Box::pin(
                async move {
                    let result = pipeline::device_flow(&client, crypt.as_ref(), &progress).await;
                    finish_create(progress.handler.as_ref(), result);
                }
                .instrument(span),
            )
        }));
        if !submitted {
            handler.error(closed());
        }
    }

    /// Adds a Microsoft account with the browser redirect flow. `open` receives
    /// the sign-in URL on the worker thread.
    pub fn create_browser<F>(&self, crypt: Arc<dyn Crypt>, handler: Arc<dyn CreateHandler>, open: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let progress = Supervised {
            handler: Arc::clone(&handler),
            shutdown: self.shutdown.clone(),
        };
        let span = info_span!(parent: &self.span, "create", flow = "browser");
        let submitted = self.submit(Box::new(move |client| {
            Box::pin(
                async move {
                    let result = pipeline::browser_flow(&client, crypt.as_ref(), &progress, open).await;
                    finish_create(progress.handler.as_ref(), result);
                }
                .instrument(span),
            )
        }));
        if !submitted {
            handler.error(closed());
        }
    }

    /// Logs in with the account at `index`. Rotated tokens are written back
    /// to the store before `success` is called.
    pub fn login(&self, store: Arc<AccountStore>, index: usize, handler: Arc<dyn LoginHandler>) {
        let supervised = Supervised {
            handler: Arc::clone(&handler),
            shutdown: self.shutdown.clone(),
        };
        let span = info_span!(parent: &self.span, "login", index);
        let submitted = self.submit(Box::new(move |client| {
            Box::pin(run_login(client, store, index, supervised).instrument(span))
        }));
        if !submitted {
            handler.error(closed());
        }
    }

    /// Cancels running jobs, lets queued ones drain and joins the worker.
    pub fn close(mut self) {
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        self.shutdown.cancel();
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(parent: &self.span, "Worker thread panicked");
            }
            info!(parent: &self.span, "Auth context closed");
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

fn run_worker(client: AuthClient, mut receiver: mpsc::UnboundedReceiver<Job>, span: Span) {
    let _entered = span.enter();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build worker runtime: {}", e);
            return;
        }
    };

    let local = LocalSet::new();
    local.spawn_local(async move {
        while let Some(job) = receiver.recv().await {
            tokio::task::spawn_local(job(client.clone()));
        }
        debug!("Job queue closed");
    });
    // Completes once the queue is closed and every spawned job has finished.
    runtime.block_on(local);
}

fn closed() -> AuthError {
    AuthError::unknown(anyhow!("Auth context is closed"))
}

fn finish_create<H: CreateHandler + ?Sized>(handler: &H, result: Result<MicrosoftAccount>) {
    match result {
        Ok(account) => handler.success(account),
        Err(AuthError::Cancelled) => debug!("Account creation cancelled"),
        Err(e) => {
            warn!("Account creation failed: {}", e);
            handler.error(e);
        }
    }
}

async fn run_login<H: LoginHandler + ?Sized>(
    client: AuthClient,
    store: Arc<AccountStore>,
    index: usize,
    handler: Supervised<H>,
) {
    let Some(account) = store.get(index).await else {
        handler.error(AuthError::unknown(anyhow!("No account at index {index}")));
        return;
    };

    let outcome = account.login(&client, &handler).await;
    let changed = outcome.replacement.is_some();
    if let (Some(replacement), Account::Microsoft(current)) = (outcome.replacement, &account) {
        match store.replace(current, replacement).await {
            Ok(true) => debug!("Stored account updated"),
            Ok(false) => warn!("Account was removed during login, not storing new tokens"),
            Err(e) => warn!("Failed to store refreshed account: {}", e),
        }
    }

    match outcome.result {
        Ok(data) => handler.success(data, changed),
        Err(AuthError::Cancelled) => debug!("Login cancelled"),
        Err(e) => {
            warn!("Login failed: {}", e);
            handler.error(e);
        }
    }
}
