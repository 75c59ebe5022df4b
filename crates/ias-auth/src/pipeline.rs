//! Token exchange chains: device and browser sign-in, and stored-account login.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::account::{AccountTokens, AuthData, AuthType, LoginOutcome, MicrosoftAccount, SealedTokens};
use crate::client::{AuthClient, DevicePoll};
use crate::crypt::{Crypt, CryptKind, DummyCrypt, PasswordCrypt};
use crate::errors::{AuthError, Result, keys};
use crate::fields::{DeviceAuth, McProfile, MsTokens};
use crate::handler::{LoginHandler, Progress, Stage, checkpoint, enter, stages};
use crate::server::LoopbackServer;

/// Added to the poll interval on each `slow_down` answer.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Granularity of cancellation checks while waiting.
const CANCEL_TICK: Duration = Duration::from_millis(100);

/// Sleeps for `duration`, failing early once the run is cancelled.
async fn wait<P: Progress + ?Sized>(progress: &P, duration: Duration) -> Result<()> {
    let until = Instant::now() + duration;
    loop {
        checkpoint(progress)?;
        let now = Instant::now();
        if now >= until {
            return Ok(());
        }
        sleep(CANCEL_TICK.min(until - now)).await;
    }
}

/// Resolves once the run is cancelled.
async fn cancelled<P: Progress + ?Sized>(progress: &P) {
    while !progress.cancelled() {
        sleep(CANCEL_TICK).await;
    }
}

/// Adds a Microsoft account through the device code flow.
pub(crate) async fn device_flow<P: Progress + ?Sized>(
    client: &AuthClient,
    crypt: &dyn Crypt,
    progress: &P,
) -> Result<MicrosoftAccount> {
    let result = async {
        enter(progress, Stage::new(stages::INITIALIZING))?;
        let auth = client.request_device_code().await?;
        info!(user_code = %auth.user_code, "Device code issued");
        enter(
            progress,
            Stage::with_args(
                stages::LINK_CLIENT,
                [auth.verification_uri.to_string(), auth.user_code.clone()],
            ),
        )?;

        let tokens = poll_device(client, &auth, progress).await?;
        enter(progress, Stage::new(stages::PROCESSING))?;
        create_account(client, crypt, progress, &tokens).await
    }
    .await;
    result.map_err(AuthError::classify_connect)
}

/// Polls the token endpoint until the user approves, denies, or the code expires.
#[instrument(skip_all)]
pub(crate) async fn poll_device<P: Progress + ?Sized>(
    client: &AuthClient,
    auth: &DeviceAuth,
    progress: &P,
) -> Result<MsTokens> {
    let deadline = Instant::now() + auth.expires_in;
    let mut interval = auth.interval;
    let mut polls = 0u32;
    loop {
        wait(progress, interval).await?;
        if Instant::now() >= deadline {
            return Err(AuthError::friendly(keys::EXPIRED, "Device code has expired"));
        }

        polls += 1;
        match client.poll_device_token(&auth.device_code).await? {
            DevicePoll::Granted(tokens) => {
                debug!(polls, "Device authorization granted");
                return Ok(tokens);
            }
            DevicePoll::Pending => {
                debug!(polls, "Device authorization pending");
            }
            DevicePoll::SlowDown => {
                interval += SLOW_DOWN_STEP;
                warn!(?interval, "Device token endpoint asked to slow down");
            }
        }
    }
}

/// Adds a Microsoft account through the browser redirect flow.
///
/// `open` receives the sign-in URL once the loopback listener is ready.
pub(crate) async fn browser_flow<P, F>(
    client: &AuthClient,
    crypt: &dyn Crypt,
    progress: &P,
    open: F,
) -> Result<MicrosoftAccount>
where
    P: Progress + ?Sized,
    F: FnOnce(&str),
{
    let result = async {
        enter(progress, Stage::new(stages::INITIALIZING))?;
        enter(progress, Stage::new(stages::SERVER))?;
        let config = client.config();
        let server = LoopbackServer::bind(config.loopback_ports.clone(), config.done_message.clone()).await?;
        let redirect_uri = server.redirect_uri();
        let url = client.build_authorize_url(&redirect_uri, server.state())?;

        enter(progress, Stage::with_args(stages::LINK, [url.to_string()]))?;
        open(url.as_str());

        let code = tokio::select! {
            accepted = timeout(config.browser_timeout, server.accept()) => match accepted {
                Ok(code) => code?,
                Err(_) => return Err(AuthError::friendly(keys::EXPIRED, "Browser sign-in timed out")),
            },
            () = cancelled(progress) => return Err(AuthError::Cancelled),
        };

        enter(progress, Stage::new(stages::PROCESSING))?;
        enter(progress, Stage::new(stages::MSAC_TO_MSA_MSR))?;
        let tokens = client.exchange_code(&code, &redirect_uri).await?;
        create_account(client, crypt, progress, &tokens).await
    }
    .await;
    result.map_err(AuthError::classify_connect)
}

/// Runs XBL through profile for fresh Microsoft tokens and seals the result.
async fn create_account<P: Progress + ?Sized>(
    client: &AuthClient,
    crypt: &dyn Crypt,
    progress: &P,
    tokens: &MsTokens,
) -> Result<MicrosoftAccount> {
    let (access, profile) = minecraft_chain(client, progress, tokens.access()).await?;

    enter(progress, Stage::new(stages::ENCRYPTING))?;
    let sealed = SealedTokens::seal(crypt, &AccountTokens::new(access, tokens.refresh()))?;

    enter(progress, Stage::new(stages::FINALIZING))?;
    info!(name = %profile.name, uuid = %profile.uuid, "Microsoft account added");
    Ok(MicrosoftAccount::new(profile.uuid, profile.name, sealed))
}

/// Steps 2 to 5: XBL, XSTS, Minecraft login, entitlements and profile.
async fn minecraft_chain<P: Progress + ?Sized>(
    client: &AuthClient,
    progress: &P,
    ms_access: &str,
) -> Result<(String, McProfile)> {
    enter(progress, Stage::new(stages::MSA_TO_XBL))?;
    let xbl = client.xbl_authenticate(ms_access).await?;

    enter(progress, Stage::new(stages::XBL_TO_XSTS))?;
    let xsts = client.xsts_authorize(&xbl).await?;

    enter(progress, Stage::new(stages::XSTS_TO_MCA))?;
    let access = client.mc_login(&xsts).await?;

    let profile = verify_profile(client, progress, &access).await?;
    Ok((access, profile))
}

/// Step 5: entitlement check then profile fetch.
async fn verify_profile<P: Progress + ?Sized>(
    client: &AuthClient,
    progress: &P,
    mc_access: &str,
) -> Result<McProfile> {
    enter(progress, Stage::new(stages::ENTITLEMENTS))?;
    client.check_entitlements(mc_access).await?;

    enter(progress, Stage::new(stages::MCA_TO_MCP))?;
    client.fetch_profile(mc_access).await
}

/// Crypt able to open `kind`, asking the handler for a password when needed.
async fn resolve_crypt<H: LoginHandler + ?Sized>(kind: CryptKind, handler: &H) -> Result<Box<dyn Crypt>> {
    match kind {
        CryptKind::Dummy => Ok(Box::new(DummyCrypt)),
        CryptKind::Password { iterations } => {
            let password = handler.password().await.ok_or(AuthError::Cancelled)?;
            checkpoint(handler)?;
            Ok(Box::new(PasswordCrypt::with_iterations(password.as_str(), iterations)?))
        }
    }
}

/// Logs in with a stored account: the stored Minecraft token is tried first,
/// then the refresh token is exchanged and the chain re-run.
///
/// Once the refresh grant succeeds the outcome always carries a replacement,
/// even when a later step fails, so the rotated refresh token is kept.
#[instrument(skip_all, fields(name = %account.name()))]
pub(crate) async fn login<H: LoginHandler + ?Sized>(
    client: &AuthClient,
    account: &MicrosoftAccount,
    handler: &H,
) -> LoginOutcome {
    let mut replacement = None;
    let result = async {
        enter(handler, Stage::new(stages::INITIALIZING))?;
        let crypt = resolve_crypt(account.tokens().kind(), handler).await?;

        enter(handler, Stage::new(stages::DECRYPTING))?;
        let tokens = account.tokens().open(crypt.as_ref())?;

        match verify_profile(client, handler, &tokens.access).await {
            Ok(profile) => {
                enter(handler, Stage::new(stages::FINALIZING))?;
                if profile.uuid != account.uuid() || profile.name != account.name() {
                    replacement = Some(MicrosoftAccount::new(
                        profile.uuid,
                        profile.name.clone(),
                        account.tokens().clone(),
                    ));
                }
                debug!(renamed = replacement.is_some(), "Stored access token is valid");
                return Ok(auth_data(profile, &tokens.access));
            }
            Err(AuthError::Cancelled) => return Err(AuthError::Cancelled),
            Err(e) => debug!("Stored access token rejected, refreshing: {}", e),
        }

        enter(handler, Stage::new(stages::MSR_TO_MSA_MSR))?;
        let refreshed = client.refresh_ms_token(&tokens.refresh).await?;

        let chained = async {
            let (access, profile) = minecraft_chain(client, handler, refreshed.access()).await?;
            enter(handler, Stage::new(stages::ENCRYPTING))?;
            let sealed = SealedTokens::seal(crypt.as_ref(), &AccountTokens::new(access.as_str(), refreshed.refresh()))?;
            enter(handler, Stage::new(stages::FINALIZING))?;
            Ok::<_, AuthError>((access, profile, sealed))
        }
        .await;

        match chained {
            Ok((access, profile, sealed)) => {
                info!("Account tokens refreshed");
                replacement = Some(MicrosoftAccount::new(profile.uuid, profile.name.clone(), sealed));
                Ok(auth_data(profile, &access))
            }
            Err(e) => {
                let rotated = AccountTokens::new(tokens.access.as_str(), refreshed.refresh());
                match SealedTokens::seal(crypt.as_ref(), &rotated) {
                    Ok(sealed) => {
                        warn!("Login failed after the refresh grant, keeping the rotated refresh token");
                        replacement = Some(MicrosoftAccount::new(account.uuid(), account.name(), sealed));
                    }
                    Err(seal) => error!("Unable to seal the rotated refresh token: {}", seal),
                }
                Err(e)
            }
        }
    }
    .await;

    LoginOutcome {
        result: result.map_err(AuthError::classify_connect),
        replacement,
    }
}

fn auth_data(profile: McProfile, token: &str) -> AuthData {
    AuthData {
        name: profile.name,
        uuid: profile.uuid,
        token: token.to_string(),
        auth_type: AuthType::Msa,
    }
}
