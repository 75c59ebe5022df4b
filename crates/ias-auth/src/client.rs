use std::sync::Arc;

use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{AuthConfig, DEVICE_CODE_GRANT, RP_MINECRAFT, RP_XBOXLIVE, SCOPE};
use crate::errors::{AuthError, Result, XstsError, keys};
use crate::fields::{DeviceAuth, McProfile, MsTokens, XHashedToken};
use crate::http::{self, read, status_error};
use crate::models::*;

/// Outcome of one device token poll that is not a failure.
#[derive(Debug)]
pub(crate) enum DevicePoll {
    Pending,
    SlowDown,
    Granted(MsTokens),
}

/// One HTTP call per exchange step. Holds no per-flow state.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: Arc<AuthConfig>,
    http: Client,
}

impl AuthClient {
    pub fn new(config: Arc<AuthConfig>) -> Result<Self> {
        let http = http::build_client(&config)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Browser sign-in URL redirecting to `redirect_uri` with `state`.
    pub fn build_authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoints.authorize)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPE)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("prompt", "select_account")
            .append_pair("state", state);
        Ok(url)
    }

    #[instrument(skip(self))]
    pub async fn request_device_code(&self) -> Result<DeviceAuth> {
        debug!("Requesting device code");
        let response = self
            .http
            .post(&self.config.endpoints.device_code)
            .header("Accept", "application/json")
            .form(&[("client_id", self.config.client_id.as_str()), ("scope", SCOPE)])
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status != StatusCode::OK {
            return Err(status_error("Device code request", status, &body, &[]));
        }
        Ok(DeviceAuth::from_json(&body)?)
    }

    #[instrument(skip(self, device_code))]
    pub(crate) async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll> {
        let sent = self
            .http
            .post(&self.config.endpoints.device_token)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code),
            ])
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Device token poll timed out, retrying");
                return Ok(DevicePoll::Pending);
            }
            Err(e) => return Err(e.into()),
        };

        let (status, body) = read(response).await?;
        if status == StatusCode::OK {
            return Ok(DevicePoll::Granted(MsTokens::from_json(&body)?));
        }

        let error = serde_json::from_str::<OAuthErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_default();
        match error.as_str() {
            "authorization_pending" => Ok(DevicePoll::Pending),
            "slow_down" => Ok(DevicePoll::SlowDown),
            "authorization_declined" | "access_denied" => Err(AuthError::friendly(
                keys::CANCEL,
                "Device authorization was declined",
            )),
            "expired_token" | "code_expired" => Err(AuthError::friendly(
                keys::EXPIRED,
                "Device code has expired",
            )),
            _ => Err(status_error("Device token poll", status, &body, &[device_code])),
        }
    }

    /// Exchanges an authorization code for Microsoft tokens.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<MsTokens> {
        debug!("Exchanging authorization code for tokens");
        let response = self
            .http
            .post(&self.config.endpoints.token)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("scope", SCOPE),
            ])
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status != StatusCode::OK {
            return Err(status_error("Code exchange", status, &body, &[code]));
        }
        Ok(MsTokens::from_json(&body)?)
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_ms_token(&self, refresh_token: &str) -> Result<MsTokens> {
        debug!("Refreshing Microsoft access token");
        let response = self
            .http
            .post(&self.config.endpoints.token)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
                ("scope", SCOPE),
            ])
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status != StatusCode::OK {
            return Err(status_error("Token refresh", status, &body, &[refresh_token]));
        }
        Ok(MsTokens::from_json(&body)?)
    }

    #[instrument(skip(self, ms_access_token))]
    pub async fn xbl_authenticate(&self, ms_access_token: &str) -> Result<XHashedToken> {
        let request = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: format!("d={ms_access_token}"),
            },
            relying_party: RP_XBOXLIVE.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authenticating with Xbox Live");
        let response = self
            .http
            .post(&self.config.endpoints.xbl_authenticate)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status != StatusCode::OK {
            return Err(status_error("Xbox Live authentication", status, &body, &[ms_access_token]));
        }
        Ok(XHashedToken::from_json(&body)?)
    }

    /// Authorizes with XSTS. The returned user hash always matches `xbl`'s.
    #[instrument(skip(self, xbl))]
    pub async fn xsts_authorize(&self, xbl: &XHashedToken) -> Result<XHashedToken> {
        let request = XstsAuthRequest {
            properties: XstsAuthProperties {
                sandbox_id: "RETAIL".to_string(),
                user_tokens: vec![xbl.token.clone()],
            },
            relying_party: RP_MINECRAFT.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let response = self
            .http
            .post(&self.config.endpoints.xsts_authorize)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(rejection) = serde_json::from_str::<XstsErrorResponse>(&body) {
                return Err(self.classify_xerr(rejection));
            }
        }
        if status != StatusCode::OK {
            return Err(status_error("XSTS authorization", status, &body, &[&xbl.token]));
        }

        let xsts = XHashedToken::from_json(&body)?;
        if xsts.hash != xbl.hash {
            return Err(AuthError::unknown(XstsError::HashMismatch));
        }
        Ok(xsts)
    }

    fn classify_xerr(&self, rejection: XstsErrorResponse) -> AuthError {
        let message = rejection.message.unwrap_or_default();
        match self.config.xsts_errors.classify(rejection.xerr) {
            Some(key) => {
                debug!(xerr = rejection.xerr, key, "XSTS rejection mapped to friendly error");
                AuthError::friendly(key, format!("XSTS refused authorization (XErr {})", rejection.xerr))
            }
            None => AuthError::unknown(XstsError::Unmapped {
                xerr: rejection.xerr,
                message,
            }),
        }
    }

    /// Logs in to Minecraft Services, returning the Minecraft access token.
    #[instrument(skip(self, xsts))]
    pub async fn mc_login(&self, xsts: &XHashedToken) -> Result<String> {
        let request = McLoginRequest {
            identity_token: format!("XBL3.0 x={};{}", xsts.hash, xsts.token),
        };

        debug!("Logging in to Minecraft Services");
        let response = self
            .http
            .post(&self.config.endpoints.mc_login)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status != StatusCode::OK {
            return Err(status_error("Minecraft login", status, &body, &[&xsts.token, &xsts.hash]));
        }
        let login: McLoginResponse = serde_json::from_str(&body)?;
        if login.access_token.is_empty() {
            return Err(AuthError::unknown(anyhow::anyhow!("Minecraft login returned an empty token")));
        }
        Ok(login.access_token)
    }

    /// Fails with a friendly error when the account does not own the game.
    #[instrument(skip(self, mc_access_token))]
    pub async fn check_entitlements(&self, mc_access_token: &str) -> Result<()> {
        debug!("Checking game entitlements");
        let response = self
            .http
            .get(&self.config.endpoints.mc_entitlements)
            .header("Accept", "application/json")
            .bearer_auth(mc_access_token)
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status != StatusCode::OK {
            return Err(status_error("Entitlement check", status, &body, &[mc_access_token]));
        }
        let entitlements: EntitlementsResponse = serde_json::from_str(&body)?;
        if entitlements.items.is_empty() {
            return Err(AuthError::friendly(
                keys::GAME_NOT_OWNED,
                "This Microsoft account does not own Minecraft",
            ));
        }
        debug!(items = entitlements.items.len(), "Entitlements present");
        Ok(())
    }

    #[instrument(skip(self, mc_access_token))]
    pub async fn fetch_profile(&self, mc_access_token: &str) -> Result<McProfile> {
        debug!("Fetching Minecraft profile");
        let response = self
            .http
            .get(&self.config.endpoints.mc_profile)
            .header("Accept", "application/json")
            .bearer_auth(mc_access_token)
            .send()
            .await?;

        let (status, body) = read(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(AuthError::friendly(
                keys::NO_PROFILE,
                "This Microsoft account has no Minecraft profile",
            ));
        }
        if status != StatusCode::OK {
            return Err(status_error("Profile fetch", status, &body, &[mc_access_token]));
        }
        Ok(McProfile::from_json(&body)?)
    }

    /// Looks up a profile by player name. `None` when no such player exists.
    #[instrument(skip(self))]
    pub async fn profile_by_name(&self, name: &str) -> Result<Option<McProfile>> {
        let mut url = Url::parse(&self.config.endpoints.profile_by_name)?;
        url.path_segments_mut()
            .map_err(|()| AuthError::unknown(anyhow::anyhow!("Profile lookup URL cannot have a path")))?
            .pop_if_empty()
            .push(name);

        debug!("Looking up profile by name");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let (status, body) = read(response).await?;
        match status {
            StatusCode::OK => Ok(Some(McProfile::from_json(&body)?)),
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error("Profile lookup", status, &body, &[])),
        }
    }
}
