//! Validated values parsed out of the JSON responses of each exchange step.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::{
    DeviceCodeResponse, MsTokenResponse, ProfileResponse, XTokenResponse,
};

/// Longest device code lifetime accepted from the server.
pub const MAX_DEVICE_EXPIRY: Duration = Duration::from_secs(2 * 24 * 60 * 60);

static PROFILE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-fA-F]{8})([0-9a-fA-F]{4})([0-9a-fA-F]{4})([0-9a-fA-F]{4})([0-9a-fA-F]{12})$")
        .expect("valid profile id pattern")
});

#[derive(Error, Debug)]
pub enum FieldError {
    #[error("Unable to parse {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

impl FieldError {
    fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            reason: reason.into(),
        }
    }
}

fn parse<T: DeserializeOwned>(what: &'static str, body: &str) -> Result<T, FieldError> {
    serde_json::from_str(body).map_err(|source| FieldError::Json { what, source })
}

/// Pending device authorization.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceAuth {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: Url,
    pub expires_in: Duration,
    pub interval: Duration,
}

impl DeviceAuth {
    pub fn from_json(body: &str) -> Result<Self, FieldError> {
        Self::try_from(parse::<DeviceCodeResponse>("device auth", body)?)
    }
}

impl TryFrom<DeviceCodeResponse> for DeviceAuth {
    type Error = FieldError;

    fn try_from(response: DeviceCodeResponse) -> Result<Self, Self::Error> {
        const WHAT: &str = "device auth";
        if response.device_code.is_empty() {
            return Err(FieldError::invalid(WHAT, "empty device code"));
        }
        if response.user_code.is_empty() {
            return Err(FieldError::invalid(WHAT, "empty user code"));
        }
        let verification_uri = Url::parse(&response.verification_uri)
            .map_err(|e| FieldError::invalid(WHAT, format!("bad verification URI: {e}")))?;
        if verification_uri.scheme() != "https" {
            return Err(FieldError::invalid(
                WHAT,
                format!("verification URI is not https: {verification_uri}"),
            ));
        }
        let expires_in = Duration::from_secs(response.expires_in);
        if expires_in.is_zero() || expires_in > MAX_DEVICE_EXPIRY {
            return Err(FieldError::invalid(
                WHAT,
                format!("expiry out of range: {}s", response.expires_in),
            ));
        }
        let interval = Duration::from_secs(response.interval);
        if interval.is_zero() || interval >= expires_in {
            return Err(FieldError::invalid(
                WHAT,
                format!("poll interval out of range: {}s", response.interval),
            ));
        }
        Ok(Self {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri,
            expires_in,
            interval,
        })
    }
}

impl fmt::Debug for DeviceAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAuth")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri.as_str())
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Microsoft access and refresh tokens.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MsTokens {
    access: String,
    refresh: String,
}

impl MsTokens {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    pub fn from_json(body: &str) -> Result<Self, FieldError> {
        Self::try_from(parse::<MsTokenResponse>("Microsoft tokens", body)?)
    }

    pub fn access(&self) -> &str {
        &self.access
    }

    pub fn refresh(&self) -> &str {
        &self.refresh
    }
}

impl TryFrom<MsTokenResponse> for MsTokens {
    type Error = FieldError;

    fn try_from(response: MsTokenResponse) -> Result<Self, Self::Error> {
        if response.access_token.is_empty() || response.refresh_token.is_empty() {
            return Err(FieldError::invalid("Microsoft tokens", "empty token"));
        }
        Ok(Self::new(response.access_token, response.refresh_token))
    }
}

impl fmt::Debug for MsTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MsTokens([REDACTED])")
    }
}

/// Xbox Live or XSTS token with its user hash.
#[derive(Clone, PartialEq, Eq)]
pub struct XHashedToken {
    pub token: String,
    pub hash: String,
}

impl XHashedToken {
    pub fn from_json(body: &str) -> Result<Self, FieldError> {
        Self::try_from(parse::<XTokenResponse>("Xbox token", body)?)
    }
}

impl TryFrom<XTokenResponse> for XHashedToken {
    type Error = FieldError;

    fn try_from(response: XTokenResponse) -> Result<Self, Self::Error> {
        const WHAT: &str = "Xbox token";
        let [user] = response.display_claims.xui.as_slice() else {
            return Err(FieldError::invalid(
                WHAT,
                format!(
                    "expected exactly one xui claim, got {}",
                    response.display_claims.xui.len()
                ),
            ));
        };
        if response.token.is_empty() || user.uhs.is_empty() {
            return Err(FieldError::invalid(WHAT, "empty token or user hash"));
        }
        Ok(Self {
            hash: user.uhs.clone(),
            token: response.token,
        })
    }
}

impl fmt::Debug for XHashedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("XHashedToken([REDACTED])")
    }
}

/// Minecraft profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McProfile {
    pub uuid: Uuid,
    pub name: String,
}

impl McProfile {
    pub fn from_json(body: &str) -> Result<Self, FieldError> {
        Self::try_from(parse::<ProfileResponse>("Minecraft profile", body)?)
    }

    /// Inserts hyphens into a 32 hex digit id (8-4-4-4-12).
    pub fn hyphenate(id: &str) -> Result<String, FieldError> {
        if !PROFILE_ID.is_match(id) {
            return Err(FieldError::invalid(
                "Minecraft profile",
                format!("id is not 32 hex digits: {id:?}"),
            ));
        }
        Ok(PROFILE_ID.replace(id, "$1-$2-$3-$4-$5").to_lowercase())
    }
}

impl TryFrom<ProfileResponse> for McProfile {
    type Error = FieldError;

    fn try_from(response: ProfileResponse) -> Result<Self, Self::Error> {
        let hyphenated = Self::hyphenate(&response.id)?;
        let uuid = Uuid::parse_str(&hyphenated)
            .map_err(|e| FieldError::invalid("Minecraft profile", e.to_string()))?;
        if response.name.is_empty() {
            return Err(FieldError::invalid("Minecraft profile", "empty name"));
        }
        Ok(Self {
            uuid,
            name: response.name,
        })
    }
}
