use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::errors::keys;

/// Microsoft, Xbox and Mojang endpoints.
pub mod endpoints {
    pub const MS_DEVICE_CODE: &str =
        "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
    pub const MS_DEVICE_TOKEN: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
    pub const MS_AUTHORIZE: &str = "https://login.live.com/oauth20_authorize.srf";
    pub const MS_TOKEN: &str = "https://login.live.com/oauth20_token.srf";
    pub const XBL_AUTHENTICATE: &str = "https://user.auth.xboxlive.com/user/authenticate";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    pub const MC_LOGIN: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
    pub const MC_ENTITLEMENTS: &str = "https://api.minecraftservices.com/entitlements/mcstore";
    pub const MC_PROFILE: &str = "https://api.minecraftservices.com/minecraft/profile";
    pub const MOJANG_PROFILE_BY_NAME: &str = "https://api.mojang.com/users/profiles/minecraft/";
}

/// Azure application registered for the switcher.
pub const CLIENT_ID: &str = "54fd49e4-2103-4044-9603-2b028c814ec3";

pub const SCOPE: &str = "XboxLive.signin XboxLive.offline_access";

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Relying parties
pub const RP_XBOXLIVE: &str = "http://auth.xboxlive.com";
pub const RP_MINECRAFT: &str = "rp://api.minecraftservices.com/";

/// Ports registered as redirect URIs for the application.
pub const LOOPBACK_PORTS: RangeInclusive<u16> = 59125..=59135;

/// Path of the loopback redirect URI.
pub const REDIRECT_PATH: &str = "/in_game_account_switcher";

/// Default PBKDF2 iteration count for password-sealed stores.
pub const PBKDF2_ITERATIONS: u32 = 1_300_000;

/// Overridable endpoint set. Tests point these at a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub device_code: String,
    pub device_token: String,
    pub authorize: String,
    pub token: String,
    pub xbl_authenticate: String,
    pub xsts_authorize: String,
    pub mc_login: String,
    pub mc_entitlements: String,
    pub mc_profile: String,
    pub profile_by_name: String,
}

impl Endpoints {
    /// Every endpoint rooted at `base` (no trailing slash), keeping the real paths.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            device_code: format!("{base}/consumers/oauth2/v2.0/devicecode"),
            device_token: format!("{base}/consumers/oauth2/v2.0/token"),
            authorize: format!("{base}/oauth20_authorize.srf"),
            token: format!("{base}/oauth20_token.srf"),
            xbl_authenticate: format!("{base}/user/authenticate"),
            xsts_authorize: format!("{base}/xsts/authorize"),
            mc_login: format!("{base}/authentication/login_with_xbox"),
            mc_entitlements: format!("{base}/entitlements/mcstore"),
            mc_profile: format!("{base}/minecraft/profile"),
            profile_by_name: format!("{base}/users/profiles/minecraft/"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            device_code: endpoints::MS_DEVICE_CODE.to_string(),
            device_token: endpoints::MS_DEVICE_TOKEN.to_string(),
            authorize: endpoints::MS_AUTHORIZE.to_string(),
            token: endpoints::MS_TOKEN.to_string(),
            xbl_authenticate: endpoints::XBL_AUTHENTICATE.to_string(),
            xsts_authorize: endpoints::XSTS_AUTHORIZE.to_string(),
            mc_login: endpoints::MC_LOGIN.to_string(),
            mc_entitlements: endpoints::MC_ENTITLEMENTS.to_string(),
            mc_profile: endpoints::MC_PROFILE.to_string(),
            profile_by_name: endpoints::MOJANG_PROFILE_BY_NAME.to_string(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(15),
        }
    }
}

/// Host identification carried in the `User-Agent` header.
#[derive(Debug, Clone)]
pub struct UserAgentInfo {
    pub version: String,
    pub loader: String,
    pub loader_version: String,
    pub game_version: String,
    pub runtime: String,
}

impl Default for UserAgentInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            loader: "standalone".to_string(),
            loader_version: env!("CARGO_PKG_VERSION").to_string(),
            game_version: "unknown".to_string(),
            runtime: format!("Rust; {} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

/// XSTS `XErr` code to friendly error key table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XstsErrorMap {
    entries: BTreeMap<u64, String>,
}

impl XstsErrorMap {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Adds or replaces a mapping.
    pub fn insert(&mut self, xerr: u64, key: impl Into<String>) -> &mut Self {
        self.entries.insert(xerr, key.into());
        self
    }

    pub fn extend<I, K>(&mut self, overrides: I) -> &mut Self
    where
        I: IntoIterator<Item = (u64, K)>,
        K: Into<String>,
    {
        for (xerr, key) in overrides {
            self.insert(xerr, key);
        }
        self
    }

    pub fn classify(&self, xerr: u64) -> Option<&str> {
        self.entries.get(&xerr).map(String::as_str)
    }
}

impl Default for XstsErrorMap {
    fn default() -> Self {
        let mut map = Self::empty();
        map.insert(2148916233, keys::NO_XBOX)
            .insert(2148916235, keys::XBOX_AVAILABLE)
            .insert(2148916236, keys::XBOX_ADULT)
            .insert(2148916237, keys::XBOX_ADULT)
            .insert(2148916238, keys::XBOX_ADULT);
        map
    }
}

/// Configuration for the authentication core.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client ID
    pub client_id: String,

    pub endpoints: Endpoints,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    pub user_agent: UserAgentInfo,

    pub xsts_errors: XstsErrorMap,

    /// Candidate ports for the browser-flow loopback listener.
    pub loopback_ports: RangeInclusive<u16>,

    /// Message shown on the page served to the browser after a redirect.
    pub done_message: String,

    /// Upper bound for a browser-flow wait, from listener bind to redirect.
    pub browser_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: UserAgentInfo::default(),
            xsts_errors: XstsErrorMap::default(),
            loopback_ports: LOOPBACK_PORTS,
            done_message: "You can close this window and return to the game.".to_string(),
            browser_timeout: Duration::from_secs(600),
        }
    }
}
