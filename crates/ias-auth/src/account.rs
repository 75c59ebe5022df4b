use std::fmt;

use uuid::{Builder, Uuid};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::client::AuthClient;
use crate::codec::{Reader, Writer};
use crate::crypt::{Crypt, CryptKind};
use crate::errors::{AuthError, CryptError, Result, StoreError, keys};
use crate::handler::LoginHandler;
use crate::pipeline;

pub const OFFLINE_V1: &str = "ias:offline_v1";
pub const OFFLINE_V2: &str = "ias:offline_v2";
pub const MICROSOFT_V1: &str = "ias:microsoft_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Microsoft account
    Msa,
    /// Offline/legacy account
    Legacy,
}

/// Session data handed to the host after a successful login. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthData {
    pub name: String,
    pub uuid: Uuid,
    pub token: String,
    pub auth_type: AuthType,
}

impl fmt::Debug for AuthData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthData")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("token", &"[REDACTED]")
            .field("auth_type", &self.auth_type)
            .finish()
    }
}

/// Secrets of a stored Microsoft account.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccountTokens {
    /// Minecraft access token
    pub access: String,
    /// Microsoft refresh token
    pub refresh: String,
}

impl AccountTokens {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for AccountTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountTokens([REDACTED])")
    }
}

/// [`AccountTokens`] encrypted by a [`Crypt`].
#[derive(Clone, PartialEq, Eq)]
pub struct SealedTokens {
    kind: CryptKind,
    data: Vec<u8>,
}

impl SealedTokens {
    pub fn seal(crypt: &dyn Crypt, tokens: &AccountTokens) -> std::result::Result<Self, StoreError> {
        let mut w = Writer::new();
        w.put_utf(&tokens.access)?;
        w.put_utf(&tokens.refresh)?;
        let plain = Zeroizing::new(w.into_vec());
        Ok(Self {
            kind: crypt.kind(),
            data: crypt.encrypt(&plain)?,
        })
    }

    pub fn open(&self, crypt: &dyn Crypt) -> std::result::Result<AccountTokens, StoreError> {
        let given = crypt.kind();
        if given != self.kind {
            return Err(CryptError::KindMismatch {
                sealed: self.kind.tag(),
                given: given.tag(),
            }
            .into());
        }
        let plain = crypt.decrypt(&self.data)?;
        let mut r = Reader::new(&plain);
        let access = Zeroizing::new(r.get_utf()?);
        let refresh = Zeroizing::new(r.get_utf()?);
        r.finish()?;
        Ok(AccountTokens::new(access.as_str(), refresh.as_str()))
    }

    pub fn kind(&self) -> CryptKind {
        self.kind
    }

    fn write(&self, w: &mut Writer) -> std::result::Result<(), StoreError> {
        self.kind.write(w)?;
        w.put_blob(&self.data)?;
        Ok(())
    }

    fn read(r: &mut Reader<'_>) -> std::result::Result<Self, StoreError> {
        let kind = CryptKind::read(r)?;
        let data = r.get_blob()?.to_vec();
        Ok(Self { kind, data })
    }
}

impl fmt::Debug for SealedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedTokens")
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Online account with sealed Microsoft tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrosoftAccount {
    uuid: Uuid,
    name: String,
    tokens: SealedTokens,
}

impl MicrosoftAccount {
    pub fn new(uuid: Uuid, name: impl Into<String>, tokens: SealedTokens) -> Self {
        Self {
            uuid,
            name: name.into(),
            tokens,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tokens(&self) -> &SealedTokens {
        &self.tokens
    }

    pub fn insecure(&self) -> bool {
        self.tokens.kind == CryptKind::Dummy
    }

    /// Same account sealed under `to`.
    pub fn reseal(&self, from: &dyn Crypt, to: &dyn Crypt) -> std::result::Result<Self, StoreError> {
        let tokens = self.tokens.open(from)?;
        Ok(Self {
            uuid: self.uuid,
            name: self.name.clone(),
            tokens: SealedTokens::seal(to, &tokens)?,
        })
    }

    fn write(&self, w: &mut Writer) -> std::result::Result<(), StoreError> {
        w.put_uuid(self.uuid);
        w.put_utf(&self.name)?;
        self.tokens.write(w)
    }

    fn read(r: &mut Reader<'_>) -> std::result::Result<Self, StoreError> {
        let uuid = r.get_uuid()?;
        let name = r.get_utf()?;
        let tokens = SealedTokens::read(r)?;
        Ok(Self { uuid, name, tokens })
    }
}

/// Offline account. Its uuid is derived from the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineAccount {
    name: String,
    uuid: Uuid,
    skin: Option<Uuid>,
}

impl OfflineAccount {
    pub fn new(name: impl Into<String>, skin: Option<Uuid>) -> Self {
        let name = name.into();
        Self {
            uuid: offline_uuid(&name),
            name,
            skin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Profile whose skin is shown for this account.
    pub fn skin(&self) -> Uuid {
        self.skin.unwrap_or(self.uuid)
    }

    fn write(&self, w: &mut Writer) -> std::result::Result<(), StoreError> {
        w.put_utf(&self.name)?;
        w.put_bool(self.skin.is_some());
        if let Some(skin) = self.skin {
            w.put_uuid(skin);
        }
        Ok(())
    }
}

/// Name-based (version 3) UUID of `"OfflinePlayer:" + name`, as servers in offline mode compute it.
pub fn offline_uuid(name: &str) -> Uuid {
    let digest = md5::compute(format!("OfflinePlayer:{name}"));
    Builder::from_md5_bytes(digest.0).into_uuid()
}

/// A stored account.
#[derive(Debug, Clone)]
pub enum Account {
    Microsoft(MicrosoftAccount),
    Offline(OfflineAccount),
}

/// Login result plus, when the tokens were rotated, the account value to store
/// instead. A replacement may accompany a failed login.
#[derive(Debug)]
pub struct LoginOutcome {
    pub result: Result<AuthData>,
    pub replacement: Option<MicrosoftAccount>,
}

impl Account {
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Microsoft(account) => account.uuid,
            Self::Offline(account) => account.uuid,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Microsoft(account) => &account.name,
            Self::Offline(account) => &account.name,
        }
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::Microsoft(_) => AuthType::Msa,
            Self::Offline(_) => AuthType::Legacy,
        }
    }

    /// Translation key of the account type tooltip.
    pub fn type_tip_key(&self) -> &'static str {
        match self {
            Self::Microsoft(_) => "ias.accounts.tip.type.microsoft",
            Self::Offline(_) => "ias.accounts.tip.type.offline",
        }
    }

    pub fn can_login(&self) -> bool {
        matches!(self, Self::Microsoft(_))
    }

    /// Whether the account secrets are stored without encryption.
    pub fn insecure(&self) -> bool {
        match self {
            Self::Microsoft(account) => account.insecure(),
            Self::Offline(_) => false,
        }
    }

    pub fn skin(&self) -> Uuid {
        match self {
            Self::Microsoft(account) => account.uuid,
            Self::Offline(account) => account.skin(),
        }
    }

    /// Validates or refreshes the account and produces session data.
    pub async fn login<H>(&self, client: &AuthClient, handler: &H) -> LoginOutcome
    where
        H: LoginHandler + ?Sized,
    {
        match self {
            Self::Microsoft(account) => pipeline::login(client, account, handler).await,
            Self::Offline(account) => LoginOutcome {
                result: Err(AuthError::friendly(
                    keys::OFFLINE,
                    format!("Offline account {} cannot log in", account.name),
                )),
                replacement: None,
            },
        }
    }

    /// Type tag written before the payload.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Microsoft(_) => MICROSOFT_V1,
            Self::Offline(_) => OFFLINE_V2,
        }
    }

    pub fn write_payload(&self, w: &mut Writer) -> std::result::Result<(), StoreError> {
        match self {
            Self::Microsoft(account) => account.write(w),
            Self::Offline(account) => account.write(w),
        }
    }

    /// Decodes a payload written under `tag`. Unknown tags fail closed.
    pub fn read(tag: &str, payload: &[u8]) -> std::result::Result<Self, StoreError> {
        let mut r = Reader::new(payload);
        let account = match tag {
            MICROSOFT_V1 => Self::Microsoft(MicrosoftAccount::read(&mut r)?),
            OFFLINE_V1 => Self::Offline(OfflineAccount::new(r.get_utf()?, None)),
            OFFLINE_V2 => {
                let name = r.get_utf()?;
                let skin = if r.get_bool()? { Some(r.get_uuid()?) } else { None };
                Self::Offline(OfflineAccount::new(name, skin))
            }
            _ => return Err(StoreError::UnknownType(tag.to_string())),
        };
        r.finish()?;
        Ok(account)
    }
}

impl PartialEq for Account {
    /// Offline accounts match by name, Microsoft accounts by uuid and name.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Microsoft(a), Self::Microsoft(b)) => a.uuid == b.uuid && a.name == b.name,
            (Self::Offline(a), Self::Offline(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl From<MicrosoftAccount> for Account {
    fn from(account: MicrosoftAccount) -> Self {
        Self::Microsoft(account)
    }
}

impl From<OfflineAccount> for Account {
    fn from(account: OfflineAccount) -> Self {
        Self::Offline(account)
    }
}
