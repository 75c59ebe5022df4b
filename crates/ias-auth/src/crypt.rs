use std::fmt;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::codec::{Reader, Writer};
use crate::config::PBKDF2_ITERATIONS;
use crate::errors::{CodecError, CryptError, StoreError};

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const SALT_LEN: usize = 128;
pub const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Cipher applied to account secrets before they reach the disk.
pub trait Crypt: Send + Sync + fmt::Debug {
    /// Descriptor written next to data sealed by this crypt.
    fn kind(&self) -> CryptKind;

    /// Whether sealed data can be read without any user secret.
    fn insecure(&self) -> bool;

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptError>;

    fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError>;
}

/// Serializable identity of a crypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptKind {
    Dummy,
    Password { iterations: u32 },
}

impl CryptKind {
    pub const DUMMY_TAG: &'static str = "ias:dummy_crypt_v1";
    pub const PASSWORD_TAG: &'static str = "ias:password_crypt_v1";

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Dummy => Self::DUMMY_TAG,
            Self::Password { .. } => Self::PASSWORD_TAG,
        }
    }

    /// Whether opening data sealed by this kind needs a password from the user.
    pub fn needs_password(&self) -> bool {
        matches!(self, Self::Password { .. })
    }

    pub fn write(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_utf(self.tag())?;
        if let Self::Password { iterations } = self {
            w.put_u32(*iterations);
        }
        Ok(())
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, StoreError> {
        let tag = r.get_utf()?;
        match tag.as_str() {
            Self::DUMMY_TAG => Ok(Self::Dummy),
            Self::PASSWORD_TAG => Ok(Self::Password {
                iterations: r.get_u32()?,
            }),
            _ => Err(CryptError::UnknownType(tag).into()),
        }
    }
}

/// Stores secrets as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyCrypt;

impl Crypt for DummyCrypt {
    fn kind(&self) -> CryptKind {
        CryptKind::Dummy
    }

    fn insecure(&self) -> bool {
        true
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(plain.to_vec())
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        Ok(Zeroizing::new(sealed.to_vec()))
    }
}

/// PBKDF2-HMAC-SHA512 derived AES-256-GCM.
///
/// Output layout: `salt (128) || iv (16) || ciphertext || tag (16)`. Salt and
/// IV are fresh for every call to [`Crypt::encrypt`].
pub struct PasswordCrypt {
    password: Zeroizing<String>,
    iterations: u32,
}

impl PasswordCrypt {
    pub fn new(password: impl Into<String>) -> Result<Self, CryptError> {
        Self::with_iterations(password, PBKDF2_ITERATIONS)
    }

    pub fn with_iterations(password: impl Into<String>, iterations: u32) -> Result<Self, CryptError> {
        let password = Zeroizing::new(password.into());
        if password.is_empty() {
            return Err(CryptError::EmptyPassword);
        }
        if iterations == 0 {
            return Err(CryptError::InvalidIterations(iterations));
        }
        Ok(Self {
            password,
            iterations,
        })
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm16, CryptError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha512>(self.password.as_bytes(), salt, self.iterations, &mut *key);
        Aes256Gcm16::new_from_slice(&key[..]).map_err(|e| CryptError::Encrypt(e.to_string()))
    }
}

impl fmt::Debug for PasswordCrypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCrypt")
            .field("password", &"[REDACTED]")
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl Crypt for PasswordCrypt {
    fn kind(&self) -> CryptKind {
        CryptKind::Password {
            iterations: self.iterations,
        }
    }

    fn insecure(&self) -> bool {
        false
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptError> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::<U16>::from_slice(&iv), plain)
            .map_err(|e| CryptError::Encrypt(e.to_string()))?;

        let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        if sealed.len() < SALT_LEN + IV_LEN + TAG_LEN {
            return Err(CryptError::Truncated(sealed.len()));
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let plain = self
            .cipher(salt)?
            .decrypt(Nonce::<U16>::from_slice(iv), ciphertext)
            .map_err(|_| CryptError::BadPassword)?;
        Ok(Zeroizing::new(plain))
    }
}
