use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use keyring::Entry;
use tracing::debug;

pub const KEYRING_SERVICE: &str = "coachroom";
pub const KEYRING_ACCOUNT: &str = "openrouter";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked). Permanent errors surface the underlying cause directly so
/// callers can report them to the user.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

#[derive(Clone, Debug)]
enum CachedLookup {
    Present(String),
    Missing,
}

/// The OpenRouter key held in the platform keyring.
///
/// Lookups are cached for the life of the process so a locked keychain
/// prompts at most once. A disabled vault behaves as an empty one.
pub struct KeyringVault {
    enabled: bool,
    cache: Mutex<Option<CachedLookup>>,
}

impl KeyringVault {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            cache: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn remember(&self, lookup: CachedLookup) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(lookup);
        }
    }

    fn cached(&self) -> Option<CachedLookup> {
        self.cache.lock().ok().and_then(|cache| cache.clone())
    }

    pub fn get(&self) -> Result<Option<String>, KeyringAccessError> {
        if !self.enabled {
            return Ok(None);
        }
        if let Some(cached) = self.cached() {
            return Ok(match cached {
                CachedLookup::Present(key) => Some(key),
                CachedLookup::Missing => None,
            });
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)?;
        match entry.get_password() {
            Ok(key) => {
                debug!("keyring lookup succeeded");
                self.remember(CachedLookup::Present(key.clone()));
                Ok(Some(key))
            }
            Err(keyring::Error::NoEntry) => {
                debug!("keyring has no stored key");
                self.remember(CachedLookup::Missing);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns `false` when the vault is disabled and nothing was stored.
    pub fn store(&self, key: &str) -> Result<bool, KeyringAccessError> {
        if !self.enabled {
            return Ok(false);
        }
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)?;
        entry.set_password(key)?;
        self.remember(CachedLookup::Present(key.to_string()));
        Ok(true)
    }

    pub fn remove(&self) -> Result<(), KeyringAccessError> {
        if !self.enabled {
            return Ok(());
        }
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                self.remember(CachedLookup::Missing);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
