//! Encryption adapter for credential fields (`password`, `passphrase`) at
//! rest. Per the design notes, callers MUST encrypt before persisting and
//! the adapter exposes an `is_available` capability flag so callers can
//! decide whether "encrypted" means "backed by the OS secret service" or
//! "reversibly encoded as a last resort".

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

const SERVICE_NAME: &str = "cargohold";

pub trait EncryptionAdapter {
    /// Whether this adapter is backed by a real secret store. When `false`,
    /// [`EncryptionAdapter::encrypt`]/[`EncryptionAdapter::decrypt`] still
    /// round-trip but only reversibly encode, not secure, the value.
    fn is_available(&self) -> bool;
    fn encrypt(&self, account: &str, plaintext: &str) -> anyhow::Result<String>;
    fn decrypt(&self, account: &str, ciphertext: &str) -> anyhow::Result<String>;
}

/// Stores the secret in the host OS's keyring/secret-service and persists
/// only an opaque marker referencing the account; falls back to
/// [`ReversibleEncoder`] transparently if the platform keyring is
/// unreachable (headless CI, missing D-Bus session, etc.).
pub struct KeyringAdapter;

impl KeyringAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KeyringAdapter {
    fn default() -> Self {
        Self::new()
    }
}

const KEYRING_MARKER: &str = "keyring:";

impl EncryptionAdapter for KeyringAdapter {
    fn is_available(&self) -> bool {
        keyring::Entry::new(SERVICE_NAME, "cargohold-probe").is_ok()
    }

    fn encrypt(&self, account: &str, plaintext: &str) -> anyhow::Result<String> {
        match keyring::Entry::new(SERVICE_NAME, account) {
            Ok(entry) => match entry.set_password(plaintext) {
                Ok(()) => Ok(format!("{KEYRING_MARKER}{account}")),
                Err(_) => ReversibleEncoder.encrypt(account, plaintext),
            },
            Err(_) => ReversibleEncoder.encrypt(account, plaintext),
        }
    }

    fn decrypt(&self, account: &str, ciphertext: &str) -> anyhow::Result<String> {
        if let Some(stored_account) = ciphertext.strip_prefix(KEYRING_MARKER) {
            let entry = keyring::Entry::new(SERVICE_NAME, stored_account)?;
            return Ok(entry.get_password()?);
        }
        ReversibleEncoder.decrypt(account, ciphertext)
    }
}

/// Base64-reversible encoding. Not secure; used only when no OS secret
/// service is reachable, so credentials on disk are at least not plaintext
/// at a glance.
pub struct ReversibleEncoder;

impl EncryptionAdapter for ReversibleEncoder {
    fn is_available(&self) -> bool {
        false
    }

    fn encrypt(&self, _account: &str, plaintext: &str) -> anyhow::Result<String> {
        Ok(BASE64.encode(plaintext.as_bytes()))
    }

    fn decrypt(&self, _account: &str, ciphertext: &str) -> anyhow::Result<String> {
        if let Some(stored_account) = ciphertext.strip_prefix(KEYRING_MARKER) {
            anyhow::bail!("ciphertext references keyring account {stored_account} but no keyring adapter is in use");
        }
        let bytes = BASE64.decode(ciphertext)?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Returns the best available adapter: the OS keyring when reachable, the
/// reversible fallback otherwise.
pub fn default_adapter() -> Box<dyn EncryptionAdapter> {
    let keyring = KeyringAdapter::new();
    if keyring.is_available() { Box::new(keyring) } else { Box::new(ReversibleEncoder) }
}
