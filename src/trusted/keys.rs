use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{PrivateKey, PublicKey};

/// Source of the secret keys templates are re-signed with.
pub trait KeyStore {
    fn secret_key(&self, public: &PublicKey) -> Option<SecretKey>;
}

impl<K: KeyStore + ?Sized> KeyStore for Arc<K> {
    fn secret_key(&self, public: &PublicKey) -> Option<SecretKey> {
        (**self).secret_key(public)
    }
}

/// Keys held in memory, indexed by the public key they sign for.
///
/// The compression flag is part of the index: a P2PKH template naming an
/// uncompressed key only finds a key loaded as uncompressed.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<PublicKey, SecretKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key under its compressed public key.
    pub fn insert(&self, secret: SecretKey) -> PublicKey {
        let secp = Secp256k1::signing_only();
        self.index(PublicKey::new(secret.public_key(&secp)), secret)
    }

    /// Adds a key under the public key its WIF encoding designates.
    pub fn insert_private(&self, key: PrivateKey) -> PublicKey {
        let secp = Secp256k1::signing_only();
        self.index(key.public_key(&secp), key.inner)
    }

    fn index(&self, public: PublicKey, secret: SecretKey) -> PublicKey {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(public, secret);
        public
    }

    /// Parses one WIF key per line. Blank lines and `#` comments are skipped.
    pub fn from_wif_lines(contents: &str) -> Result<Self> {
        let store = Self::new();
        for (n, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let key = PrivateKey::from_wif(line)
                .with_context(|| format!("invalid WIF key on line {}", n + 1))?;
            store.insert_private(key);
        }
        log::info!("[KEYS] loaded {} keys", store.len());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for InMemoryKeyStore {
    fn secret_key(&self, public: &PublicKey) -> Option<SecretKey> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(public)
            .copied()
    }
}
