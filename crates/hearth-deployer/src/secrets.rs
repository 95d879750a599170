//! Secret value generation and at-rest encryption.
//!
//! Secret material lives behind `secrecy::Secret` and is wiped with
//! `zeroize` once it has been encrypted into a [`hearth_proto::SecretBlob`].
//! Generated values themselves are plain JSON once at rest (callers decrypt
//! the whole blob, not individual fields), so the `secrecy` wrapper here
//! only protects the brief window between generation and encryption.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::Utc;
use hearth_proto::{ConfigField, Manifest, SecretBlob};
use hearth_store::Tree;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const PASSWORD_LEN: usize = 32;
const GENERIC_SECRET_LEN: usize = 16;
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Fill every `generated && secret` field of `manifest`'s config schema with
/// a freshly generated value, leaving already-supplied `user_config` values
/// (if any) untouched.
pub fn generate_secret_values(
    manifest: &Manifest,
    app_name: &str,
    user_config: &mut HashMap<String, serde_json::Value>,
) {
    for field in manifest.generated_secret_fields() {
        if user_config.contains_key(&field.name) {
            continue;
        }
        let value = generate_value_for(field, app_name);
        user_config.insert(field.name.clone(), value);
    }
}

fn generate_value_for(field: &ConfigField, app_name: &str) -> serde_json::Value {
    let name = field.name.to_lowercase();
    if name.contains("user") && !name.contains("password") {
        serde_json::Value::String(generate_username(app_name))
    } else if name.contains("password") || name.contains("secret") && name.contains("pass") {
        serde_json::Value::String(random_password(PASSWORD_LEN))
    } else {
        serde_json::Value::String(random_password(GENERIC_SECRET_LEN))
    }
}

fn random_password(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = Secret::new((0..len).map(|_| *PASSWORD_ALPHABET.choose(&mut rng).unwrap() as char).collect::<String>());
    let result = out.expose_secret().clone();
    out.zeroize();
    result
}

fn generate_username(app_name: &str) -> String {
    let stem: String = app_name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let mut suffix = [0u8; 4];
    OsRng.fill_bytes(&mut suffix);
    let digits: String = suffix.iter().map(|b| char::from(b'0' + (b % 10))).collect();
    format!("{}-{digits}", stem.to_lowercase())
}

/// At-rest store for [`SecretBlob`] rows, keyed by deployment id.
///
/// Every deployment's generated config values are serialized to JSON, then
/// sealed with AES-256-GCM under a single fleet-wide key supplied at
/// startup. The key itself is never persisted by this crate.
pub struct SecretStore {
    tree: Tree<SecretBlob>,
    cipher: Aes256Gcm,
}

impl SecretStore {
    /// Open the secret store's tree, sealing with `key` (32 bytes).
    pub fn new(tree: Tree<SecretBlob>, key: &Secret<[u8; 32]>) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.expose_secret()));
        Self { tree, cipher }
    }

    /// Encrypt and store `values` for `deployment_id`. Overwrites any prior
    /// blob (used both for initial creation and for rotation).
    pub fn put(&self, deployment_id: Uuid, values: &HashMap<String, serde_json::Value>, rotating: bool) -> Result<()> {
        let plaintext = serde_json::to_vec(values).map_err(|e| Error::Crypto(e.to_string()))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let mut sealed = nonce_bytes.to_vec();
        sealed.append(&mut ciphertext);

        let now = Utc::now();
        let existing = self.tree.get(deployment_id.as_bytes())?;
        let blob = SecretBlob {
            deployment_id,
            ciphertext: sealed,
            created_at: existing.as_ref().map(|b| b.created_at).unwrap_or(now),
            updated_at: now,
            rotated_at: if rotating { Some(now) } else { existing.and_then(|b| b.rotated_at) },
        };
        self.tree.put(deployment_id.as_bytes(), &blob)?;
        Ok(())
    }

    /// Decrypt and return the secret values for `deployment_id`, if any.
    pub fn get(&self, deployment_id: Uuid) -> Result<Option<HashMap<String, serde_json::Value>>> {
        let Some(blob) = self.tree.get(deployment_id.as_bytes())? else {
            return Ok(None);
        };
        if blob.ciphertext.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = blob.ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let values = serde_json::from_slice(&plaintext).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Some(values))
    }

    /// Delete the secret blob for a deployment, if any (uninstall / rollback).
    pub fn remove(&self, deployment_id: Uuid) -> Result<()> {
        self.tree.remove(deployment_id.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::{ConfigFieldType, WebUi};
    use hearth_store::Store;

    fn key() -> Secret<[u8; 32]> {
        Secret::new([7u8; 32])
    }

    fn manifest_with_fields(fields: Vec<ConfigField>) -> Manifest {
        Manifest {
            name: "demo".into(),
            display_name: "Demo".into(),
            version: "1.0".into(),
            category: "utility".into(),
            config_schema: fields,
            provides: vec![],
            requires: vec![],
            conflicts: vec![],
            webui: None::<WebUi>,
            service_user: None,
            service_group: None,
            data_directories: vec![],
            capabilities: vec![],
            logging: None,
            system: false,
            mandatory: false,
            singleton: false,
        }
    }

    #[test]
    fn generates_password_and_username_fields_distinctly() {
        let manifest = manifest_with_fields(vec![
            ConfigField {
                name: "rpc_password".into(),
                label: "RPC password".into(),
                field_type: ConfigFieldType::Password,
                required: false,
                default: None,
                options: vec![],
                generated: true,
                secret: true,
                inherit_from: None,
            },
            ConfigField {
                name: "rpc_user".into(),
                label: "RPC user".into(),
                field_type: ConfigFieldType::String,
                required: false,
                default: None,
                options: vec![],
                generated: true,
                secret: true,
                inherit_from: None,
            },
        ]);
        let mut user_config = HashMap::new();
        generate_secret_values(&manifest, "demo", &mut user_config);
        let password = user_config.get("rpc_password").unwrap().as_str().unwrap();
        let user = user_config.get("rpc_user").unwrap().as_str().unwrap();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(user.starts_with("demo-"));
    }

    #[test]
    fn leaves_already_supplied_values_untouched() {
        let manifest = manifest_with_fields(vec![ConfigField {
            name: "rpc_password".into(),
            label: "RPC password".into(),
            field_type: ConfigFieldType::Password,
            required: false,
            default: None,
            options: vec![],
            generated: true,
            secret: true,
            inherit_from: None,
        }]);
        let mut user_config = HashMap::new();
        user_config.insert("rpc_password".to_string(), serde_json::json!("already-set"));
        generate_secret_values(&manifest, "demo", &mut user_config);
        assert_eq!(user_config.get("rpc_password").unwrap(), "already-set");
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let store = Store::temporary(&[]).unwrap();
        let tree = store.tree("secrets").unwrap();
        let secrets = SecretStore::new(tree, &key());
        let deployment_id = Uuid::new_v4();
        let mut values = HashMap::new();
        values.insert("rpc_password".to_string(), serde_json::json!("s3cr3t"));
        secrets.put(deployment_id, &values, false).unwrap();
        let round_tripped = secrets.get(deployment_id).unwrap().unwrap();
        assert_eq!(round_tripped.get("rpc_password"), values.get("rpc_password"));
    }

    #[test]
    fn missing_blob_returns_none() {
        let store = Store::temporary(&[]).unwrap();
        let tree = store.tree("secrets").unwrap();
        let secrets = SecretStore::new(tree, &key());
        assert!(secrets.get(Uuid::new_v4()).unwrap().is_none());
    }
}
