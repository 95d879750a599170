//! Per-agent bearer tokens.

use base64::Engine;
use hearth_proto::AgentToken;
use hearth_store::Tree;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{Error, Result};

const TOKEN_BYTES: usize = 32;

/// Per-agent token CRUD over the `agent_tokens` tree.
pub struct TokenStore {
    tree: Tree<AgentToken>,
}

impl TokenStore {
    /// Open the store over its tree.
    pub fn new(tree: Tree<AgentToken>) -> Self {
        Self { tree }
    }

    /// Mint a token for `server_id`. The plaintext is returned exactly
    /// once here, for the caller to print to stdout and never log again;
    /// only its SHA-256 hash is stored.
    pub fn create(&self, server_id: Uuid) -> Result<(AgentToken, String)> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let token = AgentToken {
            id: Uuid::new_v4(),
            server_id,
            token_hash: hash_token(&plaintext),
            created_at: chrono::Utc::now(),
            revoked_at: None,
        };
        self.tree.put(token.id.as_bytes(), &token)?;
        Ok((token, plaintext))
    }

    /// Every minted token, oldest first. Never returns plaintext.
    pub fn list(&self) -> Result<Vec<AgentToken>> {
        let mut tokens = self.tree.scan()?;
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    /// Revoke a token by id; idempotent beyond the first call.
    pub fn revoke(&self, id: Uuid) -> Result<()> {
        let mut token = self.tree.get(id.as_bytes())?.ok_or_else(|| Error::NotFound(format!("agent token {id}")))?;
        token.revoked_at = Some(chrono::Utc::now());
        self.tree.put(token.id.as_bytes(), &token)?;
        Ok(())
    }

    /// Whether `candidate` matches an active token minted for `server_id`,
    /// compared constant-time against each stored hash.
    pub fn verify(&self, server_id: Uuid, candidate: &str) -> Result<bool> {
        let candidate_hash = hash_token(candidate);
        let matches = self.tree.scan()?.into_iter().any(|t| {
            t.server_id == server_id && t.is_active() && bool::from(t.token_hash.as_bytes().ct_eq(candidate_hash.as_bytes()))
        });
        Ok(matches)
    }
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_store::Store;

    fn store() -> TokenStore {
        let store = Store::temporary(&[]).unwrap();
        TokenStore::new(store.tree("agent_tokens").unwrap())
    }

    #[test]
    fn created_token_verifies_and_never_stores_plaintext() {
        let tokens = store();
        let server_id = Uuid::new_v4();
        let (token, plaintext) = tokens.create(server_id).unwrap();
        assert_ne!(token.token_hash, plaintext);
        assert!(tokens.verify(server_id, &plaintext).unwrap());
        assert!(!tokens.verify(server_id, "wrong-token").unwrap());
    }

    #[test]
    fn revoked_token_no_longer_verifies() {
        let tokens = store();
        let server_id = Uuid::new_v4();
        let (token, plaintext) = tokens.create(server_id).unwrap();
        tokens.revoke(token.id).unwrap();
        assert!(!tokens.verify(server_id, &plaintext).unwrap());
    }

    #[test]
    fn token_does_not_verify_for_a_different_server() {
        let tokens = store();
        let (_, plaintext) = tokens.create(Uuid::new_v4()).unwrap();
        assert!(!tokens.verify(Uuid::new_v4(), &plaintext).unwrap());
    }
}
