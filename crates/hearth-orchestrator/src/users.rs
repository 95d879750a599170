//! Operator accounts: a store-backed table the CLI and (eventually) a REST
//! auth layer both read.

use hearth_proto::{User, UserRole};
use hearth_store::Tree;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Operator account CRUD over the `users` tree.
pub struct UserStore {
    tree: Tree<User>,
    bcrypt_cost: u32,
}

impl UserStore {
    /// Open the store over its tree, hashing new passwords at `bcrypt_cost`.
    pub fn new(tree: Tree<User>, bcrypt_cost: u32) -> Self {
        Self { tree, bcrypt_cost }
    }

    /// Create a new operator account. Rejects a duplicate username.
    pub fn create(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        if self.find_by_username(username)?.is_some() {
            return Err(Error::Conflict(format!("user '{username}' already exists")));
        }
        let password_hash = bcrypt::hash(password, self.bcrypt_cost).map_err(|e| Error::Hashing(e.to_string()))?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: chrono::Utc::now(),
        };
        self.tree.put(user.id.as_bytes(), &user)?;
        Ok(user)
    }

    /// Look up an account by its login name.
    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.tree.scan()?.into_iter().find(|u| u.username == username))
    }

    /// Every account, sorted by username.
    pub fn list(&self) -> Result<Vec<User>> {
        let mut users = self.tree.scan()?;
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    /// Verify a login attempt; `None` on unknown user or wrong password.
    pub fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_username(username)? else {
            return Ok(None);
        };
        let ok = bcrypt::verify(password, &user.password_hash).map_err(|e| Error::Hashing(e.to_string()))?;
        Ok(if ok { Some(user) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_store::Store;

    fn store() -> UserStore {
        let store = Store::temporary(&[]).unwrap();
        UserStore::new(store.tree("users").unwrap(), 4)
    }

    #[test]
    fn create_then_verify_round_trips() {
        let users = store();
        let created = users.create("alice", "hunter2", UserRole::Admin).unwrap();
        let verified = users.verify_password("alice", "hunter2").unwrap().unwrap();
        assert_eq!(verified.id, created.id);
        assert!(users.verify_password("alice", "wrong").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let users = store();
        users.create("alice", "hunter2", UserRole::Admin).unwrap();
        assert!(users.create("alice", "other", UserRole::Viewer).is_err());
    }

    #[test]
    fn list_is_sorted_by_username() {
        let users = store();
        users.create("zed", "p", UserRole::Viewer).unwrap();
        users.create("anna", "p", UserRole::Admin).unwrap();
        let names: Vec<_> = users.list().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["anna", "zed"]);
    }
}
