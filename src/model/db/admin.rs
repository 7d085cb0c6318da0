use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::model::api::admin::AdminCredentials;
use crate::store::{BallotStore, Result};

/// An administrator account. The password is only ever stored hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub username: String,
    pub password_hash: String,
}

impl Admin {
    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // A malformed hash can only come from tampering with the store; treat it as a mismatch.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }
}

/// Ensure that at least one admin exists, creating one from `credentials` if not.
///
/// This operation is idempotent.
pub async fn ensure_admin_exists(
    store: &dyn BallotStore,
    credentials: AdminCredentials,
) -> Result<()> {
    if !store.admins().await?.is_empty() {
        return Ok(());
    }

    let username = credentials.username.clone();
    match Admin::try_from(credentials) {
        Ok(admin) => {
            store.insert_admin(admin).await?;
            info!("No admins found; created default admin {username}");
        }
        Err(()) => error!("Default admin credentials are unacceptable; no admin created"),
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::MemoryStore;

    #[test]
    fn password_verification() {
        let admin = Admin::example();
        assert!(admin.verify_password(AdminCredentials::example1().password));
        assert!(!admin.verify_password("not the password"));
        assert!(!admin.verify_password(""));
    }

    #[rocket::async_test]
    async fn default_admin_is_created_once() {
        let store = MemoryStore::new();

        ensure_admin_exists(&store, AdminCredentials::example1())
            .await
            .unwrap();
        ensure_admin_exists(&store, AdminCredentials::example2())
            .await
            .unwrap();

        let admins = store.admins().await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].username, AdminCredentials::example1().username);
    }

    #[rocket::async_test]
    async fn unacceptable_default_admin_is_skipped() {
        let store = MemoryStore::new();
        ensure_admin_exists(&store, AdminCredentials::empty())
            .await
            .unwrap();
        assert!(store.admins().await.unwrap().is_empty());
    }
}
