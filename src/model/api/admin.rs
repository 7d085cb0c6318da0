use argon2::Config;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::db::admin::Admin;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Raw admin credentials, received from a user. These are never stored directly,
/// since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl TryFrom<AdminCredentials> for Admin {
    type Error = ();

    /// Convert [`AdminCredentials`] to a new [`Admin`] by hashing the password.
    /// This enforces that the username is non-empty, and the password meets minimum length.
    fn try_from(cred: AdminCredentials) -> Result<Self, Self::Error> {
        if cred.username.is_empty() || cred.password.len() < MIN_PASSWORD_LENGTH {
            return Err(());
        }

        // 16 bytes of salt is the recommended minimum for argon2.
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let password_hash = argon2::hash_encoded(cred.password.as_bytes(), &salt, &Config::default())
            .map_err(|_| ())?;
        Ok(Self {
            username: cred.username,
            password_hash,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_hashed() {
        let admin = Admin::try_from(AdminCredentials::example1()).unwrap();
        assert_eq!(admin.username, AdminCredentials::example1().username);
        assert_ne!(admin.password_hash, AdminCredentials::example1().password);
        assert!(admin.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn short_password_is_rejected() {
        let credentials = AdminCredentials {
            username: "carol".into(),
            password: "short".into(),
        };
        assert!(Admin::try_from(credentials).is_err());
        assert!(Admin::try_from(AdminCredentials::empty()).is_err());
    }
}
