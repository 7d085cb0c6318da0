use std::fmt::Display;

use chrono::Duration;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::config::Config;
use crate::model::db::{admin::Admin, voter::Voter};

/// A user of our application, having defined rights.
pub trait User {
    /// The rights of this user type.
    const RIGHTS: Rights;
    /// Get the user's unique ID.
    fn id(&self) -> String;
    /// How long a freshly issued token for this user type stays valid.
    fn token_ttl(config: &Config) -> Duration;
}

/// Different privilege levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;

    fn id(&self) -> String {
        self.voter_id.clone()
    }

    /// A voter token lives as long as the claim it was issued for can.
    fn token_ttl(config: &Config) -> Duration {
        config.session_window() + config.claim_grace()
    }
}

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;

    fn id(&self) -> String {
        self.username.clone()
    }

    fn token_ttl(config: &Config) -> Duration {
        config.auth_ttl()
    }
}
