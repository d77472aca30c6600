//! Identity of whoever is driving a saga operation.

use common::UserId;
use domain::{Contact, Order};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated caller.
///
/// `bearer_token` is the caller's own credential, forwarded to collaborators
/// that act on the caller's behalf (the cart).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
    pub contact: Contact,
    pub bearer_token: String,
}

impl Caller {
    pub fn new(user_id: impl Into<UserId>, role: Role, bearer_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            contact: Contact::default(),
            bearer_token: bearer_token.into(),
        }
    }

    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contact = contact;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Users see their own orders; admins see all of them.
    pub fn can_access(&self, order: &Order) -> bool {
        self.is_admin() || order.is_owned_by(&self.user_id)
    }
}
