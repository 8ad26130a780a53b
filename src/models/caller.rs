//! The authenticated principal behind a request.

use serde::{Deserialize, Serialize};

/// Supplied by the authentication layer; the core never checks credentials.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}
