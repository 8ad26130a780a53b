//! Authorization for mutating operations on a shared object.

use crate::models::{caller::Caller, object::ObjectRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied,
}

/// Admins may delete anything; everyone else only what they own.
pub fn authorize_delete(record: &ObjectRecord, caller: &Caller) -> Authorization {
    if caller.is_admin || record.owner_id == caller.user_id {
        Authorization::Allowed
    } else {
        Authorization::Denied
    }
}
