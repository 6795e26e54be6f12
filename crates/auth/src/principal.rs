use serde::{Deserialize, Serialize};

use bookwell_core::UserId;

use crate::Role;

/// The authenticated identity performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_operator(&self) -> bool {
        self.role.is_operator()
    }
}
