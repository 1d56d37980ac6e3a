use axum::{extract::FromRequestParts, http::request::Parts};
use mongodb::bson::oid::ObjectId;
use schema::UserRole;

use crate::error::Error;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Identity forwarded by the authentication layer in front of the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: ObjectId,
    pub role: UserRole,
}

impl Caller {
    pub fn is_student(&self) -> bool {
        self.role == UserRole::Student
    }

    /// Students may only act on their own sessions.
    pub fn may_manage(&self, owner: ObjectId) -> bool {
        !self.is_student() || self.user_id == owner
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .and_then(|id| ObjectId::parse_str(id).ok())
            .ok_or(Error::Unauthorized)?;
        let role = header(USER_ROLE_HEADER)
            .and_then(|role| role.parse().ok())
            .ok_or(Error::Unauthorized)?;

        Ok(Caller { user_id, role })
    }
}
