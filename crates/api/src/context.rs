use stockflow_core::UserId;

/// Caller identity taken from the `X-User-Id` header.
///
/// The header is optional and opaque: it is recorded as `createdBy`, never
/// checked against anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserContext {
    user_id: Option<UserId>,
}

impl UserContext {
    pub fn new(user_id: Option<UserId>) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }
}
