use crate::gateway::{Identity, UserId};

/// Who is signed in, as far as the diary is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Identity>,
    pub auth_loading: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::loading()
    }
}

impl Session {
    pub fn loading() -> Self {
        Session {
            identity: None,
            auth_loading: true,
        }
    }

    pub fn signed_in(identity: Identity) -> Self {
        Session {
            identity: Some(identity),
            auth_loading: false,
        }
    }

    pub fn signed_out() -> Self {
        Session {
            identity: None,
            auth_loading: false,
        }
    }

    /// Requests may only be issued once identity is resolved and present.
    pub fn is_ready(&self) -> bool {
        !self.auth_loading && self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.identity.as_ref().map(|identity| &identity.user_id)
    }

    pub fn ready_identity(&self) -> Option<&Identity> {
        if self.auth_loading {
            None
        } else {
            self.identity.as_ref()
        }
    }
}
