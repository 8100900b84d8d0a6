use std::sync::Arc;

use crate::api::User;

/// Read-only view of the session, as seen by the comment section.
///
/// Establishing the session is someone else's job: the gate only reports who
/// is signed in, and asks for a sign-in when a write is attempted anonymously.
pub trait AuthGate {
    fn current_user(&self) -> Option<User>;

    fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    /// Tell the user to sign in and send them to the login entry point
    fn require_login(&self);
}

impl<G: AuthGate + ?Sized> AuthGate for &G {
    fn current_user(&self) -> Option<User> {
        (**self).current_user()
    }

    fn require_login(&self) {
        (**self).require_login()
    }
}

impl<G: AuthGate + ?Sized> AuthGate for Arc<G> {
    fn current_user(&self) -> Option<User> {
        (**self).current_user()
    }

    fn require_login(&self) {
        (**self).require_login()
    }
}

/// Gate over an already-known session
pub struct StaticAuth {
    user: Option<User>,
    on_login_required: Box<dyn Fn() + Send + Sync>,
}

impl StaticAuth {
    pub fn new<F>(user: Option<User>, on_login_required: F) -> StaticAuth
    where
        F: 'static + Fn() + Send + Sync,
    {
        StaticAuth {
            user,
            on_login_required: Box::new(on_login_required),
        }
    }

    pub fn anonymous() -> StaticAuth {
        StaticAuth::new(None, || tracing::info!("please sign in to comment"))
    }
}

impl AuthGate for StaticAuth {
    fn current_user(&self) -> Option<User> {
        self.user.clone()
    }

    fn require_login(&self) {
        (self.on_login_required)()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::api::UserId;

    #[test]
    fn static_auth() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = {
            let calls = calls.clone();
            StaticAuth::new(None, move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(!gate.is_authenticated());
        gate.require_login();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let gate = StaticAuth::new(
            Some(User {
                id: UserId::stub(),
                full_name: String::from("Jane"),
                avatar_url: None,
            }),
            || (),
        );
        assert!(gate.is_authenticated());
        assert!((&gate).is_authenticated());
    }
}
