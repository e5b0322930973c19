use tokio::sync::watch;
use wellsync_core::UserId;

/// Source of the signed-in user. The engine only talks to the remote store
/// while `current_user` is `Some`.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    /// Receiver notified on every sign-in and sign-out.
    fn subscribe(&self) -> watch::Receiver<Option<UserId>>;
}

/// In-process identity driven by the host's authentication flow.
pub struct SessionIdentity {
    tx: watch::Sender<Option<UserId>>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl SessionIdentity {
    pub fn anonymous() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn signed_in(user: UserId) -> Self {
        let (tx, _rx) = watch::channel(Some(user));
        Self { tx }
    }

    pub fn sign_in(&self, user: UserId) {
        self.set(Some(user));
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    fn set(&self, next: Option<UserId>) {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}
