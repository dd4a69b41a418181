//! `HubSession`: an authenticated handle wrapping a transport plus the
//! cached current-user id needed for the permission/content-generator
//! grant+revoke dance. Grounded on the core spec's note that global-ish
//! state is threaded through a session wrapper rather than real globals.

use std::sync::Arc;
use tokio::sync::OnceCell;

use super::transport::HubTransport;
use crate::error::HubError;

pub struct HubSession {
    transport: Arc<dyn HubTransport>,
    current_user: OnceCell<String>,
}

impl HubSession {
    pub fn new(transport: Arc<dyn HubTransport>) -> Self {
        HubSession {
            transport,
            current_user: OnceCell::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn HubTransport> {
        &self.transport
    }

    /// Authenticates on first access, then returns the cached user name.
    pub async fn current_user(&self) -> Result<&str, HubError> {
        self.current_user
            .get_or_try_init(|| async { self.transport.login().await })
            .await
            .map(String::as_str)
    }
}
