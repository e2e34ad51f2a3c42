use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Proxy location plus the upstream account it should talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub proxy_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_password: Option<String>,
    pub server_url: String,
    pub server_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_password: Option<String>,
}

/// Shared, mutable view of one endpoint.
///
/// Every client built from the same handle sees password updates immediately,
/// so clearing the password after a failed fetch forces a new prompt everywhere.
#[derive(Debug, Clone)]
pub struct EndpointHandle(Arc<RwLock<ProxyEndpoint>>);

impl EndpointHandle {
    pub fn new(endpoint: ProxyEndpoint) -> Self {
        Self(Arc::new(RwLock::new(endpoint)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ProxyEndpoint> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProxyEndpoint> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ProxyEndpoint {
        self.read().clone()
    }

    pub fn server_url(&self) -> String {
        self.read().server_url.clone()
    }

    pub fn has_server_password(&self) -> bool {
        self.read().server_password.is_some()
    }

    pub fn set_server_password(&self, password: String) {
        self.write().server_password = Some(password);
    }

    pub fn clear_server_password(&self) {
        log::debug!("clearing server password for {}", self.read().server_url);
        self.write().server_password = None;
    }

    pub fn set_proxy_password(&self, password: String) {
        self.write().proxy_password = Some(password);
    }

    pub fn same_as(&self, other: &EndpointHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
