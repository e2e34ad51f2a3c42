use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::proxy::codec::{self, REQUEST_FIELD};
use crate::proxy::endpoint::EndpointHandle;
use crate::proxy::transport::Transport;

pub const FETCH_NEW_MESSAGES: &str = "fetchNewMessages";
pub const FETCH_OLD_MESSAGES: &str = "fetchOldMessages";
pub const FETCH_MESSAGE_BODY: &str = "fetchMessageBody";

/// Issues RPC calls through the proxy with the endpoint's current credentials.
#[derive(Clone)]
pub struct ProxyClient {
    endpoint: EndpointHandle,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ProxyClient {
    pub fn new(endpoint: EndpointHandle, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    pub fn endpoint(&self) -> &EndpointHandle {
        &self.endpoint
    }

    /// Exactly one round trip. Nothing is cached and nothing is retried.
    pub fn call(&self, method: &str, data: Value) -> Result<Value> {
        let (url, request) = {
            let endpoint = self.endpoint.read();
            (
                endpoint.proxy_url.clone(),
                codec::encode_request(&endpoint, method, &data)?,
            )
        };

        log::debug!("calling {method} via {url}");
        let response = self
            .transport
            .post_form(&url, &[(REQUEST_FIELD, request.as_str())])?;
        codec::decode_response(response.status, &response.body)
    }
}
