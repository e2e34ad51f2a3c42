use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::proxy::endpoint::ProxyEndpoint;

pub const PROTOCOL_VERSION: &str = "1.0";

/// Name of the single form field carrying the JSON request.
pub const REQUEST_FIELD: &str = "request";

const STATUS_OK: u16 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestEnvelope<'a> {
    version: &'a str,
    username: Option<&'a str>,
    password: Option<&'a str>,
    server_url: &'a str,
    server_username: &'a str,
    server_password: Option<&'a str>,
    method: &'a str,
    data: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    version: String,
    status: i64,
    data: Value,
}

/// Serializes one call into the JSON text sent as the `request` form field.
pub fn encode_request(endpoint: &ProxyEndpoint, method: &str, data: &Value) -> Result<String> {
    let envelope = RequestEnvelope {
        version: PROTOCOL_VERSION,
        username: endpoint.proxy_username.as_deref(),
        password: endpoint.proxy_password.as_deref(),
        server_url: &endpoint.server_url,
        server_username: &endpoint.server_username,
        server_password: endpoint.server_password.as_deref(),
        method,
        data,
    };
    serde_json::to_string(&envelope)
        .map_err(|e| Error::Protocol(format!("cannot encode request: {e}")))
}

/// Checks the HTTP status and the envelope, returning the method result.
pub fn decode_response(http_status: u16, body: &str) -> Result<Value> {
    if http_status != STATUS_OK {
        return Err(Error::Protocol(format!("HTTP status {http_status}")));
    }

    let envelope: ResponseEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::Protocol(format!("malformed response: {e}")))?;

    if envelope.version != PROTOCOL_VERSION {
        return Err(Error::Protocol(format!(
            "unsupported protocol version {:?}",
            envelope.version
        )));
    }
    if envelope.status != i64::from(STATUS_OK) {
        return Err(Error::Protocol(format!(
            "proxy returned status {}",
            envelope.status
        )));
    }

    Ok(envelope.data)
}
