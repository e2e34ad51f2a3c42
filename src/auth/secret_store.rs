use keyring::{Entry, Error as KeyringError};

use crate::error::{Error, Result};

const SERVICE: &str = "proxy_mail";

fn entry(endpoint_name: &str) -> Result<Entry> {
    Entry::new(SERVICE, endpoint_name).map_err(|e| Error::Secret(e.to_string()))
}

/// Save the proxy password of a configured endpoint into the OS keyring
pub fn save_proxy_password(endpoint_name: &str, password: &str) -> Result<()> {
    entry(endpoint_name)?
        .set_password(password)
        .map_err(|e| Error::Secret(e.to_string()))
}

/// Load the proxy password of a configured endpoint, if one was stored
pub fn load_proxy_password(endpoint_name: &str) -> Result<Option<String>> {
    match entry(endpoint_name)?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(Error::Secret(e.to_string())),
    }
}
