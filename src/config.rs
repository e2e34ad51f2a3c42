use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::proxy::{EndpointHandle, ProxyEndpoint};

/// One configured endpoint; `kind` says which protocol the proxy speaks upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointConfig {
    Pop3(ProxyEndpoint),
    Smtp(ProxyEndpoint),
}

impl EndpointConfig {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        match self {
            EndpointConfig::Pop3(e) | EndpointConfig::Smtp(e) => e,
        }
    }

    fn endpoint_mut(&mut self) -> &mut ProxyEndpoint {
        match self {
            EndpointConfig::Pop3(e) | EndpointConfig::Smtp(e) => e,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            EndpointConfig::Pop3(_) => "pop3",
            EndpointConfig::Smtp(_) => "smtp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub address: String,
    /// Name of a `pop3` endpoint.
    pub pop3: String,
    /// Name of an `smtp` endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
    #[serde(default)]
    pub mailboxes: Vec<MailboxConfig>,
}

/// A mailbox with its endpoint names replaced by live shared handles.
#[derive(Debug, Clone)]
pub struct ResolvedMailbox {
    pub address: String,
    pub pop3: EndpointHandle,
    pub smtp: Option<EndpointHandle>,
    pub signature: Option<String>,
}

impl Config {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, entry) in &self.endpoints {
            url::Url::parse(&entry.endpoint().proxy_url).map_err(|e| {
                Error::Config(format!("endpoint {name}: invalid proxy_url: {e}"))
            })?;
        }
        for mailbox in &self.mailboxes {
            self.lookup(&mailbox.address, &mailbox.pop3, "pop3")?;
            if let Some(smtp) = &mailbox.smtp {
                self.lookup(&mailbox.address, smtp, "smtp")?;
            }
        }
        Ok(())
    }

    fn lookup(&self, address: &str, name: &str, kind: &str) -> Result<&EndpointConfig> {
        let entry = self.endpoints.get(name).ok_or_else(|| {
            Error::Config(format!("mailbox {address}: no endpoint named {name:?}"))
        })?;
        if entry.kind() != kind {
            return Err(Error::Config(format!(
                "mailbox {address}: endpoint {name:?} is {}, expected {kind}",
                entry.kind()
            )));
        }
        Ok(entry)
    }

    /// Fails unless `name` is one of the configured endpoints.
    pub fn require_endpoint(&self, name: &str) -> Result<()> {
        if self.endpoints.contains_key(name) {
            Ok(())
        } else {
            Err(Error::Config(format!("no endpoint named {name:?}")))
        }
    }

    /// Fills every endpoint lacking a proxy password from `load`, keyed by endpoint name.
    pub fn fill_proxy_passwords<F>(&mut self, mut load: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<Option<String>>,
    {
        for (name, entry) in &mut self.endpoints {
            let endpoint = entry.endpoint_mut();
            if endpoint.proxy_password.is_none() {
                endpoint.proxy_password = load(name)?;
            }
        }
        Ok(())
    }

    /// Builds one handle per endpoint name; mailboxes naming the same endpoint share it.
    pub fn resolve(&self) -> Result<Vec<ResolvedMailbox>> {
        self.validate()?;
        let handles: BTreeMap<&str, EndpointHandle> = self
            .endpoints
            .iter()
            .map(|(name, entry)| (name.as_str(), EndpointHandle::new(entry.endpoint().clone())))
            .collect();

        self.mailboxes
            .iter()
            .map(|mailbox| {
                let handle = |name: &str| {
                    handles
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::Config(format!("no endpoint named {name:?}")))
                };
                Ok(ResolvedMailbox {
                    address: mailbox.address.clone(),
                    pop3: handle(&mailbox.pop3)?,
                    smtp: mailbox.smtp.as_deref().map(handle).transpose()?,
                    signature: mailbox.signature.clone(),
                })
            })
            .collect()
    }

    fn template() -> Self {
        let endpoint = ProxyEndpoint {
            proxy_url: "https://proxy.example.com/mail".to_string(),
            proxy_username: Some("proxy-user".to_string()),
            proxy_password: None,
            server_url: "pop3s://pop.example.com:995".to_string(),
            server_username: "you@example.com".to_string(),
            server_password: None,
        };
        let smtp = ProxyEndpoint {
            server_url: "smtps://smtp.example.com:465".to_string(),
            ..endpoint.clone()
        };
        Self {
            timeout_secs: Some(60),
            endpoints: BTreeMap::from([
                ("example-pop3".to_string(), EndpointConfig::Pop3(endpoint)),
                ("example-smtp".to_string(), EndpointConfig::Smtp(smtp)),
            ]),
            mailboxes: vec![MailboxConfig {
                address: "you@example.com".to_string(),
                pop3: "example-pop3".to_string(),
                smtp: Some("example-smtp".to_string()),
                signature: None,
            }],
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| Error::Config("no config dir available".into()))?
        .join("proxy_mail"))
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn parse_config(s: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        // create a template config for users to edit
        save_config(&Config::template(), path)?;
        return Err(Error::Config(format!(
            "created template config at {}, edit it and run again",
            path.display()
        )));
    }
    parse_config(&fs::read_to_string(path)?)
}

pub fn save_config(cfg: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let s = toml::to_string_pretty(cfg).map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, s)?;
    Ok(())
}
