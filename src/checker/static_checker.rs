//! Access control from static configuration

use super::{AccessChecker, Credentials, ALL_OPERATIONS};
use crate::config::CertificateConfig;
use crate::errors::{Result, StakeSignError};
use crate::keystore::split_path;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::debug;

#[derive(Debug)]
struct PathPermission {
    path: String,
    wallet: Regex,
    account: Regex,
    operations: Vec<String>,
}

/// Checker built once from the permissions section of the configuration
#[derive(Debug)]
pub struct StaticChecker {
    access: HashMap<String, Vec<PathPermission>>,
}

impl StaticChecker {
    pub fn new(certificates: &[CertificateConfig]) -> Result<Self> {
        if certificates.is_empty() {
            return Err(config_error("certificate info empty"));
        }

        let mut access = HashMap::with_capacity(certificates.len());
        for certificate in certificates {
            if certificate.name.is_empty() {
                return Err(config_error("certificate info requires a name"));
            }
            if access.contains_key(&certificate.name) {
                return Err(config_error(&format!(
                    "duplicate certificate info for {}",
                    certificate.name
                )));
            }
            if certificate.permissions.is_empty() {
                return Err(config_error(
                    "certificate info requires at least one permission",
                ));
            }

            let mut paths = Vec::with_capacity(certificate.permissions.len());
            for permission in &certificate.permissions {
                let (wallet, account) = split_path(&permission.path).map_err(|_| {
                    config_error(&format!("invalid account path {}", permission.path))
                })?;
                if wallet.is_empty() {
                    return Err(config_error("wallet cannot be blank"));
                }
                let wallet_regex = anchored_regex(wallet)
                    .map_err(|_| config_error(&format!("invalid wallet regex {}", wallet)))?;
                let account_regex = anchored_regex(account)
                    .map_err(|_| config_error(&format!("invalid account regex {}", account)))?;
                paths.push(PathPermission {
                    path: permission.path.clone(),
                    wallet: wallet_regex,
                    account: account_regex,
                    operations: permission.operations.clone(),
                });
            }
            access.insert(certificate.name.clone(), paths);
        }

        Ok(Self { access })
    }

    /// Human-readable summary of every client's permissions
    pub fn describe(&self) -> String {
        let mut clients: Vec<&String> = self.access.keys().collect();
        clients.sort();

        let mut out = String::new();
        for client in clients {
            let _ = writeln!(out, "Permissions for {:?}:", client);
            for permission in &self.access[client] {
                let operations = if permission.operations.is_empty() {
                    "no operations".to_string()
                } else {
                    permission.operations.join(", ")
                };
                let _ = writeln!(
                    out,
                    "  accounts matching {:?} (wallet {} account {}): {}",
                    permission.path,
                    permission.wallet.as_str(),
                    permission.account.as_str(),
                    operations
                );
            }
        }
        out
    }
}

impl AccessChecker for StaticChecker {
    fn check(&self, credentials: &Credentials, account: &str, operation: &str) -> bool {
        if credentials.client.is_empty() {
            debug!("No client certificate name");
            return false;
        }
        let client = credentials.client.as_str();

        let (wallet_name, account_name) = match split_path(account) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(client, account, "Invalid path: {}", e);
                return false;
            }
        };
        if wallet_name.is_empty() {
            debug!(client, account, "Missing wallet name");
            return false;
        }
        if account_name.is_empty() {
            debug!(client, account, "Missing account name");
            return false;
        }

        let Some(paths) = self.access.get(client) else {
            debug!(client, account, "Unknown client");
            return false;
        };

        paths.iter().any(|path| {
            path.wallet.is_match(wallet_name)
                && path.account.is_match(account_name)
                && path
                    .operations
                    .iter()
                    .any(|op| op == ALL_OPERATIONS || op == operation)
        })
    }
}

/// Compile a pattern that must match the whole input; empty matches everything.
///
/// The pattern is wrapped in a group so every alternative is anchored.
pub(crate) fn anchored_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut inner = pattern.strip_prefix('^').unwrap_or(pattern);
    if inner.ends_with('$') && !inner.ends_with("\\$") {
        inner = &inner[..inner.len() - 1];
    }
    Regex::new(&format!("^(?:{})$", inner))
}

fn config_error(msg: &str) -> StakeSignError {
    StakeSignError::ConfigError(msg.to_string())
}
