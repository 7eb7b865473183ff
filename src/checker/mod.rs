//! Access control
//!
//! Decides whether a caller may perform an operation on an account, before
//! any policy rule is consulted.

pub mod static_checker;

pub use static_checker::StaticChecker;

/// Operation name matching every operation
pub const ALL_OPERATIONS: &str = "All";

/// Caller identity as established by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Common name of the client certificate
    pub client: String,

    /// Source address of the connection
    pub ip: Option<String>,
}

impl Credentials {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            ip: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// Access control decision point
pub trait AccessChecker: Send + Sync {
    /// True if `credentials` may perform `operation` on the `wallet/account` path
    fn check(&self, credentials: &Credentials, account: &str, operation: &str) -> bool;
}
