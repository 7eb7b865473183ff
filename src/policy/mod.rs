//! Policy enforcement
//!
//! This module provides:
//! - Request classification (actions) and typed payloads
//! - Persisted per-(action, public key) rule state
//! - The `PolicyRule` abstraction and a sandboxed WebAssembly implementation
//! - The rule engine that matches, runs and records rules under the key lock

pub mod engine;
pub mod request;
pub mod rules;
pub mod state;
pub mod wasm;

pub use engine::RuleEngine;
pub use request::{RequestContext, RequestValue};
pub use rules::{PolicyRule, Rule, RuleOutcome};
pub use state::{PolicyState, StateValue};
pub use wasm::{WasmLimits, WasmRule, WasmRuntime};

use crate::errors::{Result, StakeSignError};
use std::fmt;
use std::str::FromStr;

/// Category of a request, used to select rules and scope their state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Sign,
    SignBeaconAttestation,
    SignBeaconProposal,
    AccessAccount,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Sign => "Sign",
            Action::SignBeaconAttestation => "Sign beacon attestation",
            Action::SignBeaconProposal => "Sign beacon proposal",
            Action::AccessAccount => "Access account",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = StakeSignError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "sign" => Ok(Action::Sign),
            "signbeaconattestation" => Ok(Action::SignBeaconAttestation),
            "signbeaconproposal" => Ok(Action::SignBeaconProposal),
            "accessaccount" | "listaccounts" | "listaccount" => Ok(Action::AccessAccount),
            _ => Err(StakeSignError::ConfigError(format!("unknown action {:?}", s))),
        }
    }
}

/// Outcome of policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Unknown,
    Approved,
    Denied,
    Failed,
}

impl Decision {
    /// Interpret a verdict string returned by a rule script
    pub fn from_verdict(verdict: &str) -> Self {
        match verdict {
            "Approved" => Decision::Approved,
            "Denied" => Decision::Denied,
            "Error" => Decision::Failed,
            _ => Decision::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Unknown => "unknown",
            Decision::Approved => "approved",
            Decision::Denied => "denied",
            Decision::Failed => "failed",
        }
    }
}

/// Payload of a generic signing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignData {
    pub domain: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub epoch: u64,
    pub root: Vec<u8>,
}

/// Payload of an attestation signing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignBeaconAttestationData {
    pub domain: Vec<u8>,
    pub slot: u64,
    pub committee_index: u64,
    pub beacon_block_root: Vec<u8>,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

/// Payload of a block proposal signing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignBeaconProposalData {
    pub domain: Vec<u8>,
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: Vec<u8>,
    pub state_root: Vec<u8>,
    pub body_root: Vec<u8>,
}

/// Action-specific request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestData {
    Sign(SignData),
    SignBeaconAttestation(SignBeaconAttestationData),
    SignBeaconProposal(SignBeaconProposalData),
    AccessAccount,
}

impl RequestData {
    pub fn action(&self) -> Action {
        match self {
            RequestData::Sign(_) => Action::Sign,
            RequestData::SignBeaconAttestation(_) => Action::SignBeaconAttestation,
            RequestData::SignBeaconProposal(_) => Action::SignBeaconProposal,
            RequestData::AccessAccount => Action::AccessAccount,
        }
    }
}
