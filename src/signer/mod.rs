//! Signing services
//!
//! This module ties key management, access control and policy enforcement
//! together behind the operations exposed over gRPC.

pub mod service;
pub mod ssz;

pub use service::{
    AccountId, ListedAccount, ResponseState, SignOutcome, SigningService, OPERATION_LOCK,
    OPERATION_UNLOCK,
};
