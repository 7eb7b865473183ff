//! API layer for stakesign
//!
//! Provides:
//! - Wire messages and generated gRPC service glue
//! - gRPC service implementations
//! - Caller identification from the transport

pub mod auth;
pub mod grpc;
pub mod messages;

/// Generated server glue for the `stakesign.v1` services
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/stakesign.v1.Signer.rs"));
    include!(concat!(env!("OUT_DIR"), "/stakesign.v1.Lister.rs"));
    include!(concat!(env!("OUT_DIR"), "/stakesign.v1.AccountManager.rs"));
}

pub use grpc::{AccountManagerService, AppState, ListerService, SignerService};
