//! stakesign - remote signing authority for validator BLS keys
//!
//! Validator clients ask stakesign to sign attestations, block proposals and
//! generic roots. Before any signature is produced a request must pass an
//! access check for the calling client and every configured policy rule for
//! its action and account. Rules are sandboxed WebAssembly modules with
//! durable per-key state, which is how slashing protection is expressed.

pub mod api;
pub mod checker;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod keystore;
pub mod locker;
pub mod policy;
pub mod security;
pub mod signer;
pub mod storage;
pub mod unlocker;
