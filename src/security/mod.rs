//! Security utilities for memory protection and secure handling
//!
//! This module provides:
//! - Memory zeroization to securely erase key material and passphrases
//! - Process hardening (core dumps off)

pub mod mlock;
pub mod zeroize;

pub use mlock::{can_lock_memory, setup_memory_protection};
pub use zeroize::{SecureBytes, SecureString};
