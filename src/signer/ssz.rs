//! Signing roots
//!
//! SSZ hash tree roots of the beacon chain containers that are signed, and
//! the `SigningData` wrapper that mixes in the 32-byte domain.

use crate::errors::{Result, StakeSignError};
use crate::policy::{Checkpoint, SignBeaconAttestationData, SignBeaconProposalData};
use sha2::{Digest, Sha256};

pub type Root = [u8; 32];

fn hash_pair(left: &Root, right: &Root) -> Root {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn uint64_leaf(value: u64) -> Root {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&value.to_le_bytes());
    leaf
}

fn bytes32(value: &[u8], field: &str) -> Result<Root> {
    value.try_into().map_err(|_| {
        StakeSignError::InvalidRequest(format!(
            "{} must be 32 bytes, got {}",
            field,
            value.len()
        ))
    })
}

/// Merkle root of `chunks`, padded with zero chunks to a power of two
fn merkleize(chunks: &[Root]) -> Root {
    let width = chunks.len().max(1).next_power_of_two();
    let mut layer = chunks.to_vec();
    layer.resize(width, [0u8; 32]);
    while layer.len() > 1 {
        layer = layer
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    layer[0]
}

pub fn checkpoint_root(checkpoint: &Checkpoint) -> Result<Root> {
    Ok(merkleize(&[
        uint64_leaf(checkpoint.epoch),
        bytes32(&checkpoint.root, "checkpoint root")?,
    ]))
}

/// Root of `AttestationData`
pub fn attestation_data_root(data: &SignBeaconAttestationData) -> Result<Root> {
    Ok(merkleize(&[
        uint64_leaf(data.slot),
        uint64_leaf(data.committee_index),
        bytes32(&data.beacon_block_root, "beacon block root")?,
        checkpoint_root(&data.source)?,
        checkpoint_root(&data.target)?,
    ]))
}

/// Root of `BeaconBlockHeader`
pub fn beacon_block_header_root(data: &SignBeaconProposalData) -> Result<Root> {
    Ok(merkleize(&[
        uint64_leaf(data.slot),
        uint64_leaf(data.proposer_index),
        bytes32(&data.parent_root, "parent root")?,
        bytes32(&data.state_root, "state root")?,
        bytes32(&data.body_root, "body root")?,
    ]))
}

/// Root of `SigningData { object_root, domain }`
pub fn signing_root(object_root: &[u8], domain: &[u8]) -> Result<Root> {
    Ok(merkleize(&[
        bytes32(object_root, "object root")?,
        bytes32(domain, "domain")?,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_root(s: &str) -> Root {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn test_zero_checkpoint() {
        let root = checkpoint_root(&Checkpoint {
            epoch: 0,
            root: vec![0; 32],
        })
        .unwrap();
        assert_eq!(
            root,
            hex_root("f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a92759fb4b")
        );
    }

    #[test]
    fn test_attestation_data_root() {
        let data = SignBeaconAttestationData {
            domain: vec![0x0d; 32],
            slot: 100,
            committee_index: 3,
            beacon_block_root: vec![0x01; 32],
            source: Checkpoint {
                epoch: 2,
                root: vec![0x02; 32],
            },
            target: Checkpoint {
                epoch: 3,
                root: vec![0x03; 32],
            },
        };
        let root = attestation_data_root(&data).unwrap();
        assert_eq!(
            root,
            hex_root("e8ab26912578312506708e495b6603863738fe1689d231e4f0fe6c8a0da581e8")
        );
        assert_eq!(
            signing_root(&root, &data.domain).unwrap(),
            hex_root("5e068931c3bc2db1dfa4bb1030b101449d00f10a2e4411bf3be49ab8037de7bd")
        );
    }

    #[test]
    fn test_beacon_block_header_root() {
        let data = SignBeaconProposalData {
            domain: vec![0; 32],
            slot: 7,
            proposer_index: 42,
            parent_root: vec![0x0a; 32],
            state_root: vec![0x0b; 32],
            body_root: vec![0x0c; 32],
        };
        assert_eq!(
            beacon_block_header_root(&data).unwrap(),
            hex_root("6d050d68f694ebf64219c44cffb85e3fdeab7f00a2048aa266e9e08eae4bc087")
        );
    }

    #[test]
    fn test_wrong_sizes() {
        assert!(signing_root(&[0; 31], &[0; 32]).is_err());
        assert!(signing_root(&[0; 32], &[0; 33]).is_err());
        let data = SignBeaconProposalData {
            body_root: vec![],
            ..Default::default()
        };
        match beacon_block_header_root(&data) {
            Err(StakeSignError::InvalidRequest(msg)) => assert!(msg.contains("parent root")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
