//! Wire messages for the `stakesign.v1` services

use crate::policy::{Checkpoint, SignBeaconAttestationData, SignBeaconProposalData};
use crate::signer::{self, AccountId, ListedAccount, SignOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ResponseState {
    Unknown = 0,
    Succeeded = 1,
    Denied = 2,
    Failed = 3,
}

impl From<signer::ResponseState> for ResponseState {
    fn from(state: signer::ResponseState) -> Self {
        match state {
            signer::ResponseState::Unknown => ResponseState::Unknown,
            signer::ResponseState::Succeeded => ResponseState::Succeeded,
            signer::ResponseState::Denied => ResponseState::Denied,
            signer::ResponseState::Failed => ResponseState::Failed,
        }
    }
}

pub mod account_id {
    /// Account named by path or by public key
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Id {
        #[prost(string, tag = "1")]
        Account(String),
        #[prost(bytes, tag = "2")]
        PublicKey(Vec<u8>),
    }
}

/// Missing identifiers resolve to nothing and are denied downstream
pub fn account_id(id: Option<account_id::Id>) -> AccountId {
    match id {
        Some(account_id::Id::Account(name)) => AccountId::Name(name),
        Some(account_id::Id::PublicKey(key)) => AccountId::PublicKey(key),
        None => AccountId::Name(String::new()),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignRequest {
    #[prost(oneof = "account_id::Id", tags = "1, 2")]
    pub id: Option<account_id::Id>,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub domain: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckpointMessage {
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub root: Vec<u8>,
}

impl From<CheckpointMessage> for Checkpoint {
    fn from(msg: CheckpointMessage) -> Self {
        Checkpoint {
            epoch: msg.epoch,
            root: msg.root,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AttestationData {
    #[prost(uint64, tag = "1")]
    pub slot: u64,
    #[prost(uint64, tag = "2")]
    pub committee_index: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub beacon_block_root: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub source: Option<CheckpointMessage>,
    #[prost(message, optional, tag = "5")]
    pub target: Option<CheckpointMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignBeaconAttestationRequest {
    #[prost(oneof = "account_id::Id", tags = "1, 2")]
    pub id: Option<account_id::Id>,
    #[prost(message, optional, tag = "3")]
    pub data: Option<AttestationData>,
    #[prost(bytes = "vec", tag = "4")]
    pub domain: Vec<u8>,
}

impl SignBeaconAttestationRequest {
    /// Payload for the signer; `None` when the attestation or a checkpoint is absent
    pub fn payload(&self) -> Option<SignBeaconAttestationData> {
        let data = self.data.clone()?;
        Some(SignBeaconAttestationData {
            domain: self.domain.clone(),
            slot: data.slot,
            committee_index: data.committee_index,
            beacon_block_root: data.beacon_block_root,
            source: data.source?.into(),
            target: data.target?.into(),
        })
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BeaconBlockHeader {
    #[prost(uint64, tag = "1")]
    pub slot: u64,
    #[prost(uint64, tag = "2")]
    pub proposer_index: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub parent_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub state_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub body_root: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignBeaconProposalRequest {
    #[prost(oneof = "account_id::Id", tags = "1, 2")]
    pub id: Option<account_id::Id>,
    #[prost(message, optional, tag = "3")]
    pub data: Option<BeaconBlockHeader>,
    #[prost(bytes = "vec", tag = "4")]
    pub domain: Vec<u8>,
}

impl SignBeaconProposalRequest {
    pub fn payload(&self) -> Option<SignBeaconProposalData> {
        let data = self.data.clone()?;
        Some(SignBeaconProposalData {
            domain: self.domain.clone(),
            slot: data.slot,
            proposer_index: data.proposer_index,
            parent_root: data.parent_root,
            state_root: data.state_root,
            body_root: data.body_root,
        })
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignResponse {
    #[prost(enumeration = "ResponseState", tag = "1")]
    pub state: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

impl From<SignOutcome> for SignResponse {
    fn from(outcome: SignOutcome) -> Self {
        SignResponse {
            state: ResponseState::from(outcome.state) as i32,
            signature: outcome.signature.unwrap_or_default(),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListAccountsRequest {
    #[prost(string, repeated, tag = "1")]
    pub paths: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Account {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
}

impl From<ListedAccount> for Account {
    fn from(account: ListedAccount) -> Self {
        Account {
            name: account.name,
            public_key: account.public_key,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListAccountsResponse {
    #[prost(enumeration = "ResponseState", tag = "1")]
    pub state: i32,
    #[prost(message, repeated, tag = "2")]
    pub accounts: Vec<Account>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LockAccountRequest {
    #[prost(string, tag = "1")]
    pub account: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UnlockAccountRequest {
    #[prost(string, tag = "1")]
    pub account: String,
    #[prost(string, tag = "2")]
    pub passphrase: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountManagerResponse {
    #[prost(enumeration = "ResponseState", tag = "1")]
    pub state: i32,
}
