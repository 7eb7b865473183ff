//! Read-only request context handed to rules

use super::RequestData;
use crate::checker::Credentials;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestValue {
    Number(f64),
    String(String),
}

/// Flat map of request fields.
///
/// Byte fields are lowercase hex without prefix; integers are numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    fields: BTreeMap<String, RequestValue>,
}

impl RequestContext {
    /// Build the context for one evaluation
    pub fn new(
        account_path: &str,
        public_key: &[u8],
        credentials: &Credentials,
        timestamp: i64,
        data: &RequestData,
    ) -> Self {
        let mut ctx = Self::default();
        ctx.set_string("account", account_path);
        ctx.set_string("pubKey", hex::encode(public_key));
        ctx.set_string("client", &credentials.client);
        if let Some(ip) = &credentials.ip {
            ctx.set_string("ip", ip);
        }
        ctx.set_number("timestamp", timestamp as f64);

        match data {
            RequestData::Sign(sign) => {
                ctx.set_string("domain", hex::encode(&sign.domain));
                ctx.set_string("data", hex::encode(&sign.data));
            }
            RequestData::SignBeaconAttestation(att) => {
                ctx.set_string("domain", hex::encode(&att.domain));
                ctx.set_number("slot", att.slot as f64);
                ctx.set_number("committeeIndex", att.committee_index as f64);
                ctx.set_string("beaconBlockRoot", hex::encode(&att.beacon_block_root));
                ctx.set_number("sourceEpoch", att.source.epoch as f64);
                ctx.set_string("sourceRoot", hex::encode(&att.source.root));
                ctx.set_number("targetEpoch", att.target.epoch as f64);
                ctx.set_string("targetRoot", hex::encode(&att.target.root));
            }
            RequestData::SignBeaconProposal(prop) => {
                ctx.set_string("domain", hex::encode(&prop.domain));
                ctx.set_number("slot", prop.slot as f64);
                ctx.set_number("proposerIndex", prop.proposer_index as f64);
                ctx.set_string("parentRoot", hex::encode(&prop.parent_root));
                ctx.set_string("stateRoot", hex::encode(&prop.state_root));
                ctx.set_string("bodyRoot", hex::encode(&prop.body_root));
            }
            RequestData::AccessAccount => {}
        }
        ctx
    }

    fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.fields
            .insert(key.to_string(), RequestValue::String(value.into()));
    }

    fn set_number(&mut self, key: &str, value: f64) {
        self.fields.insert(key.to_string(), RequestValue::Number(value));
    }

    pub fn get(&self, key: &str) -> Option<&RequestValue> {
        self.fields.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key) {
            Some(RequestValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(RequestValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}
