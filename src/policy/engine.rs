//! Rule engine
//!
//! Runs every rule matching a request, in configuration order, while the
//! request's public key is locked. Each rule sees the state it left for
//! that (action, key) pair last time. State is persisted after an `Approved`
//! or `Denied` outcome and discarded otherwise.

use super::{
    Action, Decision, PolicyState, RequestContext, RequestData, Rule, WasmLimits, WasmRuntime,
};
use crate::checker::Credentials;
use crate::config::Config;
use crate::errors::{Result, StakeSignError};
use crate::locker::{KeyLockGuard, KeyLocker};
use crate::storage::StateStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RuleEngine {
    rules: Vec<Rule>,
    store: Arc<dyn StateStore>,
    locker: Arc<KeyLocker>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>, store: Arc<dyn StateStore>, locker: Arc<KeyLocker>) -> Self {
        Self {
            rules,
            store,
            locker,
        }
    }

    /// Compile the rules listed in the configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn StateStore>,
        locker: Arc<KeyLocker>,
    ) -> Result<Self> {
        let runtime = WasmRuntime::new(WasmLimits {
            max_fuel: config.ruler.max_fuel,
            max_memory_bytes: config.ruler.max_memory_bytes,
        })?;

        let mut rules = Vec::with_capacity(config.ruler.rules.len());
        for rule in &config.ruler.rules {
            let action: Action = rule.request.parse().map_err(|_| {
                StakeSignError::ConfigError(format!(
                    "rule {}: unknown request type {:?}",
                    rule.name, rule.request
                ))
            })?;
            let script = runtime.load(&rule.name, &config.script_path(rule))?;
            rules.push(Rule::new(
                rule.name.clone(),
                action,
                rule.account.as_deref(),
                Arc::new(script),
            )?);
            info!(rule = %rule.name, action = %action, "Loaded rule");
        }

        Ok(Self::new(rules, store, locker))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn locker(&self) -> &Arc<KeyLocker> {
        &self.locker
    }

    /// Rules applying to `action` on `account_path`, in configuration order
    pub fn match_rules(&self, action: Action, account_path: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(action, account_path))
            .collect()
    }

    /// Evaluate a request, taking the key lock for its duration
    pub fn run_rules(
        &self,
        wallet: &str,
        account: &str,
        public_key: &[u8],
        request: &RequestData,
        credentials: &Credentials,
    ) -> Decision {
        let guard = self.locker.lock(public_key);
        self.run_rules_locked(&guard, wallet, account, public_key, request, credentials)
    }

    /// Evaluate a request under a key lock the caller already holds
    pub fn run_rules_locked(
        &self,
        guard: &KeyLockGuard,
        wallet: &str,
        account: &str,
        public_key: &[u8],
        request: &RequestData,
        credentials: &Credentials,
    ) -> Decision {
        if guard.key() != public_key {
            warn!(
                held = %hex::encode(guard.key()),
                requested = %hex::encode(public_key),
                "Key lock does not cover the request"
            );
            return Decision::Failed;
        }

        let action = request.action();
        let account_path = format!("{}/{}", wallet, account);
        let rules = self.match_rules(action, &account_path);
        if rules.is_empty() {
            debug!(account = %account_path, action = %action, "No rules match");
            return Decision::Approved;
        }

        let state_key = state_key(action, public_key);
        let mut state = match self.load_state(&state_key) {
            Ok(state) => state,
            Err(e) => {
                warn!(account = %account_path, "Failed to load rule state: {}", e);
                return Decision::Failed;
            }
        };

        let context = RequestContext::new(
            &account_path,
            public_key,
            credentials,
            chrono::Utc::now().timestamp(),
            request,
        );

        for rule in rules {
            let mut working = state.clone();
            let outcome = match rule.evaluate(&context, &mut working) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(rule = rule.name(), account = %account_path, "Rule failed: {}", e);
                    return Decision::Failed;
                }
            };
            for message in &outcome.messages {
                info!(rule = rule.name(), "{}", message);
            }

            match outcome.decision {
                Decision::Approved | Decision::Denied => {
                    state = working;
                    if let Err(e) = self.save_state(&state_key, &state) {
                        warn!(rule = rule.name(), "Failed to store rule state: {}", e);
                        return Decision::Failed;
                    }
                    if outcome.decision == Decision::Denied {
                        debug!(rule = rule.name(), account = %account_path, "Rule denied request");
                        return Decision::Denied;
                    }
                }
                other => {
                    warn!(
                        rule = rule.name(),
                        account = %account_path,
                        decision = other.as_str(),
                        "Rule returned no usable decision"
                    );
                    return Decision::Failed;
                }
            }
        }

        Decision::Approved
    }

    fn load_state(&self, key: &str) -> Result<PolicyState> {
        match self.store.fetch(key.as_bytes()) {
            Ok(data) => PolicyState::decode(&data),
            Err(StakeSignError::NotFound(_)) => Ok(PolicyState::new()),
            Err(e) => Err(e),
        }
    }

    fn save_state(&self, key: &str, state: &PolicyState) -> Result<()> {
        self.store.store(key.as_bytes(), &state.encode()?)
    }
}

/// Storage key of the state shared by every rule for (action, key)
pub fn state_key(action: Action, public_key: &[u8]) -> String {
    format!("{}-{}", action.as_str(), hex::encode(public_key))
}
