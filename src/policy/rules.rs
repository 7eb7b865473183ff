//! Policy rules
//!
//! A rule pairs a selector (action plus account pattern) with the logic that
//! decides on matching requests.

use super::{Action, Decision, PolicyState, RequestContext};
use crate::checker::static_checker::anchored_regex;
use crate::errors::{Result, StakeSignError};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Verdict of one rule plus any messages it emitted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub decision: Decision,
    pub messages: Vec<String>,
}

impl RuleOutcome {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            messages: vec![],
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

/// Decision logic of a rule.
///
/// `state` is a working copy; the engine persists it only when the outcome
/// is `Approved` or `Denied`. An `Err` counts as a failed evaluation.
pub trait PolicyRule: Send + Sync {
    fn evaluate(&self, request: &RequestContext, state: &mut PolicyState) -> Result<RuleOutcome>;
}

/// A configured rule
#[derive(Clone)]
pub struct Rule {
    name: String,
    action: Action,
    account: Regex,
    policy: Arc<dyn PolicyRule>,
}

impl Rule {
    /// Create a rule; an absent or empty account pattern matches every account
    pub fn new(
        name: impl Into<String>,
        action: Action,
        account: Option<&str>,
        policy: Arc<dyn PolicyRule>,
    ) -> Result<Self> {
        let name = name.into();
        let pattern = account.unwrap_or_default();
        let account = anchored_regex(pattern).map_err(|e| {
            StakeSignError::ConfigError(format!(
                "rule {}: invalid account pattern {:?}: {}",
                name, pattern, e
            ))
        })?;
        Ok(Self {
            name,
            action,
            account,
            policy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// True if this rule applies to `action` on the `wallet/account` path
    pub fn matches(&self, action: Action, account_path: &str) -> bool {
        self.action == action && self.account.is_match(account_path)
    }

    pub fn evaluate(
        &self,
        request: &RequestContext,
        state: &mut PolicyState,
    ) -> Result<RuleOutcome> {
        self.policy.evaluate(request, state)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("account", &self.account.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(Decision);

    impl PolicyRule for Always {
        fn evaluate(&self, _: &RequestContext, _: &mut PolicyState) -> Result<RuleOutcome> {
            Ok(RuleOutcome::new(self.0))
        }
    }

    #[test]
    fn test_matching() {
        let policy: Arc<dyn PolicyRule> = Arc::new(Always(Decision::Approved));
        let any = Rule::new("any", Action::Sign, None, policy.clone()).unwrap();
        let validators =
            Rule::new("validators", Action::Sign, Some("Validators/.*"), policy).unwrap();

        assert!(any.matches(Action::Sign, "W/A"));
        assert!(!any.matches(Action::SignBeaconProposal, "W/A"));
        assert!(validators.matches(Action::Sign, "Validators/1"));
        assert!(!validators.matches(Action::Sign, "Other/Validators/1"));
        assert!(!validators.matches(Action::Sign, "W/A"));

        let either = Rule::new(
            "either",
            Action::Sign,
            Some("W/A|W/B"),
            Arc::new(Always(Decision::Approved)),
        )
        .unwrap();
        assert!(either.matches(Action::Sign, "W/A"));
        assert!(either.matches(Action::Sign, "W/B"));
        assert!(!either.matches(Action::Sign, "W/AXYZ"));
        assert!(!either.matches(Action::Sign, "XW/B"));
    }

    #[test]
    fn test_invalid_pattern() {
        let policy: Arc<dyn PolicyRule> = Arc::new(Always(Decision::Approved));
        assert!(matches!(
            Rule::new("bad", Action::Sign, Some("(["), policy),
            Err(StakeSignError::ConfigError(_))
        ));
    }

    #[test]
    fn test_outcome_messages() {
        let outcome = RuleOutcome::new(Decision::Denied).with_message("slashable");
        assert_eq!(outcome.decision, Decision::Denied);
        assert_eq!(outcome.messages, vec!["slashable".to_string()]);
    }
}
