//! Signing orchestration
//!
//! Every signing request walks the same steps: resolve the account, lock its
//! public key, check access, make sure the key material is unlocked, run the
//! policy rules and finally sign the signing root. The key lock is held from
//! the access check through signing. Internal errors never leave this layer;
//! callers only see succeeded, denied or failed.

use super::ssz;
use crate::checker::static_checker::anchored_regex;
use crate::checker::{AccessChecker, Credentials};
use crate::errors::{Result, StakeSignError};
use crate::fetcher::{AccountFetcher, ResolvedAccount};
use crate::keystore::{split_path, Account, Wallet};
use crate::locker::KeyLockGuard;
use crate::policy::{
    Action, Decision, RequestData, RuleEngine, SignBeaconAttestationData, SignBeaconProposalData,
    SignData,
};
use crate::unlocker::AutoUnlocker;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operation name checked before locking an account
pub const OPERATION_LOCK: &str = "Lock";

/// Operation name checked before unlocking an account
pub const OPERATION_UNLOCK: &str = "Unlock";

/// Coarse outcome reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseState {
    #[default]
    Unknown,
    Succeeded,
    Denied,
    Failed,
}

/// How a request names its account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountId {
    /// `wallet/account`
    Name(String),
    PublicKey(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    pub state: ResponseState,
    pub signature: Option<Vec<u8>>,
}

impl SignOutcome {
    fn succeeded(signature: Vec<u8>) -> Self {
        Self {
            state: ResponseState::Succeeded,
            signature: Some(signature),
        }
    }

    fn denied() -> Self {
        Self {
            state: ResponseState::Denied,
            signature: None,
        }
    }

    fn failed() -> Self {
        Self {
            state: ResponseState::Failed,
            signature: None,
        }
    }
}

/// An account visible to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedAccount {
    pub name: String,
    pub public_key: Vec<u8>,
}

pub struct SigningService {
    fetcher: Arc<AccountFetcher>,
    checker: Arc<dyn AccessChecker>,
    unlocker: Arc<dyn AutoUnlocker>,
    ruler: Arc<RuleEngine>,
}

impl SigningService {
    pub fn new(
        fetcher: Arc<AccountFetcher>,
        checker: Arc<dyn AccessChecker>,
        unlocker: Arc<dyn AutoUnlocker>,
        ruler: Arc<RuleEngine>,
    ) -> Self {
        Self {
            fetcher,
            checker,
            unlocker,
            ruler,
        }
    }

    /// Sign a generic 32-byte object root under a domain
    pub fn sign(&self, credentials: &Credentials, id: &AccountId, data: SignData) -> SignOutcome {
        self.process(credentials, id, RequestData::Sign(data))
    }

    pub fn sign_beacon_attestation(
        &self,
        credentials: &Credentials,
        id: &AccountId,
        data: SignBeaconAttestationData,
    ) -> SignOutcome {
        self.process(credentials, id, RequestData::SignBeaconAttestation(data))
    }

    pub fn sign_beacon_proposal(
        &self,
        credentials: &Credentials,
        id: &AccountId,
        data: SignBeaconProposalData,
    ) -> SignOutcome {
        self.process(credentials, id, RequestData::SignBeaconProposal(data))
    }

    fn process(&self, credentials: &Credentials, id: &AccountId, request: RequestData) -> SignOutcome {
        let action = request.action();

        let (wallet, account) = match self.resolve(id) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(action = %action, result = "denied", "Did not obtain account: {}", e);
                return SignOutcome::denied();
            }
        };

        let locker = self.ruler.locker();
        let guard = locker.lock(account.public_key());
        let outcome = self.process_locked(&guard, credentials, &wallet, &account, &request);
        locker.unlock(guard);
        outcome
    }

    fn process_locked(
        &self,
        guard: &KeyLockGuard,
        credentials: &Credentials,
        wallet: &Wallet,
        account: &Account,
        request: &RequestData,
    ) -> SignOutcome {
        let action = request.action();
        let account_path = format!("{}/{}", wallet.name(), account.name());

        if !self
            .checker
            .check(credentials, &account_path, action.as_str())
        {
            debug!(
                account = %account_path,
                client = %credentials.client,
                action = %action,
                result = "denied",
                "Access check failed"
            );
            return SignOutcome::denied();
        }

        if !account.is_unlocked() {
            match self.unlocker.unlock(wallet, account) {
                Ok(true) => debug!(account = %account_path, "Account unlocked"),
                Ok(false) => {
                    debug!(account = %account_path, result = "denied", "Account is locked");
                    return SignOutcome::denied();
                }
                Err(e) => {
                    warn!(account = %account_path, result = "failed", "Failed to unlock account: {}", e);
                    return SignOutcome::failed();
                }
            }
        }

        match self.ruler.run_rules_locked(
            guard,
            wallet.name(),
            account.name(),
            account.public_key(),
            request,
            credentials,
        ) {
            Decision::Approved => {}
            Decision::Denied => {
                debug!(account = %account_path, action = %action, result = "denied", "Denied by rules");
                return SignOutcome::denied();
            }
            other => {
                warn!(
                    account = %account_path,
                    action = %action,
                    decision = other.as_str(),
                    result = "failed",
                    "Rules check failed"
                );
                return SignOutcome::failed();
            }
        }

        let root = match request_signing_root(request) {
            Ok(root) => root,
            Err(e) => {
                warn!(account = %account_path, result = "failed", "Failed to generate signing root: {}", e);
                return SignOutcome::failed();
            }
        };
        match account.sign(&root) {
            Ok(signature) => {
                debug!(account = %account_path, action = %action, result = "succeeded", "Signed");
                SignOutcome::succeeded(signature)
            }
            Err(e) => {
                warn!(account = %account_path, result = "failed", "Failed to sign: {}", e);
                SignOutcome::failed()
            }
        }
    }

    fn resolve(&self, id: &AccountId) -> Result<ResolvedAccount> {
        match id {
            AccountId::Name(name) if !name.is_empty() => self.fetcher.fetch_account(name),
            AccountId::PublicKey(key) if !key.is_empty() => self.fetcher.fetch_account_by_key(key),
            _ => Err(StakeSignError::InvalidRequest(
                "neither account nor public key supplied".to_string(),
            )),
        }
    }

    /// Accounts matching `paths` that the caller may see.
    ///
    /// Each path is `wallet` or `wallet/account-pattern`. Paths that cannot
    /// be resolved are skipped.
    pub fn list_accounts(&self, credentials: &Credentials, paths: &[String]) -> Vec<ListedAccount> {
        let mut listed = Vec::new();

        for path in paths {
            let (wallet_name, account_pattern) = match split_path(path) {
                Ok(parts) => parts,
                Err(e) => {
                    debug!(path = %path, "Failed to obtain wallet and account names: {}", e);
                    continue;
                }
            };
            if wallet_name.is_empty() {
                debug!(path = %path, "Empty wallet name");
                continue;
            }
            let account_regex = match anchored_regex(account_pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    debug!(path = %path, "Invalid account regular expression: {}", e);
                    continue;
                }
            };
            let wallet = match self.fetcher.fetch_wallet(path) {
                Ok(wallet) => wallet,
                Err(e) => {
                    debug!(path = %path, "Failed to obtain wallet: {}", e);
                    continue;
                }
            };
            let accounts = match wallet.accounts() {
                Ok(accounts) => accounts,
                Err(e) => {
                    warn!(wallet = wallet.name(), "Failed to list accounts: {}", e);
                    continue;
                }
            };

            for account in accounts {
                if !account_regex.is_match(account.name()) {
                    continue;
                }
                let account_path = format!("{}/{}", wallet.name(), account.name());
                if !self.checker.check(
                    credentials,
                    &account_path,
                    Action::AccessAccount.as_str(),
                ) {
                    debug!(account = %account_path, "Access to account not allowed");
                    continue;
                }

                let decision = self.ruler.run_rules(
                    wallet.name(),
                    account.name(),
                    account.public_key(),
                    &RequestData::AccessAccount,
                    credentials,
                );
                if decision == Decision::Approved {
                    listed.push(ListedAccount {
                        name: account_path,
                        public_key: account.public_key().to_vec(),
                    });
                } else {
                    debug!(account = %account_path, decision = decision.as_str(), "Account not listed");
                }
            }
        }

        listed
    }

    /// Drop the decrypted key material of an account
    pub fn lock_account(&self, credentials: &Credentials, account_path: &str) -> ResponseState {
        info!(account = account_path, "Lock account received");
        let (wallet, account) = match self.fetcher.fetch_account(account_path) {
            Ok(resolved) => resolved,
            Err(e) => {
                info!(account = account_path, result = "denied", "Failed to fetch account: {}", e);
                return ResponseState::Denied;
            }
        };
        let path = format!("{}/{}", wallet.name(), account.name());
        if !self.checker.check(credentials, &path, OPERATION_LOCK) {
            info!(account = %path, result = "denied", "Lock not allowed");
            return ResponseState::Denied;
        }

        let locker = self.ruler.locker();
        let guard = locker.lock(account.public_key());
        account.lock();
        locker.unlock(guard);

        info!(account = %path, result = "succeeded", "Account locked");
        ResponseState::Succeeded
    }

    /// Decrypt an account's key material with a caller-supplied passphrase
    pub fn unlock_account(
        &self,
        credentials: &Credentials,
        account_path: &str,
        passphrase: &str,
    ) -> ResponseState {
        info!(account = account_path, "Unlock account received");
        let (wallet, account) = match self.fetcher.fetch_account(account_path) {
            Ok(resolved) => resolved,
            Err(e) => {
                info!(account = account_path, result = "denied", "Failed to fetch account: {}", e);
                return ResponseState::Denied;
            }
        };
        let path = format!("{}/{}", wallet.name(), account.name());
        if !self.checker.check(credentials, &path, OPERATION_UNLOCK) {
            info!(account = %path, result = "denied", "Unlock not allowed");
            return ResponseState::Denied;
        }

        let locker = self.ruler.locker();
        let guard = locker.lock(account.public_key());
        let unlocked = account.unlock(passphrase);
        locker.unlock(guard);

        match unlocked {
            Ok(()) => {
                info!(account = %path, result = "succeeded", "Account unlocked");
                ResponseState::Succeeded
            }
            Err(StakeSignError::DecryptionFailed(_)) => {
                info!(account = %path, result = "denied", "Incorrect passphrase");
                ResponseState::Denied
            }
            Err(e) => {
                warn!(account = %path, result = "failed", "Failed to unlock account: {}", e);
                ResponseState::Failed
            }
        }
    }
}

/// The bytes actually signed for `request`
fn request_signing_root(request: &RequestData) -> Result<ssz::Root> {
    match request {
        RequestData::Sign(data) => ssz::signing_root(&data.data, &data.domain),
        RequestData::SignBeaconAttestation(data) => {
            ssz::signing_root(&ssz::attestation_data_root(data)?, &data.domain)
        }
        RequestData::SignBeaconProposal(data) => {
            ssz::signing_root(&ssz::beacon_block_header_root(data)?, &data.domain)
        }
        RequestData::AccessAccount => Err(StakeSignError::InvalidRequest(
            "nothing to sign for account access".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::StaticChecker;
    use crate::config::{CertificateConfig, PermissionConfig};
    use crate::keystore::testing::wallet_with_accounts;
    use crate::keystore::wallet::verify;
    use crate::keystore::{MemoryWalletStore, WalletStore};
    use crate::locker::KeyLocker;
    use crate::policy::wasm::fixtures;
    use crate::policy::{Checkpoint, Rule, WasmLimits, WasmRuntime};
    use crate::storage::MemoryStateStore;
    use crate::unlocker::KeysUnlocker;
    use std::thread;

    const PASSPHRASE: &str = "secret";

    struct Fixture {
        service: Arc<SigningService>,
        public_keys: Vec<Vec<u8>>,
    }

    fn permissions(operations: &[&str]) -> Vec<CertificateConfig> {
        vec![CertificateConfig {
            name: "client1".to_string(),
            permissions: vec![PermissionConfig {
                path: "W".to_string(),
                operations: operations.iter().map(|s| s.to_string()).collect(),
            }],
        }]
    }

    fn fixture(rules: Vec<Rule>, operations: &[&str], passphrases: &[&str]) -> Fixture {
        let store: Arc<dyn WalletStore> = Arc::new(MemoryWalletStore::new("mem"));
        let (_, accounts) = wallet_with_accounts(
            store.clone(),
            "W",
            &[("A", PASSPHRASE), ("B", PASSPHRASE), ("other", PASSPHRASE)],
        );
        let public_keys = accounts.iter().map(|a| a.public_key().to_vec()).collect();

        let fetcher = Arc::new(AccountFetcher::new(vec![store]).unwrap());
        let checker = Arc::new(StaticChecker::new(&permissions(operations)).unwrap());
        let passphrases: Vec<String> = passphrases.iter().map(|s| s.to_string()).collect();
        let unlocker = Arc::new(KeysUnlocker::new(&passphrases));
        let ruler = Arc::new(RuleEngine::new(
            rules,
            Arc::new(MemoryStateStore::new()),
            Arc::new(KeyLocker::new()),
        ));

        Fixture {
            service: Arc::new(SigningService::new(fetcher, checker, unlocker, ruler)),
            public_keys,
        }
    }

    fn sign_once_rule(action: Action) -> Rule {
        let runtime = WasmRuntime::new(WasmLimits::default()).unwrap();
        let script = runtime
            .compile("sign-once", fixtures::SIGN_ONCE.as_bytes())
            .unwrap();
        Rule::new("sign-once", action, None, Arc::new(script)).unwrap()
    }

    fn sign_data() -> SignData {
        SignData {
            domain: vec![0x07; 32],
            data: vec![0x11; 32],
        }
    }

    fn client() -> Credentials {
        Credentials::new("client1").with_ip("127.0.0.1")
    }

    fn by_name(name: &str) -> AccountId {
        AccountId::Name(name.to_string())
    }

    #[test]
    fn test_sign_once_end_to_end() {
        let f = fixture(vec![sign_once_rule(Action::Sign)], &["All"], &[PASSPHRASE]);

        let first = f.service.sign(&client(), &by_name("W/A"), sign_data());
        assert_eq!(first.state, ResponseState::Succeeded);
        let signature = first.signature.unwrap();
        assert_eq!(signature.len(), 96);
        let root = ssz::signing_root(&sign_data().data, &sign_data().domain).unwrap();
        assert!(verify(&f.public_keys[0], &root, &signature));

        let second = f.service.sign(&client(), &by_name("W/A"), sign_data());
        assert_eq!(second.state, ResponseState::Denied);
        assert!(second.signature.is_none());

        // The rule state is per key.
        let other = f.service.sign(&client(), &by_name("W/B"), sign_data());
        assert_eq!(other.state, ResponseState::Succeeded);
    }

    #[test]
    fn test_concurrent_sign_once() {
        let f = fixture(vec![sign_once_rule(Action::Sign)], &["All"], &[PASSPHRASE]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = f.service.clone();
                thread::spawn(move || service.sign(&client(), &by_name("W/A"), sign_data()))
            })
            .collect();
        let outcomes: Vec<SignOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let succeeded = outcomes
            .iter()
            .filter(|o| o.state == ResponseState::Succeeded)
            .count();
        assert_eq!(succeeded, 1);
        assert!(outcomes
            .iter()
            .filter(|o| o.state != ResponseState::Succeeded)
            .all(|o| o.state == ResponseState::Denied && o.signature.is_none()));
    }

    #[test]
    fn test_sign_by_public_key() {
        let f = fixture(vec![], &["Sign"], &[PASSPHRASE]);
        let id = AccountId::PublicKey(f.public_keys[1].clone());
        let outcome = f.service.sign(&client(), &id, sign_data());
        assert_eq!(outcome.state, ResponseState::Succeeded);

        let unknown = AccountId::PublicKey(vec![0x01; 48]);
        assert_eq!(
            f.service.sign(&client(), &unknown, sign_data()).state,
            ResponseState::Denied
        );
    }

    #[test]
    fn test_denials_before_policy() {
        let f = fixture(vec![], &["Sign"], &[PASSPHRASE]);

        // Unknown account, empty identifiers.
        assert_eq!(
            f.service.sign(&client(), &by_name("W/missing"), sign_data()).state,
            ResponseState::Denied
        );
        assert_eq!(
            f.service.sign(&client(), &by_name(""), sign_data()).state,
            ResponseState::Denied
        );
        assert_eq!(
            f.service
                .sign(&client(), &AccountId::PublicKey(vec![]), sign_data())
                .state,
            ResponseState::Denied
        );
        // Unknown client.
        assert_eq!(
            f.service
                .sign(&Credentials::new("client2"), &by_name("W/A"), sign_data())
                .state,
            ResponseState::Denied
        );
        // Operation not granted.
        let attestation = SignBeaconAttestationData {
            domain: vec![0; 32],
            beacon_block_root: vec![0; 32],
            source: Checkpoint {
                epoch: 0,
                root: vec![0; 32],
            },
            target: Checkpoint {
                epoch: 1,
                root: vec![0; 32],
            },
            ..Default::default()
        };
        assert_eq!(
            f.service
                .sign_beacon_attestation(&client(), &by_name("W/A"), attestation)
                .state,
            ResponseState::Denied
        );
    }

    #[test]
    fn test_locked_account_denied() {
        let f = fixture(vec![], &["All"], &["wrong"]);
        let outcome = f.service.sign(&client(), &by_name("W/A"), sign_data());
        assert_eq!(outcome.state, ResponseState::Denied);

        // A manual unlock makes signing possible.
        assert_eq!(
            f.service.unlock_account(&client(), "W/A", PASSPHRASE),
            ResponseState::Succeeded
        );
        let outcome = f.service.sign(&client(), &by_name("W/A"), sign_data());
        assert_eq!(outcome.state, ResponseState::Succeeded);

        assert_eq!(f.service.lock_account(&client(), "W/A"), ResponseState::Succeeded);
        let outcome = f.service.sign(&client(), &by_name("W/A"), sign_data());
        assert_eq!(outcome.state, ResponseState::Denied);
    }

    #[test]
    fn test_malformed_payload_fails() {
        let f = fixture(vec![], &["All"], &[PASSPHRASE]);
        let outcome = f.service.sign(
            &client(),
            &by_name("W/A"),
            SignData {
                domain: vec![0; 32],
                data: vec![0; 20],
            },
        );
        assert_eq!(outcome.state, ResponseState::Failed);
        assert!(outcome.signature.is_none());
    }

    #[test]
    fn test_sign_beacon_proposal() {
        let f = fixture(
            vec![sign_once_rule(Action::SignBeaconProposal)],
            &["Sign beacon proposal"],
            &[PASSPHRASE],
        );
        let proposal = SignBeaconProposalData {
            domain: vec![0x01; 32],
            slot: 12,
            proposer_index: 5,
            parent_root: vec![0x02; 32],
            state_root: vec![0x03; 32],
            body_root: vec![0x04; 32],
        };

        let first = f
            .service
            .sign_beacon_proposal(&client(), &by_name("W/A"), proposal.clone());
        assert_eq!(first.state, ResponseState::Succeeded);
        let root = ssz::signing_root(
            &ssz::beacon_block_header_root(&proposal).unwrap(),
            &proposal.domain,
        )
        .unwrap();
        assert!(verify(&f.public_keys[0], &root, &first.signature.unwrap()));

        let second = f
            .service
            .sign_beacon_proposal(&client(), &by_name("W/A"), proposal);
        assert_eq!(second.state, ResponseState::Denied);
    }

    #[test]
    fn test_list_accounts() {
        let f = fixture(vec![], &["Access account"], &[]);
        let names = |paths: &[&str]| -> Vec<String> {
            let paths: Vec<String> = paths.iter().map(|s| s.to_string()).collect();
            let mut names: Vec<String> = f
                .service
                .list_accounts(&client(), &paths)
                .into_iter()
                .map(|a| a.name)
                .collect();
            names.sort();
            names
        };

        assert_eq!(names(&["W"]), vec!["W/A", "W/B", "W/other"]);
        assert_eq!(names(&["W/[AB]"]), vec!["W/A", "W/B"]);
        assert_eq!(names(&["W/A"]), vec!["W/A"]);
        assert!(names(&["Missing", "", "/A", "W/("]).is_empty());

        let listed = f
            .service
            .list_accounts(&client(), &["W/B".to_string()]);
        assert_eq!(listed[0].public_key, f.public_keys[1]);

        assert!(f
            .service
            .list_accounts(&Credentials::new("client2"), &["W".to_string()])
            .is_empty());
    }

    #[test]
    fn test_list_accounts_runs_rules() {
        let f = fixture(
            vec![sign_once_rule(Action::AccessAccount)],
            &["Access account"],
            &[],
        );
        let paths = vec!["W/A".to_string()];
        assert_eq!(f.service.list_accounts(&client(), &paths).len(), 1);
        assert!(f.service.list_accounts(&client(), &paths).is_empty());
    }

    #[test]
    fn test_account_manager_permissions() {
        let f = fixture(vec![], &["Sign"], &[]);
        assert_eq!(
            f.service.unlock_account(&client(), "W/A", PASSPHRASE),
            ResponseState::Denied
        );
        assert_eq!(f.service.lock_account(&client(), "W/A"), ResponseState::Denied);

        let f = fixture(vec![], &["Unlock"], &[]);
        assert_eq!(
            f.service.unlock_account(&client(), "W/A", "bad"),
            ResponseState::Denied
        );
        assert_eq!(
            f.service.unlock_account(&client(), "W/missing", PASSPHRASE),
            ResponseState::Denied
        );
        assert_eq!(
            f.service.unlock_account(&client(), "W/A", PASSPHRASE),
            ResponseState::Succeeded
        );
    }
}
