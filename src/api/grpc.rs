//! gRPC service implementations
//!
//! Thin adapters from wire messages to the signing service. The service is
//! synchronous (rule execution, key derivation, store I/O), so each call runs
//! on the blocking pool.

use crate::api::auth::credentials;
use crate::api::messages::{
    account_id, AccountManagerResponse, ListAccountsRequest, ListAccountsResponse,
    LockAccountRequest, ResponseState, SignBeaconAttestationRequest, SignBeaconProposalRequest,
    SignRequest, SignResponse, UnlockAccountRequest,
};
use crate::api::proto::account_manager_server::AccountManager;
use crate::api::proto::lister_server::Lister;
use crate::api::proto::signer_server::Signer;
use crate::policy::SignData;
use crate::signer::SigningService;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

/// Shared application state
pub struct AppState {
    pub service: Arc<SigningService>,
}

impl AppState {
    pub fn new(service: Arc<SigningService>) -> Self {
        Self { service }
    }
}

async fn run_blocking<F, R>(state: &AppState, f: F) -> Result<R, Status>
where
    F: FnOnce(&SigningService) -> R + Send + 'static,
    R: Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| {
            error!("Request task failed: {}", e);
            Status::internal("Failure")
        })
}

fn denied() -> SignResponse {
    SignResponse {
        state: ResponseState::Denied as i32,
        signature: vec![],
    }
}

/// Signer gRPC service implementation
pub struct SignerService {
    state: Arc<AppState>,
}

impl SignerService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl Signer for SignerService {
    async fn sign(&self, request: Request<SignRequest>) -> Result<Response<SignResponse>, Status> {
        let credentials = credentials(&request);
        let req = request.into_inner();
        let id = account_id(req.id);
        let data = SignData {
            domain: req.domain,
            data: req.data,
        };

        let outcome =
            run_blocking(&self.state, move |service| service.sign(&credentials, &id, data)).await?;
        Ok(Response::new(outcome.into()))
    }

    async fn sign_beacon_attestation(
        &self,
        request: Request<SignBeaconAttestationRequest>,
    ) -> Result<Response<SignResponse>, Status> {
        let credentials = credentials(&request);
        let req = request.into_inner();
        let Some(data) = req.payload() else {
            debug!("Attestation request without data");
            return Ok(Response::new(denied()));
        };
        let id = account_id(req.id);

        let outcome = run_blocking(&self.state, move |service| {
            service.sign_beacon_attestation(&credentials, &id, data)
        })
        .await?;
        Ok(Response::new(outcome.into()))
    }

    async fn sign_beacon_proposal(
        &self,
        request: Request<SignBeaconProposalRequest>,
    ) -> Result<Response<SignResponse>, Status> {
        let credentials = credentials(&request);
        let req = request.into_inner();
        let Some(data) = req.payload() else {
            debug!("Proposal request without data");
            return Ok(Response::new(denied()));
        };
        let id = account_id(req.id);

        let outcome = run_blocking(&self.state, move |service| {
            service.sign_beacon_proposal(&credentials, &id, data)
        })
        .await?;
        Ok(Response::new(outcome.into()))
    }
}

/// Lister gRPC service implementation
pub struct ListerService {
    state: Arc<AppState>,
}

impl ListerService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl Lister for ListerService {
    async fn list_accounts(
        &self,
        request: Request<ListAccountsRequest>,
    ) -> Result<Response<ListAccountsResponse>, Status> {
        let credentials = credentials(&request);
        let paths = request.into_inner().paths;

        let accounts = run_blocking(&self.state, move |service| {
            service.list_accounts(&credentials, &paths)
        })
        .await?;
        Ok(Response::new(ListAccountsResponse {
            state: ResponseState::Succeeded as i32,
            accounts: accounts.into_iter().map(Into::into).collect(),
        }))
    }
}

/// Account manager gRPC service implementation
pub struct AccountManagerService {
    state: Arc<AppState>,
}

impl AccountManagerService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl AccountManager for AccountManagerService {
    async fn lock(
        &self,
        request: Request<LockAccountRequest>,
    ) -> Result<Response<AccountManagerResponse>, Status> {
        let credentials = credentials(&request);
        let account = request.into_inner().account;

        let state = run_blocking(&self.state, move |service| {
            service.lock_account(&credentials, &account)
        })
        .await?;
        Ok(Response::new(AccountManagerResponse {
            state: ResponseState::from(state) as i32,
        }))
    }

    async fn unlock(
        &self,
        request: Request<UnlockAccountRequest>,
    ) -> Result<Response<AccountManagerResponse>, Status> {
        let credentials = credentials(&request);
        let req = request.into_inner();
        let passphrase = crate::security::SecureString::from(req.passphrase);
        let account = req.account;

        let state = run_blocking(&self.state, move |service| {
            service.unlock_account(&credentials, &account, passphrase.expose())
        })
        .await?;
        Ok(Response::new(AccountManagerResponse {
            state: ResponseState::from(state) as i32,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::messages::account_id::Id;
    use crate::checker::StaticChecker;
    use crate::config::{CertificateConfig, PermissionConfig};
    use crate::fetcher::AccountFetcher;
    use crate::keystore::testing::wallet_with_accounts;
    use crate::keystore::{MemoryWalletStore, WalletStore};
    use crate::locker::KeyLocker;
    use crate::policy::RuleEngine;
    use crate::storage::MemoryStateStore;
    use crate::unlocker::KeysUnlocker;

    fn app_state() -> Arc<AppState> {
        let store: Arc<dyn WalletStore> = Arc::new(MemoryWalletStore::new("mem"));
        wallet_with_accounts(store.clone(), "W", &[("A", "pass")]);

        let checker = StaticChecker::new(&[CertificateConfig {
            name: "client1".to_string(),
            permissions: vec![PermissionConfig {
                path: "W".to_string(),
                operations: vec!["All".to_string()],
            }],
        }])
        .unwrap();
        let service = SigningService::new(
            Arc::new(AccountFetcher::new(vec![store]).unwrap()),
            Arc::new(checker),
            Arc::new(KeysUnlocker::new(&["pass".to_string()])),
            Arc::new(RuleEngine::new(
                vec![],
                Arc::new(MemoryStateStore::new()),
                Arc::new(KeyLocker::new()),
            )),
        );
        Arc::new(AppState::new(Arc::new(service)))
    }

    #[tokio::test]
    async fn test_sign_without_client_certificate_is_denied() {
        let signer = SignerService::new(app_state());
        let response = signer
            .sign(Request::new(SignRequest {
                id: Some(Id::Account("W/A".to_string())),
                data: vec![1; 32],
                domain: vec![2; 32],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.state(), ResponseState::Denied);
        assert!(response.signature.is_empty());
    }

    #[tokio::test]
    async fn test_missing_payload_is_denied() {
        let signer = SignerService::new(app_state());
        let response = signer
            .sign_beacon_proposal(Request::new(SignBeaconProposalRequest {
                id: Some(Id::Account("W/A".to_string())),
                data: None,
                domain: vec![0; 32],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.state(), ResponseState::Denied);
    }

    #[tokio::test]
    async fn test_list_and_lock_without_identity() {
        let state = app_state();
        let lister = ListerService::new(state.clone());
        let response = lister
            .list_accounts(Request::new(ListAccountsRequest {
                paths: vec!["W".to_string()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.state(), ResponseState::Succeeded);
        assert!(response.accounts.is_empty());

        let manager = AccountManagerService::new(state);
        let response = manager
            .lock(Request::new(LockAccountRequest {
                account: "W/A".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.state(), ResponseState::Denied);
    }
}
