//! In-memory store and signer used by the reconciler tests.

use crate::controller::reconciler::{ObjectKey, ReconcilerError};
use crate::controller::store::ResourceStore;
use crate::crd::{CertificateRequest, Issuer, IssuerKind};
use crate::provider::origin_ca::{CaError, ServiceKey, SignRequest, SignedCertificate};
use crate::provider::{Signer, SignerFactory};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct StoreState {
    issuers: HashMap<(IssuerKind, ObjectKey), Issuer>,
    requests: HashMap<ObjectKey, CertificateRequest>,
    secrets: HashMap<(String, String), Secret>,
    version: u64,
    writes: usize,
}

impl StoreState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Store keeping objects in memory, enforcing resourceVersion on writes
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn insert_issuer(&self, mut issuer: Issuer) {
        let mut state = self.state();
        let version = state.next_version();
        let kind = issuer.kind();
        match &mut issuer {
            Issuer::Namespaced(i) => i.metadata.resource_version = Some(version),
            Issuer::Cluster(i) => i.metadata.resource_version = Some(version),
        }
        let key = ObjectKey {
            namespace: issuer.metadata().namespace.clone(),
            name: issuer.metadata().name.clone().unwrap(),
        };
        state.issuers.insert((kind, key), issuer);
    }

    pub fn issuer(&self, kind: IssuerKind, key: &ObjectKey) -> Option<Issuer> {
        self.state().issuers.get(&(kind, key.clone())).cloned()
    }

    pub fn insert_request(&self, mut request: CertificateRequest) {
        let mut state = self.state();
        request.metadata.resource_version = Some(state.next_version());
        let key = ObjectKey::from_resource(&request).unwrap();
        state.requests.insert(key, request);
    }

    pub fn request(&self, key: &ObjectKey) -> Option<CertificateRequest> {
        self.state().requests.get(key).cloned()
    }

    /// Simulate another writer touching the object
    pub fn bump_request_version(&self, key: &ObjectKey) {
        let mut state = self.state();
        let version = state.next_version();
        if let Some(request) = state.requests.get_mut(key) {
            request.metadata.resource_version = Some(version);
        }
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, key: &str, value: &[u8]) {
        let secret = Secret {
            data: Some(BTreeMap::from([(key.to_string(), ByteString(value.to_vec()))])),
            ..Secret::default()
        };
        self.state()
            .secrets
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.state()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

fn conflict(key: &str) -> ReconcilerError {
    ReconcilerError::Conflict(key.to_string())
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get_issuer(
        &self,
        kind: IssuerKind,
        key: &ObjectKey,
    ) -> Result<Option<Issuer>, ReconcilerError> {
        Ok(self.issuer(kind, key))
    }

    async fn replace_issuer_status(&self, issuer: &Issuer) -> Result<(), ReconcilerError> {
        let mut state = self.state();
        let key = ObjectKey {
            namespace: issuer.metadata().namespace.clone(),
            name: issuer.metadata().name.clone().unwrap_or_default(),
        };
        let version = state.next_version();
        let Some(stored) = state.issuers.get_mut(&(issuer.kind(), key.clone())) else {
            return Ok(());
        };
        if stored.metadata().resource_version != issuer.metadata().resource_version {
            return Err(conflict(&key.to_string()));
        }
        let status = match issuer {
            Issuer::Namespaced(i) => i.status.clone(),
            Issuer::Cluster(i) => i.status.clone(),
        };
        match stored {
            Issuer::Namespaced(i) => {
                i.status = status;
                i.metadata.resource_version = Some(version);
            }
            Issuer::Cluster(i) => {
                i.status = status;
                i.metadata.resource_version = Some(version);
            }
        }
        state.writes += 1;
        Ok(())
    }

    async fn get_certificate_request(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<CertificateRequest>, ReconcilerError> {
        Ok(self.request(key))
    }

    async fn replace_certificate_request_status(
        &self,
        request: &CertificateRequest,
    ) -> Result<(), ReconcilerError> {
        let mut state = self.state();
        let key = ObjectKey::from_resource(request).unwrap();
        let version = state.next_version();
        let Some(stored) = state.requests.get_mut(&key) else {
            return Ok(());
        };
        if stored.metadata.resource_version != request.metadata.resource_version {
            return Err(conflict(&key.to_string()));
        }
        stored.status = request.status.clone();
        stored.metadata.resource_version = Some(version);
        state.writes += 1;
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ReconcilerError> {
        Ok(self
            .state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Signer returning scripted results; succeeds once the script runs out
#[derive(Default)]
pub struct FakeSigner {
    sign_results: Mutex<VecDeque<Result<SignedCertificate, CaError>>>,
    verify_results: Mutex<VecDeque<Result<(), CaError>>>,
    sign_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    last_request: Mutex<Option<SignRequest>>,
}

impl FakeSigner {
    pub fn push_sign(&self, result: Result<SignedCertificate, CaError>) {
        self.sign_results.lock().unwrap().push_back(result);
    }

    pub fn push_verify(&self, result: Result<(), CaError>) {
        self.verify_results.lock().unwrap().push_back(result);
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SignRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

pub fn signed_certificate() -> SignedCertificate {
    SignedCertificate {
        certificate_chain: "-----BEGIN CERTIFICATE-----\nchain\n-----END CERTIFICATE-----\n"
            .to_string(),
        ca_certificate: "-----BEGIN CERTIFICATE-----\nca\n-----END CERTIFICATE-----\n".to_string(),
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, request: &SignRequest) -> Result<SignedCertificate, CaError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.sign_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(signed_certificate()))
    }

    async fn verify_credentials(&self) -> Result<(), CaError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verify_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

/// Factory handing out one shared [`FakeSigner`]
#[derive(Default)]
pub struct FakeSignerFactory {
    pub signer: Arc<FakeSigner>,
    keys: Mutex<Vec<String>>,
}

impl FakeSignerFactory {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl SignerFactory for FakeSignerFactory {
    fn signer(&self, service_key: ServiceKey) -> Result<Arc<dyn Signer>, CaError> {
        self.keys
            .lock()
            .unwrap()
            .push(service_key.expose().to_string());
        Ok(Arc::clone(&self.signer) as Arc<dyn Signer>)
    }
}

/// PEM CSR for the given DNS names, with an empty subject
pub fn csr_pem(dns_names: &[&str]) -> String {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params =
        rcgen::CertificateParams::new(dns_names.iter().map(ToString::to_string).collect::<Vec<_>>())
            .unwrap();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params.serialize_request(&key).unwrap().pem().unwrap()
}
