use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{ServerName, TrustAnchor};
use rustls::RootCertStore;
use tracing::{debug, error};

use crate::certificate::{load_certificate, normalize_alias};
use crate::keystore::{self, Entries};
use crate::{default_provider, Certificate, TrustRequest, TrustStoreError};

/// Password-protected, file-backed store of operator-accepted certificates.
///
/// Readers share the lock; adds and removes are exclusive with each other
/// and with readers. A writer commits the alias mapping, the file on disk
/// and the derived verifier together before releasing the lock. A store
/// that failed to initialize is broken for its whole lifetime and trusts
/// nothing.
pub struct PersistentTrustStore {
    path: PathBuf,
    password: String,
    provider: Arc<CryptoProvider>,
    state: RwLock<StoreState>,
    scopes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

enum StoreState {
    Ready(LoadedStore),
    Broken,
}

struct LoadedStore {
    entries: Entries,
    derived: DerivedTrust,
}

/// Verifier recomputed from the entries after every committed mutation.
enum DerivedTrust {
    Empty,
    Anchored {
        roots: Arc<RootCertStore>,
        verifier: Arc<WebPkiServerVerifier>,
    },
}

impl DerivedTrust {
    fn derive(entries: &Entries, provider: &Arc<CryptoProvider>) -> Result<Self, TrustStoreError> {
        if entries.is_empty() {
            return Ok(Self::Empty);
        }

        let mut roots = RootCertStore::empty();
        for certificate in entries.values() {
            roots
                .add(certificate.der().clone())
                .map_err(TrustStoreError::Anchor)?;
        }
        let roots = Arc::new(roots);
        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::clone(&roots), Arc::clone(provider))
                .build()?;
        Ok(Self::Anchored { roots, verifier })
    }
}

impl PersistentTrustStore {
    pub fn open(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self::open_with_provider(path, password, default_provider())
    }

    /// Opens the container at `path`, or prepares an empty store when none
    /// exists. Any failure leaves the store broken; it is not retried.
    pub fn open_with_provider(
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        let path = path.into();
        let password = password.into();

        let state = match load(&path, &password, &provider) {
            Ok(loaded) => {
                debug!(
                    path = %path.display(),
                    entries = loaded.entries.len(),
                    "opened persistent trust store"
                );
                StoreState::Ready(loaded)
            }
            Err(error) => {
                error!(
                    path = %path.display(),
                    %error,
                    "cannot initialize persistent trust store; it will trust nothing"
                );
                StoreState::Broken
            }
        };

        Self {
            path,
            password,
            provider,
            state: RwLock::new(state),
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_broken(&self) -> bool {
        matches!(*self.state.read(), StoreState::Broken)
    }

    pub fn len(&self) -> usize {
        match &*self.state.read() {
            StoreState::Ready(loaded) => loaded.entries.len(),
            StoreState::Broken => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_server_trusted(&self, request: &TrustRequest<'_>) -> Result<(), rustls::Error> {
        match &*self.state.read() {
            StoreState::Broken => Err(rustls::Error::General(
                "persistent trust store is broken".to_string(),
            )),
            StoreState::Ready(LoadedStore {
                derived: DerivedTrust::Empty,
                ..
            }) => Err(rustls::Error::General(
                "persistent trust store is empty".to_string(),
            )),
            StoreState::Ready(LoadedStore {
                entries,
                derived: DerivedTrust::Anchored { verifier, .. },
            }) => match pinned(entries, request) {
                Some(certificate) => verify_pinned_name(certificate, request),
                None => request.verify_with(verifier.as_ref()),
            },
        }
    }

    pub fn accepted_issuers(&self) -> Vec<TrustAnchor<'static>> {
        match &*self.state.read() {
            StoreState::Ready(LoadedStore {
                derived: DerivedTrust::Anchored { roots, .. },
                ..
            }) => roots.roots.clone(),
            _ => Vec::new(),
        }
    }

    pub fn add_certificate(&self, certificate: &Certificate) -> bool {
        let alias = certificate.alias();
        self.mutate(&alias, "add", |entries| {
            let previous = entries.insert(alias.clone(), certificate.clone());
            previous.as_ref() != Some(certificate)
        })
    }

    pub fn add_certificate_from_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match load_certificate(path) {
            Ok(certificate) => self.add_certificate(&certificate),
            Err(error) => {
                error!(path = %path.display(), %error, "cannot load certificate");
                false
            }
        }
    }

    pub fn remove_certificate(&self, certificate: &Certificate) -> bool {
        self.remove_certificate_by_alias(&certificate.alias())
    }

    pub fn remove_certificate_by_alias(&self, alias: &str) -> bool {
        let alias = normalize_alias(alias);
        self.mutate(&alias, "remove", |entries| entries.remove(&alias).is_some())
    }

    pub fn get_certificate(&self, alias: &str) -> Option<Certificate> {
        match &*self.state.read() {
            StoreState::Ready(loaded) => loaded.entries.get(&normalize_alias(alias)).cloned(),
            StoreState::Broken => None,
        }
    }

    /// Snapshot of every stored certificate, ordered by alias.
    pub fn get_certificates(&self) -> Vec<Certificate> {
        match &*self.state.read() {
            StoreState::Ready(loaded) => loaded.entries.values().cloned().collect(),
            StoreState::Broken => Vec::new(),
        }
    }

    /// Exclusive section for deciding about one certificate alias.
    ///
    /// Callers holding the scope for an alias can check the store, ask for
    /// confirmation and add the certificate without another caller doing
    /// the same for that alias in between. Different aliases do not
    /// contend.
    pub fn confirmation_scope(&self, alias: &str) -> ConfirmationScope<'_> {
        let alias = normalize_alias(alias);
        let slot = Arc::clone(self.scopes.lock().entry(alias.clone()).or_default());
        ConfirmationScope {
            store: self,
            alias,
            slot,
        }
    }

    /// Stages `apply` on a copy of the entries, derives the verifier and
    /// flushes the container; memory is only updated when both succeed.
    /// `apply` returns false when it left the entries unchanged.
    fn mutate(
        &self,
        alias: &str,
        operation: &'static str,
        apply: impl FnOnce(&mut Entries) -> bool,
    ) -> bool {
        let mut state = self.state.write();
        let StoreState::Ready(loaded) = &mut *state else {
            debug!(alias, operation, "persistent trust store is broken; refusing");
            return false;
        };

        let mut staged = loaded.entries.clone();
        if !apply(&mut staged) {
            return true;
        }

        match self.commit(&staged) {
            Ok(derived) => {
                loaded.entries = staged;
                loaded.derived = derived;
                debug!(alias, operation, entries = loaded.entries.len(), "trust store updated");
                true
            }
            Err(error) => {
                error!(alias, operation, %error, "trust store update failed");
                false
            }
        }
    }

    fn commit(&self, staged: &Entries) -> Result<DerivedTrust, TrustStoreError> {
        let derived = DerivedTrust::derive(staged, &self.provider)?;
        keystore::flush(&self.path, &self.password, staged)?;
        Ok(derived)
    }
}

impl fmt::Debug for PersistentTrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentTrustStore")
            .field("path", &self.path)
            .field("broken", &self.is_broken())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

fn load(
    path: &Path,
    password: &str,
    provider: &Arc<CryptoProvider>,
) -> Result<LoadedStore, TrustStoreError> {
    let entries = keystore::open_or_create(path, password)?;
    let derived = DerivedTrust::derive(&entries, provider)?;
    Ok(LoadedStore { entries, derived })
}

/// A stored certificate presented byte for byte is trusted as is. Leaves
/// issued by a CA the store does not hold cannot chain to themselves, and
/// an accepted certificate stays accepted after it expires.
fn pinned<'e>(entries: &'e Entries, request: &TrustRequest<'_>) -> Option<&'e Certificate> {
    entries
        .values()
        .find(|certificate| certificate.der().as_ref() == request.end_entity.as_ref())
}

/// Name check for a pinned certificate. One without DNS names answers to
/// its common name.
fn verify_pinned_name(certificate: &Certificate, request: &TrustRequest<'_>) -> Result<(), rustls::Error> {
    request.verify_name().or_else(|error| {
        match (request.server_name, certificate.common_name()) {
            (ServerName::DnsName(name), Some(common_name))
                if certificate.dns_names().is_empty()
                    && normalize_alias(name.as_ref()) == normalize_alias(common_name) =>
            {
                Ok(())
            }
            _ => Err(error),
        }
    })
}

/// Held per alias by [`PersistentTrustStore::confirmation_scope`].
pub struct ConfirmationScope<'a> {
    store: &'a PersistentTrustStore,
    alias: String,
    slot: Arc<Mutex<()>>,
}

impl ConfirmationScope<'_> {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.slot.lock()
    }
}

impl Drop for ConfirmationScope<'_> {
    fn drop(&mut self) {
        // Only the map and this scope reference the slot: nobody waits on it.
        let mut scopes = self.store.scopes.lock();
        let unused = scopes
            .get(&self.alias)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
        if unused {
            scopes.remove(&self.alias);
        }
    }
}

#[cfg(test)]
mod tests {
    include!("tests_persistent_store.rs");
}
