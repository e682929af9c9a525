//! Single-flight issuance per identity.
//!
//! The [`IssuanceCache`] maps every identity ever requested to exactly one
//! [`IssuanceHandle`]. The first request for an identity creates the handle
//! and submits the issuance to the worker pool; everybody else attaches to
//! the existing handle. Handles are never removed, so a failed issuance
//! stays failed for the lifetime of the process.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::commons::Error;
use crate::server::pool::WorkerPool;
use crate::signing::{
    CaKey, DistinguishedName, IssuanceBackend, IssueRequest,
    IssuedCredentials,
};


//------------ Outcome -------------------------------------------------------

/// The final result of an issuance, shared by all observers.
pub type Outcome = Result<Arc<IssuedCredentials>, Arc<Error>>;

type Observer = Box<dyn FnOnce(&Outcome) + Send>;


//------------ IssuanceHandle ------------------------------------------------

enum HandleState {
    Pending(Vec<Observer>),
    Resolved(Outcome),
}

/// One issuance for one identity, pending or resolved.
pub struct IssuanceHandle {
    identity: String,
    state: Mutex<HandleState>,
    resolved: Condvar,
}

impl IssuanceHandle {
    pub fn new(identity: impl Into<String>) -> Self {
        IssuanceHandle {
            identity: identity.into(),
            state: Mutex::new(HandleState::Pending(Vec::new())),
            resolved: Condvar::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Calls `observer` once with the outcome.
    ///
    /// If the handle is already resolved, this happens right away on the
    /// calling thread. Otherwise it happens on whichever thread resolves
    /// the handle. Observers are never called while the handle is locked.
    pub fn observe<F>(&self, observer: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                HandleState::Pending(observers) => {
                    observers.push(Box::new(observer));
                    return
                }
                HandleState::Resolved(outcome) => outcome.clone(),
            }
        };
        observer(&outcome)
    }

    /// Resolves the handle and notifies all observers.
    ///
    /// Only the first call has any effect. Returns whether this call
    /// resolved the handle.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let observers = {
            let mut state = self.lock();
            if let HandleState::Resolved(_) = *state {
                return false
            }
            match mem::replace(
                &mut *state, HandleState::Resolved(outcome.clone())
            ) {
                HandleState::Pending(observers) => observers,
                HandleState::Resolved(_) => Vec::new(),
            }
        };
        self.resolved.notify_all();
        for observer in observers {
            observer(&outcome)
        }
        true
    }

    /// Returns the outcome if the handle has been resolved.
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.lock() {
            HandleState::Pending(_) => None,
            HandleState::Resolved(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.lock(), HandleState::Resolved(_))
    }

    /// Blocks the calling thread until resolved or `timeout` passes.
    ///
    /// Never call this on the I/O thread.
    pub fn wait(&self, timeout: Duration) -> Option<Outcome> {
        let (state, _) = self.resolved
            .wait_timeout_while(self.lock(), timeout, |state| {
                matches!(state, HandleState::Pending(_))
            })
            .unwrap_or_else(PoisonError::into_inner);
        match &*state {
            HandleState::Pending(_) => None,
            HandleState::Resolved(outcome) => Some(outcome.clone()),
        }
    }

    // Observers run outside the lock, so a poisoned lock still holds a
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for IssuanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssuanceHandle")
            .field("identity", &self.identity)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}


//------------ IssuanceCache -------------------------------------------------

/// Maps identities to their one and only issuance.
pub struct IssuanceCache {
    handles: Mutex<HashMap<String, Arc<IssuanceHandle>>>,
    backend: Arc<dyn IssuanceBackend>,
    ca: Arc<CaKey>,
    pool: WorkerPool,
}

impl IssuanceCache {
    pub fn new(
        ca: Arc<CaKey>,
        backend: Arc<dyn IssuanceBackend>,
        pool: WorkerPool,
    ) -> Self {
        IssuanceCache {
            handles: Mutex::new(HashMap::new()),
            backend,
            ca,
            pool,
        }
    }

    /// Returns the handle for `identity`, starting issuance if it is new.
    pub fn obtain(&self, identity: &str) -> Arc<IssuanceHandle> {
        let (handle, created) = {
            let mut handles = self.lock();
            match handles.get(identity) {
                Some(handle) => (handle.clone(), false),
                None => {
                    let handle = Arc::new(IssuanceHandle::new(identity));
                    handles.insert(identity.to_string(), handle.clone());
                    (handle, true)
                }
            }
        };
        if created {
            self.submit(handle.clone());
        }
        handle
    }

    /// Returns the handle for `identity` without creating one.
    pub fn get(&self, identity: &str) -> Option<Arc<IssuanceHandle>> {
        self.lock().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ca(&self) -> &CaKey {
        &self.ca
    }

    fn submit(&self, handle: Arc<IssuanceHandle>) {
        debug!("Queueing issuance for '{}'", handle.identity());
        let backend = self.backend.clone();
        let ca = self.ca.clone();
        let identity = handle.identity().to_string();
        self.pool.execute(
            move || {
                let subject = DistinguishedName::common_name(&identity);
                backend.issue(&IssueRequest::new(&ca, &subject))
            },
            move |res| {
                match &res {
                    Ok(_) => info!("Issued key and certificate for '{}'",
                        handle.identity()
                    ),
                    Err(e) => warn!("Issuance for '{}' failed: {}",
                        handle.identity(), e
                    ),
                }
                handle.resolve(res.map(Arc::new).map_err(Arc::new));
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<IssuanceHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


//------------ Tests ---------------------------------------------------------
