//! Process-wide capability registry.
//!
//! Probing a host for supported output formats is slow and the answer never
//! changes while anything is using it, so results are cached here. Consumers
//! hold a [`CapabilityLease`] for the duration of their work; when the last
//! lease is released the cache is torn down, and the next consumer probes
//! afresh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use clipreel_common::config::DEFAULT_MIME_CANDIDATES;
use clipreel_common::error::{ClipreelError, ClipreelResult};

use crate::backend::MediaBackend;

/// Generic container tried when none of the preferred candidates is
/// supported.
pub const GENERIC_MIME_TYPE: &str = "video/webm";

/// Preference-ordered output candidates as owned strings.
pub fn default_mime_candidates() -> Vec<String> {
    DEFAULT_MIME_CANDIDATES.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
struct RegistryState {
    leases: usize,
    /// (backend name, candidate list) -> selected mime type.
    mime_cache: HashMap<(String, Vec<String>), Option<String>>,
    probes: u64,
}

/// Shared cache of host capabilities.
#[derive(Default)]
pub struct CapabilityRegistry {
    state: Mutex<RegistryState>,
}

impl CapabilityRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by the whole process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<CapabilityRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(CapabilityRegistry::new).clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a consumer.
    pub fn acquire(self: &Arc<Self>) -> CapabilityLease {
        let mut state = self.lock();
        state.leases += 1;
        tracing::debug!(leases = state.leases, "Capability lease acquired");
        CapabilityLease {
            registry: Arc::clone(self),
            released: false,
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        state.leases = state.leases.saturating_sub(1);
        if state.leases == 0 {
            state.mime_cache.clear();
            tracing::debug!("Last capability lease released; cache cleared");
        }
    }

    /// Number of outstanding leases.
    pub fn leases(&self) -> usize {
        self.lock().leases
    }

    /// Number of uncached probes performed since creation.
    pub fn probe_count(&self) -> u64 {
        self.lock().probes
    }

    fn select_mime_type(
        &self,
        backend: &dyn MediaBackend,
        candidates: &[String],
    ) -> ClipreelResult<String> {
        let key = (backend.name().to_string(), candidates.to_vec());
        let mut state = self.lock();
        let selected = match state.mime_cache.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                state.probes += 1;
                let probed = probe_mime_type(backend, candidates);
                state.mime_cache.insert(key, probed.clone());
                probed
            }
        };

        selected.ok_or_else(|| {
            ClipreelError::encoder_unsupported(format!(
                "{} supports none of: {}",
                backend.name(),
                candidates.join(", ")
            ))
        })
    }
}

fn probe_mime_type(backend: &dyn MediaBackend, candidates: &[String]) -> Option<String> {
    if let Some(found) = candidates
        .iter()
        .find(|mime| backend.is_mime_type_supported(mime))
    {
        tracing::info!(backend = backend.name(), mime_type = %found, "Selected output format");
        return Some(found.clone());
    }

    let generic_listed = candidates.iter().any(|c| c == GENERIC_MIME_TYPE);
    if !generic_listed && backend.is_mime_type_supported(GENERIC_MIME_TYPE) {
        tracing::warn!(
            backend = backend.name(),
            "No preferred output format supported; falling back to {GENERIC_MIME_TYPE}"
        );
        return Some(GENERIC_MIME_TYPE.to_string());
    }

    tracing::warn!(backend = backend.name(), "No supported output format");
    None
}

/// A consumer's hold on the registry. Released on drop.
pub struct CapabilityLease {
    registry: Arc<CapabilityRegistry>,
    released: bool,
}

impl CapabilityLease {
    /// Most preferred supported mime type, probing once per backend while
    /// any lease is held.
    pub fn select_mime_type(
        &self,
        backend: &dyn MediaBackend,
        candidates: &[String],
    ) -> ClipreelResult<String> {
        self.registry.select_mime_type(backend, candidates)
    }

    /// Release explicitly. Idempotent with the drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release();
        }
    }
}

impl Drop for CapabilityLease {
    fn drop(&mut self) {
        self.release_once();
    }
}
