//! Lock-free policy store with atomic snapshot swaps

use arc_swap::ArcSwap;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::PolicyLoadError;
use crate::context::token_budget::{BudgetPolicy, EffectivePolicy, PolicyOverride};

/// On-disk policy file layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default)]
    pub global: BudgetPolicy,

    /// Endpoint pattern (exact path or glob) to partial override
    #[serde(default)]
    pub endpoints: BTreeMap<String, PolicyOverride>,
}

impl PolicyDocument {
    /// Parse a YAML policy document
    pub fn parse(yaml: &str) -> Result<Self, PolicyLoadError> {
        if yaml.trim().is_empty() {
            return Err(PolicyLoadError::Empty);
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[derive(Debug)]
struct CompiledOverride {
    pattern_text: String,
    pattern: Pattern,
    policy: PolicyOverride,
}

/// Immutable, validated policy set
#[derive(Debug)]
pub struct PolicySnapshot {
    pub version: u64,
    pub global: BudgetPolicy,
    overrides: Vec<CompiledOverride>,
}

impl PolicySnapshot {
    /// Validate a document and compile its endpoint patterns.
    ///
    /// Every override is checked merged onto the global policy, so an
    /// override can never produce an inconsistent effective policy.
    pub fn compile(document: PolicyDocument, version: u64) -> Result<Self, PolicyLoadError> {
        document
            .global
            .validate()
            .map_err(|source| PolicyLoadError::Invalid {
                scope: "global".to_string(),
                source,
            })?;

        let mut overrides = Vec::with_capacity(document.endpoints.len());
        for (pattern_text, policy) in document.endpoints {
            if policy.is_empty() {
                warn!(pattern = %pattern_text, "endpoint override sets no fields, ignoring");
                continue;
            }
            let pattern = Pattern::new(&pattern_text).map_err(|e| PolicyLoadError::Pattern {
                pattern: pattern_text.clone(),
                message: e.msg.to_string(),
            })?;

            document
                .global
                .merged_with(&policy)
                .validate()
                .map_err(|source| PolicyLoadError::Invalid {
                    scope: pattern_text.clone(),
                    source,
                })?;

            overrides.push(CompiledOverride {
                pattern_text,
                pattern,
                policy,
            });
        }

        Ok(Self {
            version,
            global: document.global,
            overrides,
        })
    }

    /// Effective policy for a request path.
    ///
    /// An exact pattern match wins; otherwise the longest matching glob.
    pub fn resolve(&self, endpoint: &str) -> EffectivePolicy {
        let exact = self
            .overrides
            .iter()
            .find(|o| o.pattern_text == endpoint);

        let matched = exact.or_else(|| {
            self.overrides
                .iter()
                .filter(|o| o.pattern.matches(endpoint))
                .max_by_key(|o| o.pattern_text.len())
        });

        match matched {
            Some(over) => self.global.merged_with(&over.policy),
            None => self.global.clone(),
        }
    }

    pub fn override_patterns(&self) -> Vec<&str> {
        self.overrides.iter().map(|o| o.pattern_text.as_str()).collect()
    }
}

/// Lifecycle state of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Loaded,
    Reloading,
}

/// Current policy plus hot reload from a backing file
pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
    path: Option<PathBuf>,
    reloading: AtomicBool,
    next_version: AtomicU64,
    reload_lock: Mutex<()>,
}

impl PolicyStore {
    /// Store serving the hard-coded defaults with no backing file
    pub fn with_defaults() -> Self {
        Self::build(None)
    }

    /// Store backed by `path`.
    ///
    /// Starts from the defaults and attempts an initial load; a missing or
    /// invalid file is logged and the defaults stay in force.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let store = Self::build(Some(path.into()));
        if let Err(e) = store.reload() {
            error!("Initial policy load failed, serving defaults: {}", e);
        }
        store
    }

    fn build(path: Option<PathBuf>) -> Self {
        let defaults = PolicySnapshot {
            version: 0,
            global: BudgetPolicy::default(),
            overrides: Vec::new(),
        };
        Self {
            current: ArcSwap::from_pointee(defaults),
            path,
            reloading: AtomicBool::new(false),
            next_version: AtomicU64::new(1),
            reload_lock: Mutex::new(()),
        }
    }

    /// Effective policy for an endpoint; never blocks on a reload
    pub fn resolve(&self, endpoint: &str) -> EffectivePolicy {
        self.current.load().resolve(endpoint)
    }

    /// Current snapshot, for callers that need several consistent reads
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    pub fn state(&self) -> PolicyState {
        if self.reloading.load(Ordering::Acquire) {
            PolicyState::Reloading
        } else {
            PolicyState::Loaded
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the backing file and swap in the new policy.
    ///
    /// On failure the previous snapshot is retained and the error returned
    /// for logging.
    pub fn reload(&self) -> Result<u64, PolicyLoadError> {
        let path = self.path.as_ref().ok_or(PolicyLoadError::NoPath)?;
        let _guard = self.reload_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.reloading.store(true, Ordering::Release);

        let result = std::fs::read_to_string(path)
            .map_err(|source| PolicyLoadError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|yaml| self.swap_from_yaml(&yaml));

        self.reloading.store(false, Ordering::Release);
        result
    }

    /// Replace the policy from YAML text
    pub fn apply_yaml(&self, yaml: &str) -> Result<u64, PolicyLoadError> {
        let _guard = self.reload_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.swap_from_yaml(yaml)
    }

    fn swap_from_yaml(&self, yaml: &str) -> Result<u64, PolicyLoadError> {
        let document = PolicyDocument::parse(yaml)?;
        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        let snapshot = PolicySnapshot::compile(document, version)?;

        debug!(
            version,
            overrides = snapshot.overrides.len(),
            "compiled policy snapshot"
        );
        self.current.store(Arc::new(snapshot));
        info!(version, "Budget policy loaded");
        Ok(version)
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}
