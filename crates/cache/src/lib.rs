//! Corral object cache: typed, identity-keyed staging of desired state for
//! one reconcile pass, committed to the backing store with [`ObjectCache::apply_all`].
//!
//! Providers never see each other; they only agree on [`ResourceIdent`]s.
//! Each identity binds one concrete object type on first use and every later
//! call is checked against it in [`ObjectCache::check_type`].

#![forbid(unsafe_code)]

use std::any::Any;
use std::sync::Arc;

use corral_apply::UpsertAction;
use corral_core::{
    ApplyFailure, CacheObject, Cardinality, Error, IdentKey, NamespacedName, ResourceIdent, Result, StoreError,
    TypeDescriptor,
};
use corral_kubehub::ClusterStore;
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

/// Type-erased staged object. Recovered with an `Any` downcast after the
/// identity's registered type has been checked.
trait StagedObject: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn to_dynamic(&self) -> Result<DynamicObject, StoreError>;
}

impl<K: CacheObject> StagedObject for K {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_dynamic(&self) -> Result<DynamicObject, StoreError> {
        corral_kubehub::to_dynamic(self)
    }
}

struct Staged {
    name: NamespacedName,
    object: Box<dyn StagedObject>,
}

struct Entry {
    registered: TypeDescriptor,
    /// Insertion ordered; names unique.
    items: Vec<Staged>,
}

/// Per-entry result of an apply pass.
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub ident: IdentKey,
    pub name: NamespacedName,
    pub result: Result<UpsertAction, StoreError>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<EntryOutcome>,
}

impl ApplyReport {
    fn count(&self, action: UpsertAction) -> usize {
        self.outcomes.iter().filter(|o| matches!(o.result, Ok(a) if a == action)).count()
    }

    pub fn created(&self) -> usize {
        self.count(UpsertAction::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(UpsertAction::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(UpsertAction::Unchanged)
    }

    pub fn failures(&self) -> Vec<ApplyFailure> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Err(e) => Some(ApplyFailure { ident: o.ident.clone(), name: o.name.clone(), reason: e.to_string() }),
                Ok(_) => None,
            })
            .collect()
    }

    /// `Err(UpstreamApply)` listing every failed entry, if any failed.
    pub fn into_result(self) -> Result<ApplyReport> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::UpstreamApply { failures })
        }
    }
}

pub struct ObjectCache {
    store: Arc<dyn ClusterStore>,
    entries: FxHashMap<IdentKey, Entry>,
    /// Identity registration order, so apply passes are deterministic.
    order: Vec<IdentKey>,
}

impl ObjectCache {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store, entries: FxHashMap::default(), order: Vec::new() }
    }

    /// Backing-store client this cache commits to.
    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    /// Total number of staged objects across all identities.
    pub fn len(&self) -> usize {
        self.entries.values().map(|e| e.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, ident: &ResourceIdent) -> bool {
        self.entries.get(ident.key()).map(|e| !e.items.is_empty()).unwrap_or(false)
    }

    /// The single place where object types are checked: `K` must equal both the
    /// identity's declared type and the type registered by the first `create`.
    fn check_type<K: CacheObject>(&self, ident: &ResourceIdent) -> Result<()> {
        let found = TypeDescriptor::of::<K>();
        let expected = self.entries.get(ident.key()).map(|e| &e.registered).unwrap_or(ident.declared_type());
        for want in [expected, ident.declared_type()] {
            if *want != found {
                return Err(Error::TypeMismatch {
                    ident: ident.key().to_string(),
                    expected: want.type_name().to_string(),
                    found: found.type_name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn require(ident: &ResourceIdent, cardinality: Cardinality, reason: &'static str) -> Result<()> {
        if ident.cardinality() == cardinality {
            Ok(())
        } else {
            Err(Error::CardinalityViolation { ident: ident.key().to_string(), reason })
        }
    }

    fn not_found(ident: &ResourceIdent) -> Error {
        Error::NotFound { ident: ident.key().to_string(), name: None }
    }

    /// Stage `object` under `name`. The object's metadata name/namespace are set from `name`.
    pub fn create<K: CacheObject>(&mut self, ident: &ResourceIdent, name: &NamespacedName, object: &K) -> Result<()> {
        self.check_type::<K>(ident)?;
        if ident.cardinality() == Cardinality::Single && self.contains(ident) {
            return Err(Error::CardinalityViolation {
                ident: ident.key().to_string(),
                reason: "single identity already populated; use update",
            });
        }

        let staged = Staged { name: name.clone(), object: Box::new(stamp(object, name)) };
        let key = ident.key().clone();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Entry { registered: ident.declared_type().clone(), items: Vec::new() });
        match entry.items.iter_mut().find(|s| s.name == *name) {
            Some(slot) => *slot = staged,
            None => entry.items.push(staged),
        }
        debug!(ident = %ident, name = %name, "staged");
        Ok(())
    }

    /// Copy of the object staged for a single identity.
    pub fn get<K: CacheObject>(&self, ident: &ResourceIdent) -> Result<K> {
        self.check_type::<K>(ident)?;
        Self::require(ident, Cardinality::Single, "get requires a single identity")?;
        let staged = self.entries.get(ident.key()).and_then(|e| e.items.first()).ok_or_else(|| Self::not_found(ident))?;
        downcast::<K>(ident, staged)
    }

    /// Replace the object staged for a single identity wholesale.
    pub fn update<K: CacheObject>(&mut self, ident: &ResourceIdent, object: &K) -> Result<()> {
        self.check_type::<K>(ident)?;
        Self::require(ident, Cardinality::Single, "update requires a single identity")?;
        let staged = self
            .entries
            .get_mut(ident.key())
            .and_then(|e| e.items.first_mut())
            .ok_or_else(|| Self::not_found(ident))?;
        staged.object = Box::new(stamp(object, &staged.name));
        debug!(ident = %ident, name = %staged.name, "restaged");
        Ok(())
    }

    /// All objects staged for a multi identity, in insertion order.
    pub fn list<K: CacheObject>(&self, ident: &ResourceIdent) -> Result<Vec<K>> {
        self.check_type::<K>(ident)?;
        Self::require(ident, Cardinality::Multi, "list requires a multi identity")?;
        match self.entries.get(ident.key()) {
            Some(entry) => entry.items.iter().map(|s| downcast::<K>(ident, s)).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Upsert every staged object. Every entry is attempted; the report holds
    /// one outcome per entry.
    pub async fn apply_report(&self) -> ApplyReport {
        let t0 = std::time::Instant::now();
        let mut report = ApplyReport::default();
        for key in &self.order {
            let Some(entry) = self.entries.get(key) else { continue };
            for staged in &entry.items {
                let result = match staged.object.to_dynamic() {
                    Ok(obj) => corral_apply::upsert(self.store.as_ref(), &obj).await,
                    Err(e) => Err(e),
                };
                match &result {
                    Ok(UpsertAction::Created) => counter!("cache_apply_created", 1u64),
                    Ok(UpsertAction::Updated) => counter!("cache_apply_updated", 1u64),
                    Ok(UpsertAction::Unchanged) => counter!("cache_apply_unchanged", 1u64),
                    Err(e) => {
                        counter!("cache_apply_failed", 1u64);
                        warn!(ident = %key, name = %staged.name, error = %e, "apply failed");
                    }
                }
                report.outcomes.push(EntryOutcome { ident: key.clone(), name: staged.name.clone(), result });
            }
        }
        histogram!("cache_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            created = report.created(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            failed = report.outcomes.iter().filter(|o| o.result.is_err()).count(),
            "apply pass finished"
        );
        report
    }

    /// [`apply_report`](Self::apply_report) folded into one result: `UpstreamApply`
    /// naming every failed entry, or the full report.
    pub async fn apply_all(&self) -> Result<ApplyReport> {
        self.apply_report().await.into_result()
    }
}

fn stamp<K: CacheObject>(object: &K, name: &NamespacedName) -> K {
    let mut obj = object.clone();
    let meta = obj.meta_mut();
    meta.name = Some(name.name.clone());
    meta.namespace = name.namespace().map(str::to_string);
    obj
}

fn downcast<K: CacheObject>(ident: &ResourceIdent, staged: &Staged) -> Result<K> {
    staged.object.as_any().downcast_ref::<K>().cloned().ok_or_else(|| Error::TypeMismatch {
        ident: ident.key().to_string(),
        expected: ident.declared_type().type_name().to_string(),
        found: std::any::type_name::<K>().to_string(),
    })
}
