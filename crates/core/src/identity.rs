//! Logical identities used to key staged desired state.
//!
//! A [`ResourceIdent`] names one slot owned by one provider for one purpose.
//! The slot's concrete object type is carried alongside the key so that every
//! operation can be checked against it in a single place.

use std::any::TypeId;
use std::fmt;

use kube::core::GroupVersionKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Any typed Kubernetes object that can be staged in the object cache.
pub trait CacheObject:
    kube::Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> CacheObject for K where
    K: kube::Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Addressing key in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Key of an existing object, taken from its metadata.
    pub fn of<K: kube::Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// `None` for cluster-scoped keys.
    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() { None } else { Some(self.namespace.as_str()) }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// Exactly one staged object.
    Single,
    /// An open, insertion-ordered set of staged objects.
    Multi,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Single => f.write_str("single"),
            Cardinality::Multi => f.write_str("multi"),
        }
    }
}

/// Concrete object type bound to an identity.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    gvk: GroupVersionKind,
}

impl TypeDescriptor {
    pub fn of<K: CacheObject>() -> Self {
        Self {
            type_id: TypeId::of::<K>(),
            type_name: std::any::type_name::<K>(),
            gvk: GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&())),
        }
    }

    pub fn is<K: CacheObject>(&self) -> bool {
        self.type_id == TypeId::of::<K>()
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Fully qualified Rust type name, e.g. `k8s_openapi::api::core::v1::Service`.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Key in the `v1/Kind` or `group/v1/Kind` form.
    pub fn gvk_key(&self) -> String {
        gvk_key(&self.gvk)
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Map key for one identity slot. The type is deliberately not part of it:
/// two idents that differ only in type collide, and the cache reports the mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentKey {
    pub provider: String,
    pub purpose: String,
    pub cardinality: Cardinality,
}

impl fmt::Display for IdentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.provider, self.purpose, self.cardinality)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdent {
    key: IdentKey,
    ty: TypeDescriptor,
}

impl ResourceIdent {
    pub fn single<K: CacheObject>(provider: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self::new::<K>(provider, purpose, Cardinality::Single)
    }

    pub fn multi<K: CacheObject>(provider: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self::new::<K>(provider, purpose, Cardinality::Multi)
    }

    fn new<K: CacheObject>(provider: impl Into<String>, purpose: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            key: IdentKey { provider: provider.into(), purpose: purpose.into(), cardinality },
            ty: TypeDescriptor::of::<K>(),
        }
    }

    pub fn key(&self) -> &IdentKey {
        &self.key
    }

    pub fn cardinality(&self) -> Cardinality {
        self.key.cardinality
    }

    pub fn declared_type(&self) -> &TypeDescriptor {
        &self.ty
    }
}

impl fmt::Display for ResourceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.key, self.ty)
    }
}
