//! Identities of tracked resources and reconcile keys

use std::fmt;
use std::str::FromStr;

use kube::{Resource, ResourceExt};

use crate::crd::ObjectReference;
use crate::Error;

/// Identity of any resource a reconciler may depend on
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    /// API group (empty for the core group)
    pub group: String,
    /// Resource kind
    pub kind: String,
    /// Namespace, absent for cluster-scoped resources
    pub namespace: Option<String>,
    /// Resource name
    pub name: String,
}

impl ObjectIdentity {
    /// Identity of a cached object
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self {
            group: K::group(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }

    /// Identity a reference points at, resolved against a kind's group
    ///
    /// An empty kind on the reference defaults to `K`'s kind.
    pub fn from_reference<K: Resource<DynamicType = ()>>(reference: &ObjectReference) -> Self {
        let kind = if reference.kind.is_empty() {
            K::kind(&()).into_owned()
        } else {
            reference.kind.clone()
        };
        Self {
            group: K::group(&()).into_owned(),
            kind,
            namespace: reference.namespace.clone(),
            name: reference.name.clone(),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{} {}/{}", self.kind, self.group, ns, self.name),
            None => write!(f, "{}.{} {}", self.kind, self.group, self.name),
        }
    }
}

/// Reconcile key: `name` for cluster-scoped resources, `namespace/name` otherwise
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, absent for cluster-scoped resources
    pub namespace: Option<String>,
    /// Resource name
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster-scoped resource
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a namespaced resource
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cached object
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster(*name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::namespaced(*ns, *name)),
            _ => Err(Error::validation(format!("unexpected key format: {s:?}"))),
        }
    }
}
