use crate::domain::Eui64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant/partition id scoping both storage tables and the in-memory registry
pub type NamespaceId = i64;

/// Persisted identity of a tracking device within one namespace
///
/// Always built through [`DeviceIdentity::new`], so `id` is derived from
/// `address` and the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    address: Eui64,
    id: i64,
    namespace: NamespaceId,
}

impl DeviceIdentity {
    pub fn new(address: Eui64, namespace: NamespaceId) -> Self {
        Self {
            address,
            id: address.id(),
            namespace,
        }
    }

    /// Rebuild an identity from its stored numeric id
    pub fn from_id(id: i64, namespace: NamespaceId) -> Self {
        Self::new(Eui64::from_id(id), namespace)
    }

    pub fn address(&self) -> Eui64 {
        self.address
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracker:{}:{}", self.address, self.id)
    }
}
