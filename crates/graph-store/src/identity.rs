use std::{cmp::Ordering, fmt};

use internment::ArcIntern;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of the root record every operation is read from and written into.
pub const ROOT_ID: &str = "client:root";

/// Typename carried by the root record.
pub const ROOT_TYPE: &str = "__Root";

const CLIENT_ID_PREFIX: &str = "client:";

/// Opaque identity naming one record of the graph.
///
/// Identities are interned: cloning is a reference count bump and equality is a
/// pointer comparison, which matters because every link between records is an
/// identity and the reader compares them constantly.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DataId(ArcIntern<String>);

impl DataId {
    pub fn new(id: impl Into<String>) -> Self {
        DataId(ArcIntern::new(id.into()))
    }

    pub fn root() -> Self {
        DataId::new(ROOT_ID)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_root(&self) -> bool {
        self.as_str() == ROOT_ID
    }

    /// Whether this identity was generated on the client rather than provided by the server.
    pub fn is_client(&self) -> bool {
        self.as_str().starts_with(CLIENT_ID_PREFIX)
    }

    /// Derives the identity of an object that has no server identity from its position in the
    /// graph. The same `(parent, storage_key, index)` always yields the same identity, which is
    /// what makes normalizing the same payload twice idempotent.
    pub fn client(parent: &DataId, storage_key: &str, index: Option<usize>) -> Self {
        let mut id = String::with_capacity(parent.as_str().len() + storage_key.len() + 16);
        if !parent.is_client() {
            id.push_str(CLIENT_ID_PREFIX);
        }
        id.push_str(parent.as_str());
        id.push(':');
        id.push_str(storage_key);
        if let Some(index) = index {
            id.push(':');
            id.push_str(&index.to_string());
        }
        DataId::new(id)
    }
}

impl PartialOrd for DataId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({:?})", self.as_str())
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        DataId::new(value)
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        DataId::new(value)
    }
}

impl Serialize for DataId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(DataId::new)
    }
}
