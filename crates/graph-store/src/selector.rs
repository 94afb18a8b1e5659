use std::{fmt, hash::Hash, sync::Arc};

use serde_json::Value;

use crate::{
    identity::DataId,
    selection::{stable_stringify, Fragment, Operation, Variables},
};

/// Key of the identity in a fragment reference.
pub const FRAGMENT_ID_KEY: &str = "__id";
/// Key of the fragment map in a fragment reference.
pub const FRAGMENTS_KEY: &str = "__fragments";

/// A selection tree applied to one identity with a set of variables: the unit the reader, the
/// normalizer and the differ work on.
#[derive(Clone)]
pub struct Selector {
    pub node: Arc<Fragment>,
    pub data_id: DataId,
    pub variables: Arc<Variables>,
    /// The request whose response this selector's data came from, when it is known.
    pub owner: Option<RequestDescriptor>,
}

impl Selector {
    pub fn new(node: Arc<Fragment>, data_id: DataId, variables: Variables) -> Self {
        Selector {
            node,
            data_id,
            variables: Arc::new(variables),
            owner: None,
        }
    }

    /// Builds the selector for `fragment` out of a fragment reference produced by the reader for
    /// a spread of that fragment.
    pub fn from_fragment_ref(fragment: Arc<Fragment>, reference: &Value) -> Option<Self> {
        let data_id = reference.get(FRAGMENT_ID_KEY)?.as_str()?;
        let variables = reference
            .get(FRAGMENTS_KEY)?
            .get(&fragment.name)?
            .as_object()
            .cloned()
            .unwrap_or_default();

        Some(Selector::new(fragment, DataId::new(data_id), variables))
    }

    pub fn with_owner(mut self, owner: RequestDescriptor) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) && self.data_id == other.data_id && self.variables == other.variables
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("node", &self.node.name)
            .field("data_id", &self.data_id)
            .field("variables", &self.variables)
            .finish()
    }
}

/// Identifies a request: the operation together with its variables.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub identifier: String,
    pub name: String,
    pub variables: Arc<Variables>,
}

impl RequestDescriptor {
    fn new(name: &str, variables: Arc<Variables>) -> Self {
        let mut encoded = String::new();
        stable_stringify(&Value::Object((*variables).clone()), &mut encoded);

        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        // NULL byte as separator, it can't appear in an operation name.
        hasher.update(&[0x00]);
        hasher.update(encoded.as_bytes());

        RequestDescriptor {
            identifier: hasher.finalize().to_hex().to_string(),
            name: name.to_string(),
            variables,
        }
    }
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for RequestDescriptor {}

impl Hash for RequestDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

/// An operation bound to its variables: what gets fetched, written, retained and checked.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub operation: Arc<Operation>,
    pub request: RequestDescriptor,
    /// The operation's selections on the root record.
    pub root: Selector,
}

impl OperationDescriptor {
    pub fn new(operation: Arc<Operation>, mut variables: Variables) -> Self {
        for definition in &operation.variable_definitions {
            if variables.contains_key(&definition.name) {
                continue;
            }
            if let Some(default) = &definition.default_value {
                variables.insert(definition.name.clone(), default.clone());
            }
        }

        let variables = Arc::new(variables);
        let request = RequestDescriptor::new(&operation.name, Arc::clone(&variables));
        let root = Selector {
            node: Arc::clone(&operation.root),
            data_id: DataId::root(),
            variables,
            owner: Some(request.clone()),
        };

        OperationDescriptor {
            operation,
            request,
            root,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.request.identifier
    }
}
