//! Compiled selection trees.
//!
//! The query compiler is not part of this crate: it produces these trees from fragment and
//! operation documents and hands them to the store. Every algorithm of the store (reading,
//! normalizing, diffing, marking for collection) is one exhaustive match over [`Selection`].

mod storage_key;

use std::{borrow::Cow, fmt, sync::Arc};

use serde_json::Value;

pub use self::storage_key::{argument_values, format_storage_key};
pub(crate) use self::storage_key::stable_stringify;
use crate::resolver::Resolver;

/// Request-level or fragment-level variables.
pub type Variables = serde_json::Map<String, Value>;

/// A shared list of selections. Subtrees are shared rather than copied so that placeholders,
/// collection work lists and diffs can keep a handle on them cheaply.
pub type Selections = Arc<[Selection]>;

#[derive(Debug, Clone)]
pub enum Selection {
    ScalarField(ScalarField),
    LinkedField(LinkedField),
    /// Selections applying only when the record's type matches.
    InlineFragment(InlineFragment),
    /// A named fragment. Readers get a fragment reference, writers traverse it inline.
    FragmentSpread(FragmentSpread),
    /// `@include`/`@skip`.
    Condition(Condition),
    RequiredField(RequiredField),
    CatchField(CatchField),
    /// Client-only fields: never fetched, never reported as missing.
    ClientExtension(ClientExtension),
    Defer(Defer),
    Stream(Stream),
    ResolverField(ResolverField),
}

impl Selection {
    /// The application name of the field this selection (or the field it wraps) is written
    /// under in the response, if it is a field at all.
    pub fn response_key(&self) -> Option<&str> {
        match self {
            Selection::ScalarField(field) => Some(field.response_key()),
            Selection::LinkedField(field) => Some(field.response_key()),
            Selection::ResolverField(field) => Some(field.response_key()),
            Selection::RequiredField(RequiredField { field, .. })
            | Selection::CatchField(CatchField { field, .. })
            | Selection::Stream(Stream { field, .. }) => field.response_key(),
            Selection::InlineFragment(_)
            | Selection::FragmentSpread(_)
            | Selection::Condition(_)
            | Selection::ClientExtension(_)
            | Selection::Defer(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: ArgumentValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Literal(Value),
    Variable(String),
}

impl Argument {
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Argument {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Argument {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// Common accessors of the selections that are actual fields.
pub trait Field {
    fn alias(&self) -> Option<&str>;
    fn name(&self) -> &str;
    fn arguments(&self) -> &[Argument];

    /// Key of this field in payloads and in read data.
    fn response_key(&self) -> &str {
        self.alias().unwrap_or_else(|| self.name())
    }

    /// Key of this field in records.
    fn storage_key(&self, variables: &Variables) -> Cow<'_, str> {
        if self.arguments().is_empty() {
            return Cow::Borrowed(self.name());
        }
        Cow::Owned(format_storage_key(
            self.name(),
            &argument_values(self.arguments(), variables),
        ))
    }
}

macro_rules! impl_field {
    ($($ty:ty),*) => {
        $(
            impl Field for $ty {
                fn alias(&self) -> Option<&str> {
                    self.alias.as_deref()
                }

                fn name(&self) -> &str {
                    &self.name
                }

                fn arguments(&self) -> &[Argument] {
                    &self.arguments
                }
            }

            impl $ty {
                pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
                    self.alias = Some(alias.into());
                    self
                }

                pub fn with_argument(mut self, argument: Argument) -> Self {
                    self.arguments.push(argument);
                    self
                }
            }
        )*
    };
}

impl_field!(ScalarField, LinkedField, ResolverField);

#[derive(Debug, Clone)]
pub struct ScalarField {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl ScalarField {
    pub fn new(name: impl Into<String>) -> Self {
        ScalarField {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkedField {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    /// Set when the field's type is an object type. Abstract fields take their type from the
    /// payload's `__typename`.
    pub concrete_type: Option<String>,
    pub plural: bool,
    /// The payload must carry a server identity for this entity.
    pub requires_id: bool,
    pub selections: Selections,
}

impl LinkedField {
    pub fn new(name: impl Into<String>, selections: impl Into<Selections>) -> Self {
        LinkedField {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            concrete_type: None,
            plural: false,
            requires_id: false,
            selections: selections.into(),
        }
    }

    pub fn plural(mut self) -> Self {
        self.plural = true;
        self
    }

    pub fn concrete_type(mut self, typename: impl Into<String>) -> Self {
        self.concrete_type = Some(typename.into());
        self
    }

    pub fn requires_id(mut self) -> Self {
        self.requires_id = true;
        self
    }

    pub(crate) fn with_selections(&self, selections: Selections) -> Self {
        LinkedField {
            selections,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlineFragment {
    pub type_condition: String,
    pub selections: Selections,
}

impl InlineFragment {
    pub fn new(type_condition: impl Into<String>, selections: impl Into<Selections>) -> Self {
        InlineFragment {
            type_condition: type_condition.into(),
            selections: selections.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FragmentSpread {
    pub fragment: Arc<Fragment>,
    pub arguments: Vec<Argument>,
}

impl FragmentSpread {
    pub fn new(fragment: Arc<Fragment>) -> Self {
        FragmentSpread {
            fragment,
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Variables the spread fragment sees: the parent's, overridden by the fragment's argument
    /// defaults, overridden by the arguments passed at the spread.
    pub fn fragment_variables(&self, parent: &Variables) -> Variables {
        let mut variables = parent.clone();
        for definition in &self.fragment.argument_definitions {
            if let Some(default) = &definition.default_value {
                variables.insert(definition.name.clone(), default.clone());
            }
        }
        variables.extend(argument_values(&self.arguments, parent));
        variables
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub variable: String,
    /// `true` for `@include(if: $variable)`, `false` for `@skip(if: $variable)`.
    pub passing_value: bool,
    pub selections: Selections,
}

impl Condition {
    pub fn include(variable: impl Into<String>, selections: impl Into<Selections>) -> Self {
        Condition {
            variable: variable.into(),
            passing_value: true,
            selections: selections.into(),
        }
    }

    pub fn skip(variable: impl Into<String>, selections: impl Into<Selections>) -> Self {
        Condition {
            variable: variable.into(),
            passing_value: false,
            selections: selections.into(),
        }
    }

    pub fn passes(&self, variables: &Variables) -> bool {
        let value = variables.get(&self.variable).and_then(Value::as_bool).unwrap_or(false);
        value == self.passing_value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RequiredAction {
    /// The read fails.
    Throw,
    /// The failure is logged and reported on the snapshot.
    Log,
    /// Nothing is reported.
    None,
}

/// `@required`: a null value of the wrapped field nulls out the enclosing object instead, and
/// depending on the action fails the read.
#[derive(Debug, Clone)]
pub struct RequiredField {
    pub field: Arc<Selection>,
    pub action: RequiredAction,
    /// Response path of the field as annotated by the compiler, e.g. `me.name`.
    pub path: String,
}

impl RequiredField {
    pub fn new(field: impl Into<Selection>, action: RequiredAction, path: impl Into<String>) -> Self {
        RequiredField {
            field: Arc::new(field.into()),
            action,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CatchTo {
    /// Errors below turn the field into a plain null.
    Null,
    /// The field reads as `{"ok": true, "value": ...}` or `{"ok": false, "errors": [...]}`.
    Result,
}

/// `@catch`: a boundary stopping field errors and required-field failures from propagating.
#[derive(Debug, Clone)]
pub struct CatchField {
    pub field: Arc<Selection>,
    pub to: CatchTo,
    pub path: String,
}

impl CatchField {
    pub fn new(field: impl Into<Selection>, to: CatchTo, path: impl Into<String>) -> Self {
        CatchField {
            field: Arc::new(field.into()),
            to,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientExtension {
    pub selections: Selections,
}

impl ClientExtension {
    pub fn new(selections: impl Into<Selections>) -> Self {
        ClientExtension {
            selections: selections.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Defer {
    pub label: String,
    /// Deferral only happens when this variable is true. `None` means always.
    pub if_variable: Option<String>,
    pub selections: Selections,
}

impl Defer {
    pub fn new(label: impl Into<String>, selections: impl Into<Selections>) -> Self {
        Defer {
            label: label.into(),
            if_variable: None,
            selections: selections.into(),
        }
    }

    pub fn is_active(&self, variables: &Variables) -> bool {
        is_active(self.if_variable.as_deref(), variables)
    }
}

#[derive(Debug, Clone)]
pub struct Stream {
    pub label: String,
    pub if_variable: Option<String>,
    /// The plural field being streamed.
    pub field: Arc<Selection>,
}

impl Stream {
    pub fn new(label: impl Into<String>, field: impl Into<Selection>) -> Self {
        Stream {
            label: label.into(),
            if_variable: None,
            field: Arc::new(field.into()),
        }
    }

    pub fn is_active(&self, variables: &Variables) -> bool {
        is_active(self.if_variable.as_deref(), variables)
    }
}

fn is_active(if_variable: Option<&str>, variables: &Variables) -> bool {
    match if_variable {
        Some(variable) => variables.get(variable).and_then(Value::as_bool).unwrap_or(false),
        None => true,
    }
}

/// A field computed on the client by an external pure function over data read from the record.
#[derive(Clone)]
pub struct ResolverField {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    /// Data the resolver reads from the record it is selected on.
    pub fragment: Option<Arc<Fragment>>,
    pub resolver: Arc<dyn Resolver>,
}

impl ResolverField {
    pub fn new(name: impl Into<String>, fragment: Option<Arc<Fragment>>, resolver: Arc<dyn Resolver>) -> Self {
        ResolverField {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            fragment,
            resolver,
        }
    }
}

impl fmt::Debug for ResolverField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverField")
            .field("alias", &self.alias)
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("fragment", &self.fragment.as_ref().map(|fragment| &fragment.name))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub default_value: Option<Value>,
}

/// A named selection tree on a type: a fragment, or the root of an operation.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub name: String,
    pub type_condition: String,
    pub argument_definitions: Vec<ArgumentDefinition>,
    pub selections: Selections,
}

impl Fragment {
    pub fn new(name: impl Into<String>, type_condition: impl Into<String>, selections: impl Into<Selections>) -> Self {
        Fragment {
            name: name.into(),
            type_condition: type_condition.into(),
            argument_definitions: Vec::new(),
            selections: selections.into(),
        }
    }

    pub fn argument_definition(mut self, name: impl Into<String>, default_value: Option<Value>) -> Self {
        self.argument_definitions.push(ArgumentDefinition {
            name: name.into(),
            default_value,
        });
        self
    }

    pub(crate) fn with_selections(&self, selections: Selections) -> Self {
        Fragment {
            selections,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub variable_definitions: Vec<ArgumentDefinition>,
    /// Selections on the root record.
    pub root: Arc<Fragment>,
}

impl Operation {
    pub fn query(name: impl Into<String>, selections: impl Into<Selections>) -> Self {
        Self::new(OperationKind::Query, name, selections)
    }

    pub fn mutation(name: impl Into<String>, selections: impl Into<Selections>) -> Self {
        Self::new(OperationKind::Mutation, name, selections)
    }

    pub fn new(kind: OperationKind, name: impl Into<String>, selections: impl Into<Selections>) -> Self {
        let name = name.into();
        let type_condition = match kind {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        };
        Operation {
            root: Arc::new(Fragment::new(name.clone(), type_condition, selections)),
            name,
            kind,
            variable_definitions: Vec::new(),
        }
    }

    pub fn variable_definition(mut self, name: impl Into<String>, default_value: Option<Value>) -> Self {
        self.variable_definitions.push(ArgumentDefinition {
            name: name.into(),
            default_value,
        });
        self
    }
}

macro_rules! impl_into_selection {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Selection {
                fn from(value: $variant) -> Self {
                    Selection::$variant(value)
                }
            }
        )*
    };
}

impl_into_selection!(
    ScalarField,
    LinkedField,
    InlineFragment,
    FragmentSpread,
    Condition,
    RequiredField,
    CatchField,
    ClientExtension,
    Defer,
    Stream,
    ResolverField
);
