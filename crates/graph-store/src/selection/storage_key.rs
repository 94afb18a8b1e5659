use serde_json::Value;

use super::{Argument, ArgumentValue, Variables};

/// Builds the key a field is stored under in its record: the field name alone when it has no
/// (non-null) arguments, `name(a:1,b:"x")` otherwise. Arguments are sorted by name and object
/// values are encoded with sorted keys, so selections that spell the same arguments in a
/// different order land on the same key.
pub fn format_storage_key(name: &str, arguments: &Variables) -> String {
    let mut arguments = arguments.iter().filter(|(_, value)| !value.is_null()).collect::<Vec<_>>();
    if arguments.is_empty() {
        return name.to_string();
    }
    arguments.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

    let mut key = String::with_capacity(name.len() + 16 * arguments.len());
    key.push_str(name);
    key.push('(');
    for (index, (argument, value)) in arguments.into_iter().enumerate() {
        if index != 0 {
            key.push(',');
        }
        key.push_str(argument);
        key.push(':');
        stable_stringify(value, &mut key);
    }
    key.push(')');
    key
}

/// Resolves `arguments` against `variables`. A variable that isn't provided resolves to null.
pub fn argument_values(arguments: &[Argument], variables: &Variables) -> Variables {
    arguments
        .iter()
        .map(|argument| (argument.name.clone(), argument.value.resolve(variables)))
        .collect()
}

impl ArgumentValue {
    pub fn resolve(&self, variables: &Variables) -> Value {
        match self {
            ArgumentValue::Literal(value) => value.clone(),
            ArgumentValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        }
    }
}

/// JSON encoding with object keys sorted, independent of insertion order.
pub(crate) fn stable_stringify(value: &Value, output: &mut String) {
    match value {
        Value::Object(object) => {
            let mut entries = object.iter().collect::<Vec<_>>();
            entries.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

            output.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index != 0 {
                    output.push(',');
                }
                output.push_str(&Value::String(key.clone()).to_string());
                output.push(':');
                stable_stringify(value, output);
            }
            output.push('}');
        }
        Value::Array(items) => {
            output.push('[');
            for (index, item) in items.iter().enumerate() {
                if index != 0 {
                    output.push(',');
                }
                stable_stringify(item, output);
            }
            output.push(']');
        }
        scalar => output.push_str(&scalar.to_string()),
    }
}
