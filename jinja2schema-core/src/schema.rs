//! Projects an inferred [`Structural`] value onto a JSON Schema
//! (Draft-4-ish) document (`spec.md` §4.G, §6).

use serde_json::{json, Map, Value};

use crate::config::{Config, TupleSchema};
use crate::types::{ScalarLiteral, Structural};

/// The JSON type a *constant* scalar literal narrows to. Only called
/// once a literal value is actually in hand; a non-constant scalar has
/// no single type to report and instead projects as [`scalar_union`].
fn scalar_json_type(value: &ScalarLiteral) -> &'static str {
    match value {
        ScalarLiteral::Bool(_) => "boolean",
        ScalarLiteral::Num(n) => {
            if n.contains('.') || n.contains('e') || n.contains('E') {
                "number"
            } else {
                "integer"
            }
        }
        ScalarLiteral::Str(_) => "string",
    }
}

/// The schema for "some scalar, kind unknown": every JSON leaf type
/// except array/object (`spec.md` §4.G — both `Scalar` without a
/// constant literal and `Unknown` project onto this union).
fn scalar_union() -> Value {
    json!([
        {"type": "string"},
        {"type": "number"},
        {"type": "boolean"},
        {"type": "null"},
    ])
}

/// Builds the JSON Schema object tree for a single structural value.
/// `required` is left to the caller (a `Dictionary`'s own projection
/// emits it for its fields); this function only describes `self`.
pub fn to_schema(value: &Structural, config: &Config) -> Value {
    let mut obj = Map::new();
    if let Some(label) = &value.meta().label {
        obj.insert("title".to_string(), Value::String(label.clone()));
    }

    match value {
        Structural::Unknown(_) => {
            obj.insert("anyOf".to_string(), scalar_union());
        }
        Structural::Scalar(meta, literal) => match (meta.constant, literal) {
            (true, Some(lit)) => {
                obj.insert(
                    "type".to_string(),
                    Value::String(scalar_json_type(lit).to_string()),
                );
                if let ScalarLiteral::Str(s) = lit {
                    obj.insert("enum".to_string(), json!([s]));
                }
            }
            _ => {
                obj.insert("anyOf".to_string(), scalar_union());
            }
        },
        Structural::List(elem, _) => {
            obj.insert("type".to_string(), Value::String("array".to_string()));
            obj.insert("items".to_string(), to_schema(elem, config));
        }
        Structural::Tuple(items, _) => {
            obj.insert("type".to_string(), Value::String("array".to_string()));
            match config.tuple_schema {
                TupleSchema::Homogeneous => {
                    let variants: Vec<Value> =
                        items.iter().map(|item| to_schema(item, config)).collect();
                    obj.insert("items".to_string(), json!({ "anyOf": variants }));
                }
                TupleSchema::FixedArity => {
                    obj.insert(
                        "items".to_string(),
                        Value::Array(items.iter().map(|item| to_schema(item, config)).collect()),
                    );
                    obj.insert("minItems".to_string(), json!(items.len()));
                    obj.insert("maxItems".to_string(), json!(items.len()));
                }
            }
        }
        Structural::Dictionary(fields, _) => {
            obj.insert("type".to_string(), Value::String("object".to_string()));
            let mut properties = Map::new();
            let mut required = Vec::new();
            for (name, field) in fields {
                properties.insert(name.clone(), to_schema(field, config));
                if field.required() {
                    required.push(Value::String(name.clone()));
                }
            }
            obj.insert("properties".to_string(), Value::Object(properties));
            if !required.is_empty() {
                obj.insert("required".to_string(), Value::Array(required));
            }
        }
    }

    Value::Object(obj)
}

/// Same projection, serialized to a compact single-line JSON string.
pub fn to_schema_string(value: &Structural, config: &Config) -> String {
    to_schema(value, config).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn nonconstant_scalar_is_a_scalar_type_union() {
        let s = Structural::scalar_at(1);
        let schema = to_schema(&s, &Config::default());
        let any_of = schema["anyOf"].as_array().unwrap();
        assert_eq!(any_of.len(), 4);
        assert!(schema.get("type").is_none());
    }

    #[test]
    fn unknown_is_also_a_scalar_type_union() {
        let u = Structural::unknown_at(1);
        let schema = to_schema(&u, &Config::default());
        let any_of = schema["anyOf"].as_array().unwrap();
        assert_eq!(any_of.len(), 4);
    }

    #[test]
    fn dictionary_lists_only_required_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Structural::scalar_at(1));
        fields.insert(
            "nickname".to_string(),
            Structural::scalar_at(1).set_required(false),
        );
        let dict = Structural::dict_at(1, fields);
        let schema = to_schema(&dict, &Config::default());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "name");
    }

    #[test]
    fn tuple_gets_fixed_arity_by_default() {
        let tup = Structural::tuple_at(1, vec![Structural::scalar_at(1), Structural::scalar_at(1)]);
        let schema = to_schema(&tup, &Config::default());
        assert_eq!(schema["minItems"], 2);
        assert_eq!(schema["maxItems"], 2);
    }

    #[test]
    fn tuple_gets_a_single_anyof_items_schema_when_configured_homogeneous() {
        let tup = Structural::tuple_at(1, vec![Structural::scalar_at(1), Structural::scalar_at(1)]);
        let mut config = Config::default();
        config.tuple_schema = TupleSchema::Homogeneous;
        let schema = to_schema(&tup, &config);
        assert!(schema.get("minItems").is_none());
        let variants = schema["items"]["anyOf"].as_array().unwrap();
        assert_eq!(variants.len(), 2);
    }
}
