//! Configuration options (`spec.md` §6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::FilterSignature;

/// Kind attributed to an integer- or variable-indexed subscript when
/// the base isn't otherwise constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexedVariableType {
    List,
    Tuple,
    Dictionary,
    Any,
}

impl Default for IndexedVariableType {
    fn default() -> Self {
        IndexedVariableType::List
    }
}

/// How a `Tuple` shape projects onto JSON Schema (`spec.md` §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TupleSchema {
    /// `items` is an array of per-slot schemas, with matching
    /// `minItems`/`maxItems` — the shape is a fixed-arity record.
    FixedArity,
    /// `items` is a single schema, an `anyOf` over every slot's shape —
    /// the shape is treated as a homogeneous array instead.
    Homogeneous,
}

impl Default for TupleSchema {
    fn default() -> Self {
        TupleSchema::FixedArity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub type_of_variable_indexed_with_integer: IndexedVariableType,
    pub type_of_variable_indexed_with_variable: IndexedVariableType,
    pub package_object_can_be_extended: bool,
    pub raise_on_invalid_filter_argument: bool,
    #[serde(skip)]
    pub custom_filters: BTreeMap<String, FilterSignature>,
    pub boolean_conditions: bool,
    /// Recursion depth past which `infer` switches from the recursive
    /// visitor to an explicit work stack (`spec.md` §5).
    pub max_recursion_depth: usize,
    pub tuple_schema: TupleSchema,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            type_of_variable_indexed_with_integer: IndexedVariableType::List,
            type_of_variable_indexed_with_variable: IndexedVariableType::List,
            package_object_can_be_extended: false,
            raise_on_invalid_filter_argument: false,
            custom_filters: BTreeMap::new(),
            boolean_conditions: true,
            max_recursion_depth: 256,
            tuple_schema: TupleSchema::FixedArity,
        }
    }
}
