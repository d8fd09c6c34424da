//! The filter/test registry (`spec.md` §4.D): a declarative table of
//! builtin filter signatures, plus the small set of test names the
//! expression visitor treats specially.

use std::collections::{BTreeMap, HashSet};

/// What a filter requires its left-hand operand to look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Scalar,
    List,
    Dictionary,
    /// No constraint beyond what the syntactic position already demands.
    Any,
}

/// What shape a filter's result has, relative to its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Scalar,
    List,
    Dictionary,
    /// Same kind (and, for lists, same element type) as the input.
    SameAsInput,
    /// The element type of a list/dict input (e.g. `first`, `last`).
    ElementOfInput,
    /// A list whose elements are themselves lists (`batch`, `slice`).
    ListOfList,
}

/// A single positional or keyword argument a filter/test accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Scalar,
    Any,
}

#[derive(Debug, Clone)]
pub struct FilterSignature {
    pub input: InputKind,
    /// For list-accepting filters, a constraint on the element type
    /// (e.g. `sum` requires numeric scalar elements).
    pub element_constraint: Option<InputKind>,
    pub result: ResultKind,
    pub args: Vec<ArgKind>,
    /// `default(...)`: the result keeps the input's shape but is no
    /// longer required, and `used_with_default` is set on it.
    pub weakens_required: bool,
}

impl FilterSignature {
    fn new(input: InputKind, result: ResultKind) -> Self {
        FilterSignature {
            input,
            element_constraint: None,
            result,
            args: Vec::new(),
            weakens_required: false,
        }
    }

    fn with_args(mut self, args: Vec<ArgKind>) -> Self {
        self.args = args;
        self
    }

    fn with_element(mut self, element: InputKind) -> Self {
        self.element_constraint = Some(element);
        self
    }

    fn weakening(mut self) -> Self {
        self.weakens_required = true;
        self
    }
}

/// The builtin filter table named in `spec.md` §4.D.
pub fn builtin_filters() -> BTreeMap<String, FilterSignature> {
    use ArgKind::*;
    use InputKind::*;
    use ResultKind::*;

    let mut m = BTreeMap::new();
    let mut put = |name: &str, sig: FilterSignature| {
        m.insert(name.to_string(), sig);
    };

    put("abs", FilterSignature::new(Scalar, SameAsInput));
    put("attr", FilterSignature::new(Any, Scalar).with_args(vec![Scalar]));
    put(
        "batch",
        FilterSignature::new(List, ListOfList).with_args(vec![Scalar, Any]),
    );
    put("capitalize", FilterSignature::new(Scalar, SameAsInput));
    put("center", FilterSignature::new(Scalar, SameAsInput).with_args(vec![Scalar]));
    put(
        "default",
        FilterSignature::new(Any, SameAsInput)
            .with_args(vec![Any, Scalar])
            .weakening(),
    );
    put("dictsort", FilterSignature::new(Dictionary, List));
    put("escape", FilterSignature::new(Scalar, SameAsInput));
    put("first", FilterSignature::new(List, ElementOfInput));
    put("last", FilterSignature::new(List, ElementOfInput));
    put("length", FilterSignature::new(Any, Scalar));
    put("list", FilterSignature::new(Any, List));
    put("lower", FilterSignature::new(Scalar, SameAsInput));
    put("upper", FilterSignature::new(Scalar, SameAsInput));
    put("map", FilterSignature::new(List, List));
    put("join", FilterSignature::new(List, Scalar).with_args(vec![Scalar]));
    put("min", FilterSignature::new(List, ElementOfInput));
    put("max", FilterSignature::new(List, ElementOfInput));
    put("random", FilterSignature::new(List, ElementOfInput));
    put("reject", FilterSignature::new(List, SameAsInput));
    put(
        "replace",
        FilterSignature::new(Scalar, SameAsInput).with_args(vec![Scalar, Scalar]),
    );
    put("reverse", FilterSignature::new(Any, SameAsInput));
    put("round", FilterSignature::new(Scalar, SameAsInput));
    put("safe", FilterSignature::new(Scalar, SameAsInput));
    put("select", FilterSignature::new(List, SameAsInput));
    put("slice", FilterSignature::new(List, ListOfList).with_args(vec![Scalar]));
    put("sort", FilterSignature::new(List, SameAsInput));
    put("string", FilterSignature::new(Any, Scalar));
    put("striptags", FilterSignature::new(Scalar, SameAsInput));
    put(
        "sum",
        FilterSignature::new(List, Scalar).with_element(Scalar),
    );
    put("title", FilterSignature::new(Scalar, SameAsInput));
    put("trim", FilterSignature::new(Scalar, SameAsInput));
    put("truncate", FilterSignature::new(Scalar, SameAsInput).with_args(vec![Scalar]));
    put("unique", FilterSignature::new(List, SameAsInput));
    put("urlencode", FilterSignature::new(Scalar, SameAsInput));
    put("urlize", FilterSignature::new(Scalar, SameAsInput));
    put("wordcount", FilterSignature::new(Scalar, Scalar));
    put("wordwrap", FilterSignature::new(Scalar, SameAsInput).with_args(vec![Scalar]));
    put("xmlattr", FilterSignature::new(Dictionary, Scalar));

    m
}

/// Tests that flip a referenced name's `required` flag rather than
/// constrain its structure (`spec.md` §4.D).
pub fn definedness_tests() -> HashSet<&'static str> {
    ["defined", "undefined"].into_iter().collect()
}

/// Every builtin test name, used only to decide whether an unknown
/// test should degrade quietly the same way an unknown filter does.
pub fn builtin_tests() -> HashSet<&'static str> {
    [
        "defined",
        "undefined",
        "none",
        "number",
        "string",
        "sequence",
        "mapping",
        "iterable",
        "lower",
        "upper",
        "sameas",
        "divisibleby",
        "boolean",
        "true",
        "false",
        "odd",
        "even",
    ]
    .into_iter()
    .collect()
}

/// A registry combining the builtins with any `CUSTOM_FILTERS`
/// additions from `Config`.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    filters: BTreeMap<String, FilterSignature>,
}

impl FilterRegistry {
    pub fn new(custom: &BTreeMap<String, FilterSignature>) -> Self {
        let mut filters = builtin_filters();
        for (name, sig) in custom {
            filters.insert(name.clone(), sig.clone());
        }
        FilterRegistry { filters }
    }

    pub fn lookup(&self, name: &str) -> Option<&FilterSignature> {
        self.filters.get(name)
    }
}
