//! The structural type lattice (`spec.md` §3, §4.A): the five
//! variants every inferred shape is built from, and the metadata every
//! one of them carries.

use std::collections::BTreeMap;
use std::fmt;

use jinja2schema_ast::LineNo;

/// A literal value fixed at parse time, narrow enough to fix a
/// scalar's concrete JSON type in the schema projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarLiteral {
    Str(String),
    Num(String),
    Bool(bool),
}

/// Metadata carried alongside every [`Structural`] value.
///
/// Equality of `Structural` ignores `linenos` (see the `PartialEq`
/// impl below); every other field is load-bearing.
#[derive(Debug, Clone)]
pub struct Meta {
    /// Best-effort human name for diagnostics/schema titles.
    pub label: Option<String>,
    /// Whether the variable must be present in the context.
    pub required: bool,
    /// Whether the value is statically determined from literals only.
    pub constant: bool,
    /// Source lines where evidence for this type was observed.
    pub linenos: Vec<LineNo>,
    /// Set when a `default` filter supplied a fallback.
    pub used_with_default: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Meta {
            label: None,
            required: true,
            constant: false,
            linenos: Vec::new(),
            used_with_default: false,
        }
    }
}

impl Meta {
    pub fn at_line(line: LineNo) -> Self {
        Meta {
            linenos: vec![line],
            ..Meta::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn union(mut self, other: &Meta) -> Self {
        self.linenos.extend(other.linenos.iter().copied());
        if self.label.is_none() {
            self.label = other.label.clone();
        }
        self
    }
}

/// The inferred shape of a value read by a template.
#[derive(Debug, Clone)]
pub enum Structural {
    Unknown(Meta),
    Scalar(Meta, Option<ScalarLiteral>),
    List(Box<Structural>, Meta),
    Tuple(Vec<Structural>, Meta),
    Dictionary(BTreeMap<String, Structural>, Meta),
}

impl Structural {
    pub fn unknown() -> Self {
        Structural::Unknown(Meta::default())
    }

    pub fn unknown_at(line: LineNo) -> Self {
        Structural::Unknown(Meta::at_line(line))
    }

    pub fn scalar() -> Self {
        Structural::Scalar(Meta::default(), None)
    }

    pub fn scalar_at(line: LineNo) -> Self {
        Structural::Scalar(Meta::at_line(line), None)
    }

    pub fn constant_scalar(line: LineNo, value: ScalarLiteral) -> Self {
        let mut meta = Meta::at_line(line);
        meta.constant = true;
        Structural::Scalar(meta, Some(value))
    }

    pub fn list(element: Structural) -> Self {
        Structural::List(Box::new(element), Meta::default())
    }

    pub fn list_at(line: LineNo, element: Structural) -> Self {
        Structural::List(Box::new(element), Meta::at_line(line))
    }

    pub fn tuple(items: Vec<Structural>) -> Self {
        Structural::Tuple(items, Meta::default())
    }

    pub fn tuple_at(line: LineNo, items: Vec<Structural>) -> Self {
        Structural::Tuple(items, Meta::at_line(line))
    }

    pub fn dict(fields: BTreeMap<String, Structural>) -> Self {
        Structural::Dictionary(fields, Meta::default())
    }

    pub fn dict_at(line: LineNo, fields: BTreeMap<String, Structural>) -> Self {
        Structural::Dictionary(fields, Meta::at_line(line))
    }

    /// A `Dictionary` with a single field, the common case for
    /// `expected` propagated down through attribute/subscript access.
    pub fn dict_field(line: LineNo, field: impl Into<String>, ty: Structural) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), ty);
        Structural::dict_at(line, fields)
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Structural::Unknown(m)
            | Structural::Scalar(m, _)
            | Structural::List(_, m)
            | Structural::Tuple(_, m)
            | Structural::Dictionary(_, m) => m,
        }
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Structural::Unknown(m)
            | Structural::Scalar(m, _)
            | Structural::List(_, m)
            | Structural::Tuple(_, m)
            | Structural::Dictionary(_, m) => m,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Structural::Unknown(_) => "unknown",
            Structural::Scalar(_, _) => "scalar",
            Structural::List(_, _) => "list",
            Structural::Tuple(_, _) => "tuple",
            Structural::Dictionary(_, _) => "dictionary",
        }
    }

    pub fn required(&self) -> bool {
        self.meta().required
    }

    pub fn set_required(mut self, required: bool) -> Self {
        self.meta_mut().required = required;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.meta_mut().label = Some(label.into());
        self
    }

    /// The `pretty` projection used by diagnostics (`spec.md` §4.A).
    pub fn pretty(&self) -> String {
        match self {
            Structural::Unknown(_) => "<unknown>".to_string(),
            Structural::Scalar(meta, value) => {
                if meta.constant {
                    match value {
                        Some(ScalarLiteral::Str(s)) => format!("{:?}", s),
                        Some(ScalarLiteral::Num(n)) => n.clone(),
                        Some(ScalarLiteral::Bool(b)) => b.to_string(),
                        None => "<scalar>".to_string(),
                    }
                } else {
                    "<scalar>".to_string()
                }
            }
            Structural::List(elem, _) => format!("[{}]", elem.pretty()),
            Structural::Tuple(items, _) => {
                let inner: Vec<String> = items.iter().map(Structural::pretty).collect();
                format!("({})", inner.join(", "))
            }
            Structural::Dictionary(fields, _) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.pretty()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }
}

impl fmt::Display for Structural {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

/// Equality ignores `linenos`; everything else about the shape
/// (including `required`) must match.
impl PartialEq for Structural {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Structural::Unknown(a), Structural::Unknown(b)) => a.required == b.required,
            (Structural::Scalar(a, av), Structural::Scalar(b, bv)) => {
                a.required == b.required && a.constant == b.constant && av == bv
            }
            (Structural::List(ae, a), Structural::List(be, b)) => {
                a.required == b.required && ae == be
            }
            (Structural::Tuple(ai, a), Structural::Tuple(bi, b)) => {
                a.required == b.required && ai == bi
            }
            (Structural::Dictionary(af, a), Structural::Dictionary(bf, b)) => {
                a.required == b.required && af == bf
            }
            _ => false,
        }
    }
}
