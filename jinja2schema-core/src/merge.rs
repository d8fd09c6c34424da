//! The merge algebra (`spec.md` §4.B): the single operation every
//! other component uses to combine two structural types into one.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::{Meta, ScalarLiteral, Structural};

/// Which merge discipline applies to a call (`spec.md` GLOSSARY:
/// strict vs. weak merge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Both sides must agree unconditionally (the same name used
    /// twice in one expression, or two statements that always run).
    Strict,
    /// Used at a conditional join: a key absent from one side is
    /// known to be optional rather than contradictory.
    Weak,
}

/// A merge conflict, carrying enough context for a caller to render a
/// useful diagnostic (`spec.md` §7).
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error(
        "`{label}` is used as both {a_kind} and {b_kind} (lines {a_lines:?} and {b_lines:?})"
    )]
    KindMismatch {
        label: String,
        a_kind: &'static str,
        b_kind: &'static str,
        a_lines: Vec<usize>,
        b_lines: Vec<usize>,
    },
    #[error(
        "`{label}` is unpacked into {a_len} and {b_len} elements in different places (lines {a_lines:?} and {b_lines:?})"
    )]
    LengthMismatch {
        label: String,
        a_len: usize,
        b_len: usize,
        a_lines: Vec<usize>,
        b_lines: Vec<usize>,
    },
    #[error("`{label}` is assigned conflicting constant values (lines {a_lines:?} and {b_lines:?})")]
    ConstantConflict {
        label: String,
        a_lines: Vec<usize>,
        b_lines: Vec<usize>,
    },
}

fn label_of(a: &Structural, b: &Structural) -> String {
    a.meta()
        .label
        .clone()
        .or_else(|| b.meta().label.clone())
        .unwrap_or_else(|| "<value>".to_string())
}

/// Combine the top-level metadata of two operands being merged into a
/// result of a (possibly different) kind. Implements rule 1's
/// "unioned metadata" clause uniformly for every rule.
fn combine_meta(a: &Meta, b: &Meta, a_is_unknown: bool, b_is_unknown: bool) -> Meta {
    let required = if a_is_unknown {
        b.required
    } else if b_is_unknown {
        a.required
    } else {
        a.required && b.required
    };
    let mut linenos = a.linenos.clone();
    linenos.extend(b.linenos.iter().copied());
    Meta {
        label: a.label.clone().or_else(|| b.label.clone()),
        required,
        constant: false,
        linenos,
        used_with_default: a.used_with_default || b.used_with_default,
    }
}

/// `merge(a, b) -> c`, total on compatible pairs (`spec.md` §4.B).
///
/// `extend_package` mirrors `Config::package_object_can_be_extended`
/// (`spec.md` §6, §9(c)): normally a name used as both a scalar and a
/// dictionary is Rule 7's `KindMismatch`, but templates that treat a
/// context value as a "package object" — read as a plain value in one
/// place, drilled into with `.attr` in another — mean that literally.
/// With the flag set, that specific pair resolves to the dictionary
/// side instead of erroring; every other kind mismatch is still a
/// conflict.
pub fn merge(
    a: &Structural,
    b: &Structural,
    mode: MergeMode,
    extend_package: bool,
) -> Result<Structural, MergeError> {
    use Structural::*;

    // Rule 1: Unknown is the identity.
    if matches!(a, Unknown(_)) {
        let mut result = b.clone();
        *result.meta_mut() = combine_meta(b.meta(), a.meta(), false, true);
        return Ok(result);
    }
    if matches!(b, Unknown(_)) {
        let mut result = a.clone();
        *result.meta_mut() = combine_meta(a.meta(), b.meta(), false, true);
        return Ok(result);
    }

    match (a, b) {
        // Rule 2.
        (Scalar(am, av), Scalar(bm, bv)) => {
            let meta = combine_meta(am, bm, false, false);
            let (constant, value) = match (av, bv) {
                (Some(x), Some(y)) if x == y => (true, Some(x.clone())),
                (Some(_), Some(_)) if mode == MergeMode::Strict => {
                    return Err(MergeError::ConstantConflict {
                        label: label_of(a, b),
                        a_lines: am.linenos.clone(),
                        b_lines: bm.linenos.clone(),
                    });
                }
                _ => (false, None),
            };
            let mut meta = meta;
            meta.constant = constant;
            Ok(Scalar(meta, value))
        }
        // Rule 3.
        (List(ae, am), List(be, bm)) => {
            let elem = merge(ae, be, mode, extend_package)?;
            let meta = combine_meta(am, bm, false, false);
            Ok(List(Box::new(elem), meta))
        }
        // Rule 4 / 5.
        (Tuple(ai, am), Tuple(bi, bm)) => {
            if ai.len() != bi.len() {
                return Err(MergeError::LengthMismatch {
                    label: label_of(a, b),
                    a_len: ai.len(),
                    b_len: bi.len(),
                    a_lines: am.linenos.clone(),
                    b_lines: bm.linenos.clone(),
                });
            }
            let items = ai
                .iter()
                .zip(bi.iter())
                .map(|(x, y)| merge(x, y, mode, extend_package))
                .collect::<Result<Vec<_>, _>>()?;
            let meta = combine_meta(am, bm, false, false);
            Ok(Tuple(items, meta))
        }
        (Tuple(items, tm), List(elem, lm)) | (List(elem, lm), Tuple(items, tm)) => {
            let mut folded = (**elem).clone();
            for item in items {
                folded = merge(&folded, item, mode, extend_package)?;
            }
            let meta = combine_meta(tm, lm, false, false);
            Ok(List(Box::new(folded), meta))
        }
        // Rule 6.
        (Dictionary(af, am), Dictionary(bf, bm)) => {
            let mut fields = BTreeMap::new();
            let mut keys: Vec<&String> = af.keys().chain(bf.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let merged = match (af.get(key), bf.get(key)) {
                    (Some(x), Some(y)) => merge(x, y, mode, extend_package)?,
                    (Some(x), None) => {
                        let mut v = x.clone();
                        if mode == MergeMode::Weak {
                            v.meta_mut().required = false;
                        }
                        v
                    }
                    (None, Some(y)) => {
                        let mut v = y.clone();
                        if mode == MergeMode::Weak {
                            v.meta_mut().required = false;
                        }
                        v
                    }
                    (None, None) => unreachable!(),
                };
                fields.insert(key.clone(), merged);
            }
            let meta = combine_meta(am, bm, false, false);
            Ok(Dictionary(fields, meta))
        }
        // Rule 7, relaxed: a scalar read of what's elsewhere treated as
        // a package object becomes one of its (unconstrained) fields.
        (Dictionary(fields, dm), Scalar(sm, _)) | (Scalar(sm, _), Dictionary(fields, dm))
            if extend_package =>
        {
            let meta = combine_meta(dm, sm, false, false);
            Ok(Dictionary(fields.clone(), meta))
        }
        // Rule 7.
        _ => Err(MergeError::KindMismatch {
            label: label_of(a, b),
            a_kind: a.kind_name(),
            b_kind: b.kind_name(),
            a_lines: a.meta().linenos.clone(),
            b_lines: b.meta().linenos.clone(),
        }),
    }
}

/// Merge two free-variable fragments (`name -> Structural` maps)
/// pointwise, using the dictionary merge rule.
pub fn merge_fragment(
    a: &BTreeMap<String, Structural>,
    b: &BTreeMap<String, Structural>,
    mode: MergeMode,
    extend_package: bool,
) -> Result<BTreeMap<String, Structural>, MergeError> {
    let da = Structural::dict(a.clone());
    let db = Structural::dict(b.clone());
    match merge(&da, &db, mode, extend_package)? {
        Structural::Dictionary(fields, _) => Ok(fields),
        _ => unreachable!("dict merge always yields a dict"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalar_and_dictionary_conflict_by_default() {
        let a = Structural::scalar_at(1);
        let b = Structural::dict_field(2, "name", Structural::scalar_at(2));
        let err = merge(&a, &b, MergeMode::Strict, false).unwrap_err();
        assert!(matches!(err, MergeError::KindMismatch { .. }));
    }

    #[test]
    fn scalar_and_dictionary_extend_when_package_object_allowed() {
        let a = Structural::scalar_at(1);
        let b = Structural::dict_field(2, "name", Structural::scalar_at(2));
        let merged = merge(&a, &b, MergeMode::Strict, true).unwrap();
        match merged {
            Structural::Dictionary(fields, _) => assert!(fields.contains_key("name")),
            other => panic!("expected a dictionary, got {other:?}"),
        }
    }

    #[test]
    fn list_and_dictionary_still_conflict_even_with_extend_package() {
        let a = Structural::list_at(1, Structural::scalar_at(1));
        let b = Structural::dict_field(2, "name", Structural::scalar_at(2));
        let err = merge(&a, &b, MergeMode::Strict, true).unwrap_err();
        assert!(matches!(err, MergeError::KindMismatch { .. }));
    }
}
