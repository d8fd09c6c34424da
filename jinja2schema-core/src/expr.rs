//! The expression visitor (`spec.md` §4.E): given the structural type
//! expected from a node's syntactic position, produces the node's own
//! inferred structure and threads every free variable it touches
//! through the scope.

use std::collections::BTreeMap;

use jinja2schema_ast::ast::{
    BinOperator, BoolOperator, ExprKind, Kwarg, Literal, UnaryOperator,
};
use jinja2schema_ast::Expr;

use crate::config::IndexedVariableType;
use crate::error::{InferError, Result};
use crate::merge::{merge, MergeMode};
use crate::registry::{ArgKind, InputKind, ResultKind};
use crate::scope::Scope;
use crate::types::{ScalarLiteral, Structural};
use crate::visitor::Visitor;

pub fn visit_expr(
    v: &mut Visitor,
    scope: &mut Scope,
    node: &Expr,
    expected: Structural,
) -> Result<Structural> {
    let line = node.line;
    match &node.node {
        ExprKind::Literal(lit) => Ok(visit_literal(lit, line)),

        ExprKind::ListLit(items) | ExprKind::TupleLit(items) => {
            let mut results = Vec::with_capacity(items.len());
            for item in items {
                results.push(visit_expr(v, scope, item, Structural::unknown())?);
            }
            Ok(Structural::tuple_at(line, results))
        }

        ExprKind::DictLit(entries) => {
            let mut fields = BTreeMap::new();
            for (k, val) in entries {
                // Keys are typically string literals; fall back to a
                // synthetic name when they aren't so the dict literal
                // still contributes a field.
                let key_name = match &k.node {
                    ExprKind::Literal(Literal::String(s)) => s.clone(),
                    _ => {
                        visit_expr(v, scope, k, Structural::scalar())?;
                        format!("<key@{}>", k.line)
                    }
                };
                let value_ty = visit_expr(v, scope, val, Structural::unknown())?;
                fields.insert(key_name, value_ty);
            }
            Ok(Structural::dict_at(line, fields))
        }

        ExprKind::Name(name) => scope.reference(name, expected).map_err(InferError::from),

        ExprKind::Attr { value, attr } => {
            let wrapped = Structural::dict_field(line, attr.clone(), expected);
            let owner = visit_expr(v, scope, value, wrapped)?;
            field_of(&owner, attr, line)
        }

        ExprKind::Subscript { value, index } => {
            visit_subscript(v, scope, value, index, expected, line)
        }

        ExprKind::Filter {
            value,
            name,
            args,
            kwargs,
        } => visit_filter(v, scope, value, name, args, kwargs, expected, line),

        ExprKind::Test {
            value,
            name,
            negated,
            args,
        } => visit_test(v, scope, value, name, *negated, args, line),

        ExprKind::Call { func, args, kwargs } => visit_call(v, scope, func, args, kwargs, line),

        ExprKind::Condition {
            cond,
            then_branch,
            else_branch,
        } => visit_condition(v, scope, cond, then_branch, else_branch.as_deref(), expected, line),

        ExprKind::BinOp { op, left, right } => visit_binop(v, scope, op, left, right, line),

        ExprKind::BoolOp { op, left, right } => visit_boolop(v, scope, op, left, right, expected, line),

        ExprKind::UnaryOp { op, operand } => visit_unaryop(v, scope, op, operand, line),

        ExprKind::Group(inner) => visit_expr(v, scope, inner, expected),
    }
}

fn visit_literal(lit: &Literal, line: usize) -> Structural {
    match lit {
        Literal::String(s) => Structural::constant_scalar(line, ScalarLiteral::Str(s.clone())),
        Literal::Number(n) => Structural::constant_scalar(line, ScalarLiteral::Num(n.clone())),
        Literal::Bool(b) => Structural::constant_scalar(line, ScalarLiteral::Bool(*b)),
        Literal::None => Structural::scalar_at(line),
    }
}

fn field_of(owner: &Structural, attr: &str, line: usize) -> Result<Structural> {
    match owner {
        Structural::Dictionary(fields, _) => Ok(fields
            .get(attr)
            .cloned()
            .unwrap_or_else(|| Structural::unknown_at(line))),
        Structural::Unknown(_) => Ok(Structural::unknown_at(line)),
        other => Err(InferError::InvalidExpression {
            line,
            reason: format!("`.{attr}` accessed on a {}", other.kind_name()),
        }),
    }
}

fn subscript_expected(
    kind: IndexedVariableType,
    literal_index: Option<i64>,
    elem_expected: Structural,
    line: usize,
) -> Structural {
    match kind {
        IndexedVariableType::Any => Structural::unknown_at(line),
        IndexedVariableType::List => Structural::list_at(line, elem_expected),
        IndexedVariableType::Dictionary => match literal_index {
            Some(i) => Structural::dict_field(line, i.to_string(), elem_expected),
            None => Structural::unknown_at(line),
        },
        IndexedVariableType::Tuple => match literal_index {
            Some(i) if i >= 0 => {
                let mut items = vec![Structural::unknown_at(line); i as usize + 1];
                items[i as usize] = elem_expected;
                Structural::tuple_at(line, items)
            }
            _ => Structural::list_at(line, elem_expected),
        },
    }
}

fn visit_subscript(
    v: &mut Visitor,
    scope: &mut Scope,
    value: &Expr,
    index: &Expr,
    expected: Structural,
    line: usize,
) -> Result<Structural> {
    match &index.node {
        ExprKind::Literal(Literal::String(field)) => {
            let wrapped = Structural::dict_field(line, field.clone(), expected);
            let owner = visit_expr(v, scope, value, wrapped)?;
            field_of(&owner, field, line)
        }
        ExprKind::Literal(Literal::Number(n)) => {
            visit_expr(v, scope, index, Structural::scalar())?;
            let literal_index = n.parse::<i64>().ok();
            let wrapped = subscript_expected(
                v.config.type_of_variable_indexed_with_integer,
                literal_index,
                expected,
                line,
            );
            let owner = visit_expr(v, scope, value, wrapped)?;
            element_of(&owner, literal_index, line)
        }
        _ => {
            // Index is itself an expression (typically a variable).
            visit_expr(v, scope, index, Structural::scalar())?;
            let wrapped =
                subscript_expected(v.config.type_of_variable_indexed_with_variable, None, expected, line);
            let owner = visit_expr(v, scope, value, wrapped)?;
            element_of(&owner, None, line)
        }
    }
}
fn element_of(owner: &Structural, literal_index: Option<i64>, line: usize) -> Result<Structural> {
    match owner {
        Structural::List(elem, _) => Ok((**elem).clone()),
        Structural::Tuple(items, _) => match literal_index {
            Some(i) if i >= 0 && (i as usize) < items.len() => Ok(items[i as usize].clone()),
            _ => Ok(Structural::unknown_at(line)),
        },
        Structural::Dictionary(fields, _) => match literal_index {
            Some(i) => Ok(fields
                .get(&i.to_string())
                .cloned()
                .unwrap_or_else(|| Structural::unknown_at(line))),
            None => Ok(Structural::unknown_at(line)),
        },
        Structural::Unknown(_) => Ok(Structural::unknown_at(line)),
        other => Err(InferError::InvalidExpression {
            line,
            reason: format!("subscript applied to a {}", other.kind_name()),
        }),
    }
}

fn visit_filter(
    v: &mut Visitor,
    scope: &mut Scope,
    value: &Expr,
    name: &str,
    args: &[Expr],
    kwargs: &[Kwarg],
    expected: Structural,
    line: usize,
) -> Result<Structural> {
    let Some(sig) = v.registry.lookup(name).cloned() else {
        tracing::debug!(filter = name, "unknown filter, degrading to Unknown");
        let input = visit_expr(v, scope, value, Structural::unknown())?;
        for a in args {
            visit_expr(v, scope, a, Structural::unknown())?;
        }
        for kw in kwargs {
            visit_expr(v, scope, &kw.value, Structural::unknown())?;
        }
        let _ = input;
        return Ok(Structural::unknown_at(line));
    };

    let input_expected = match sig.input {
        InputKind::Scalar => Structural::scalar_at(line),
        InputKind::List => {
            let elem = sig
                .element_constraint
                .map(|_| Structural::scalar_at(line))
                .unwrap_or_else(Structural::unknown);
            Structural::list_at(line, elem)
        }
        InputKind::Dictionary => Structural::dict_at(line, BTreeMap::new()),
        InputKind::Any => Structural::unknown_at(line),
    };
    let input = visit_expr(v, scope, value, input_expected)?;

    for (arg, kind) in args.iter().zip(sig.args.iter()) {
        let e = match kind {
            ArgKind::Scalar => Structural::scalar_at(arg.line),
            ArgKind::Any => Structural::unknown_at(arg.line),
        };
        visit_expr(v, scope, arg, e)?;
    }
    if args.len() > sig.args.len() {
        if v.config.raise_on_invalid_filter_argument {
            return Err(InferError::InvalidExpression {
                line,
                reason: format!(
                    "filter `{name}` takes {expected} argument(s), got {got}",
                    expected = sig.args.len(),
                    got = args.len(),
                ),
            });
        }
        tracing::debug!(
            filter = name,
            expected = sig.args.len(),
            got = args.len(),
            "extra filter argument, relaxing"
        );
    }
    for extra in args.iter().skip(sig.args.len()) {
        visit_expr(v, scope, extra, Structural::unknown())?;
    }
    for kw in kwargs {
        visit_expr(v, scope, &kw.value, Structural::unknown())?;
    }

    let mut result = match sig.result {
        ResultKind::Scalar => Structural::scalar_at(line),
        ResultKind::List => Structural::list_at(line, Structural::unknown_at(line)),
        ResultKind::Dictionary => Structural::dict_at(line, BTreeMap::new()),
        ResultKind::SameAsInput => input.clone(),
        ResultKind::ElementOfInput => match &input {
            Structural::List(elem, _) => (**elem).clone(),
            _ => Structural::unknown_at(line),
        },
        ResultKind::ListOfList => Structural::list_at(line, Structural::list_at(line, Structural::unknown_at(line))),
    };

    if sig.weakens_required {
        result.meta_mut().required = false;
        result.meta_mut().used_with_default = true;
    }

    Ok(merge(
        &result,
        &expected,
        MergeMode::Strict,
        v.config.package_object_can_be_extended,
    )?)
}

fn visit_test(
    v: &mut Visitor,
    scope: &mut Scope,
    value: &Expr,
    name: &str,
    negated: bool,
    args: &[Expr],
    line: usize,
) -> Result<Structural> {
    if !crate::registry::builtin_tests().contains(name) {
        tracing::debug!(test = name, "unknown test, assuming boolean result only");
    }
    let definedness = crate::registry::definedness_tests();
    let flips_required = definedness.contains(name);
    let _ = negated; // either polarity of `defined`/`undefined` implies the author handles absence

    let value_ty = visit_expr(v, scope, value, Structural::unknown())?;
    for a in args {
        visit_expr(v, scope, a, Structural::unknown())?;
    }

    if flips_required {
        let mut relaxed = value_ty;
        relaxed.meta_mut().required = false;
        if let ExprKind::Name(n) = &value.node {
            scope.bind_set(n, relaxed);
        }
    }

    Ok(Structural::scalar_at(line))
}

fn visit_call(
    v: &mut Visitor,
    scope: &mut Scope,
    func: &Expr,
    args: &[Expr],
    kwargs: &[Kwarg],
    line: usize,
) -> Result<Structural> {
    if let ExprKind::Name(name) = &func.node {
        if let Some(descriptor) = v.macros.get(name).cloned() {
            for (i, (_, shape)) in descriptor.params.iter().enumerate() {
                if let Some(arg) = args.get(i) {
                    visit_expr(v, scope, arg, shape.clone())?;
                } else if let Some(kw) = kwargs.iter().find(|kw| {
                    descriptor
                        .params
                        .get(i)
                        .map(|(n, _)| &kw.name == n)
                        .unwrap_or(false)
                }) {
                    visit_expr(v, scope, &kw.value, shape.clone())?;
                }
            }
            for (name, ty) in &descriptor.free_vars {
                scope.reference(name, ty.clone())?;
            }
            return Ok(Structural::scalar_at(line));
        }
    }
    // A free call: scalar-producing, no constraint on its arguments.
    visit_expr(v, scope, func, Structural::unknown())?;
    for a in args {
        visit_expr(v, scope, a, Structural::unknown())?;
    }
    for kw in kwargs {
        visit_expr(v, scope, &kw.value, Structural::unknown())?;
    }
    Ok(Structural::scalar_at(line))
}

fn visit_condition(
    v: &mut Visitor,
    scope: &mut Scope,
    cond: &Expr,
    then_branch: &Expr,
    else_branch: Option<&Expr>,
    expected: Structural,
    line: usize,
) -> Result<Structural> {
    let cond_expected = if v.config.boolean_conditions {
        Structural::scalar_at(cond.line)
    } else {
        Structural::unknown_at(cond.line)
    };
    visit_expr(v, scope, cond, cond_expected)?;

    let mut then_scope = scope.fork();
    let then_ty = visit_expr(v, &mut then_scope, then_branch, expected.clone())?;

    let (else_scope, else_ty) = match else_branch {
        Some(e) => {
            let mut s = scope.fork();
            let ty = visit_expr(v, &mut s, e, expected)?;
            (s, ty)
        }
        None => (scope.fork(), then_ty.clone()),
    };

    *scope = Scope::join_weak(vec![then_scope, else_scope])?;
    Ok(merge(
        &then_ty,
        &else_ty,
        MergeMode::Weak,
        v.config.package_object_can_be_extended,
    )?)
}

fn visit_binop(
    v: &mut Visitor,
    scope: &mut Scope,
    op: &BinOperator,
    left: &Expr,
    right: &Expr,
    line: usize,
) -> Result<Structural> {
    let (operand_expected, result) = match op {
        BinOperator::Concat => (Structural::scalar_at(line), Structural::scalar_at(line)),
        BinOperator::Add
        | BinOperator::Sub
        | BinOperator::Mul
        | BinOperator::Div
        | BinOperator::FloorDiv
        | BinOperator::Mod
        | BinOperator::Pow => (Structural::scalar_at(line), Structural::scalar_at(line)),
        BinOperator::Eq
        | BinOperator::Ne
        | BinOperator::Lt
        | BinOperator::Le
        | BinOperator::Gt
        | BinOperator::Ge => (Structural::unknown_at(line), Structural::scalar_at(line)),
        BinOperator::In | BinOperator::NotIn => {
            visit_expr(v, scope, left, Structural::unknown())?;
            visit_expr(
                v,
                scope,
                right,
                Structural::list_at(line, Structural::unknown_at(line)),
            )?;
            return Ok(Structural::scalar_at(line));
        }
    };
    visit_expr(v, scope, left, operand_expected.clone())?;
    visit_expr(v, scope, right, operand_expected)?;
    Ok(result)
}

fn visit_boolop(
    v: &mut Visitor,
    scope: &mut Scope,
    _op: &BoolOperator,
    left: &Expr,
    right: &Expr,
    expected: Structural,
    line: usize,
) -> Result<Structural> {
    let operand_expected = if v.config.boolean_conditions {
        Structural::scalar_at(line)
    } else {
        expected
    };
    let left_ty = visit_expr(v, scope, left, operand_expected.clone())?;
    let right_ty = visit_expr(v, scope, right, operand_expected)?;
    Ok(merge(
        &left_ty,
        &right_ty,
        MergeMode::Strict,
        v.config.package_object_can_be_extended,
    )?)
}

fn visit_unaryop(
    v: &mut Visitor,
    scope: &mut Scope,
    op: &UnaryOperator,
    operand: &Expr,
    line: usize,
) -> Result<Structural> {
    let expected = match op {
        UnaryOperator::Not => Structural::scalar_at(line),
        UnaryOperator::Neg | UnaryOperator::Pos => Structural::scalar_at(line),
    };
    visit_expr(v, scope, operand, expected)?;
    Ok(Structural::scalar_at(line))
}
