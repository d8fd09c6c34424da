//! The statement visitor (`spec.md` §4.F): threads a [`Scope`] through
//! every control-flow construct a template body can contain.

use std::collections::{BTreeMap, BTreeSet};

use jinja2schema_ast::ast::{ImportedNames, SetForm, StmtKind, Target};
use jinja2schema_ast::Stmt;

use crate::error::{InferError, Result};
use crate::expr::visit_expr;
use crate::scope::Scope;
use crate::types::Structural;
use crate::visitor::{MacroDescriptor, Visitor};

pub fn visit_body(v: &mut Visitor, scope: &mut Scope, body: &[Stmt]) -> Result<()> {
    for stmt in body {
        visit_stmt(v, scope, stmt)?;
    }
    Ok(())
}

pub fn visit_stmt(v: &mut Visitor, scope: &mut Scope, stmt: &Stmt) -> Result<()> {
    let line = stmt.line;
    match &stmt.node {
        StmtKind::Output(expr) => {
            // `{{ expr }}` stringifies its value, so a bare name used
            // only in output position is assumed scalar.
            visit_expr(v, scope, expr, Structural::scalar_at(line))?;
            Ok(())
        }
        StmtKind::If {
            branches,
            else_branch,
        } => visit_if(v, scope, branches, else_branch.as_deref(), line),
        StmtKind::For {
            target,
            iter,
            body,
            else_branch,
        } => visit_for(v, scope, target, iter, body, else_branch.as_deref(), line),
        StmtKind::Set { name, form } => visit_set(v, scope, name, form, line),
        StmtKind::With { bindings, body } => visit_with(v, scope, bindings, body),
        StmtKind::Macro {
            name,
            params,
            body,
        } => visit_macro(v, scope, name, params, body, line),
        StmtKind::Include { path } => visit_include(v, scope, path.as_deref()),
        StmtKind::Import { path, names } => visit_import(v, scope, path.as_deref(), names),
        StmtKind::FilterBlock { body, .. } => visit_body(v, scope, body),
        StmtKind::Block { body, .. } => visit_body(v, scope, body),
        StmtKind::Extends { path } => visit_extends(v, scope, path.as_deref()),
        StmtKind::Raw(_) | StmtKind::Comment => Ok(()),
    }
}

fn visit_if(
    v: &mut Visitor,
    scope: &mut Scope,
    branches: &[(jinja2schema_ast::Expr, Vec<Stmt>)],
    else_branch: Option<&[Stmt]>,
    line: usize,
) -> Result<()> {
    // `remaining` tracks "every prior condition was false"; each
    // branch's condition and body are evaluated against a snapshot of
    // it, and it becomes the baseline for the next elif/else.
    let mut remaining = scope.clone();
    let mut outcomes = Vec::with_capacity(branches.len() + 1);
    // Names that surfaced for the first time inside some branch purely
    // because they were *read* there, never `set`. `join_weak` can't
    // tell those apart from a conditional binding on its own, so it
    // demotes both to `required = false`; only the latter is correct
    // per `spec.md` §3, so these get restored below.
    let mut read_only_introductions = BTreeSet::new();

    for (cond, body) in branches {
        let cond_expected = if v.config.boolean_conditions {
            Structural::scalar_at(cond.line)
        } else {
            Structural::unknown_at(cond.line)
        };
        visit_expr(v, &mut remaining, cond, cond_expected)?;

        let pre_keys: BTreeSet<String> = remaining.top_level().keys().cloned().collect();
        let mut taken = remaining.clone();
        visit_body(v, &mut taken, body)?;
        collect_read_only_introductions(&taken, &pre_keys, &mut read_only_introductions);
        outcomes.push(taken);
    }

    let else_outcome = match else_branch {
        Some(body) => {
            let pre_keys: BTreeSet<String> = remaining.top_level().keys().cloned().collect();
            let mut s = remaining.clone();
            visit_body(v, &mut s, body)?;
            collect_read_only_introductions(&s, &pre_keys, &mut read_only_introductions);
            s
        }
        None => remaining,
    };
    outcomes.push(else_outcome);

    let _ = line;
    *scope = Scope::join_weak(outcomes)?;
    for name in &read_only_introductions {
        scope.force_required(name);
    }
    Ok(())
}

/// Collects, into `out`, top-level names in `branch_scope` that are
/// absent from `pre_keys` (so they're new to this branch) and weren't
/// bound via `bind_set` there either — i.e. names the branch only read.
fn collect_read_only_introductions(
    branch_scope: &Scope,
    pre_keys: &BTreeSet<String>,
    out: &mut BTreeSet<String>,
) {
    for key in branch_scope.top_level().keys() {
        if !pre_keys.contains(key) && !branch_scope.set_keys().contains(key) {
            out.insert(key.clone());
        }
    }
}

fn loop_pseudo_vars(line: usize) -> Structural {
    let mut fields = BTreeMap::new();
    for key in ["index", "index0", "revindex", "revindex0", "length", "first", "last"] {
        fields.insert(key.to_string(), Structural::scalar_at(line));
    }
    fields.insert(
        "previtem".to_string(),
        Structural::scalar_at(line).set_required(false),
    );
    fields.insert(
        "nextitem".to_string(),
        Structural::scalar_at(line).set_required(false),
    );
    fields.insert("cycle".to_string(), Structural::unknown_at(line));
    Structural::dict_at(line, fields)
}

fn visit_for(
    v: &mut Visitor,
    scope: &mut Scope,
    target: &Target,
    iter: &jinja2schema_ast::Expr,
    body: &[Stmt],
    else_branch: Option<&[Stmt]>,
    line: usize,
) -> Result<()> {
    // Establish the iterable's base shape first, run the body against
    // a placeholder target binding, then re-merge whatever shape the
    // body actually demanded of the target back into the iterable —
    // that second pass is what makes `for item in items: item.name`
    // constrain `items` to `List(Dictionary{name: Scalar})` instead of
    // `List(Unknown)`.
    let arity = match target {
        Target::Name(_) => None,
        Target::Tuple(names) => Some(names.len()),
    };
    let base_element = match arity {
        None => Structural::unknown_at(line),
        Some(n) => Structural::tuple_at(line, vec![Structural::unknown_at(line); n]),
    };
    visit_expr(v, scope, iter, Structural::list_at(line, base_element))?;

    let pre_loop = scope.clone();
    let pre_keys: BTreeSet<String> = pre_loop.top_level().keys().cloned().collect();

    scope.push();
    match target {
        Target::Name(name) => scope.bind_here(name, Structural::unknown_at(line)),
        Target::Tuple(names) => {
            for name in names {
                scope.bind_here(name, Structural::unknown_at(line));
            }
        }
    }
    scope.bind_here("loop", loop_pseudo_vars(line));
    visit_body(v, scope, body)?;
    let body_frame = scope.pop();

    let refined_element = match target {
        Target::Name(name) => body_frame
            .get(name)
            .cloned()
            .unwrap_or_else(|| Structural::unknown_at(line)),
        Target::Tuple(names) => Structural::tuple_at(
            line,
            names
                .iter()
                .map(|n| {
                    body_frame
                        .get(n)
                        .cloned()
                        .unwrap_or_else(|| Structural::unknown_at(line))
                })
                .collect(),
        ),
    };
    visit_expr(v, scope, iter, Structural::list_at(line, refined_element))?;

    let mut read_only_introductions = BTreeSet::new();
    collect_read_only_introductions(&*scope, &pre_keys, &mut read_only_introductions);

    let zero_iterations = match else_branch {
        Some(stmts) => {
            let mut s = pre_loop;
            visit_body(v, &mut s, stmts)?;
            collect_read_only_introductions(&s, &pre_keys, &mut read_only_introductions);
            s
        }
        None => pre_loop,
    };

    *scope = Scope::join_weak(vec![scope.clone(), zero_iterations])?;
    for name in &read_only_introductions {
        scope.force_required(name);
    }
    Ok(())
}

fn visit_set(v: &mut Visitor, scope: &mut Scope, name: &str, form: &SetForm, line: usize) -> Result<()> {
    match form {
        SetForm::Value(expr) => {
            let ty = visit_expr(v, scope, expr, Structural::unknown())?;
            scope.bind_set(name, ty);
        }
        SetForm::Block(body) => {
            scope.push();
            visit_body(v, scope, body)?;
            scope.pop();
            scope.bind_set(name, Structural::scalar_at(line));
        }
    }
    Ok(())
}

fn visit_with(
    v: &mut Visitor,
    scope: &mut Scope,
    bindings: &[(String, jinja2schema_ast::Expr)],
    body: &[Stmt],
) -> Result<()> {
    scope.push();
    for (name, expr) in bindings {
        let ty = visit_expr(v, scope, expr, Structural::unknown())?;
        scope.bind_here(name, ty);
    }
    visit_body(v, scope, body)?;
    scope.pop();
    Ok(())
}

fn visit_macro(
    v: &mut Visitor,
    scope: &mut Scope,
    name: &str,
    params: &[jinja2schema_ast::ast::MacroParam],
    body: &[Stmt],
    line: usize,
) -> Result<()> {
    // The body is analyzed against a scope isolated from the caller:
    // only the declared parameters are visible, so names the body
    // reads that aren't parameters become the macro's own free-variable
    // requirement rather than leaking into whoever defines the macro.
    let mut macro_scope = Scope::new();
    macro_scope.set_extend_package(v.config.package_object_can_be_extended);
    macro_scope.push();
    for p in params {
        let shape = match &p.default {
            // A default is an ordinary expression evaluated in the
            // defining scope, so it's visited against the *caller's*
            // scope, not the isolated one.
            Some(default_expr) => {
                let mut ty = visit_expr(v, scope, default_expr, Structural::unknown())?;
                ty.meta_mut().required = false;
                ty
            }
            None => Structural::unknown_at(line),
        };
        macro_scope.bind_here(&p.name, shape);
    }

    visit_body(v, &mut macro_scope, body)?;
    let param_frame = macro_scope.pop();

    let params_out = params
        .iter()
        .map(|p| {
            let shape = param_frame
                .get(&p.name)
                .cloned()
                .unwrap_or_else(|| Structural::unknown_at(line));
            (p.name.clone(), shape)
        })
        .collect();
    let free_vars = macro_scope.top_level().clone();

    v.macros.insert(
        name.to_string(),
        MacroDescriptor {
            params: params_out,
            free_vars,
        },
    );
    Ok(())
}

fn merge_external(scope: &mut Scope, vars: &BTreeMap<String, Structural>) -> Result<()> {
    for (name, ty) in vars {
        scope.reference(name, ty.clone())?;
    }
    Ok(())
}

/// Loads and infers a template by literal path. A missing/unreadable
/// template or a parse failure degrades to `None` rather than an
/// error: `spec.md` §7 treats a failed `include`/`import`/`extends`
/// lookup as contributing no constraint, not as a hard failure.
fn load_and_infer(
    v: &Visitor,
    path: &str,
) -> Option<(Scope, BTreeMap<String, MacroDescriptor>)> {
    let source = v.loader.load(path)?;
    let template = jinja2schema_ast::parse(&source).ok()?;
    let mut child = v.nested();
    let mut child_scope = Scope::new();
    child_scope.set_extend_package(v.config.package_object_can_be_extended);
    visit_body(&mut child, &mut child_scope, &template.body).ok()?;
    Some((child_scope, child.macros))
}

fn visit_include(v: &mut Visitor, scope: &mut Scope, path: Option<&str>) -> Result<()> {
    let Some(path) = path else { return Ok(()) };
    if !v.enter_nested() {
        return Err(InferError::TooDeep(v.max_depth()));
    }
    if let Some((child_scope, child_macros)) = load_and_infer(v, path) {
        merge_external(scope, child_scope.top_level())?;
        v.macros.extend(child_macros);
    }
    v.exit_nested();
    Ok(())
}

fn visit_extends(v: &mut Visitor, scope: &mut Scope, path: Option<&str>) -> Result<()> {
    // Treated like `include`: the parent's free variables are also
    // demanded of the child's context. Block overriding has no effect
    // on the inferred shape, since every block's contents, parent or
    // child, contribute to the same top-level context.
    visit_include(v, scope, path)
}

fn visit_import(
    v: &mut Visitor,
    scope: &mut Scope,
    path: Option<&str>,
    names: &ImportedNames,
) -> Result<()> {
    let Some(path) = path else { return Ok(()) };
    if !v.enter_nested() {
        return Err(InferError::TooDeep(v.max_depth()));
    }
    if let Some((_, child_macros)) = load_and_infer(v, path) {
        match names {
            ImportedNames::Module(ns) => {
                // A namespace import introduces `ns` as a local binding
                // the way `set` would, not as a demand on the caller's
                // context; its fields are unconstrained scalar
                // stand-ins for each macro the child template defines
                // (full call-signature fidelity through `ns.macro(...)`
                // would need a callable variant the structural lattice
                // doesn't have).
                let fields = child_macros
                    .keys()
                    .map(|name| (name.clone(), Structural::scalar()))
                    .collect();
                scope.bind_set(ns, Structural::dict(fields));
            }
            ImportedNames::Names(pairs) => {
                for (orig, alias) in pairs {
                    if let Some(descriptor) = child_macros.get(orig) {
                        v.macros.insert(alias.clone(), descriptor.clone());
                    }
                }
            }
        }
    }
    v.exit_nested();
    Ok(())
}
