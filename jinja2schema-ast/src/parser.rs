//! Turns template source text into the [`crate::ast`] tree using a
//! `pest` grammar (`grammar.pest`). This is the "external
//! template-parser front-end" the inference engine in
//! `jinja2schema-core` is handed an AST by.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

use crate::ast::*;
use crate::error::{ParseError, Result};

#[derive(PestParser)]
#[grammar = "grammar.pest"]
pub struct TemplateParser;

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

pub fn parse(source: &str) -> Result<Template> {
    let mut pairs = TemplateParser::parse(Rule::template, source)
        .map_err(|e| ParseError::Syntax(Box::new(e)))?;
    let template_pair = pairs.next().expect("template rule always matches SOI..EOI");
    let body = build_body_from_nodes(template_pair.into_inner());
    Ok(Template { body })
}

fn build_body_from_nodes<'i>(
    pairs: impl Iterator<Item = Pair<'i, Rule>>,
) -> Vec<Stmt> {
    pairs
        .filter_map(|p| if p.as_rule() == Rule::EOI { None } else { Some(p) })
        .map(build_stmt)
        .collect()
}

fn build_body(pair: Pair<Rule>) -> Vec<Stmt> {
    // `body` wraps a `node*` sequence.
    build_body_from_nodes(pair.into_inner())
}

fn build_stmt(pair: Pair<Rule>) -> Stmt {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::raw_text => Spanned::new(StmtKind::Raw(pair.as_str().to_string()), line),
        Rule::comment_tag => Spanned::new(StmtKind::Comment, line),
        Rule::raw_block => {
            let text = pair
                .into_inner()
                .find(|p| p.as_rule() == Rule::raw_content)
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Spanned::new(StmtKind::Raw(text), line)
        }
        Rule::output_tag => {
            let inner = pair.into_inner().next().expect("output_tag has an expr");
            Spanned::new(StmtKind::Output(build_expr(inner)), line)
        }
        Rule::if_stmt => build_if(pair, line),
        Rule::for_stmt => build_for(pair, line),
        Rule::set_stmt => build_set(pair, line),
        Rule::set_block_stmt => build_set_block(pair, line),
        Rule::with_stmt => build_with(pair, line),
        Rule::macro_stmt => build_macro(pair, line),
        Rule::filter_stmt => build_filter_block(pair, line),
        Rule::block_stmt => build_block(pair, line),
        Rule::extends_stmt => build_extends(pair, line),
        Rule::include_stmt => build_include(pair, line),
        Rule::import_stmt => build_import(pair, line),
        Rule::from_import_stmt => build_from_import(pair, line),
        other => unreachable!("unexpected top-level node rule {other:?}"),
    }
}

fn literal_path(pair: Pair<Rule>) -> Option<String> {
    // `template_path = { string | expr }`; only a plain string literal
    // is resolvable without evaluating the template.
    let inner = pair.into_inner().next()?;
    if inner.as_rule() == Rule::string {
        Some(unquote(inner.as_str()))
    } else {
        None
    }
}

fn build_if(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut branches = Vec::new();
    let mut else_branch = None;
    let mut inner = pair.into_inner().peekable();
    // First branch: expr, body (the "if").
    let cond = build_expr(inner.next().unwrap());
    let body = build_body(inner.next().unwrap());
    branches.push((cond, body));
    loop {
        match inner.peek().map(|p| p.as_rule()) {
            Some(Rule::expr) => {
                let cond = build_expr(inner.next().unwrap());
                let body = build_body(inner.next().unwrap());
                branches.push((cond, body));
            }
            Some(Rule::body) => {
                else_branch = Some(build_body(inner.next().unwrap()));
            }
            _ => break,
        }
    }
    Spanned::new(
        StmtKind::If {
            branches,
            else_branch,
        },
        line,
    )
}

fn build_for(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let target = build_target(inner.next().unwrap());
    let iter = build_expr(inner.next().unwrap());
    let body = build_body(inner.next().unwrap());
    let else_branch = inner.next().map(build_body);
    Spanned::new(
        StmtKind::For {
            target,
            iter,
            body,
            else_branch,
        },
        line,
    )
}

fn build_target(pair: Pair<Rule>) -> Target {
    let names: Vec<String> = pair.into_inner().map(|p| p.as_str().to_string()).collect();
    if names.len() == 1 {
        Target::Name(names.into_iter().next().unwrap())
    } else {
        Target::Tuple(names)
    }
}

fn build_set(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let value = build_expr(inner.next().unwrap());
    Spanned::new(
        StmtKind::Set {
            name,
            form: SetForm::Value(value),
        },
        line,
    )
}

fn build_set_block(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let body = build_body(inner.next().unwrap());
    Spanned::new(
        StmtKind::Set {
            name,
            form: SetForm::Block(body),
        },
        line,
    )
}

fn build_with(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut bindings = Vec::new();
    let mut body = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::with_binding => {
                let mut b = p.into_inner();
                let name = b.next().unwrap().as_str().to_string();
                let value = build_expr(b.next().unwrap());
                bindings.push((name, value));
            }
            Rule::body => body = build_body(p),
            _ => {}
        }
    }
    Spanned::new(StmtKind::With { bindings, body }, line)
}

fn build_macro(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let mut params = Vec::new();
    let mut body = Vec::new();
    for p in inner {
        match p.as_rule() {
            Rule::macro_param => {
                let mut mp = p.into_inner();
                let pname = mp.next().unwrap().as_str().to_string();
                let default = mp.next().map(build_expr);
                params.push(MacroParam {
                    name: pname,
                    default,
                });
            }
            Rule::body => body = build_body(p),
            _ => {}
        }
    }
    Spanned::new(
        StmtKind::Macro {
            name,
            params,
            body,
        },
        line,
    )
}

fn build_filter_block(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let body = build_body(inner.next().unwrap());
    Spanned::new(StmtKind::FilterBlock { name, body }, line)
}

fn build_block(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let body = build_body(inner.next().unwrap());
    // Optional trailing `{% endblock name %}` repeats the name; ignore it.
    Spanned::new(StmtKind::Block { name, body }, line)
}

fn build_extends(pair: Pair<Rule>, line: usize) -> Stmt {
    let inner = pair.into_inner().next().unwrap();
    let path = Some(unquote(inner.as_str()));
    Spanned::new(StmtKind::Extends { path }, line)
}

fn build_include(pair: Pair<Rule>, line: usize) -> Stmt {
    let inner = pair.into_inner().next().unwrap();
    let path = literal_path(inner);
    Spanned::new(StmtKind::Include { path }, line)
}

fn build_import(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let path = literal_path(inner.next().unwrap());
    let ns = inner.next().unwrap().as_str().to_string();
    Spanned::new(
        StmtKind::Import {
            path,
            names: ImportedNames::Module(ns),
        },
        line,
    )
}

fn build_from_import(pair: Pair<Rule>, line: usize) -> Stmt {
    let mut inner = pair.into_inner();
    let path = literal_path(inner.next().unwrap());
    let mut names = Vec::new();
    for p in inner {
        let mut n = p.into_inner();
        let orig = n.next().unwrap().as_str().to_string();
        let alias = n.next().map(|a| a.as_str().to_string()).unwrap_or_else(|| orig.clone());
        names.push((orig, alias));
    }
    Spanned::new(
        StmtKind::Import {
            path,
            names: ImportedNames::Names(names),
        },
        line,
    )
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

// --- Expressions, in precedence order (lowest to highest). ---

pub fn build_expr(pair: Pair<Rule>) -> Expr {
    match pair.as_rule() {
        Rule::expr => build_expr(pair.into_inner().next().unwrap()),
        Rule::conditional_expr => build_conditional(pair),
        Rule::or_expr => build_bool_chain(pair, BoolOperator::Or),
        Rule::and_expr => build_bool_chain(pair, BoolOperator::And),
        Rule::not_expr => build_not(pair),
        Rule::comparison => build_comparison(pair),
        Rule::concat_expr => build_concat(pair),
        Rule::additive_expr => build_bin_chain(pair, Rule::add_op),
        Rule::multiplicative_expr => build_bin_chain(pair, Rule::mul_op),
        Rule::unary_expr => build_unary(pair),
        Rule::power_expr => build_power(pair),
        Rule::filter_expr => build_filters(pair),
        Rule::test_expr => build_test(pair),
        Rule::postfix_expr => build_postfix(pair),
        Rule::atom => build_atom(pair),
        other => unreachable!("unexpected expr rule {other:?}"),
    }
}

fn build_conditional(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let first = build_expr(inner.next().unwrap());
    match (inner.next(), inner.next()) {
        (Some(cond_else_branch), Some(else_branch)) => Spanned::new(
            ExprKind::Condition {
                cond: Box::new(build_expr(cond_else_branch)),
                then_branch: Box::new(first),
                else_branch: Some(Box::new(build_expr(else_branch))),
            },
            line,
        ),
        _ => first,
    }
}

fn build_bool_chain(pair: Pair<Rule>, op: BoolOperator) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut acc = build_expr(inner.next().unwrap());
    for next in inner {
        acc = Spanned::new(
            ExprKind::BoolOp {
                op: op.clone(),
                left: Box::new(acc),
                right: Box::new(build_expr(next)),
            },
            line,
        );
    }
    acc
}

fn build_not(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::not_expr => Spanned::new(
            ExprKind::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(build_not(inner)),
            },
            line,
        ),
        _ => build_expr(inner),
    }
}

fn build_comparison(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut acc = build_expr(inner.next().unwrap());
    loop {
        let Some(op_pair) = inner.next() else { break };
        let operand = build_expr(inner.next().unwrap());
        let normalized: String = op_pair.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match normalized.as_str() {
            "==" => BinOperator::Eq,
            "!=" => BinOperator::Ne,
            "<=" => BinOperator::Le,
            ">=" => BinOperator::Ge,
            "<" => BinOperator::Lt,
            ">" => BinOperator::Gt,
            "not in" => BinOperator::NotIn,
            "in" => BinOperator::In,
            other => unreachable!("unexpected comparison operator {other:?}"),
        };
        acc = Spanned::new(
            ExprKind::BinOp {
                op,
                left: Box::new(acc),
                right: Box::new(operand),
            },
            line,
        );
    }
    acc
}

fn build_concat(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut acc = build_expr(inner.next().unwrap());
    for next in inner {
        acc = Spanned::new(
            ExprKind::BinOp {
                op: BinOperator::Concat,
                left: Box::new(acc),
                right: Box::new(build_expr(next)),
            },
            line,
        );
    }
    acc
}

fn build_bin_chain(pair: Pair<Rule>, op_rule: Rule) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut acc = build_expr(inner.next().unwrap());
    loop {
        let Some(op_pair) = inner.next() else { break };
        debug_assert_eq!(op_pair.as_rule(), op_rule);
        let operand = build_expr(inner.next().unwrap());
        let op = match op_pair.as_str() {
            "+" => BinOperator::Add,
            "-" => BinOperator::Sub,
            "*" => BinOperator::Mul,
            "/" => BinOperator::Div,
            "//" => BinOperator::FloorDiv,
            "%" => BinOperator::Mod,
            other => unreachable!("unexpected binary operator {other:?}"),
        };
        acc = Spanned::new(
            ExprKind::BinOp {
                op,
                left: Box::new(acc),
                right: Box::new(operand),
            },
            line,
        );
    }
    acc
}

fn build_unary(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner().peekable();
    let op = match inner.peek().map(|p| p.as_rule()) {
        Some(Rule::unary_op) => {
            let op_pair = inner.next().unwrap();
            Some(match op_pair.as_str() {
                "-" => UnaryOperator::Neg,
                "+" => UnaryOperator::Pos,
                other => unreachable!("unexpected unary operator {other:?}"),
            })
        }
        _ => None,
    };
    let operand = build_expr(inner.next().unwrap());
    match op {
        Some(op) => Spanned::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            line,
        ),
        None => operand,
    }
}

fn build_power(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let base = build_expr(inner.next().unwrap());
    match inner.next() {
        Some(exp) => Spanned::new(
            ExprKind::BinOp {
                op: BinOperator::Pow,
                left: Box::new(base),
                right: Box::new(build_expr(exp)),
            },
            line,
        ),
        None => base,
    }
}

fn build_filters(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut acc = build_expr(inner.next().unwrap());
    for filter_call in inner {
        let mut fc = filter_call.into_inner();
        let name = fc.next().unwrap().as_str().to_string();
        let (args, kwargs) = fc.next().map(build_arglist).unwrap_or_default();
        acc = Spanned::new(
            ExprKind::Filter {
                value: Box::new(acc),
                name,
                args,
                kwargs,
            },
            line,
        );
    }
    acc
}

fn build_test(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let value = build_expr(inner.next().unwrap());
    match inner.next() {
        Some(is_clause) => {
            let mut ic = is_clause.into_inner();
            let mut next = ic.next().unwrap();
            let negated = if next.as_rule() == Rule::negated_marker {
                next = ic.next().unwrap();
                true
            } else {
                false
            };
            let mut tc = next.into_inner();
            let name = tc.next().unwrap().as_str().to_string();
            let (args, _kwargs) = tc.next().map(build_arglist).unwrap_or_default();
            Spanned::new(
                ExprKind::Test {
                    value: Box::new(value),
                    name,
                    negated,
                    args,
                },
                line,
            )
        }
        None => value,
    }
}

fn build_postfix(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let mut acc = build_expr(inner.next().unwrap());
    for op in inner {
        let op_line = line_of(&op);
        let op = op.into_inner().next().unwrap();
        acc = match op.as_rule() {
            Rule::attr_op => {
                let attr = op.into_inner().next().unwrap().as_str().to_string();
                Spanned::new(
                    ExprKind::Attr {
                        value: Box::new(acc),
                        attr,
                    },
                    op_line,
                )
            }
            Rule::subscript_op => {
                let index = build_expr(op.into_inner().next().unwrap());
                Spanned::new(
                    ExprKind::Subscript {
                        value: Box::new(acc),
                        index: Box::new(index),
                    },
                    op_line,
                )
            }
            Rule::call_op => {
                let (args, kwargs) = op.into_inner().next().map(build_arglist).unwrap_or_default();
                Spanned::new(
                    ExprKind::Call {
                        func: Box::new(acc),
                        args,
                        kwargs,
                    },
                    op_line,
                )
            }
            other => unreachable!("unexpected postfix op {other:?}"),
        };
    }
    acc
}

fn build_arglist(pair: Pair<Rule>) -> (Vec<Expr>, Vec<Kwarg>) {
    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    for arg in pair.into_inner() {
        let inner = arg.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::kwarg => {
                let mut kv = inner.into_inner();
                let name = kv.next().unwrap().as_str().to_string();
                let value = build_expr(kv.next().unwrap());
                kwargs.push(Kwarg { name, value });
            }
            _ => args.push(build_expr(inner)),
        }
    }
    (args, kwargs)
}

fn build_atom(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::literal => build_literal(inner),
        Rule::list_lit => Spanned::new(
            ExprKind::ListLit(inner.into_inner().map(build_expr).collect()),
            line,
        ),
        Rule::tuple_lit => Spanned::new(
            ExprKind::TupleLit(inner.into_inner().map(build_expr).collect()),
            line,
        ),
        Rule::dict_lit => {
            let entries = inner
                .into_inner()
                .map(|entry| {
                    let mut kv = entry.into_inner();
                    let k = build_expr(kv.next().unwrap());
                    let v = build_expr(kv.next().unwrap());
                    (k, v)
                })
                .collect();
            Spanned::new(ExprKind::DictLit(entries), line)
        }
        Rule::expr => Spanned::new(ExprKind::Group(Box::new(build_expr(inner))), line),
        Rule::ident => Spanned::new(ExprKind::Name(inner.as_str().to_string()), line),
        other => unreachable!("unexpected atom rule {other:?}"),
    }
}

fn build_literal(pair: Pair<Rule>) -> Expr {
    let line = line_of(&pair);
    let inner = pair.into_inner().next().unwrap();
    let lit = match inner.as_rule() {
        Rule::number => Literal::Number(inner.as_str().to_string()),
        Rule::string => Literal::String(unquote(inner.as_str())),
        Rule::boolean => Literal::Bool(matches!(inner.as_str().to_lowercase().as_str(), "true")),
        Rule::none_lit => Literal::None,
        other => unreachable!("unexpected literal rule {other:?}"),
    };
    Spanned::new(ExprKind::Literal(lit), line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body(source: &str) -> Vec<StmtKind> {
        parse(source)
            .unwrap()
            .body
            .into_iter()
            .map(|s| s.node)
            .collect()
    }

    #[test]
    fn parses_bare_output() {
        assert_eq!(
            body("{{ name }}"),
            vec![StmtKind::Output(Spanned::new(ExprKind::Name("name".into()), 1))]
        );
    }

    #[test]
    fn parses_attribute_and_subscript_chain() {
        let stmts = body("{{ a.b[0] }}");
        let StmtKind::Output(expr) = &stmts[0] else {
            panic!("expected Output")
        };
        assert!(matches!(expr.node, ExprKind::Subscript { .. }));
    }

    #[test]
    fn parses_filter_chain_with_args() {
        let stmts = body("{{ x|default('n/a')|upper }}");
        let StmtKind::Output(expr) = &stmts[0] else {
            panic!("expected Output")
        };
        match &expr.node {
            ExprKind::Filter { name, value, .. } => {
                assert_eq!(name, "upper");
                assert!(matches!(value.node, ExprKind::Filter { .. }));
            }
            other => panic!("expected Filter, got {other:?}"),
        }
    }

    #[test]
    fn parses_negated_test() {
        let stmts = body("{{ x is not none }}");
        let StmtKind::Output(expr) = &stmts[0] else {
            panic!("expected Output")
        };
        match &expr.node {
            ExprKind::Test { negated, name, .. } => {
                assert!(*negated);
                assert_eq!(name, "none");
            }
            other => panic!("expected Test, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_loop_with_tuple_target() {
        let stmts = body("{% for k, v in items %}{{ k }}: {{ v }}{% endfor %}");
        match &stmts[0] {
            StmtKind::For { target, .. } => {
                assert_eq!(*target, Target::Tuple(vec!["k".into(), "v".into()]));
            }
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_elif_else() {
        let stmts = body("{% if a %}x{% elif b %}y{% else %}z{% endif %}");
        match &stmts[0] {
            StmtKind::If {
                branches,
                else_branch,
            } => {
                assert_eq!(branches.len(), 2);
                assert!(else_branch.is_some());
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_raw_block_verbatim() {
        let stmts = body("{% raw %}{{ not an expr }}{% endraw %}");
        assert_eq!(stmts, vec![StmtKind::Raw("{{ not an expr }}".to_string())]);
    }

    #[test]
    fn rejects_malformed_syntax() {
        assert!(parse("{% if %}").is_err());
    }
}
