//! Ties the parser, visitor, and scope together into the single
//! public operation this crate exists to provide (`spec.md` §4.G).

use jinja2schema_ast::parse;

use crate::config::Config;
use crate::error::Result;
use crate::scope::Scope;
use crate::stmt::visit_body;
use crate::types::Structural;
use crate::visitor::{NullLoader, TemplateLoader, Visitor};

/// Infers the structural shape of the context `source` expects, using
/// the default [`Config`] and no template loader: a literal-path
/// `include`/`import`/`extends` degrades to contributing no
/// constraint, same as a missing file.
pub fn infer(source: &str) -> Result<Structural> {
    infer_with(source, &Config::default(), &NullLoader)
}

/// Infers using an explicit configuration and template loader, the
/// latter resolving literal `include`/`import`/`extends` paths.
pub fn infer_with<'a>(
    source: &str,
    config: &'a Config,
    loader: &'a dyn TemplateLoader,
) -> Result<Structural> {
    let template = parse(source)?;
    let mut visitor = Visitor::new(config, loader);
    let mut scope = Scope::new();
    scope.set_extend_package(config.package_object_can_be_extended);
    visit_body(&mut visitor, &mut scope, &template.body)?;
    Ok(Structural::dict(scope.top_level().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::types::Structural;

    fn field<'a>(ctx: &'a Structural, name: &str) -> &'a Structural {
        match ctx {
            Structural::Dictionary(fields, _) => fields
                .get(name)
                .unwrap_or_else(|| panic!("missing field {name}")),
            _ => panic!("expected a dictionary"),
        }
    }

    #[test]
    fn bare_output_is_a_required_scalar() {
        let ctx = infer("Hello, {{ name }}!").unwrap();
        let name = field(&ctx, "name");
        assert!(matches!(name, Structural::Scalar(_, _)));
        assert!(name.required());
    }

    #[test]
    fn attribute_chain_builds_nested_dictionary() {
        let ctx = infer("{{ user.profile.email }}").unwrap();
        let user = field(&ctx, "user");
        let profile = field(user, "profile");
        let email = field(profile, "email");
        assert!(matches!(email, Structural::Scalar(_, _)));
    }

    #[test]
    fn for_loop_requires_a_list_of_the_iterated_shape() {
        let ctx = infer("{% for item in items %}{{ item.name }}{% endfor %}").unwrap();
        let items = field(&ctx, "items");
        match items {
            Structural::List(elem, _) => {
                assert!(matches!(&**elem, Structural::Dictionary(_, _)));
            }
            other => panic!("expected a list, got {other:?}"),
        }
    }

    #[test]
    fn is_defined_relaxes_requiredness() {
        let ctx = infer("{% if user is defined %}{{ user }}{% endif %}").unwrap();
        let user = field(&ctx, "user");
        assert!(!user.required());
    }

    #[test]
    fn defined_check_stays_relaxed_across_a_later_set() {
        let ctx = infer("{% if y is undefined %}{% set y = 'fallback' %}{% endif %}{{ y }}").unwrap();
        let y = field(&ctx, "y");
        assert!(!y.required());
    }

    #[test]
    fn a_name_only_read_inside_a_non_covering_branch_stays_required() {
        // spec.md §8 scenario 5: `a` is referenced only while computing
        // the `set`'s value, never outside the `if`; the demotion to
        // `required = false` is specific to `y`, the name actually set
        // inside the non-covering branch, not to `a`, which is merely read.
        let ctx = infer("{% if y is undefined %}{% set y = 'prefix' ~ a %}{% endif %}").unwrap();
        let y = field(&ctx, "y");
        assert!(matches!(y, Structural::Scalar(_, _)));
        assert!(!y.required());
        let a = field(&ctx, "a");
        assert!(matches!(a, Structural::Scalar(_, _)));
        assert!(a.required());
    }

    #[test]
    fn local_set_with_no_prior_read_is_still_required_by_default() {
        let ctx = infer("{% set greeting = 'hi' %}{{ greeting }}").unwrap();
        let greeting = field(&ctx, "greeting");
        assert!(matches!(greeting, Structural::Scalar(_, _)));
        assert!(greeting.required());
    }

    #[test]
    fn conflicting_uses_of_the_same_name_are_an_error() {
        let err = infer("{% for x in xs %}{{ x }}{% endfor %}{{ xs.name }}");
        assert!(err.is_err());
    }

    #[test]
    fn scalar_and_attribute_use_conflict_by_default() {
        let err = infer("{{ pkg }}{{ pkg.version }}");
        assert!(err.is_err());
    }

    #[test]
    fn package_object_can_be_extended_allows_scalar_and_attribute_use() {
        let mut config = Config::default();
        config.package_object_can_be_extended = true;
        let ctx = infer_with("{{ pkg }}{{ pkg.version }}", &config, &NullLoader).unwrap();
        let pkg = field(&ctx, "pkg");
        let version = field(pkg, "version");
        assert!(matches!(version, Structural::Scalar(_, _)));
    }

    #[test]
    fn extra_filter_argument_relaxes_by_default() {
        let ctx = infer("{{ name|join(',', 'extra') }}");
        assert!(ctx.is_ok());
    }

    #[test]
    fn extra_filter_argument_raises_when_configured() {
        let mut config = Config::default();
        config.raise_on_invalid_filter_argument = true;
        let err = infer_with("{{ name|join(',', 'extra') }}", &config, &NullLoader);
        assert!(err.is_err());
    }

    struct MapLoader(std::collections::BTreeMap<&'static str, &'static str>);

    impl TemplateLoader for MapLoader {
        fn load(&self, path: &str) -> Option<String> {
            self.0.get(path).map(|s| s.to_string())
        }
    }

    #[test]
    fn include_merges_the_included_templates_free_variables() {
        let loader = MapLoader(
            [("header.html", "{{ site_name }}")].into_iter().collect(),
        );
        let ctx = infer_with(
            "{% include \"header.html\" %}{{ page_title }}",
            &Config::default(),
            &loader,
        )
        .unwrap();
        assert!(matches!(field(&ctx, "site_name"), Structural::Scalar(_, _)));
        assert!(matches!(field(&ctx, "page_title"), Structural::Scalar(_, _)));
    }

    #[test]
    fn missing_include_contributes_no_constraint() {
        let ctx = infer_with(
            "{% include \"missing.html\" %}{{ page_title }}",
            &Config::default(),
            &NullLoader,
        )
        .unwrap();
        assert!(matches!(field(&ctx, "page_title"), Structural::Scalar(_, _)));
    }

    #[test]
    fn import_as_namespace_binds_a_dictionary_of_macro_stand_ins() {
        let loader = MapLoader(
            [(
                "macros.html",
                "{% macro greet(name) %}{{ name }}{% endmacro %}",
            )]
            .into_iter()
            .collect(),
        );
        let ctx = infer_with(
            "{% import \"macros.html\" as m %}",
            &Config::default(),
            &loader,
        )
        .unwrap();
        let m = field(&ctx, "m");
        assert!(matches!(field(m, "greet"), Structural::Scalar(_, _)));
    }

    #[test]
    fn from_import_registers_the_macro_under_its_alias() {
        let loader = MapLoader(
            [(
                "macros.html",
                "{% macro greet(name) %}{{ name }}{% endmacro %}",
            )]
            .into_iter()
            .collect(),
        );
        let ctx = infer_with(
            "{% from \"macros.html\" import greet as hello %}{{ hello('a') }}",
            &Config::default(),
            &loader,
        )
        .unwrap();
        assert!(matches!(ctx, Structural::Dictionary(_, _)));
    }
}
