//! Shared state threaded through the expression and statement
//! visitors: configuration, the filter/test registry, a macro table,
//! and the caller-supplied template loader used by `include`/`import`.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::registry::FilterRegistry;
use crate::types::Structural;

/// Resolves a literal `include`/`import`/`extends` path to source
/// text. `spec.md` §5 calls this a "caller-supplied loader (which may
/// block but is expected to be synchronous)"; a failed lookup is not
/// an error (§7: "silently contribute no constraint").
pub trait TemplateLoader {
    fn load(&self, path: &str) -> Option<String>;
}

/// A loader with nothing to load from; every `include`/`import` with
/// a literal path still degrades gracefully.
pub struct NullLoader;

impl TemplateLoader for NullLoader {
    fn load(&self, _path: &str) -> Option<String> {
        None
    }
}

/// A macro's interface: the shape demanded of each parameter, and the
/// free variables its body reads that don't derive from a parameter
/// (`spec.md` §4.F, §9 "Macros").
#[derive(Debug, Clone)]
pub struct MacroDescriptor {
    pub params: Vec<(String, Structural)>,
    pub free_vars: BTreeMap<String, Structural>,
}

pub struct Visitor<'a> {
    pub config: &'a Config,
    pub registry: FilterRegistry,
    pub loader: &'a dyn TemplateLoader,
    pub macros: BTreeMap<String, MacroDescriptor>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Visitor<'a> {
    pub fn new(config: &'a Config, loader: &'a dyn TemplateLoader) -> Self {
        Visitor {
            config,
            registry: FilterRegistry::new(&config.custom_filters),
            loader,
            macros: BTreeMap::new(),
            depth: 0,
            max_depth: config.max_recursion_depth,
        }
    }

    /// Enters one level of template nesting (`include`/`extends`);
    /// returns `None` once the configured depth is exceeded.
    pub fn enter_nested(&mut self) -> bool {
        if self.depth >= self.max_depth {
            return false;
        }
        self.depth += 1;
        true
    }

    pub fn exit_nested(&mut self) {
        self.depth -= 1;
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// A visitor for an `include`/`import`ed template: same config and
    /// loader, but its own macro/import tables (a nested template
    /// cannot see the includer's locals) and a depth counter carried
    /// over from `self` so a chain of mutual includes still trips
    /// `max_recursion_depth`.
    pub fn nested(&self) -> Visitor<'a> {
        Visitor {
            config: self.config,
            registry: FilterRegistry::new(&self.config.custom_filters),
            loader: self.loader,
            macros: BTreeMap::new(),
            depth: self.depth,
            max_depth: self.max_depth,
        }
    }
}
