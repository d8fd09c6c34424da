//! The scope context (`spec.md` §4.C): a stack of frames mapping name
//! to structural type, plus the conditional-join machinery used by
//! `if`/`for` in the statement visitor.

use std::collections::{BTreeMap, BTreeSet};

use crate::merge::{merge, MergeError, MergeMode};
use crate::types::Structural;

/// A stack of frames. The bottom frame (index 0) doubles as the
/// template's inferred top-level context: a name that misses every
/// frame is recorded there, which is exactly the free-variable
/// collection behavior `spec.md` §4.C describes.
#[derive(Debug, Clone)]
pub struct Scope {
    frames: Vec<BTreeMap<String, Structural>>,
    extend_package: bool,
    /// Top-level names that entered the context through `bind_set`'s
    /// brand-new-binding path, as opposed to a plain `reference` read.
    /// `join_weak` consults this to tell "bound in this branch" apart
    /// from "merely read in this branch" (`spec.md` §3).
    set_keys: BTreeSet<String>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            frames: vec![BTreeMap::new()],
            extend_package: false,
            set_keys: BTreeSet::new(),
        }
    }

    /// Mirrors `Config::package_object_can_be_extended` into this
    /// scope's merges (`spec.md` §6, §9(c)).
    pub fn set_extend_package(&mut self, extend_package: bool) {
        self.extend_package = extend_package;
    }

    pub fn push(&mut self) {
        self.frames.push(BTreeMap::new());
    }

    pub fn pop(&mut self) -> BTreeMap<String, Structural> {
        assert!(self.frames.len() > 1, "cannot pop the top-level frame");
        self.frames.pop().expect("push/pop imbalance")
    }

    /// Binds `name` in the innermost (current) frame, unconditionally
    /// replacing any prior binding there. Used for loop targets,
    /// `with` bindings, and macro parameters: constructs that always
    /// introduce a fresh local name.
    pub fn bind_here(&mut self, name: &str, ty: Structural) {
        self.frames
            .last_mut()
            .expect("at least one frame always exists")
            .insert(name.to_string(), ty);
    }

    /// Binds `name` the way `{% set %}` does: if it already names a
    /// binding anywhere on the stack, that binding is replaced in
    /// place; otherwise the name becomes part of the top-level
    /// context, exactly like a read of the same name would.
    pub fn bind_set(&mut self, name: &str, mut ty: Structural) {
        for frame in self.frames.iter_mut().rev() {
            if let Some(existing) = frame.get(name) {
                // A prior `is defined`/`is undefined` check already
                // established that the name may be absent from the
                // context; a subsequent `set` shouldn't un-relax that,
                // since the template still tolerates it being missing
                // on the branch that skips the set.
                if !existing.required() {
                    ty.meta_mut().required = false;
                }
                frame.insert(name.to_string(), ty);
                return;
            }
        }
        self.set_keys.insert(name.to_string());
        self.frames[0].insert(name.to_string(), ty);
    }

    /// Looks a name up without mutating the scope (walks outer
    /// frames); returns `None` if unbound anywhere.
    pub fn lookup(&self, name: &str) -> Option<&Structural> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    /// Top-level names bound via `bind_set`'s brand-new-binding path,
    /// i.e. not including names that only ever entered through
    /// `reference`.
    pub fn set_keys(&self) -> &BTreeSet<String> {
        &self.set_keys
    }

    /// Reinstates `required = true` on an existing binding, undoing a
    /// prior `join_weak` demotion. Used when a name's only appearance
    /// inside a branch was a read, not a `set` (`spec.md` §3).
    pub fn force_required(&mut self, name: &str) {
        for frame in self.frames.iter_mut().rev() {
            if let Some(existing) = frame.get_mut(name) {
                existing.meta_mut().required = true;
                return;
            }
        }
    }

    /// Records a use of `name` expected to have shape `expected`.
    /// If `name` is already bound (locally or as a prior free-variable
    /// requirement), the two shapes are strict-merged in place;
    /// otherwise `name` becomes a new top-level requirement. This is
    /// the single place free variables enter the inferred context
    /// (`spec.md` §4.E, Name node).
    pub fn reference(
        &mut self,
        name: &str,
        expected: Structural,
    ) -> Result<Structural, MergeError> {
        for frame in self.frames.iter_mut().rev() {
            if let Some(existing) = frame.get(name).cloned() {
                let merged = merge(&existing, &expected, MergeMode::Strict, self.extend_package)?;
                frame.insert(name.to_string(), merged.clone());
                return Ok(merged);
            }
        }
        let expected = expected.with_label(name);
        self.frames[0].insert(name.to_string(), expected.clone());
        Ok(expected)
    }

    /// The accumulated top-level context, i.e. the template's
    /// inferred free-variable requirements.
    pub fn top_level(&self) -> &BTreeMap<String, Structural> {
        &self.frames[0]
    }

    /// Independent copy used to explore one branch of a conditional
    /// construct without affecting sibling branches.
    pub fn fork(&self) -> Scope {
        self.clone()
    }

    /// Weak-joins a set of branch scopes (all forked from the same
    /// point, hence same frame depth) back into one. A key present in
    /// some but not all branches becomes `required = false`
    /// (`spec.md` §4.F, If/elif/else).
    pub fn join_weak(branches: Vec<Scope>) -> Result<Scope, MergeError> {
        let mut branches = branches.into_iter();
        let mut acc = branches.next().expect("join_weak needs at least one branch");
        for branch in branches {
            assert_eq!(
                acc.frames.len(),
                branch.frames.len(),
                "branches must leave the frame stack balanced"
            );
            let mut merged_frames = Vec::with_capacity(acc.frames.len());
            for (af, bf) in acc.frames.iter().zip(branch.frames.iter()) {
                let merged =
                    crate::merge::merge_fragment(af, bf, MergeMode::Weak, acc.extend_package)?;
                merged_frames.push(merged);
            }
            let set_keys: BTreeSet<String> =
                acc.set_keys.union(&branch.set_keys).cloned().collect();
            acc = Scope {
                frames: merged_frames,
                extend_package: acc.extend_package,
                set_keys,
            };
        }
        Ok(acc)
    }
}
