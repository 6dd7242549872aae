//! Visible-function collection: which functions a name can mean at a call
//! site.
//!
//! A lazy per-block map from name to defined functions is built over the
//! global function list and extended incrementally as resolution synthesizes
//! new functions (wrappers, instantiations); the high-water mark records how
//! far into the list the map is current. Lookup climbs the block chain from
//! the call site, unioning each block's entries and descending through
//! `use`d modules with a visited guard. Functions defined in internal
//! (standard) modules are coalesced into the root block's entry so deep
//! climbs terminate in one map hit.

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{
        arena::{ExprId, SymId},
        expr::ExprKind,
        sym::{Flags, SymKind},
    },
    intern::NameId,
    program::Program,
};

/// The visibility cache threaded through resolution.
#[derive(Debug, Default)]
pub struct VisibleFns {
    /// Per-block name-to-candidates map.
    map: AHashMap<ExprId, AHashMap<NameId, Vec<SymId>>>,
    /// How many functions (in allocation order) are already indexed.
    num_indexed: usize,
    /// Skip-chain cache: for a block, the next enclosing block that defines
    /// or imports anything. Trivial pass-through blocks would otherwise
    /// inflate every lookup path.
    skip_cache: AHashMap<ExprId, Option<ExprId>>,
}

impl VisibleFns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes functions added since the last build. Invalidates the skip
    /// chain only when a previously-trivial block gains entries.
    pub fn build(&mut self, prog: &Program) {
        let fns = prog.arena.all_fns();
        if self.num_indexed >= fns.len() {
            return;
        }
        for &func in &fns[self.num_indexed..] {
            let Some(block) = visibility_block_of_fn(prog, func) else {
                continue;
            };
            let block = if in_internal_module(prog, func) {
                root_block(prog)
            } else {
                block
            };
            let name = prog.arena.sym(func).name;
            let entry = self.map.entry(block).or_default();
            let added_first = !entry.contains_key(&name) && entry.is_empty();
            entry.entry(name).or_default().push(func);
            if added_first {
                // The block stopped being trivial; cached skip chains
                // through it are stale.
                self.skip_cache.clear();
            }
        }
        self.num_indexed = fns.len();
    }

    /// All functions named `name` visible from `use_site`.
    #[must_use]
    pub fn lookup(&mut self, prog: &Program, name: NameId, use_site: ExprId) -> Vec<SymId> {
        self.build(prog);
        let mut found = Vec::new();
        let mut visited: AHashSet<ExprId> = AHashSet::new();
        let mut cursor = visibility_block_of(prog, use_site);
        while let Some(block) = cursor {
            self.collect_at(prog, block, name, &mut found, &mut visited);
            cursor = self.next_meaningful_block(prog, block);
        }
        found
    }

    fn collect_at(
        &self,
        prog: &Program,
        block: ExprId,
        name: NameId,
        found: &mut Vec<SymId>,
        visited: &mut AHashSet<ExprId>,
    ) {
        if !visited.insert(block) {
            return;
        }
        if let Some(by_name) = self.map.get(&block) {
            if let Some(fns) = by_name.get(&name) {
                for &f in fns {
                    if !found.contains(&f) {
                        found.push(f);
                    }
                }
            }
        }
        // Descend into used modules, guarding cycles through `visited`.
        if let ExprKind::Block { uses, .. } = &prog.arena.expr(block).kind {
            for &module in uses {
                if let SymKind::Module(data) = &prog.arena.sym(module).kind {
                    self.collect_at(prog, data.block, name, found, visited);
                }
            }
        }
    }

    /// Next enclosing block that has map entries or module uses, through the
    /// skip cache.
    fn next_meaningful_block(&mut self, prog: &Program, block: ExprId) -> Option<ExprId> {
        if let Some(&cached) = self.skip_cache.get(&block) {
            return cached;
        }
        let mut cursor = parent_visibility_block(prog, block);
        while let Some(b) = cursor {
            if self.is_meaningful(prog, b) {
                break;
            }
            cursor = parent_visibility_block(prog, b);
        }
        self.skip_cache.insert(block, cursor);
        cursor
    }

    fn is_meaningful(&self, prog: &Program, block: ExprId) -> bool {
        if self.map.get(&block).is_some_and(|m| !m.is_empty()) {
            return true;
        }
        matches!(&prog.arena.expr(block).kind, ExprKind::Block { uses, .. } if !uses.is_empty())
    }
}

/// The block visibility climbs from for an arbitrary expression: its nearest
/// enclosing block, hopping to a function's instantiation point when the
/// climb crosses an instantiated function's boundary.
#[must_use]
pub fn visibility_block_of(prog: &Program, e: ExprId) -> Option<ExprId> {
    if let Some(block) = prog.arena.enclosing_block(e) {
        return Some(block);
    }
    let sym = prog.arena.expr(e).parent_sym?;
    visibility_block_of_sym(prog, sym)
}

fn visibility_block_of_sym(prog: &Program, sym: SymId) -> Option<ExprId> {
    match &prog.arena.sym(sym).kind {
        SymKind::Fn(data) => {
            if let Some(point) = data.instantiation_point {
                return Some(point);
            }
            let def = prog.arena.sym(sym).def_point?;
            visibility_block_of(prog, def)
        }
        SymKind::Module(data) => Some(data.block),
        _ => {
            let def = prog.arena.sym(sym).def_point?;
            visibility_block_of(prog, def)
        }
    }
}

/// Where a function's definition is visible from.
#[must_use]
pub fn visibility_block_of_fn(prog: &Program, func: SymId) -> Option<ExprId> {
    if let Some(point) = prog.arena.fn_data(func).instantiation_point {
        return Some(point);
    }
    let def = prog.arena.sym(func).def_point?;
    prog.arena
        .enclosing_block(def)
        .or_else(|| {
            let sym = prog.arena.expr(def).parent_sym?;
            visibility_block_of_sym(prog, sym)
        })
}

fn parent_visibility_block(prog: &Program, block: ExprId) -> Option<ExprId> {
    if let Some(parent) = prog.arena.enclosing_block(block) {
        return Some(parent);
    }
    let sym = prog.arena.expr(block).parent_sym?;
    match &prog.arena.sym(sym).kind {
        SymKind::Fn(data) => {
            if let Some(point) = data.instantiation_point {
                Some(point)
            } else {
                let def = prog.arena.sym(sym).def_point?;
                visibility_block_of(prog, def)
            }
        }
        SymKind::Module(_) => {
            // A module block climbs to its definition's scope (`_Program`,
            // then `_root`).
            let def = prog.arena.sym(sym).def_point?;
            prog.arena.enclosing_block(def)
        }
        _ => None,
    }
}

fn root_block(prog: &Program) -> ExprId {
    prog.arena.module_data(prog.root_module).block
}

fn in_internal_module(prog: &Program, func: SymId) -> bool {
    let mut cursor = prog.arena.sym(func).def_point;
    while let Some(e) = cursor {
        if let Some(sym) = prog.arena.expr(e).parent_sym {
            if prog.arena.sym(sym).flags.contains(Flags::INTERNAL_MODULE) {
                return true;
            }
            cursor = prog.arena.sym(sym).def_point;
        } else {
            break;
        }
    }
    false
}

/// True when `fn1`'s defining scope is strictly closer to `e` than `fn2`'s:
/// the narrower-visibility disambiguation criterion.
#[must_use]
pub fn is_more_visible(prog: &Program, e: ExprId, fn1: SymId, fn2: SymId) -> bool {
    let block1 = visibility_block_of_fn(prog, fn1);
    let block2 = visibility_block_of_fn(prog, fn2);
    if block1 == block2 {
        return false;
    }
    let mut cursor = visibility_block_of(prog, e);
    let mut visited = AHashSet::new();
    while let Some(block) = cursor {
        if !visited.insert(block) {
            break;
        }
        if Some(block) == block1 {
            return true;
        }
        if Some(block) == block2 {
            return false;
        }
        // Used modules count as the same distance as the using block.
        if let ExprKind::Block { uses, .. } = &prog.arena.expr(block).kind {
            for &module in uses {
                if let SymKind::Module(data) = &prog.arena.sym(module).kind {
                    if Some(data.block) == block1 {
                        return true;
                    }
                    if Some(data.block) == block2 {
                        return false;
                    }
                }
            }
        }
        cursor = parent_visibility_block(prog, block);
    }
    false
}
