//! Tree-integrity checking, run at pass boundaries in tests and debug
//! builds.
//!
//! Violations here are internal inconsistencies: the checker returns every
//! violation it finds so the breakage is visible in one report, and
//! [`assert_verified`] turns them into a panic naming the offending nodes.

use crate::{
    ast::{
        arena::{ExprId, ListId},
        expr::ExprKind,
    },
    program::Program,
};

/// Checks list consistency, parent agreement, call-actual
/// ownership, primitive/base exclusivity, and def-point agreement over the
/// whole program. Returns one message per violation.
#[must_use]
pub fn check_program(prog: &Program) -> Vec<String> {
    let arena = &prog.arena;
    let mut violations = Vec::new();

    let mut checked_lists: Vec<ListId> = Vec::new();
    for e in arena.all_in_tree() {
        let node = arena.expr(e);

        // A child's parent symbol agrees with its parent expression's.
        if let Some(parent) = node.parent_expr {
            if arena.expr(parent).parent_sym != node.parent_sym {
                violations.push(format!("{e}: parent symbol disagrees with parent {parent}"));
            }
        }

        // Membership links imply an owning list.
        if (node.prev.is_some() || node.next.is_some()) && node.list.is_none() {
            violations.push(format!("{e}: sibling links without an owning list"));
        }
        if let Some(list) = node.list {
            if !checked_lists.contains(&list) {
                checked_lists.push(list);
                check_list(prog, list, &mut violations);
            }
        }

        match &node.kind {
            ExprKind::Call(call) => {
                // Invariant 7: primitive XOR base.
                if call.prim.is_some() && call.base.is_some() {
                    violations.push(format!("{e}: call has both a primitive and a base"));
                }
                // Invariant 3: actuals are owned by the call.
                for actual in arena.items(call.actuals) {
                    if arena.expr(actual).parent_expr != Some(e) {
                        violations.push(format!("{e}: actual {actual} not parented to its call"));
                    }
                }
            }
            ExprKind::Def { sym, .. } => {
                // Invariant 6: the symbol's def point is this def.
                if arena.sym(*sym).def_point != Some(e) {
                    violations.push(format!("{e}: defined symbol {sym} has a stale def point"));
                }
            }
            _ => {}
        }

        // Children in named slots point back at this node.
        for child in arena.children(e) {
            let child_node = arena.expr(child);
            if child_node.list.is_none() && child_node.parent_expr != Some(e) {
                violations.push(format!("{e}: slot child {child} has a stale parent link"));
            }
        }
    }

    violations
}

fn check_list(prog: &Program, list: ListId, violations: &mut Vec<String>) {
    let arena = &prog.arena;
    let data = arena.list(list);
    let items = arena.items(list);
    if items.len() != data.len as usize {
        violations.push(format!("{list}: length {} disagrees with {} members", data.len, items.len()));
    }
    if data.head != items.first().copied() {
        violations.push(format!("{list}: stale head pointer"));
    }
    if data.tail != items.last().copied() {
        violations.push(format!("{list}: stale tail pointer"));
    }
    let mut prev: Option<ExprId> = None;
    for &item in &items {
        let node = arena.expr(item);
        if node.list != Some(list) {
            violations.push(format!("{list}: member {item} does not name this list"));
        }
        if node.prev != prev {
            violations.push(format!("{list}: member {item} has a stale prev link"));
        }
        prev = Some(item);
    }
}

/// Panics with every violation when the program fails integrity checking.
pub fn assert_verified(prog: &Program) {
    let violations = check_program(prog);
    assert!(
        violations.is_empty(),
        "tree integrity violations:\n{}",
        violations.join("\n")
    );
}
