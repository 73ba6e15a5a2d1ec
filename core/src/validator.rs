//! Post-hoc checks for the invariants and laws listed for this engine:
//! reachability preservation, and well-formedness of the emitted tree. These
//! are not run on the hot path; callers that want them (tests, a `--validate`
//! CLI flag) invoke them explicitly against a finished [`Branch`].

use std::collections::BTreeSet;

use thiserror::Error;

use crate::ast::{AstNode, Branch};
use crate::cfg::{Address, CfgView};

/// A violation found by [`validate_reachability`] or [`validate_well_formed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An address appears in the tree that the CFG view does not know about.
    #[error("address 0x{0:08X} appears in the AST but is not a node of the control-flow graph")]
    UnknownAddress(Address),

    /// An address the CFG view considers reachable never appears anywhere
    /// in the tree's `Block` or loop-header nodes.
    #[error("address 0x{0:08X} is reachable but missing from the structured tree")]
    Unreachable(Address),

    /// `AndIf` was found in a tree built with `emit_and_if = false`.
    #[error("and-if node found at 0x{0:08X} despite and-if collapsing being disabled")]
    UnexpectedAndIf(Address),
}

/// Collects every address that appears in a `Block` or loop-header position
/// anywhere in the tree — the set the reachability law talks about.
fn collect_block_addresses(branch: &Branch, out: &mut BTreeSet<Address>) {
    for node in &branch.children {
        match node {
            AstNode::Block(addrs) => out.extend(addrs.iter().copied()),
            AstNode::Ifelse {
                then_branch,
                else_branch,
                ..
            } => {
                collect_block_addresses(then_branch, out);
                collect_block_addresses(else_branch, out);
            }
            AstNode::Loop(lp) => {
                collect_block_addresses(&lp.header, out);
                collect_block_addresses(&lp.body, out);
                if let Some(epilog) = &lp.epilog {
                    collect_block_addresses(epilog, out);
                }
            }
            AstNode::IfGoto { cond, .. } => {
                out.insert(cond.address);
            }
            AstNode::AndIf { cond } => {
                out.insert(cond.address);
            }
            AstNode::Jmp(_) | AstNode::Comment(_) => {}
        }
    }
}

/// Checks the reachability-preservation law: the set of basic-block
/// addresses appearing in `Block` and header nodes equals the set the CFG
/// view considers reachable from `entry`.
///
/// `reachable` is supplied by the caller rather than recomputed here — this
/// crate has no notion of "entry point" beyond what the seed `Paths` already
/// encoded, so the caller (typically the same code that built the seed)
/// passes the reachable set it used to do so.
pub fn validate_reachability(
    ast: &Branch,
    _cfg: &dyn CfgView,
    reachable: &BTreeSet<Address>,
) -> Result<(), Vec<ValidationError>> {
    let mut seen = BTreeSet::new();
    collect_block_addresses(ast, &mut seen);

    let mut errors = Vec::new();
    for &addr in &seen {
        if !reachable.contains(&addr) {
            errors.push(ValidationError::UnknownAddress(addr));
        }
    }
    for &addr in reachable {
        if !seen.contains(&addr) {
            errors.push(ValidationError::Unreachable(addr));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks the and-if preservation law for trees built with `emit_and_if =
/// false`: no `AndIf` node should appear anywhere.
pub fn validate_no_and_if(ast: &Branch) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    fn walk(branch: &Branch, errors: &mut Vec<ValidationError>) {
        for node in &branch.children {
            match node {
                AstNode::AndIf { cond } => {
                    errors.push(ValidationError::UnexpectedAndIf(cond.address));
                }
                AstNode::Ifelse {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    walk(then_branch, errors);
                    walk(else_branch, errors);
                }
                AstNode::Loop(lp) => {
                    walk(&lp.header, errors);
                    walk(&lp.body, errors);
                    if let Some(epilog) = &lp.epilog {
                        walk(epilog, errors);
                    }
                }
                _ => {}
            }
        }
    }
    walk(ast, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CondJump, Loop};
    use crate::cfg::BranchKind;

    #[derive(Default)]
    struct TestCfg {
        succ: std::collections::BTreeMap<Address, Vec<Address>>,
        empty_idx: BTreeSet<usize>,
        empty_addr: BTreeSet<Address>,
    }

    impl CfgView for TestCfg {
        fn successors(&self, addr: Address) -> &[Address] {
            self.succ.get(&addr).map(|v| v.as_slice()).unwrap_or(&[])
        }
        fn branch_kind(&self, addr: Address) -> BranchKind {
            match self.succ.get(&addr).map(|v| v.len()) {
                Some(2) => BranchKind::Conditional(0),
                Some(1) => BranchKind::Unconditional,
                _ => BranchKind::Fallthrough,
            }
        }
        fn loops(&self) -> &[Vec<Address>] {
            &[]
        }
        fn nested_loops_idx(&self, _loop_idx: usize) -> &BTreeSet<usize> {
            &self.empty_idx
        }
        fn marked(&self) -> &BTreeSet<usize> {
            &self.empty_idx
        }
        fn marked_addr(&self) -> &BTreeSet<Address> {
            &self.empty_addr
        }
        fn invert_cond(&self, cond: crate::cfg::ConditionId) -> crate::cfg::ConditionId {
            cond
        }
    }

    #[test]
    fn reachability_holds_for_a_straight_line_block() {
        let cfg = TestCfg {
            succ: [(1, vec![2]), (2, vec![3])].into_iter().collect(),
            ..Default::default()
        };
        let mut ast = Branch::new();
        ast.add(AstNode::Block(vec![1, 2, 3]));
        let reachable: BTreeSet<Address> = [1, 2, 3].into_iter().collect();
        assert!(validate_reachability(&ast, &cfg, &reachable).is_ok());
    }

    #[test]
    fn reachability_flags_a_dropped_address() {
        let cfg = TestCfg {
            succ: [(1, vec![2]), (2, vec![3])].into_iter().collect(),
            ..Default::default()
        };
        let mut ast = Branch::new();
        ast.add(AstNode::Block(vec![1, 2]));
        let reachable: BTreeSet<Address> = [1, 2, 3].into_iter().collect();
        let err = validate_reachability(&ast, &cfg, &reachable).unwrap_err();
        assert_eq!(err, vec![ValidationError::Unreachable(3)]);
    }

    #[test]
    fn no_and_if_holds_for_a_plain_ifelse() {
        let mut ast = Branch::new();
        let mut then_branch = Branch::new();
        then_branch.add(AstNode::Block(vec![2]));
        ast.add(AstNode::Ifelse {
            cond: CondJump { address: 1, cond: 0 },
            then_branch,
            else_branch: Branch::new(),
        });
        assert!(validate_no_and_if(&ast).is_ok());
    }

    #[test]
    fn no_and_if_flags_an_and_if_node() {
        let mut ast = Branch::new();
        let mut lp = Loop::new();
        lp.body.add(AstNode::AndIf {
            cond: CondJump { address: 5, cond: 0 },
        });
        ast.add(AstNode::Loop(lp));
        let err = validate_no_and_if(&ast).unwrap_err();
        assert_eq!(err, vec![ValidationError::UnexpectedAndIf(5)]);
    }
}
