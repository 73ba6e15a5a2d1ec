//! Mutually recursive AST builder: turns a [`Paths`] bag plus loop and
//! condition context into the structured tree.
//!
//! `build_branch` drives the others: it consumes straight-line code until
//! `Paths::head_last_common` reports a loop entry, an if/else split, or a
//! forced structural cut, dispatches to `build_loop`/`build_ifelse`, then
//! repeats from the endpoint they hand back.

use crate::ast::{AstNode, Branch, CondJump, Loop};
use crate::cfg::{Address, CfgView, BRANCH_NEXT, BRANCH_NEXT_JUMP};
use crate::error::{Result, StructureError};
use crate::paths::Paths;
use crate::postpass::PostPass;

/// Knobs that change which idiom the builder prefers without changing
/// the shape of the recovered control flow.
#[derive(Debug, Clone, Copy)]
pub struct StructurerConfig {
    /// Collapse a nested `if (a) { if (b) { ... } }` into `if (a && b)`
    /// when the inner if shares an else target with the outer one.
    pub emit_and_if: bool,
}

impl Default for StructurerConfig {
    fn default() -> Self {
        StructurerConfig { emit_and_if: true }
    }
}

/// Entry point: structure `paths` (normally every path from a procedure's
/// entry block) into a single top-level branch, then run `post` over it.
pub fn generate_ast(
    cfg: &dyn CfgView,
    paths: &mut Paths,
    config: &StructurerConfig,
    post: &dyn PostPass,
) -> Result<Branch> {
    let mut ast = build_branch(cfg, config, paths, &[], None, None)?;
    post.run(&mut ast);
    Ok(ast)
}

/// A conditional jump that never settles into an `Ifelse`: both its
/// successors lead back into the loop it's the header test for. Rendered
/// as a guarded jump to whichever successor exits the loop, inverting the
/// condition when the literal jump target is the one that stays inside.
fn ast_ifgoto(cfg: &dyn CfgView, paths: &Paths, curr_loop_idx: &[usize], addr: Address) -> Result<AstNode> {
    let cond = cfg.cond_id(addr).ok_or(StructureError::UnknownAddress(addr))?;
    let nxt = cfg.successors(addr);

    let c1 = paths.loop_contains(curr_loop_idx, nxt[BRANCH_NEXT]);
    let c2 = paths.loop_contains(curr_loop_idx, nxt[BRANCH_NEXT_JUMP]);

    if c1 && c2 {
        return Err(StructureError::BothSuccessorsInLoop(addr));
    }

    let (cond, target) = if c2 {
        (cfg.invert_cond(cond), nxt[BRANCH_NEXT])
    } else {
        (cond, nxt[BRANCH_NEXT_JUMP])
    };

    Ok(AstNode::IfGoto {
        cond: CondJump { address: addr, cond },
        target,
    })
}

/// Builds a straight-line-then-branch sequence until `paths` runs dry or
/// reaches `endif`. Returns the accumulated children as a [`Branch`].
fn build_branch(
    cfg: &dyn CfgView,
    config: &StructurerConfig,
    paths: &mut Paths,
    curr_loop_idx: &[usize],
    last_else: Option<Address>,
    endif: Option<Address>,
) -> Result<Branch> {
    let mut branch = Branch::new();
    let mut if_printed = false;

    loop {
        if paths.rm_empty_paths() {
            break;
        }

        let (until, is_loop, is_ifelse, force_stop_addr) = paths.head_last_common(curr_loop_idx);

        let mut last: Option<Address> = None;
        let mut run: Vec<Address> = Vec::new();
        while last != until {
            let addr = paths.first();
            if cfg.is_cond_jump(addr) {
                if !run.is_empty() {
                    branch.add(AstNode::Block(std::mem::take(&mut run)));
                }
                branch.add(ast_ifgoto(cfg, paths, curr_loop_idx, addr)?);
            } else {
                run.push(addr);
            }
            last = Some(paths.pop());
        }
        if !run.is_empty() {
            branch.add(AstNode::Block(std::mem::take(&mut run)));
        }

        if paths.rm_empty_paths() {
            break;
        }

        if let Some(stop_addr) = force_stop_addr {
            log::trace!("forced structural cut at 0x{stop_addr:08X}, emitting explicit jmp");
            let addr = paths.first();
            branch.add(AstNode::Block(vec![addr]));
            if !cfg.is_uncond_jump(addr) {
                let nxt = cfg.successors(addr);
                branch.add(AstNode::Jmp(nxt[BRANCH_NEXT]));
            }
            break;
        }

        // A same-level if/else can't share an else target across a loop
        // boundary, so the nested loop always enters with last_else cleared.
        let endpoint = if is_loop {
            let (node, ep) = build_loop(cfg, config, paths, curr_loop_idx, endif)?;
            branch.add(node);
            ep
        } else if is_ifelse {
            let (node, ep) = build_ifelse(cfg, config, paths, curr_loop_idx, last_else, if_printed, endif)?;
            if_printed = matches!(node, AstNode::Ifelse { .. });
            branch.add(node);
            ep
        } else {
            Some(paths.first())
        };

        match endpoint {
            None => break,
            Some(ep) => paths.goto_addr(ep),
        }
    }

    Ok(branch)
}

/// True when no path out of the loop body ever reaches a real exit: every
/// conditional jump inside keeps both its successors within the same set
/// of paths, so the only way out is a later forced cut.
fn is_infinite(cfg: &dyn CfgView, paths: &Paths) -> bool {
    for e in paths.entries() {
        for &addr in &e.addrs {
            if cfg.is_cond_jump(addr) {
                let nxt = cfg.successors(addr);
                if !paths.contains(nxt[BRANCH_NEXT]) || !paths.contains(nxt[BRANCH_NEXT_JUMP]) {
                    return false;
                }
            }
        }
    }
    true
}

fn loop_start_addr(cfg: &dyn CfgView, curr_loop_idx: &[usize]) -> Address {
    let i = *curr_loop_idx
        .first()
        .expect("build_loop called with no active loop index");
    cfg.loops()[i][0]
}

/// Builds a loop node: header test, body, and (when the loop has more
/// than one exit) an epilog of endloop sections. `outer_loop_idx` is the
/// loop context the epilog resumes in once the loop is left behind.
///
/// `_endif` is accepted for call-site symmetry with `build_ifelse` but
/// never threaded further: neither a loop body nor its epilog can share
/// an enclosing if/else's endpoint across the loop boundary, so both
/// recurse with a fresh `None`.
fn build_loop(
    cfg: &dyn CfgView,
    config: &StructurerConfig,
    paths: &mut Paths,
    outer_loop_idx: &[usize],
    _endif: Option<Address>,
) -> Result<(AstNode, Option<Address>)> {
    let mut lp = Loop::new();
    let curr_loop_idx = paths.get_loops_idx();
    let loop_start = loop_start_addr(cfg, &curr_loop_idx);
    log::debug!("structuring loop headed at 0x{loop_start:08X} (loop indices {curr_loop_idx:?})");

    if cfg.is_cond_jump(loop_start) {
        lp.header.add(ast_ifgoto(cfg, paths, &curr_loop_idx, loop_start)?);
    } else {
        lp.header.add(AstNode::Block(vec![loop_start]));
    }

    let (mut loop_paths, endloop) = paths.extract_loop_paths(&curr_loop_idx);

    // Emptiness of endloop alone doesn't decide infiniteness: a loop can
    // have no separate endloop group yet still exit through a path that
    // rejoins the loop's own header. Check this before the header address
    // is popped off loop_paths below.
    lp.infinite = is_infinite(cfg, &loop_paths);
    log::trace!(
        "loop at 0x{loop_start:08X}: infinite={}, {} endloop group(s)",
        lp.infinite,
        endloop.len()
    );

    paths.pop();
    // loop_paths still has the header at every entry's head, same as
    // `paths` did; drop it the same way, since it's already rendered
    // above, or build_branch would immediately redetect the loop entry.
    loop_paths.pop();
    lp.body = build_branch(cfg, config, &mut loop_paths, &curr_loop_idx, None, None)?;

    if endloop.is_empty() {
        return Ok((AstNode::Loop(lp), None));
    }

    if endloop.len() > 1 {
        let mut epilog = Branch::new();
        let last = endloop.len();
        for (i, mut el) in endloop.iter().cloned().enumerate().take(last - 1) {
            epilog.add(AstNode::Comment(format!("endloop {}", i + 1)));
            epilog.extend(build_branch(cfg, config, &mut el, outer_loop_idx, None, None)?);
        }
        epilog.add(AstNode::Comment(format!("endloop {last}")));
        lp.epilog = Some(epilog);
    }

    let endpoint = endloop.last().map(|p| p.first());
    Ok((AstNode::Loop(lp), endpoint))
}

/// Builds an if/else node, folding it into an `AndIf` fragment instead
/// when the nested-if idiom collapses into the enclosing condition.
#[allow(clippy::too_many_arguments)]
fn build_ifelse(
    cfg: &dyn CfgView,
    config: &StructurerConfig,
    paths: &mut Paths,
    curr_loop_idx: &[usize],
    last_else: Option<Address>,
    is_prev_andif: bool,
    endif: Option<Address>,
) -> Result<(AstNode, Option<Address>)> {
    let addr = paths.pop();
    paths.rm_empty_paths();
    log::trace!("structuring if/else at 0x{addr:08X}");

    let cond = cfg.cond_id(addr).ok_or(StructureError::UnknownAddress(addr))?;
    let nxt = cfg.successors(addr);
    let if_addr = nxt[BRANCH_NEXT];
    let else_addr_raw = nxt.get(BRANCH_NEXT_JUMP).copied();

    // endpoint == None means we're inside a sub-if whose endpoint lies
    // further out; split() only keeps addresses within this if/else.
    let endpoint = paths.first_common(curr_loop_idx, else_addr_raw);
    let (split, mut else_addr) = paths.split(addr, endpoint);
    let [split_next, split_jump] = split;

    if config.emit_and_if {
        if let Some(le) = last_else {
            if !is_prev_andif {
                if if_addr == le && endpoint.is_none() {
                    return Ok((AstNode::AndIf { cond: CondJump { address: addr, cond } }, else_addr));
                }

                let shares_else_target = else_addr.is_some_and(|ea| ea == le || Some(ea) == endif);
                let chains_to_endif = Some(le) == endif && endif == endpoint && endpoint.is_some();
                if shares_else_target || chains_to_endif {
                    return Ok((
                        AstNode::AndIf {
                            cond: CondJump { address: addr, cond: cfg.invert_cond(cond) },
                        },
                        Some(if_addr),
                    ));
                }
            }
        }
    }

    if else_addr.is_none() {
        else_addr = last_else;
    }

    let mut split_jump = split_jump;
    let mut split_next = split_next;
    let then_branch = build_branch(cfg, config, &mut split_jump, curr_loop_idx, None, endpoint)?;
    let else_branch = build_branch(cfg, config, &mut split_next, curr_loop_idx, else_addr, endpoint)?;

    Ok((
        AstNode::Ifelse {
            cond: CondJump { address: addr, cond },
            then_branch,
            else_branch,
        },
        endpoint,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BranchKind;
    use crate::postpass::NoopPostPass;
    use std::collections::BTreeSet;

    struct TestCfg {
        succ: std::collections::BTreeMap<Address, Vec<Address>>,
        cond: std::collections::BTreeMap<Address, u32>,
        loops: Vec<Vec<Address>>,
        nested: Vec<BTreeSet<usize>>,
        marked: BTreeSet<usize>,
        marked_addr: BTreeSet<Address>,
    }

    impl CfgView for TestCfg {
        fn successors(&self, addr: Address) -> &[Address] {
            self.succ.get(&addr).map(|v| v.as_slice()).unwrap_or(&[])
        }
        fn branch_kind(&self, addr: Address) -> BranchKind {
            if let Some(&c) = self.cond.get(&addr) {
                BranchKind::Conditional(c)
            } else if self.succ.get(&addr).map(|v| v.len()).unwrap_or(0) == 1 {
                BranchKind::Fallthrough
            } else {
                BranchKind::Unconditional
            }
        }
        fn loops(&self) -> &[Vec<Address>] {
            &self.loops
        }
        fn nested_loops_idx(&self, loop_idx: usize) -> &BTreeSet<usize> {
            &self.nested[loop_idx]
        }
        fn marked(&self) -> &BTreeSet<usize> {
            &self.marked
        }
        fn marked_addr(&self) -> &BTreeSet<Address> {
            &self.marked_addr
        }
        fn invert_cond(&self, cond: u32) -> u32 {
            cond ^ 1
        }
    }

    #[test]
    fn straight_line_produces_a_single_block() {
        let mut cfg = TestCfg {
            succ: Default::default(),
            cond: Default::default(),
            loops: vec![],
            nested: vec![],
            marked: BTreeSet::new(),
            marked_addr: BTreeSet::new(),
        };
        cfg.succ.insert(1, vec![2]);
        cfg.succ.insert(2, vec![3]);

        let mut paths = Paths::new(&cfg);
        paths.add(vec![1, 2, 3], None);

        let config = StructurerConfig::default();
        let ast = generate_ast(&cfg, &mut paths, &config, &NoopPostPass).unwrap();
        assert_eq!(ast.children, vec![AstNode::Block(vec![1, 2, 3])]);
    }

    #[test]
    fn simple_if_produces_ifelse_node() {
        let mut cfg = TestCfg {
            succ: Default::default(),
            cond: Default::default(),
            loops: vec![],
            nested: vec![],
            marked: BTreeSet::new(),
            marked_addr: BTreeSet::new(),
        };
        cfg.cond.insert(1, 0);
        cfg.succ.insert(1, vec![2, 3]);
        cfg.succ.insert(2, vec![4]);
        cfg.succ.insert(3, vec![4]);

        let mut paths = Paths::new(&cfg);
        paths.add(vec![1, 2, 4], None);
        paths.add(vec![1, 3, 4], None);

        let config = StructurerConfig::default();
        let ast = generate_ast(&cfg, &mut paths, &config, &NoopPostPass).unwrap();

        assert!(ast.children.iter().any(|n| matches!(n, AstNode::Ifelse { .. })));
    }

    #[test]
    fn while_loop_produces_loop_node() {
        let mut cfg = TestCfg {
            succ: Default::default(),
            cond: Default::default(),
            loops: vec![vec![1, 2]],
            nested: vec![BTreeSet::new()],
            marked: BTreeSet::new(),
            marked_addr: BTreeSet::new(),
        };
        cfg.cond.insert(1, 0);
        cfg.succ.insert(1, vec![3, 2]);
        cfg.succ.insert(2, vec![1]);

        let mut paths = Paths::new(&cfg);
        paths.add(vec![1, 2], Some(0));
        paths.add(vec![1, 3], None);

        let config = StructurerConfig::default();
        let ast = generate_ast(&cfg, &mut paths, &config, &NoopPostPass).unwrap();

        assert!(ast.children.iter().any(|n| matches!(n, AstNode::Loop(_))));
    }
}
