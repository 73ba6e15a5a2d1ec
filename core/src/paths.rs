//! The `Paths` multi-path cursor: a bag of candidate execution paths
//! through the CFG, each possibly annotated with the loop it continues
//! into. This is the core abstraction the structurer drives: it asks
//! where the heads diverge, consumes straight-line prefixes, and narrows
//! the bag down at every `if`/loop boundary.
//!
//! # Design note
//! An index-keyed side table for loop annotations has to be renumbered on
//! every deletion. Here the annotation travels with the path itself in
//! [`PathEntry`], so pruning or splitting paths never needs renumbering.

use crate::cfg::{Address, CfgView, BRANCH_NEXT, BRANCH_NEXT_JUMP};
use std::collections::{BTreeMap, BTreeSet};

/// One candidate path plus the loop it is truncated at or continues into,
/// if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub addrs: Vec<Address>,
    /// Index into [`CfgView::loops`] this path is annotated as looping on.
    pub looping: Option<usize>,
}

/// A bag of candidate paths sharing (when non-empty) a common head.
pub struct Paths<'a> {
    cfg: &'a dyn CfgView,
    entries: Vec<PathEntry>,
}

impl<'a> Clone for Paths<'a> {
    fn clone(&self) -> Self {
        Paths {
            cfg: self.cfg,
            entries: self.entries.clone(),
        }
    }
}

impl<'a> std::fmt::Debug for Paths<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paths").field("entries", &self.entries).finish()
    }
}

/// Find `target` in `addrs`. A `None` target (no endpoint) is never found.
fn position_of(addrs: &[Address], target: Option<Address>) -> Option<usize> {
    target.and_then(|t| addrs.iter().position(|&a| a == t))
}

impl<'a> Paths<'a> {
    pub fn new(cfg: &'a dyn CfgView) -> Self {
        Paths { cfg, entries: vec![] }
    }

    pub fn cfg(&self) -> &'a dyn CfgView {
        self.cfg
    }

    pub fn entries(&self) -> &[PathEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a path, optionally annotated as continuing into loop `loop_idx`.
    pub fn add(&mut self, path: Vec<Address>, loop_idx: Option<usize>) {
        self.entries.push(PathEntry {
            addrs: path,
            looping: loop_idx,
        });
    }

    /// True iff `addr` appears anywhere in any path.
    pub fn contains(&self, addr: Address) -> bool {
        self.entries.iter().any(|e| e.addrs.contains(&addr))
    }

    /// The shared head of path 0. Panics if empty: every public method
    /// leaves all paths sharing one head, so a non-empty `Paths` always
    /// has a well-defined head.
    pub fn first(&self) -> Address {
        self.entries[0].addrs[0]
    }

    /// Paths `i` is annotated looping on a loop index not in `curr_loop_idx`,
    /// i.e. it escapes into a sibling or outer loop.
    fn is_looping(&self, i: usize, curr_loop_idx: &[usize]) -> bool {
        match self.entries[i].looping {
            Some(l) => !curr_loop_idx.contains(&l),
            None => false,
        }
    }

    /// Every path either matches `start`'s presence/absence at its head
    /// (per `check_equal`) or is looping.
    pub fn are_all_looping(&self, start: Option<Address>, check_equal: bool, curr_loop_idx: &[usize]) -> bool {
        for (i, e) in self.entries.iter().enumerate() {
            let head = e.addrs.first().copied();
            let selected = if check_equal { head == start } else { head != start };
            if selected && !self.is_looping(i, curr_loop_idx) {
                return false;
            }
        }
        true
    }

    /// Does any loop index in `curr_loop_idx` contain `addr`? An empty
    /// `curr_loop_idx` means "no loop context", which vacuously contains
    /// everything, so a conditional at the top level is never mistaken for
    /// a loop-header test.
    pub fn loop_contains(&self, curr_loop_idx: &[usize], addr: Address) -> bool {
        if curr_loop_idx.is_empty() {
            return true;
        }
        curr_loop_idx.iter().any(|&i| self.cfg.loops()[i].contains(&addr))
    }

    fn is_in_curr_loop(&self, loop_addrs: &[Address]) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let curr_loop = self.first();
        if loop_addrs.first() != Some(&curr_loop) {
            return false;
        }
        for &addr in loop_addrs {
            if !self.contains(addr) {
                return false;
            }
        }
        for e in &self.entries {
            let mut last_idx: i64 = -1;
            for &addr in loop_addrs {
                match e.addrs.iter().position(|&a| a == addr) {
                    None => break,
                    Some(idx) => {
                        if (idx as i64) < last_idx {
                            return false;
                        }
                        last_idx = idx as i64;
                    }
                }
            }
        }
        true
    }

    /// Loop indices whose full membership is covered by this `Paths`, with
    /// the header as the shared head and address order preserved.
    pub fn get_loops_idx(&self) -> Vec<usize> {
        self.cfg
            .loops()
            .iter()
            .enumerate()
            .filter(|(_, l)| self.is_in_curr_loop(l))
            .map(|(k, _)| k)
            .collect()
    }

    fn enter_new_loop(&self, curr_loop_idx: &[usize], path_idx: usize, k: usize) -> (bool, bool) {
        let addr = self.entries[path_idx].addrs[k];
        let not_looping = self.entries[path_idx].looping.is_none();

        if self.cfg.marked_addr().contains(&addr) && (curr_loop_idx.is_empty() || not_looping) {
            return (false, true);
        }

        if not_looping {
            return (false, false);
        }

        let l_idx = self.entries[path_idx].looping.unwrap();
        if addr != self.cfg.loops()[l_idx][0] {
            return (false, false);
        }

        if self.cfg.marked_addr().contains(&addr) {
            return (false, true);
        }

        (true, false)
    }

    fn is_cond_with_both_succ_inside(&self, curr_loop_idx: &[usize], addr: Address) -> bool {
        if !self.cfg.is_cond_jump(addr) {
            return false;
        }
        let nxt = self.cfg.successors(addr);
        let c1 = self.loop_contains(curr_loop_idx, nxt[BRANCH_NEXT]);
        let c2 = self.loop_contains(curr_loop_idx, nxt[BRANCH_NEXT_JUMP]);
        c1 && c2
    }

    /// Walk the longest path as reference, looking for the point where the
    /// heads diverge, a new loop is entered, or the paths settle into an
    /// `if`/`else`. Returns `(until, is_loop, is_ifelse, force_stop_addr)`.
    pub fn head_last_common(&self, curr_loop_idx: &[usize]) -> (Option<Address>, bool, bool, Option<Address>) {
        let refpath = self.longest_path_idx();
        let mut last: Option<Address> = None;
        let mut k = 0;

        while k < self.entries[refpath].addrs.len() {
            let addr0 = self.entries[refpath].addrs[k];

            let (is_loop, force_stop) = self.enter_new_loop(curr_loop_idx, refpath, k);
            if is_loop || force_stop {
                return (last, is_loop, false, force_stop.then_some(addr0));
            }

            if self.is_cond_with_both_succ_inside(curr_loop_idx, addr0) {
                return (last, false, true, None);
            }

            for i in 0..self.entries.len() {
                if i == refpath {
                    continue;
                }
                if !self.entries[i].addrs.contains(&addr0) {
                    return (last, false, false, None);
                }

                let addr = self.entries[i].addrs[k];

                let (is_loop, force_stop) = self.enter_new_loop(curr_loop_idx, i, k);
                if is_loop || force_stop {
                    return (last, is_loop, false, force_stop.then_some(addr));
                }

                if self.is_cond_with_both_succ_inside(curr_loop_idx, addr) {
                    return (last, false, true, None);
                }
            }

            k += 1;
            last = Some(addr0);
        }

        if self.entries.len() == 1 {
            return (self.entries[0].addrs.last().copied(), false, false, None);
        }

        (last, false, false, None)
    }

    fn longest_path_idx(&self) -> usize {
        let mut idx = 0;
        let mut max_len = self.entries[0].addrs.len();
        for (k, e) in self.entries.iter().enumerate() {
            if e.addrs.len() > max_len {
                max_len = e.addrs.len();
                idx = k;
            }
        }
        idx
    }

    /// Earliest address common to every non-looping path, with the
    /// "infinite then-branch collapses to the else" idiom baked in.
    pub fn first_common(&self, curr_loop_idx: &[usize], else_addr: Option<Address>) -> Option<Address> {
        if self.entries.len() <= 1 {
            return None;
        }

        let all_looping_if = self.are_all_looping(else_addr, false, curr_loop_idx);
        let all_looping_else = self.are_all_looping(else_addr, true, curr_loop_idx);
        if all_looping_if || all_looping_else {
            return else_addr;
        }

        let mut refpath = 0;
        for i in 0..self.entries.len() {
            if !self.is_looping(i, curr_loop_idx) {
                refpath = i;
                break;
            }
        }

        let mut k = 0;
        let mut found = false;
        let mut val = None;
        while !found && k < self.entries[refpath].addrs.len() {
            let candidate = self.entries[refpath].addrs[k];
            val = Some(candidate);
            found = true;
            for i in 0..self.entries.len() {
                if i != refpath && !self.is_looping(i, curr_loop_idx) && !self.entries[i].addrs.contains(&candidate) {
                    found = false;
                    break;
                }
            }
            k += 1;
        }

        if found {
            val
        } else {
            None
        }
    }

    /// Removes and returns the shared head from every path.
    pub fn pop(&mut self) -> Address {
        let mut val = None;
        for e in &mut self.entries {
            val = Some(e.addrs.remove(0));
        }
        val.expect("pop on empty Paths")
    }

    /// Deletes every empty path; returns `true` when none remain.
    pub fn rm_empty_paths(&mut self) -> bool {
        self.entries.retain(|e| !e.addrs.is_empty());
        self.entries.is_empty()
    }

    /// Truncates each path to begin at the first occurrence of `addr`;
    /// paths that don't contain it become empty.
    pub fn goto_addr(&mut self, addr: Address) {
        for e in &mut self.entries {
            match e.addrs.iter().position(|&a| a == addr) {
                Some(idx) => e.addrs = e.addrs[idx..].to_vec(),
                None => e.addrs.clear(),
            }
        }
    }

    /// Partitions the remaining paths by which successor of `if_addr` they
    /// enter, truncating each at `endpoint` (exclusive). `if_addr` itself
    /// must already have been popped by the caller.
    pub fn split(&self, if_addr: Address, endpoint: Option<Address>) -> ([Paths<'a>; 2], Option<Address>) {
        let nxt = self.cfg.successors(if_addr);
        let mut split0 = Paths::new(self.cfg);
        let mut split1 = Paths::new(self.cfg);
        let mut else_addr = None;

        for e in &self.entries {
            if e.addrs.is_empty() {
                continue;
            }
            let head = e.addrs[0];
            let target = if head == nxt[BRANCH_NEXT] {
                &mut split0
            } else {
                else_addr = nxt.get(BRANCH_NEXT_JUMP).copied();
                &mut split1
            };
            match position_of(&e.addrs, endpoint) {
                None => target.add(e.addrs.clone(), e.looping),
                Some(idx) => target.add(e.addrs[..idx].to_vec(), None),
            }
        }

        ([split0, split1], else_addr)
    }

    fn keep_path(&self, curr_loop_idx: &[usize], entry_idx: usize) -> (bool, bool) {
        let p = &self.entries[entry_idx];
        let last = *p.addrs.last().expect("path must be non-empty");

        if self.loop_contains(curr_loop_idx, last) {
            return (true, false);
        }

        let l_idx = match p.looping {
            None => return (false, false),
            Some(l) => l,
        };

        if curr_loop_idx.contains(&l_idx) {
            return (true, false);
        }

        for &i in curr_loop_idx {
            if self.cfg.nested_loops_idx(i).contains(&l_idx) {
                return (true, false);
            }
        }

        if self.cfg.marked().contains(&l_idx) {
            return (false, true);
        }

        (false, false)
    }

    /// Splits self's paths into the portion still inside `curr_loop_idx`
    /// and the per-exit endloop groups (deduplicated and sorted).
    pub fn extract_loop_paths(&self, curr_loop_idx: &[usize]) -> (Paths<'a>, Vec<Paths<'a>>) {
        let mut loop_paths = Paths::new(self.cfg);
        let mut endloop = Paths::new(self.cfg);

        for (k, e) in self.entries.iter().enumerate() {
            let (keep, ignore) = self.keep_path(curr_loop_idx, k);
            if ignore {
                continue;
            }
            if keep {
                loop_paths.add(e.addrs.clone(), e.looping);
            } else {
                endloop.add(e.addrs.clone(), e.looping);
            }
        }

        // Endloops begin at the loop exit: cut each path's prefix up to
        // (but not including) the first address not in loop_paths.
        let len = endloop.entries.len();
        for i in 0..len {
            let addrs = endloop.entries[i].addrs.clone();
            for (k, &addr) in addrs.iter().enumerate() {
                if !loop_paths.contains(addr) {
                    let truncated = addrs[k..].to_vec();
                    let is_dup = endloop.entries.iter().any(|o| o.addrs == truncated);
                    endloop.entries[i].addrs = if is_dup { vec![] } else { truncated };
                    break;
                }
            }
        }
        endloop.rm_empty_paths();

        // Deduplicate shared tail code across endloop groups: any address
        // that shows up in more than one differently-headed path gets the
        // other path(s) cut at that point.
        let mut common: BTreeSet<Address> = BTreeSet::new();
        for p in &endloop.entries {
            let p_head = p.addrs[0];
            for &addr in &p.addrs {
                for el in &endloop.entries {
                    if el.addrs[0] == p_head {
                        continue;
                    }
                    if el.addrs.contains(&addr) {
                        common.insert(addr);
                        break;
                    }
                }
            }
        }
        for &dup in &common {
            for e in endloop.entries.iter_mut() {
                if e.addrs[0] == dup {
                    continue;
                }
                if let Some(idx) = e.addrs.iter().position(|&a| a == dup) {
                    e.addrs.truncate(idx);
                }
            }
        }
        endloop.rm_empty_paths();

        // Regroup paths that share a head address.
        let mut grp_endloop: Vec<Paths<'a>> = vec![];
        let mut seen: BTreeMap<Address, usize> = BTreeMap::new();
        for e in endloop.entries.drain(..) {
            let head = e.addrs[0];
            if let Some(&idx) = seen.get(&head) {
                grp_endloop[idx].add(e.addrs, e.looping);
            } else {
                seen.insert(head, grp_endloop.len());
                let mut p = Paths::new(self.cfg);
                p.add(e.addrs, e.looping);
                grp_endloop.push(p);
            }
        }

        let sorted = self.sort_endloops(grp_endloop);
        (loop_paths, sorted)
    }

    /// Groups whose every path ends in an unconditional jump go first (they
    /// don't fall through, so order among them doesn't matter); the rest
    /// are chained by fall-through target into a linear textual sequence.
    fn sort_endloops(&self, grp_endloop: Vec<Paths<'a>>) -> Vec<Paths<'a>> {
        let mut with_jump = vec![];
        let mut no_jump: BTreeMap<usize, Option<Address>> = BTreeMap::new();

        for (i, grp) in grp_endloop.iter().enumerate() {
            let mut all_jmp = true;
            for e in grp.entries() {
                let queue = *e.addrs.last().unwrap();
                if !self.cfg.is_uncond_jump(queue) {
                    let succ = self.cfg.successors(queue);
                    no_jump.insert(i, succ.get(BRANCH_NEXT).copied());
                    all_jmp = false;
                }
            }
            if all_jmp {
                with_jump.push(i);
            }
        }

        let group_head = |i: usize| grp_endloop[i].entries()[0].addrs[0];

        let mut endloop_sort: Vec<usize> = vec![];
        while !no_jump.is_empty() {
            let remaining_heads: BTreeMap<Address, usize> =
                no_jump.keys().map(|&i| (group_head(i), i)).collect();
            let pick = no_jump.iter().find_map(|(&i, &tgt)| {
                let points_to_remaining = tgt.is_some_and(|t| remaining_heads.get(&t).is_some_and(|&j| j != i));
                (!points_to_remaining).then_some(i)
            });
            let i = pick.unwrap_or(*no_jump.keys().next().unwrap());
            endloop_sort.insert(0, i);
            no_jump.remove(&i);
        }

        let mut grp_endloop: Vec<Option<Paths<'a>>> = grp_endloop.into_iter().map(Some).collect();
        let mut result = Vec::with_capacity(grp_endloop.len());
        for i in with_jump {
            result.push(grp_endloop[i].take().unwrap());
        }
        for i in endloop_sort {
            result.push(grp_endloop[i].take().unwrap());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    struct TestCfg {
        succ: Map<Address, Vec<Address>>,
        cond: Map<Address, u32>,
        uncond: BTreeSet<Address>,
        loops: Vec<Vec<Address>>,
        nested: Vec<BTreeSet<usize>>,
        marked: BTreeSet<usize>,
        marked_addr: BTreeSet<Address>,
    }

    impl Default for TestCfg {
        fn default() -> Self {
            TestCfg {
                succ: Map::new(),
                cond: Map::new(),
                uncond: BTreeSet::new(),
                loops: vec![],
                nested: vec![],
                marked: BTreeSet::new(),
                marked_addr: BTreeSet::new(),
            }
        }
    }

    impl CfgView for TestCfg {
        fn successors(&self, addr: Address) -> &[Address] {
            self.succ.get(&addr).map(|v| v.as_slice()).unwrap_or(&[])
        }
        fn branch_kind(&self, addr: Address) -> crate::cfg::BranchKind {
            if let Some(&c) = self.cond.get(&addr) {
                crate::cfg::BranchKind::Conditional(c)
            } else if self.uncond.contains(&addr) {
                crate::cfg::BranchKind::Unconditional
            } else {
                crate::cfg::BranchKind::Fallthrough
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
    fn pop_advances_every_path_in_lockstep() {
        let cfg = TestCfg::default();
        let mut paths = Paths::new(&cfg);
        paths.add(vec![1, 2, 3], None);
        paths.add(vec![1, 4, 3], None);
        assert_eq!(paths.pop(), 1);
        assert_eq!(paths.entries()[0].addrs, vec![2, 3]);
        assert_eq!(paths.entries()[1].addrs, vec![4, 3]);
    }

    #[test]
    fn head_last_common_stops_at_divergence() {
        let mut cfg = TestCfg::default();
        cfg.cond.insert(1, 0);
        cfg.succ.insert(1, vec![2, 3]);
        let mut paths = Paths::new(&cfg);
        paths.add(vec![1, 2, 4], None);
        paths.add(vec![1, 3, 4], None);
        let (until, is_loop, is_ifelse, force_stop) = paths.head_last_common(&[]);
        assert_eq!(until, Some(1));
        assert!(!is_loop);
        assert!(is_ifelse);
        assert_eq!(force_stop, None);
    }

    #[test]
    fn goto_addr_truncates_or_empties() {
        let cfg = TestCfg::default();
        let mut paths = Paths::new(&cfg);
        paths.add(vec![1, 2, 3], None);
        paths.add(vec![4, 5], None);
        paths.goto_addr(2);
        assert_eq!(paths.entries()[0].addrs, vec![2, 3]);
        assert!(paths.entries()[1].addrs.is_empty());
        assert!(!paths.rm_empty_paths());
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn split_partitions_by_successor() {
        let mut cfg = TestCfg::default();
        cfg.succ.insert(10, vec![20, 30]);
        let mut paths = Paths::new(&cfg);
        paths.add(vec![20, 40], None);
        paths.add(vec![30, 40], None);
        let ([then_paths, else_paths], else_addr) = paths.split(10, Some(40));
        assert_eq!(then_paths.entries()[0].addrs, vec![20]);
        assert_eq!(else_paths.entries()[0].addrs, vec![30]);
        assert_eq!(else_addr, Some(30));
    }
}
