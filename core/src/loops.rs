//! Natural-loop discovery and nesting analysis.
//!
//! This is ambient, out-of-core machinery: the structuring algorithm in
//! [`crate::paths`] and [`crate::structurer`] treats loops, their nesting,
//! and the `marked` / `marked_addr` irreducibility cuts purely as inputs
//! (see [`crate::cfg::CfgView`]). This module is one reasonable way to
//! produce those inputs from a plain successor graph: dominator computation
//! to find back edges, natural-loop body construction from each back edge,
//! and strongly-connected-component detection to flag regions that have no
//! single dominating header (irreducible, in the sense of the GLOSSARY).
//!
//! # Algorithm
//! 1. Compute the dominator sets of every node from the entry by iterative
//!    dataflow (`Dom(n) = {n} union (intersection of Dom(p) for p in preds(n))`).
//! 2. An edge `u -> h` is a back edge iff `h` dominates `u`. Group back
//!    edges by header and union their loop bodies (nodes that can reach the
//!    latch without passing back through the header).
//! 3. Any strongly connected component that is not exactly the body of one
//!    of the loops found in step 2 is irreducible; mark its addresses.

use crate::cfg::Address;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A plain directed graph, the minimal shape [`find_natural_loops`] needs.
pub trait Graph {
    fn nodes(&self) -> &[Address];
    fn successors(&self, addr: Address) -> &[Address];
}

/// Result of loop discovery: ready to drop into a [`crate::cfg::CfgView`]
/// implementation.
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    /// Natural loops, header at index 0, remaining members in a BFS order
    /// reachable from the header over the loop-induced subgraph.
    pub loops: Vec<Vec<Address>>,
    /// `nested_loops_idx[i]` is the set of loop indices strictly nested
    /// inside loop `i`.
    pub nested_loops_idx: Vec<BTreeSet<usize>>,
    /// Loop indices found to be irreducible and thus excluded from `loops`
    /// but whose member addresses still need a forced cut.
    pub marked: BTreeSet<usize>,
    /// Addresses belonging to an irreducible region.
    pub marked_addr: BTreeSet<Address>,
}

/// Compute dominator sets of every reachable node from `entry`.
pub fn compute_dominators<G: Graph>(graph: &G, entry: Address) -> BTreeMap<Address, BTreeSet<Address>> {
    let nodes = graph.nodes();
    let all: BTreeSet<Address> = nodes.iter().copied().collect();

    let mut preds: BTreeMap<Address, Vec<Address>> = nodes.iter().map(|&n| (n, vec![])).collect();
    for &n in nodes {
        for &s in graph.successors(n) {
            preds.entry(s).or_default().push(n);
        }
    }

    let mut dom: BTreeMap<Address, BTreeSet<Address>> = BTreeMap::new();
    for &n in nodes {
        if n == entry {
            let mut s = BTreeSet::new();
            s.insert(entry);
            dom.insert(n, s);
        } else {
            dom.insert(n, all.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &n in nodes {
            if n == entry {
                continue;
            }
            let mut new_dom: Option<BTreeSet<Address>> = None;
            for &p in preds.get(&n).into_iter().flatten() {
                let pdom = match dom.get(&p) {
                    Some(d) => d,
                    None => continue,
                };
                new_dom = Some(match new_dom {
                    None => pdom.clone(),
                    Some(acc) => acc.intersection(pdom).copied().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(n);
            if dom.get(&n) != Some(&new_dom) {
                dom.insert(n, new_dom);
                changed = true;
            }
        }
    }

    dom
}

/// Find every natural loop reachable from `entry`, plus nesting and
/// irreducibility markers, per the module-level algorithm description.
pub fn find_natural_loops<G: Graph>(graph: &G, entry: Address) -> LoopAnalysis {
    let nodes = graph.nodes();
    let dom = compute_dominators(graph, entry);

    let mut preds: BTreeMap<Address, Vec<Address>> = nodes.iter().map(|&n| (n, vec![])).collect();
    for &n in nodes {
        for &s in graph.successors(n) {
            preds.entry(s).or_default().push(n);
        }
    }

    // Step 1: back edges grouped by header.
    let mut latches_by_header: BTreeMap<Address, Vec<Address>> = BTreeMap::new();
    for &u in nodes {
        for &v in graph.successors(u) {
            if dom.get(&u).is_some_and(|d| d.contains(&v)) {
                latches_by_header.entry(v).or_default().push(u);
            }
        }
    }

    let mut loops: Vec<(Address, BTreeSet<Address>)> = vec![];
    for (header, latches) in &latches_by_header {
        let mut body = BTreeSet::new();
        body.insert(*header);
        let mut stack: Vec<Address> = latches.clone();
        while let Some(n) = stack.pop() {
            if body.insert(n) {
                for &p in preds.get(&n).into_iter().flatten() {
                    if p != *header {
                        stack.push(p);
                    }
                }
            }
        }
        loops.push((*header, body));
    }

    // Step 2: SCCs not matching a discovered loop body are irreducible.
    let sccs = strongly_connected_components(nodes, |n| graph.successors(n));
    let loop_bodies: BTreeSet<BTreeSet<Address>> = loops.iter().map(|(_, b)| b.clone()).collect();
    let mut marked_addr = BTreeSet::new();
    for scc in &sccs {
        let is_loop_like = scc.len() > 1 || has_self_loop(graph, scc);
        if is_loop_like && !loop_bodies.contains(scc) {
            marked_addr.extend(scc.iter().copied());
        }
    }

    // Order header-first, then a BFS over the loop-induced subgraph so
    // paths following successor edges visit members in the same relative
    // order as this canonical listing.
    let mut result = LoopAnalysis::default();
    for (header, body) in &loops {
        let mut order = vec![*header];
        let mut seen: BTreeSet<Address> = BTreeSet::new();
        seen.insert(*header);
        let mut queue: VecDeque<Address> = VecDeque::new();
        queue.push_back(*header);
        while let Some(n) = queue.pop_front() {
            for &s in graph.successors(n) {
                if body.contains(&s) && seen.insert(s) {
                    order.push(s);
                    queue.push_back(s);
                }
            }
        }
        // Any body member unreachable from the header via intra-loop edges
        // (shouldn't happen for a well-formed natural loop) is still
        // reported, appended in address order, so no address is lost.
        for &addr in body {
            if seen.insert(addr) {
                order.push(addr);
            }
        }
        result.loops.push(order);
    }

    result.nested_loops_idx = vec![BTreeSet::new(); result.loops.len()];
    for i in 0..result.loops.len() {
        let body_i: BTreeSet<Address> = result.loops[i].iter().copied().collect();
        for j in 0..result.loops.len() {
            if i == j {
                continue;
            }
            let body_j: BTreeSet<Address> = result.loops[j].iter().copied().collect();
            if body_j.len() < body_i.len() && body_j.is_subset(&body_i) {
                result.nested_loops_idx[i].insert(j);
            }
        }
    }
    result.marked_addr = marked_addr;
    result
}

fn has_self_loop<G: Graph>(graph: &G, scc: &BTreeSet<Address>) -> bool {
    scc.len() == 1
        && scc.iter().next().is_some_and(|&n| graph.successors(n).contains(&n))
}

/// Tarjan's strongly-connected-components algorithm, iterative to avoid
/// blowing the stack on deeply chained blocks.
fn strongly_connected_components<'a, F>(nodes: &'a [Address], succ: F) -> Vec<BTreeSet<Address>>
where
    F: Fn(Address) -> &'a [Address],
{
    struct State {
        index: BTreeMap<Address, usize>,
        lowlink: BTreeMap<Address, usize>,
        on_stack: BTreeSet<Address>,
        stack: Vec<Address>,
        counter: usize,
        sccs: Vec<BTreeSet<Address>>,
    }

    fn strongconnect<'a, F>(v: Address, succ: &F, st: &mut State)
    where
        F: Fn(Address) -> &'a [Address],
    {
        // Iterative DFS using an explicit work stack of (node, successor index).
        let mut work: Vec<(Address, usize)> = vec![(v, 0)];
        st.index.insert(v, st.counter);
        st.lowlink.insert(v, st.counter);
        st.counter += 1;
        st.stack.push(v);
        st.on_stack.insert(v);

        while let Some(&mut (node, ref mut i)) = work.last_mut() {
            let succs = succ(node);
            if *i < succs.len() {
                let w = succs[*i];
                *i += 1;
                if !st.index.contains_key(&w) {
                    st.index.insert(w, st.counter);
                    st.lowlink.insert(w, st.counter);
                    st.counter += 1;
                    st.stack.push(w);
                    st.on_stack.insert(w);
                    work.push((w, 0));
                } else if st.on_stack.contains(&w) {
                    let wi = st.index[&w];
                    let nl = st.lowlink[&node].min(wi);
                    st.lowlink.insert(node, nl);
                }
            } else {
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    let nl = st.lowlink[&parent].min(st.lowlink[&node]);
                    st.lowlink.insert(parent, nl);
                }
                if st.lowlink[&node] == st.index[&node] {
                    let mut comp = BTreeSet::new();
                    loop {
                        let w = st.stack.pop().unwrap();
                        st.on_stack.remove(&w);
                        comp.insert(w);
                        if w == node {
                            break;
                        }
                    }
                    st.sccs.push(comp);
                }
            }
        }
    }

    let mut st = State {
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeSet::new(),
        stack: vec![],
        counter: 0,
        sccs: vec![],
    };
    for &n in nodes {
        if !st.index.contains_key(&n) {
            strongconnect(n, &succ, &mut st);
        }
    }
    st.sccs
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AdjGraph {
        nodes: Vec<Address>,
        edges: BTreeMap<Address, Vec<Address>>,
    }

    impl Graph for AdjGraph {
        fn nodes(&self) -> &[Address] {
            &self.nodes
        }
        fn successors(&self, addr: Address) -> &[Address] {
            self.edges.get(&addr).map(|v| v.as_slice()).unwrap_or(&[])
        }
    }

    #[test]
    fn while_loop_has_single_natural_loop() {
        // entry -> H -> X -> H (back edge), H -> E (exit)
        let g = AdjGraph {
            nodes: vec![0, 1, 2, 3],
            edges: [(0, vec![1]), (1, vec![2, 3]), (2, vec![1]), (3, vec![])]
                .into_iter()
                .collect(),
        };
        let analysis = find_natural_loops(&g, 0);
        assert_eq!(analysis.loops.len(), 1);
        assert_eq!(analysis.loops[0][0], 1);
        let body: BTreeSet<_> = analysis.loops[0].iter().copied().collect();
        assert_eq!(body, [1, 2].into_iter().collect());
        assert!(analysis.marked_addr.is_empty());
    }

    #[test]
    fn nested_loops_are_reported() {
        // entry -> H1 -> H2 -> X -> H2 (inner back edge) -> H1 (outer back edge via X2) -> E
        let g = AdjGraph {
            nodes: vec![0, 1, 2, 3, 4, 5],
            edges: [
                (0, vec![1]),
                (1, vec![2]),
                (2, vec![3]),
                (3, vec![2, 4]),
                (4, vec![1, 5]),
                (5, vec![]),
            ]
            .into_iter()
            .collect(),
        };
        let analysis = find_natural_loops(&g, 0);
        assert_eq!(analysis.loops.len(), 2);
        let outer = analysis.loops.iter().position(|l| l[0] == 1).unwrap();
        let inner = analysis.loops.iter().position(|l| l[0] == 2).unwrap();
        assert!(analysis.nested_loops_idx[outer].contains(&inner));
    }

    #[test]
    fn irreducible_region_is_marked() {
        // Two-entry SCC: 1 and 2 both reachable from outside and each jumps
        // into the other, with no single dominating header.
        let g = AdjGraph {
            nodes: vec![0, 1, 2],
            edges: [(0, vec![1, 2]), (1, vec![2]), (2, vec![1])].into_iter().collect(),
        };
        let analysis = find_natural_loops(&g, 0);
        assert!(analysis.loops.is_empty());
        assert_eq!(analysis.marked_addr, [1, 2].into_iter().collect());
    }
}
