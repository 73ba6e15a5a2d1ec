//! The read-only control-flow view the structurer consumes.
//!
//! Everything in this module is an *external collaborator* as far as the
//! structuring algorithm is concerned: instruction decoding, CFG
//! construction and natural-loop discovery all happen upstream (see
//! [`crate::loops`] for a reference loop-finder). The structurer only ever
//! reads through the [`CfgView`] trait.

use std::collections::BTreeSet;

/// Opaque identifier of a basic block: its entry instruction address.
/// Only equality, ordering and hashing are used by the structurer.
pub type Address = u32;

/// Opaque condition identifier for a conditional jump. The structurer never
/// interprets it beyond passing it to [`CfgView::invert_cond`].
pub type ConditionId = u32;

/// Index of the fall-through successor in [`CfgView::successors`].
pub const BRANCH_NEXT: usize = 0;
/// Index of the taken-branch successor in [`CfgView::successors`].
pub const BRANCH_NEXT_JUMP: usize = 1;

/// The branch class of a basic block's first instruction. The structurer
/// only consults this and, for conditional jumps, the condition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Falls through to its single successor; no terminator to render.
    Fallthrough,
    /// Unconditional jump to its single successor.
    Unconditional,
    /// Conditional jump: `successors()[BRANCH_NEXT]` is the fall-through
    /// target, `successors()[BRANCH_NEXT_JUMP]` is the taken target.
    Conditional(ConditionId),
}

/// Read-only access to a single procedure's control-flow graph, its natural
/// loops, and the preprocessor's irreducibility markers.
///
/// Implementations are expected to be cheap to query repeatedly; the
/// structurer calls these methods many times per procedure.
pub trait CfgView {
    /// Successor addresses of `addr`, in `link_out` convention: 0, 1 or 2
    /// entries, index [`BRANCH_NEXT`] is the fall-through edge.
    fn successors(&self, addr: Address) -> &[Address];

    /// Branch class of `addr`'s first instruction.
    fn branch_kind(&self, addr: Address) -> BranchKind;

    /// All natural loops, each as the ordered list of addresses it covers
    /// with the loop header at index 0.
    fn loops(&self) -> &[Vec<Address>];

    /// Loop indices strictly nested inside loop `loop_idx`.
    fn nested_loops_idx(&self, loop_idx: usize) -> &BTreeSet<usize>;

    /// Loop indices flagged by loop preprocessing as requiring a forced
    /// structural cut (e.g. an irreducible entry already compiled to goto).
    fn marked(&self) -> &BTreeSet<usize>;

    /// Addresses flagged the same way as [`CfgView::marked`], at block
    /// granularity.
    fn marked_addr(&self) -> &BTreeSet<Address>;

    /// Invert a condition id (e.g. `jg` <-> `jle`).
    fn invert_cond(&self, cond: ConditionId) -> ConditionId;

    /// True iff `addr`'s first instruction is a conditional jump.
    fn is_cond_jump(&self, addr: Address) -> bool {
        matches!(self.branch_kind(addr), BranchKind::Conditional(_))
    }

    /// True iff `addr`'s first instruction is an unconditional jump.
    fn is_uncond_jump(&self, addr: Address) -> bool {
        matches!(self.branch_kind(addr), BranchKind::Unconditional)
    }

    /// The condition id of `addr`'s first instruction, if it is conditional.
    fn cond_id(&self, addr: Address) -> Option<ConditionId> {
        match self.branch_kind(addr) {
            BranchKind::Conditional(id) => Some(id),
            _ => None,
        }
    }
}
