//! Abstract Syntax Tree produced by the structurer.
//!
//! Nodes are passive data: they carry addresses and condition handles, never
//! the decoded instruction bodies themselves. An external pretty-printer
//! rehydrates the actual instruction text from a [`CfgView`](crate::cfg::CfgView)
//! when it walks the tree. This keeps the tree itself free of any dependency
//! on instruction decoding.

use serde::{Deserialize, Serialize};

use crate::cfg::{Address, ConditionId};

/// A conditional jump as seen by the AST: just enough to let a printer find
/// the instruction again and render the (possibly inverted) condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondJump {
    /// Address of the block whose first instruction is the conditional jump.
    pub address: Address,
    /// Condition id to print. May already be inverted relative to the
    /// original instruction (see [`crate::structurer`]).
    pub cond: ConditionId,
}

/// One node of the structured tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AstNode {
    /// A straight-line run of basic-block addresses.
    Block(Vec<Address>),
    /// Two-way branch: `if (cond) { then_branch } else { else_branch }`.
    Ifelse {
        cond: CondJump,
        then_branch: Branch,
        else_branch: Branch,
    },
    /// A conditional jump that could not be absorbed into an `Ifelse`,
    /// typically the loop-header test rendered as a guarded forward jump.
    IfGoto { cond: CondJump, target: Address },
    /// Short-circuit fragment: "if the condition does not hold, branch to
    /// the current else/endif". Only ever produced when and-if collapsing
    /// is enabled and a shared else target is found.
    AndIf { cond: CondJump },
    /// A loop, either `while (true)` (infinite) or exited via its header test.
    Loop(Loop),
    /// An explicit forward goto, retained when no structured idiom applies.
    Jmp(Address),
    /// Synthetic annotation emitted between epilog sections (e.g. `endloop 2`).
    Comment(String),
}

/// An ordered sequence of AST nodes: the body of a branch, loop, or epilog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub children: Vec<AstNode>,
}

impl Branch {
    pub fn new() -> Self {
        Branch::default()
    }

    pub fn add(&mut self, node: AstNode) {
        self.children.push(node);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Flattens another branch's children onto the end of this one.
    pub fn extend(&mut self, other: Branch) {
        self.children.extend(other.children);
    }
}

/// A structured loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    /// Prologue of the loop header: usually a single `IfGoto`, or a plain
    /// `Block` when the header does not end in a conditional jump.
    pub header: Branch,
    /// Structured loop body.
    pub body: Branch,
    /// True when no path through the loop body exits it (`while (true)`
    /// with no natural break).
    pub infinite: bool,
    /// Tail code reached through non-primary exits, one section per exit,
    /// separated by `Comment("endloop N")` markers. `None` when the loop
    /// has a single exit (the common case).
    pub epilog: Option<Branch>,
}

impl Loop {
    pub fn new() -> Self {
        Loop {
            header: Branch::new(),
            body: Branch::new(),
            infinite: false,
            epilog: None,
        }
    }
}

impl Default for Loop {
    fn default() -> Self {
        Loop::new()
    }
}
