//! Error types for the structuring engine.
//!
//! Uses `thiserror` for zero-cost error handling, following the same
//! convention as the rest of the crate's ambient error stack.

use crate::cfg::Address;
use thiserror::Error;

/// Errors raised while reconstructing structured control flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    /// `build_ifgoto` was asked to render a conditional jump whose both
    /// successors lie inside the current loop set. That is a
    /// mis-classification: it should have been handled as an `Ifelse`.
    #[error("address 0x{0:08X}: both successors of this conditional jump are inside the current loop set, expected an if/else")]
    BothSuccessorsInLoop(Address),

    /// A natural loop was found with more than one external entry point,
    /// i.e. it is not reducible; the preprocessor should have marked it.
    #[error("loop headed at 0x{0:08X} has multiple entry points and is not reducible")]
    IrreducibleLoop(Address),

    /// A path referenced an address absent from the CFG view.
    #[error("address 0x{0:08X} is not a node of the control-flow graph")]
    UnknownAddress(Address),
}

pub type Result<T> = std::result::Result<T, StructureError>;
