pub mod ast;
pub mod cfg;
pub mod error;
pub mod loops;
pub mod paths;
pub mod postpass;
pub mod pretty;
pub mod structurer;
pub mod validator;

pub use ast::{AstNode, Branch, CondJump, Loop};
pub use cfg::{Address, BranchKind, CfgView, ConditionId, BRANCH_NEXT, BRANCH_NEXT_JUMP};
pub use error::{Result, StructureError};
pub use paths::Paths;
pub use postpass::{NoopPostPass, PassChain, PostPass};
pub use structurer::{generate_ast, StructurerConfig};
