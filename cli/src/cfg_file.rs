//! JSON description of a procedure's control-flow graph, used to drive the
//! structuring engine from the command line without wiring up a real
//! disassembler. Everything here is CLI-only glue: the core crate only ever
//! sees the [`CfgView`] trait.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use structure_recover_core::{Address, BranchKind, CfgView, ConditionId};

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockSpec {
    pub successors: Vec<Address>,
    #[serde(default)]
    pub cond: Option<ConditionId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CfgFile {
    pub blocks: std::collections::BTreeMap<Address, BlockSpec>,
    #[serde(default)]
    pub loops: Vec<Vec<Address>>,
    #[serde(default)]
    pub nested_loops_idx: std::collections::BTreeMap<usize, BTreeSet<usize>>,
    #[serde(default)]
    pub marked: BTreeSet<usize>,
    #[serde(default)]
    pub marked_addr: BTreeSet<Address>,
    /// Root-to-leaf path enumeration, supplied externally since the core
    /// crate never constructs its own seed `Paths`. Each entry is
    /// `(addresses, looping_loop_index)`.
    pub seed_paths: Vec<(Vec<Address>, Option<usize>)>,
}

impl CfgFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading CFG file {}", path.display()))?;
        let file: CfgFile =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        for (addr, block) in &self.blocks {
            for succ in &block.successors {
                if !self.blocks.contains_key(succ) {
                    bail!("block 0x{addr:08X} references unknown successor 0x{succ:08X}");
                }
            }
        }
        Ok(())
    }

    pub fn empty_nested() -> &'static BTreeSet<usize> {
        static EMPTY: std::sync::OnceLock<BTreeSet<usize>> = std::sync::OnceLock::new();
        EMPTY.get_or_init(BTreeSet::new)
    }
}

impl CfgView for CfgFile {
    fn successors(&self, addr: Address) -> &[Address] {
        self.blocks
            .get(&addr)
            .map(|b| b.successors.as_slice())
            .unwrap_or(&[])
    }

    fn branch_kind(&self, addr: Address) -> BranchKind {
        match self.blocks.get(&addr) {
            Some(b) if b.successors.len() == 2 => {
                BranchKind::Conditional(b.cond.unwrap_or(0))
            }
            Some(b) if b.successors.len() == 1 => BranchKind::Unconditional,
            _ => BranchKind::Fallthrough,
        }
    }

    fn loops(&self) -> &[Vec<Address>] {
        &self.loops
    }

    fn nested_loops_idx(&self, loop_idx: usize) -> &BTreeSet<usize> {
        self.nested_loops_idx
            .get(&loop_idx)
            .unwrap_or_else(|| Self::empty_nested())
    }

    fn marked(&self) -> &BTreeSet<usize> {
        &self.marked
    }

    fn marked_addr(&self) -> &BTreeSet<Address> {
        &self.marked_addr
    }

    fn invert_cond(&self, cond: ConditionId) -> ConditionId {
        // No instruction model in this CLI adapter: conditions are opaque
        // small integers, so inversion just flips the low bit. A real
        // frontend supplies the instruction set's actual inverse table.
        cond ^ 1
    }
}
