//! # Control Flow Graph Builder
//!
//! Block creation, termination and navigation for hand-built MIR functions.
//! Loop-shaped block groups come pre-named so that printed IR stays readable.

use crate::{BasicBlock, BasicBlockId, MirFunction, Terminator, Value};

/// Snapshot of the builder position, returned without holding a borrow
#[derive(Debug, Clone, Copy)]
pub struct CfgState {
    pub current_block_id: BasicBlockId,
    pub is_terminated: bool,
}

/// Blocks of a rotated (`do/while`) loop; the exit test lives in the latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoWhileBlocks {
    pub preheader: BasicBlockId,
    pub header: BasicBlockId,
    pub latch: BasicBlockId,
    pub exit: BasicBlockId,
}

/// A builder for control flow graph operations
///
/// Tracks a current block and whether it has been terminated. Terminating a
/// block twice is a construction bug and panics.
pub struct CfgBuilder<'f> {
    function: &'f mut MirFunction,
    current_block_id: BasicBlockId,
    is_terminated: bool,
}

impl<'f> CfgBuilder<'f> {
    /// Creates a new CFG builder positioned at `current_block_id`
    pub const fn new(function: &'f mut MirFunction, current_block_id: BasicBlockId) -> Self {
        Self {
            function,
            current_block_id,
            is_terminated: false,
        }
    }

    /// Creates a new basic block, named `block_N` unless a name is given
    pub fn new_block(&mut self, name: Option<String>) -> BasicBlockId {
        let block_name =
            name.unwrap_or_else(|| format!("block_{}", self.function.basic_blocks.len()));
        self.function.add_basic_block_with_name(block_name)
    }

    /// Returns the current CFG state
    pub const fn state(&self) -> CfgState {
        CfgState {
            current_block_id: self.current_block_id,
            is_terminated: self.is_terminated,
        }
    }

    /// Moves to `block_id`, clearing the termination flag
    pub const fn switch_to_block(&mut self, block_id: BasicBlockId) -> CfgState {
        self.current_block_id = block_id;
        self.is_terminated = false;
        self.state()
    }

    /// Returns the current block ID
    pub const fn current_block_id(&self) -> BasicBlockId {
        self.current_block_id
    }

    /// Checks if the current block already has a terminator
    pub fn is_terminated(&self) -> bool {
        self.is_terminated
            || self
                .function
                .basic_blocks
                .get(self.current_block_id)
                .is_some_and(BasicBlock::is_terminated)
    }

    /// Terminates the current block with the given terminator
    ///
    /// ## Panics
    /// Panics if the block is already terminated
    pub fn terminate(&mut self, terminator: Terminator) {
        if self.is_terminated() {
            panic!(
                "Attempting to terminate already terminated block {:?}",
                self.current_block_id
            );
        }

        if let Some(block) = self.function.basic_blocks.get_mut(self.current_block_id) {
            block.set_terminator(terminator);
        }
        self.is_terminated = true;
    }

    /// Terminates the current block with a jump to the target block
    pub fn terminate_with_jump(&mut self, target: BasicBlockId) {
        self.terminate(Terminator::jump(target));
    }

    /// Terminates the current block with a return
    pub fn terminate_with_return(&mut self, values: Vec<Value>) {
        self.terminate(Terminator::return_values(values));
    }

    /// Terminates the current block with a jump (if still open) and moves to `target`
    pub fn jump_to(&mut self, target: BasicBlockId) {
        if !self.is_terminated() {
            self.terminate_with_jump(target);
        }
        self.switch_to_block(target);
    }

    /// Gets a reference to a specific block by ID
    pub fn get_block(&self, block_id: BasicBlockId) -> Option<&BasicBlock> {
        self.function.basic_blocks.get(block_id)
    }

    /// Creates the blocks of a rotated loop
    pub fn create_do_while_blocks(&mut self) -> DoWhileBlocks {
        DoWhileBlocks {
            preheader: self.new_block(Some("loop_preheader".to_string())),
            header: self.new_block(Some("loop_header".to_string())),
            latch: self.new_block(Some("loop_latch".to_string())),
            exit: self.new_block(Some("loop_exit".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_to_terminates_and_switches() {
        let mut function = MirFunction::new("f");
        let entry = function.entry_block;
        let mut cfg = CfgBuilder::new(&mut function, entry);

        let next = cfg.new_block(None);
        cfg.jump_to(next);
        assert_eq!(cfg.current_block_id(), next);
        assert!(!cfg.is_terminated());
        cfg.terminate_with_return(vec![]);
        assert!(cfg.state().is_terminated);

        assert_eq!(function.basic_blocks[entry].terminator, Terminator::jump(next));
        assert_eq!(function.basic_blocks[next].name.as_deref(), Some("block_1"));
    }

    #[test]
    fn test_do_while_blocks_are_named() {
        let mut function = MirFunction::new("f");
        let entry = function.entry_block;
        let mut cfg = CfgBuilder::new(&mut function, entry);

        let blocks = cfg.create_do_while_blocks();
        let name = |block| cfg.get_block(block).and_then(|b| b.name.clone());
        assert_eq!(name(blocks.preheader).as_deref(), Some("loop_preheader"));
        assert_eq!(name(blocks.latch).as_deref(), Some("loop_latch"));
        assert!(!cfg.get_block(blocks.exit).is_some_and(BasicBlock::is_terminated));
    }

    #[test]
    #[should_panic(expected = "already terminated")]
    fn test_double_termination_panics() {
        let mut function = MirFunction::new("f");
        let entry = function.entry_block;
        let mut cfg = CfgBuilder::new(&mut function, entry);
        cfg.terminate_with_return(vec![]);
        cfg.terminate_with_return(vec![]);
    }
}
