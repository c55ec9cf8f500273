use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{BasicBlockId, InstructionKind, MirFunction, Terminator};

use super::MirPass;

/// Dead Code Elimination Pass
///
/// This pass:
/// - Removes unreachable basic blocks and compacts the CFG, dropping phi
///   sources that named a removed block
/// - Removes dead, side-effect-free instructions whose results are no longer
///   used, iterating to a fixed point
#[derive(Debug, Default)]
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    pub const fn new() -> Self {
        Self
    }

    /// Remaps the block targets of a terminator according to `map`
    fn remap_terminator(
        terminator: &mut Terminator,
        map: &FxHashMap<BasicBlockId, BasicBlockId>,
    ) {
        let remap = |block: &mut BasicBlockId| {
            if let Some(&new_block) = map.get(block) {
                *block = new_block;
            }
        };
        match terminator {
            Terminator::Jump { target } => remap(target),
            Terminator::If {
                then_target,
                else_target,
                ..
            } => {
                remap(then_target);
                remap(else_target);
            }
            Terminator::Return { .. } | Terminator::Unreachable => {}
        }
    }

    /// Drops unreachable blocks and renumbers the rest.
    /// Returns true if any block was removed.
    fn remove_unreachable_blocks(&self, function: &mut MirFunction) -> bool {
        let unreachable: FxHashSet<BasicBlockId> =
            function.unreachable_blocks().into_iter().collect();
        if unreachable.is_empty() {
            return false;
        }

        let old_blocks = std::mem::take(&mut function.basic_blocks);
        let mut new_blocks: IndexVec<BasicBlockId, _> = IndexVec::new();
        let mut old_to_new: FxHashMap<BasicBlockId, BasicBlockId> = FxHashMap::default();

        for (old_id, block) in old_blocks.into_iter_enumerated() {
            if unreachable.contains(&old_id) {
                continue;
            }
            let new_id = new_blocks.push(block);
            old_to_new.insert(old_id, new_id);
        }

        for block in new_blocks.iter_mut() {
            Self::remap_terminator(&mut block.terminator, &old_to_new);
            for instruction in block.instructions.iter_mut().filter(|i| i.is_phi()) {
                instruction.retain_phi_sources(|source| !unreachable.contains(&source));
                if let InstructionKind::Phi { sources, .. } = &mut instruction.kind {
                    for (source, _) in sources.iter_mut() {
                        if let Some(&new_source) = old_to_new.get(source) {
                            *source = new_source;
                        }
                    }
                }
            }
        }

        function.basic_blocks = new_blocks;
        if let Some(&entry) = old_to_new.get(&function.entry_block) {
            function.entry_block = entry;
        }
        log::trace!(
            "Removed {} unreachable blocks from '{}'",
            unreachable.len(),
            function.name
        );
        true
    }

    /// Remove dead instructions (no uses, no side effects) to a fixed point.
    /// Returns true if any instructions were removed.
    fn remove_dead_instructions(&self, function: &mut MirFunction) -> bool {
        let mut changed = false;

        loop {
            let use_counts = function.get_value_use_counts();
            let mut removed_any = false;

            for block in function.basic_blocks.iter_mut() {
                let before = block.instructions.len();

                block.instructions.retain(|instr| {
                    if instr.has_side_effects() {
                        return true;
                    }
                    if matches!(instr.kind, InstructionKind::Nop) {
                        return false;
                    }
                    match instr.destination() {
                        Some(dest) => use_counts.get(&dest).copied().unwrap_or(0) > 0,
                        None => true,
                    }
                });

                if block.instructions.len() != before {
                    removed_any = true;
                }
            }

            if !removed_any {
                break;
            }
            changed = true;
        }

        changed
    }
}

impl MirPass for DeadCodeElimination {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let removed_blocks = self.remove_unreachable_blocks(function);
        let removed_instructions = self.remove_dead_instructions(function);
        removed_blocks || removed_instructions
    }

    fn name(&self) -> &'static str {
        "DeadCodeElimination"
    }
}
