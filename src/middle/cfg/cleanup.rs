//! Control-flow cleanup: skipping trampoline blocks and marking code that
//! no path from the entry can reach. Runs between graph construction and
//! the dominance analyses so those only see blocks that matter.

use hashbrown::HashSet;

use crate::middle::{
    cfg::{BlockId, BlockRole, Cfg},
    ir::Instruction,
};

/// A block that only jumps somewhere else: a label followed by a single
/// unconditional branch.
fn is_trampoline(cfg: &Cfg, id: BlockId) -> bool {
    let block = cfg.block(id);
    block.role == BlockRole::Normal
        && !block.deleted
        && block.instructions.len() == 2
        && matches!(block.instructions[1], Instruction::Branch { .. })
}

/// Follows a chain of trampolines to its final destination. A cycle of
/// empty blocks (an empty infinite loop) resolves to the first block seen
/// twice so the loop structure survives.
fn resolve_target(cfg: &Cfg, mut id: BlockId) -> BlockId {
    let mut seen = HashSet::new();
    while is_trampoline(cfg, id) && seen.insert(id) {
        id = cfg.block(id).successors[0];
    }
    id
}

/// Rewires every edge that lands on a trampoline to the trampoline's own
/// target, fixing the branch instructions to match. The bypassed blocks
/// lose their predecessors and fall to the unreachable sweep.
fn skip_trampolines(cfg: &mut Cfg) {
    let ids: Vec<BlockId> = cfg.live_blocks().collect();
    for id in ids {
        let resolved: Vec<BlockId> = cfg
            .block(id)
            .successors
            .iter()
            .map(|&succ| resolve_target(cfg, succ))
            .collect();
        if resolved == cfg.block(id).successors {
            continue;
        }

        let labels: Vec<_> = resolved.iter().map(|&s| cfg.block(s).label).collect();
        // Both arms of a conditional can resolve to the same place (an
        // empty if/else whose arms all trampoline to one join). That edge
        // must not stay duplicated: predecessors dedupe, and phi operands
        // are filled one per successor entry.
        let coincides = resolved.len() == 2 && resolved[0] == resolved[1];
        let block = cfg.block_mut(id);
        if let Some(last) = block.instructions.last_mut() {
            match last {
                Instruction::Branch { target } => *target = labels[0],
                Instruction::CondBranch { .. } if coincides => {
                    *last = Instruction::Branch { target: labels[0] };
                }
                Instruction::CondBranch {
                    true_target,
                    false_target,
                    ..
                } => {
                    *true_target = labels[0];
                    *false_target = labels[1];
                }
                _ => {}
            }
        }
        block.successors = if coincides {
            vec![resolved[0]]
        } else {
            resolved
        };
    }
}

/// Depth-first sweep from the entry; everything not visited is marked
/// deleted.
fn remove_unreachable(cfg: &mut Cfg) {
    let mut visited = HashSet::new();
    let mut stack = vec![cfg.entry];
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        for &succ in &cfg.block(id).successors {
            if !visited.contains(&succ) {
                stack.push(succ);
            }
        }
    }
    for id in cfg.blocks.indices() {
        if !visited.contains(&id) {
            cfg.blocks[id].deleted = true;
        }
    }
}

pub fn cleanup(cfg: &mut Cfg) {
    skip_trampolines(cfg);
    remove_unreachable(cfg);
    cfg.recompute_predecessors();
    tracing::debug!(
        function = cfg.function.value(),
        live = cfg.live_blocks().count(),
        total = cfg.blocks.len(),
        "control-flow cleanup finished"
    );
}
