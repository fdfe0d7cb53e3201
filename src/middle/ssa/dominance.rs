//! Dominator tree and dominance frontiers, computed with the iterative
//! Cooper-Harvey-Kennedy scheme: a reverse-postorder sweep that intersects
//! predecessor dominators in lockstep until the immediate-dominator map
//! settles. Quadratic in the worst case but fast on real graphs.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::middle::cfg::{BlockId, Cfg};

#[derive(Debug)]
pub struct DominatorTree {
    /// Live blocks in reverse postorder; the entry block comes first
    order: Vec<BlockId>,
    rpo_number: HashMap<BlockId, usize>,
    /// Immediate dominators; the entry block maps to itself
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
    frontiers: HashMap<BlockId, BTreeSet<BlockId>>,
    /// Edges whose target was still on the DFS stack when followed
    back_edges: Vec<(BlockId, BlockId)>,
    entry: BlockId,
}

impl DominatorTree {
    pub fn rpo(&self) -> &[BlockId] {
        &self.order
    }

    /// The immediate dominator, or None for the entry block.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    pub fn children_of(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map_or(&[], Vec::as_slice)
    }

    pub fn frontier(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.frontiers.get(&block).into_iter().flatten().copied()
    }

    pub fn back_edges(&self) -> &[(BlockId, BlockId)] {
        &self.back_edges
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(&na), Some(&nb)) = (self.rpo_number.get(&a), self.rpo_number.get(&b)) else {
            return false;
        };
        // A dominator always precedes its dominated blocks in reverse
        // postorder, so the chain walk can stop early.
        if na > nb {
            return false;
        }
        let mut runner = b;
        loop {
            if runner == a {
                return true;
            }
            match self.idom(runner) {
                Some(next) => runner = next,
                None => return false,
            }
        }
    }
}

/// Depth-first walk producing a postorder of live blocks and the set of
/// back edges (targets still open on the walk stack).
fn postorder_walk(cfg: &Cfg) -> (Vec<BlockId>, Vec<(BlockId, BlockId)>) {
    #[derive(PartialEq)]
    enum Color {
        Open,
        Closed,
    }

    let mut colors: HashMap<BlockId, Color> = HashMap::new();
    let mut postorder = Vec::new();
    let mut back_edges = Vec::new();
    let mut frames: Vec<(BlockId, usize)> = vec![(cfg.entry, 0)];
    colors.insert(cfg.entry, Color::Open);

    while let Some(frame) = frames.last_mut() {
        let (id, cursor) = *frame;
        let successors = &cfg.block(id).successors;
        if cursor < successors.len() {
            frame.1 += 1;
            let next = successors[cursor];
            if cfg.block(next).deleted {
                continue;
            }
            match colors.get(&next) {
                None => {
                    colors.insert(next, Color::Open);
                    frames.push((next, 0));
                }
                Some(Color::Open) => back_edges.push((id, next)),
                Some(Color::Closed) => {}
            }
        } else {
            colors.insert(id, Color::Closed);
            postorder.push(id);
            frames.pop();
        }
    }
    (postorder, back_edges)
}

pub fn compute_dominators(cfg: &Cfg) -> DominatorTree {
    let (postorder, back_edges) = postorder_walk(cfg);
    let order: Vec<BlockId> = postorder.into_iter().rev().collect();
    let rpo_number: HashMap<BlockId, usize> =
        order.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    // Lockstep intersection: climb whichever finger sits lower in the
    // reverse postorder until the two meet.
    let intersect = |idom: &HashMap<BlockId, BlockId>, mut a: BlockId, mut b: BlockId| {
        while a != b {
            while rpo_number[&a] > rpo_number[&b] {
                a = idom[&a];
            }
            while rpo_number[&b] > rpo_number[&a] {
                b = idom[&b];
            }
        }
        a
    };

    let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
    idom.insert(cfg.entry, cfg.entry);
    let mut changed = true;
    while changed {
        changed = false;
        for &block in order.iter().skip(1) {
            let mut new_idom: Option<BlockId> = None;
            for &pred in &cfg.block(block).predecessors {
                // Only predecessors that are reachable and already placed
                if !rpo_number.contains_key(&pred) || !idom.contains_key(&pred) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }
            let new_idom = new_idom.expect("reachable block has a processed predecessor");
            if idom.get(&block) != Some(&new_idom) {
                idom.insert(block, new_idom);
                changed = true;
            }
        }
    }

    // Dominance frontiers: for each join, walk every predecessor's
    // dominator chain up to the join's own idom.
    let mut frontiers: HashMap<BlockId, BTreeSet<BlockId>> = HashMap::new();
    for &block in &order {
        let preds: Vec<BlockId> = cfg
            .block(block)
            .predecessors
            .iter()
            .copied()
            .filter(|p| rpo_number.contains_key(p))
            .collect();
        if preds.len() < 2 {
            continue;
        }
        let stop = idom[&block];
        for pred in preds {
            let mut runner = pred;
            while runner != stop {
                frontiers.entry(runner).or_default().insert(block);
                runner = idom[&runner];
            }
        }
    }

    // Tree children, kept in reverse postorder for deterministic walks.
    let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &block in order.iter().skip(1) {
        children.entry(idom[&block]).or_default().push(block);
    }

    DominatorTree {
        order,
        rpo_number,
        idom,
        children,
        frontiers,
        back_edges,
        entry: cfg.entry,
    }
}
