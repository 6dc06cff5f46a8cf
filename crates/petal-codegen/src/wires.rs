//! Greedy wire-slot coloring.
//!
//! Smallest-last ordering over the interpreter-discovered conflict graph:
//! repeatedly push every remaining wire of minimal remaining degree onto
//! an elimination stack, then pop the stack assigning each wire the
//! lowest slot not taken by a conflicting neighbour. The slot count
//! becomes a hardware-capacity statistic.

use petal_link::ConflictMatrix;

/// Slot assignment per wire index, plus the number of slots opened.
#[derive(Debug, Clone)]
pub struct WireSlots {
    pub slot: Vec<usize>,
    pub slots_used: usize,
}

impl WireSlots {
    /// An empty assignment for programs without wires.
    pub fn none() -> Self {
        Self {
            slot: Vec::new(),
            slots_used: 0,
        }
    }
}

/// Color the conflict graph. The matrix must already be symmetrized.
pub fn assign_wires(conflicts: &ConflictMatrix) -> WireSlots {
    let n = conflicts.len();
    let mut removed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let degree = |i: usize, removed: &[bool]| {
            (0..n)
                .filter(|&j| !removed[j] && j != i && conflicts.conflicts(i, j))
                .count()
        };
        let min_degree = (0..n)
            .filter(|&i| !removed[i])
            .map(|i| degree(i, &removed))
            .min()
            .expect("wires remain");
        // Take every wire at the minimum, lowest index first.
        let selected: Vec<usize> = (0..n)
            .filter(|&i| !removed[i] && degree(i, &removed) == min_degree)
            .collect();
        for i in selected {
            removed[i] = true;
            order.push(i);
        }
    }

    let mut slot = vec![usize::MAX; n];
    let mut slots_used = 0;
    for &i in order.iter().rev() {
        let mut used = 0u64;
        for j in 0..n {
            if j != i && slot[j] != usize::MAX && conflicts.conflicts(i, j) {
                used |= 1 << slot[j];
            }
        }
        let mut s = 0;
        while used & (1 << s) != 0 {
            s += 1;
        }
        slot[i] = s;
        slots_used = slots_used.max(s + 1);
    }

    WireSlots { slot, slots_used }
}
