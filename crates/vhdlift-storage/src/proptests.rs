use crate::range_set::RangeSet;
use proptest::prelude::*;

const SPACE: u64 = 4096;
const MAX_LEN: u64 = 256;
// Ops start below SPACE but may extend past it; size the model to match.
const MODEL_LEN: usize = (SPACE + MAX_LEN) as usize;
const MAX_OPS: usize = 48;

#[derive(Debug, Clone)]
enum Op {
    Insert { start: u64, len: u64 },
    Remove { start: u64, len: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let span = (0u64..SPACE, 0u64..MAX_LEN);
    prop_oneof![
        span.clone().prop_map(|(start, len)| Op::Insert { start, len }),
        span.prop_map(|(start, len)| Op::Remove { start, len }),
    ]
}

/// Naive model: one bool per byte of the address space.
fn apply_to_model(model: &mut [bool], op: &Op) {
    let (start, len, value) = match op {
        Op::Insert { start, len } => (*start, *len, true),
        Op::Remove { start, len } => (*start, *len, false),
    };
    for slot in &mut model[start as usize..(start + len) as usize] {
        *slot = value;
    }
}

fn run_ops(ops: &[Op]) -> (RangeSet, Vec<bool>) {
    let mut set = RangeSet::new();
    let mut model = vec![false; MODEL_LEN];
    for op in ops {
        match op {
            Op::Insert { start, len } => set.insert(*start, start + len),
            Op::Remove { start, len } => set.remove(*start, start + len),
        }
        apply_to_model(&mut model, op);
    }
    (set, model)
}

proptest! {
    #[test]
    fn range_set_matches_byte_model(ops in prop::collection::vec(op_strategy(), 0..MAX_OPS)) {
        let (set, model) = run_ops(&ops);

        // Structural invariants: sorted, disjoint, non-adjacent, non-empty.
        let ranges = set.ranges();
        for r in ranges {
            prop_assert!(r.start < r.end);
        }
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].end < pair[1].start);
        }

        // Contents match the byte model.
        let model_total = model.iter().filter(|b| **b).count() as u64;
        prop_assert_eq!(set.total_len(), model_total);
        for (offset, covered) in model.iter().enumerate() {
            let offset = offset as u64;
            prop_assert_eq!(
                set.contains_range(offset, offset + 1),
                *covered,
                "mismatch at offset {}",
                offset
            );
        }
    }

    #[test]
    fn probes_agree_with_per_byte_coverage(
        ops in prop::collection::vec(op_strategy(), 0..MAX_OPS),
        probe_start in 0u64..SPACE,
        probe_len in 0u64..MAX_LEN,
    ) {
        let (set, model) = run_ops(&ops);
        let probe_end = probe_start + probe_len;

        let all_covered = (probe_start..probe_end).all(|i| model[i as usize]);
        prop_assert_eq!(set.contains_range(probe_start, probe_end), all_covered);

        let any_covered = (probe_start..probe_end).any(|i| model[i as usize]);
        prop_assert_eq!(set.intersects_range(probe_start, probe_end), any_covered);
    }
}
