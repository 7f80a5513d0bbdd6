use alphabet::{State, STATE_UNKNOWN};
use anyhow::Result;
use located_error::LocatedError;

use crate::error::SimError;

/// Remove invariant columns from an over-simulated alignment, compacting
/// every leaf down to its first `target` variant positions.
///
/// A column is variant once two leaves disagree with both states known.
/// The scan early-exits at `target` variant columns unless `full_pass` is
/// requested (indel runs need the complete mask).
pub fn filter_constant_sites(
    leaves: &mut [(String, Vec<State>)],
    target: usize,
    full_pass: bool,
) -> Result<()> {
    let Some(((_, first), rest)) = leaves.split_first_mut() else {
        return Ok(())
    };
    let len = first.len();
    let mut mask: Vec<State> = first.clone();
    let mut variant = vec![false; len];
    let mut num_variant = 0;

    'scan: for (_, seq) in rest.iter() {
        for i in 0..len {
            if variant[i] {
                continue
            }
            let state = seq[i];
            if state == STATE_UNKNOWN {
                continue
            }
            if mask[i] == STATE_UNKNOWN {
                mask[i] = state;
            } else if mask[i] != state {
                variant[i] = true;
                num_variant += 1;
                if !full_pass && num_variant >= target {
                    break 'scan
                }
            }
        }
    }

    if num_variant < target {
        return Err(SimError::InsufficientVariantSites { needed: target, found: num_variant })
            .loc("While removing invariant sites")
    }

    let keep: Vec<usize> = variant.iter().enumerate()
        .filter_map(|(i, &v)| v.then_some(i))
        .take(target)
        .collect();
    for (_, seq) in leaves.iter_mut() {
        *seq = keep.iter().map(|&i| seq[i]).collect();
    }
    Ok(())
}
