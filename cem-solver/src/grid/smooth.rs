//! Graded subdivision of the gaps between requested grid lines.
//!
//! The requested lines split an axis into blocks. Each block is filled with
//! the fewest cells such that no cell is larger than the maximum resolution and
//! the size ratio of any two adjacent cells (also across block boundaries) is
//! at most the growth ratio.
//!
//! For a block with `k` cells the admissible cell sizes are bounded by two
//! envelopes: the "tent" (cells growing away from both ends as fast as the
//! ratio allows, capped by the maximum resolution) and the "valley" (cells
//! shrinking away from both ends as fast as allowed). Both satisfy all ratio
//! constraints, and these are linear in the cell sizes, so every convex
//! combination does too. The exact block length is hit by interpolating
//! linearly between the two envelopes.

/// Upper bound on the number of cells in a single block.
const MAX_CELLS_PER_BLOCK: usize = 1 << 20;

/// Relative slack when comparing envelope values.
const EPSILON: f64 = 1e-12;

/// Bounds on the cell at one end of a block.
#[derive(Clone, Copy, Debug)]
pub(super) struct EndConstraint {
    pub min: f64,
    pub max: f64,
}

impl EndConstraint {
    /// No neighbor cell to match, e.g. at the ends of an axis.
    pub fn free() -> Self {
        Self {
            min: 0.0,
            max: f64::INFINITY,
        }
    }

    /// The end cell must be within `ratio` of the adjacent `cell`.
    pub fn neighbor(cell: f64, ratio: f64) -> Self {
        Self {
            min: cell / ratio,
            max: cell * ratio,
        }
    }

    pub fn capped(self, cap: f64) -> Self {
        Self {
            min: self.min,
            max: self.max.min(cap),
        }
    }
}

/// Fills a block of `length` with cells.
///
/// The first cell satisfies `left`, the last one `right`, no cell is larger
/// than `max_cell` and adjacent cells are within `ratio` of each other.
/// Returns the cell sizes, or `None` if no such subdivision exists.
pub(super) fn fill_block(
    length: f64,
    left: EndConstraint,
    right: EndConstraint,
    max_cell: f64,
    ratio: f64,
) -> Option<Vec<f64>> {
    let mut upper = Vec::new();
    let mut lower = Vec::new();

    // fewer cells can't cover the block without exceeding `max_cell`
    let min_cells = ((length * (1.0 - EPSILON)) / max_cell).ceil();
    if min_cells > MAX_CELLS_PER_BLOCK as f64 {
        return None;
    }

    for num_cells in (min_cells as usize).max(1)..=MAX_CELLS_PER_BLOCK {
        envelopes(
            num_cells, left, right, max_cell, ratio, &mut lower, &mut upper,
        );

        let feasible = lower
            .iter()
            .zip(&upper)
            .all(|(lower, upper)| *lower <= *upper * (1.0 + EPSILON));
        if !feasible {
            continue;
        }

        let max_length: f64 = upper.iter().sum();
        if max_length < length * (1.0 - EPSILON) {
            continue;
        }

        let min_length: f64 = lower.iter().sum();
        if min_length > length * (1.0 + EPSILON) {
            // the minimum length only grows with more cells, so there is no
            // solution.
            return None;
        }

        let theta = if max_length - min_length > 0.0 {
            ((length - min_length) / (max_length - min_length)).clamp(0.0, 1.0)
        }
        else {
            1.0
        };

        let cells = lower
            .iter()
            .zip(&upper)
            .map(|(lower, upper)| (1.0 - theta) * lower + theta * upper)
            .collect();
        return Some(cells);
    }

    None
}

fn envelopes(
    num_cells: usize,
    left: EndConstraint,
    right: EndConstraint,
    max_cell: f64,
    ratio: f64,
    lower: &mut Vec<f64>,
    upper: &mut Vec<f64>,
) {
    lower.clear();
    upper.clear();

    for i in 0..num_cells {
        let from_left = ratio.powi(i as i32);
        let from_right = ratio.powi((num_cells - 1 - i) as i32);

        upper.push(
            max_cell
                .min(left.max * from_left)
                .min(right.max * from_right),
        );
        lower.push((left.min / from_left).max(right.min / from_right));
    }
}

/// Smooths the sorted, deduplicated `fixed` lines.
///
/// On failure the position of the block that couldn't be filled is returned.
pub(super) fn smooth_lines(fixed: &[f64], max_cell: f64, ratio: f64) -> Result<Vec<f64>, f64> {
    if fixed.len() < 2 {
        return Ok(fixed.to_vec());
    }

    let lengths = fixed
        .windows(2)
        .map(|window| window[1] - window[0])
        .collect::<Vec<_>>();
    let mut blocks: Vec<Option<Vec<f64>>> = vec![None; lengths.len()];

    // short blocks have the least freedom, so they're filled first and longer
    // blocks grade towards them.
    let mut order = (0..lengths.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| lengths[*a].total_cmp(&lengths[*b]).then(a.cmp(b)));

    for block in order {
        let filled = fill_with_neighbors(block, &lengths, &blocks, max_cell, ratio).or_else(|| {
            // shrink the facing end of the left neighbor, then also the right one.
            let mut shrunk = false;
            for neighbor in [block.checked_sub(1), Some(block + 1)].into_iter().flatten() {
                if shrink_facing_end(neighbor, block, &lengths, &mut blocks, max_cell, ratio) {
                    shrunk = true;
                    let filled = fill_with_neighbors(block, &lengths, &blocks, max_cell, ratio);
                    if filled.is_some() {
                        return filled;
                    }
                }
            }
            tracing::trace!(block, shrunk, "could not fill block");
            None
        });

        blocks[block] = Some(filled.ok_or(fixed[block])?);
    }

    let mut lines = Vec::with_capacity(fixed.len() + blocks.iter().flatten().map(Vec::len).sum::<usize>());
    lines.push(fixed[0]);
    for (block, cells) in blocks.iter().enumerate() {
        let cells = cells.as_ref().ok_or(fixed[block])?;
        let start = fixed[block];
        let end = fixed[block + 1];

        let mut position = start;
        for cell in &cells[..cells.len() - 1] {
            position += cell;
            lines.push(position);
        }
        // the last line is the requested line itself, not the accumulated sum.
        lines.push(end);
    }

    Ok(lines)
}

fn end_constraints(
    block: usize,
    blocks: &[Option<Vec<f64>>],
    ratio: f64,
) -> (EndConstraint, EndConstraint) {
    let left = block
        .checked_sub(1)
        .and_then(|neighbor| blocks[neighbor].as_ref())
        .and_then(|cells| cells.last())
        .map_or_else(EndConstraint::free, |cell| {
            EndConstraint::neighbor(*cell, ratio)
        });

    let right = blocks
        .get(block + 1)
        .and_then(|cells| cells.as_ref())
        .and_then(|cells| cells.first())
        .map_or_else(EndConstraint::free, |cell| {
            EndConstraint::neighbor(*cell, ratio)
        });

    (left, right)
}

fn fill_with_neighbors(
    block: usize,
    lengths: &[f64],
    blocks: &[Option<Vec<f64>>],
    max_cell: f64,
    ratio: f64,
) -> Option<Vec<f64>> {
    let (left, right) = end_constraints(block, blocks, ratio);
    fill_block(lengths[block], left, right, max_cell, ratio)
}

/// Refills the already filled `neighbor` of `block` so that its cell facing
/// `block` is smaller by at least `ratio`.
fn shrink_facing_end(
    neighbor: usize,
    block: usize,
    lengths: &[f64],
    blocks: &mut [Option<Vec<f64>>],
    max_cell: f64,
    ratio: f64,
) -> bool {
    let Some(Some(cells)) = blocks.get(neighbor)
    else {
        return false;
    };

    let (mut left, mut right) = end_constraints(neighbor, blocks, ratio);
    if neighbor < block {
        let facing = cells[cells.len() - 1];
        right = EndConstraint::free().capped(facing / ratio);
    }
    else {
        let facing = cells[0];
        left = EndConstraint::free().capped(facing / ratio);
    }

    match fill_block(lengths[neighbor], left, right, max_cell, ratio) {
        Some(cells) => {
            blocks[neighbor] = Some(cells);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::grid::smooth::{
        EndConstraint,
        fill_block,
        smooth_lines,
    };

    fn assert_graded(lines: &[f64], max_cell: f64, ratio: f64) {
        let cells = lines
            .windows(2)
            .map(|window| window[1] - window[0])
            .collect::<Vec<_>>();
        for cell in &cells {
            assert!(*cell > 0.0);
            assert!(*cell <= max_cell * (1.0 + 1e-9), "cell {cell} > {max_cell}");
        }
        for pair in cells.windows(2) {
            let r = pair[1] / pair[0];
            assert!(
                r <= ratio * (1.0 + 1e-9) && 1.0 / r <= ratio * (1.0 + 1e-9),
                "ratio violated: {pair:?}"
            );
        }
    }

    #[test]
    fn it_fills_long_blocks_with_many_cells() {
        let cells = fill_block(
            1.0,
            EndConstraint::free(),
            EndConstraint::free(),
            2e-6,
            1.3,
        )
        .unwrap();
        assert_eq!(cells.len(), 500_000);
        let total: f64 = cells.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);

        assert!(
            fill_block(
                1.0,
                EndConstraint::free(),
                EndConstraint::free(),
                1e-7,
                1.3
            )
            .is_none()
        );
    }

    #[test]
    fn it_fills_free_blocks_uniformly() {
        let cells = fill_block(
            10.0,
            EndConstraint::free(),
            EndConstraint::free(),
            1.0,
            1.4,
        )
        .unwrap();
        assert_eq!(cells.len(), 10);
        for cell in cells {
            assert!((cell - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn it_keeps_compatible_blocks_as_single_cell() {
        let cells = fill_block(
            1.2,
            EndConstraint::neighbor(1.0, 1.4),
            EndConstraint::neighbor(1.0, 1.4),
            2.0,
            1.4,
        )
        .unwrap();
        assert_eq!(cells, vec![1.2]);
    }

    #[test]
    fn it_grades_away_from_small_cells() {
        let lines = smooth_lines(&[0.0, 0.1, 10.0], 1.0, 1.4).unwrap();
        assert_eq!(lines.first(), Some(&0.0));
        assert_eq!(lines[1], 0.1);
        assert_eq!(lines.last(), Some(&10.0));
        assert_graded(&lines, 1.0, 1.4);
    }

    #[test]
    fn it_shrinks_neighbors_when_needed() {
        // the middle block is slightly too long for a single cell and slightly
        // too short for two cells next to unit cells.
        let lines = smooth_lines(&[0.0, 1.0, 2.42, 3.42], 10.0, 1.4).unwrap();
        for fixed in [0.0, 1.0, 2.42, 3.42] {
            assert!(lines.contains(&fixed));
        }
        assert_graded(&lines, 10.0, 1.4);
    }
}
