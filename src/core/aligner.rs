// File: src/core/aligner.rs
//! Levenshtein alignment between a reference and an observed symbol run.
//!
//! The same routine aligns words within a lyric line and phonemes within a
//! word; only the symbol type differs.
use serde::{Deserialize, Serialize};

/// One step of an index-level edit script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Match(usize, usize),
    Substitute(usize, usize),
    /// Reference symbol with nothing observed for it.
    Delete(usize),
    /// Observed symbol with no reference counterpart.
    Insert(usize),
}

/// One step of an edit script carrying the symbols themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp<T> {
    Match { reference: T },
    Substitute { reference: T, observed: T },
    Delete { reference: T },
    Insert { observed: T },
}

impl<T> EditOp<T> {
    pub fn is_edit(&self) -> bool {
        !matches!(self, EditOp::Match { .. })
    }

    /// The reference symbol this step accounts for, if any.
    pub fn reference(&self) -> Option<&T> {
        match self {
            EditOp::Match { reference }
            | EditOp::Substitute { reference, .. }
            | EditOp::Delete { reference } => Some(reference),
            EditOp::Insert { .. } => None,
        }
    }
}

/// Minimum-cost index script transforming `reference` into `observed`, unit
/// cost per edit.
///
/// Among equal-cost scripts the walk prefers diagonal moves from the front,
/// so matches land on the earliest positions that still keep the cost minimal.
pub fn align_indices<T: PartialEq>(reference: &[T], observed: &[T]) -> Vec<Step> {
    let n = reference.len();
    let m = observed.len();

    // cost[i][j] = distance between reference[i..] and observed[j..]
    let mut cost = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in cost.iter_mut().enumerate() {
        row[m] = n - i;
    }
    for j in 0..=m {
        cost[n][j] = m - j;
    }
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            let diag = cost[i + 1][j + 1] + usize::from(reference[i] != observed[j]);
            cost[i][j] = diag.min(cost[i + 1][j] + 1).min(cost[i][j + 1] + 1);
        }
    }

    let mut steps = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m {
            let same = reference[i] == observed[j];
            if cost[i + 1][j + 1] + usize::from(!same) == cost[i][j] {
                steps.push(if same {
                    Step::Match(i, j)
                } else {
                    Step::Substitute(i, j)
                });
                i += 1;
                j += 1;
                continue;
            }
        }
        if i < n && cost[i + 1][j] + 1 == cost[i][j] {
            steps.push(Step::Delete(i));
            i += 1;
        } else {
            steps.push(Step::Insert(j));
            j += 1;
        }
    }
    steps
}

/// Symbol-level edit script; see [`align_indices`] for the tie-break rule.
pub fn align<T: PartialEq + Clone>(reference: &[T], observed: &[T]) -> Vec<EditOp<T>> {
    align_indices(reference, observed)
        .into_iter()
        .map(|step| match step {
            Step::Match(i, _) => EditOp::Match {
                reference: reference[i].clone(),
            },
            Step::Substitute(i, j) => EditOp::Substitute {
                reference: reference[i].clone(),
                observed: observed[j].clone(),
            },
            Step::Delete(i) => EditOp::Delete {
                reference: reference[i].clone(),
            },
            Step::Insert(j) => EditOp::Insert {
                observed: observed[j].clone(),
            },
        })
        .collect()
}

/// Number of edits in a script.
pub fn script_cost<T>(script: &[EditOp<T>]) -> usize {
    script.iter().filter(|op| op.is_edit()).count()
}

/// Levenshtein distance with a two-row table.
pub fn edit_distance<T: PartialEq>(reference: &[T], observed: &[T]) -> usize {
    let mut prev: Vec<usize> = (0..=observed.len()).collect();
    let mut curr = vec![0usize; observed.len() + 1];
    for (i, r) in reference.iter().enumerate() {
        curr[0] = i + 1;
        for (j, o) in observed.iter().enumerate() {
            let diag = prev[j] + usize::from(r != o);
            curr[j + 1] = diag.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[observed.len()]
}
