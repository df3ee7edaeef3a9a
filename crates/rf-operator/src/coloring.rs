//! Column coloring for finite-difference Jacobians.
//!
//! Two columns may share a color when no row has a nonzero in both, so all
//! columns of one color can be perturbed with a single residual evaluation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::skeleton::SparsityPattern;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnColoring {
    colors: Vec<usize>,
    groups: Vec<Vec<usize>>,
}

impl ColumnColoring {
    /// Greedy coloring in smallest-last order of the column intersection graph.
    pub fn smallest_last(pattern: &SparsityPattern) -> Self {
        let n = pattern.n_cols();
        let mut col_rows: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (r, c) in pattern.entries() {
            col_rows[c].push(r);
        }
        let adjacency: Vec<Vec<usize>> = (0..n)
            .map(|c| {
                let mut adj: Vec<usize> = col_rows[c]
                    .iter()
                    .flat_map(|&r| pattern.row(r).iter().copied())
                    .filter(|&other| other != c)
                    .collect();
                adj.sort_unstable();
                adj.dedup();
                adj
            })
            .collect();

        // smallest-last ordering: repeatedly remove a minimum-degree vertex
        let mut degree: Vec<usize> = adjacency.iter().map(Vec::len).collect();
        let mut removed = vec![false; n];
        let mut heap: BinaryHeap<Reverse<(usize, usize)>> =
            (0..n).map(|c| Reverse((degree[c], c))).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse((d, c))) = heap.pop() {
            if removed[c] || d != degree[c] {
                continue;
            }
            removed[c] = true;
            order.push(c);
            for &other in &adjacency[c] {
                if !removed[other] {
                    degree[other] -= 1;
                    heap.push(Reverse((degree[other], other)));
                }
            }
        }

        let mut colors = vec![usize::MAX; n];
        let mut forbidden: Vec<usize> = Vec::new();
        let mut n_colors = 0;
        for &c in order.iter().rev() {
            forbidden.clear();
            forbidden.extend(
                adjacency[c]
                    .iter()
                    .map(|&o| colors[o])
                    .filter(|&k| k != usize::MAX),
            );
            forbidden.sort_unstable();
            forbidden.dedup();
            let color = forbidden
                .iter()
                .enumerate()
                .find(|&(i, &k)| i != k)
                .map_or(forbidden.len(), |(i, _)| i);
            colors[c] = color;
            n_colors = n_colors.max(color + 1);
        }

        let mut groups = vec![Vec::new(); n_colors];
        for (c, &k) in colors.iter().enumerate() {
            groups[k].push(c);
        }
        tracing::debug!(columns = n, colors = n_colors, "column coloring built");
        Self { colors, groups }
    }

    pub fn num_colors(&self) -> usize {
        self.groups.len()
    }

    pub fn color(&self, col: usize) -> usize {
        self.colors[col]
    }

    /// Columns of each color, ascending.
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// True when no row contains two columns of the same color.
    pub fn is_valid(&self, pattern: &SparsityPattern) -> bool {
        (0..pattern.n_rows()).all(|r| {
            let mut seen: Vec<usize> = pattern.row(r).iter().map(|&c| self.colors[c]).collect();
            let len = seen.len();
            seen.sort_unstable();
            seen.dedup();
            seen.len() == len
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn tridiagonal(n: usize) -> SparsityPattern {
        let rows: Vec<BTreeSet<usize>> = (0..n)
            .map(|i| {
                let mut s = BTreeSet::new();
                s.insert(i);
                if i > 0 {
                    s.insert(i - 1);
                }
                if i + 1 < n {
                    s.insert(i + 1);
                }
                s
            })
            .collect();
        SparsityPattern::from_rows(n, &rows)
    }

    #[test]
    fn tridiagonal_needs_three_colors() {
        let p = tridiagonal(10);
        let coloring = ColumnColoring::smallest_last(&p);
        assert_eq!(coloring.num_colors(), 3);
        assert!(coloring.is_valid(&p));
        let total: usize = coloring.groups().iter().map(Vec::len).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn dense_needs_one_color_per_column() {
        let p = SparsityPattern::dense(4, 4);
        let coloring = ColumnColoring::smallest_last(&p);
        assert_eq!(coloring.num_colors(), 4);
        assert!(coloring.is_valid(&p));
    }
}
