//! Kuhn–Munkres (Hungarian) algorithm for optimal detection-to-track
//! assignment.
//!
//! The cost matrix may be rectangular; it is padded to a square with
//! [`PADDING_COST`] and solved with the O(n³) primal-dual formulation that
//! keeps row/column potentials and grows one augmenting path per row.
//! Buffers live in the solver and are reused across frames.

use nalgebra::DMatrix;

/// Filler cost for padding cells and for non-finite input costs.
pub const PADDING_COST: f64 = 1e6;

/// Result of one assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// `(row, column)` pairs, sorted by row.
    pub pairs: Vec<(usize, usize)>,
    /// Rows left without a column (only when there are more rows than columns).
    pub unassigned_rows: Vec<usize>,
    /// Columns left without a row (only when there are more columns than rows).
    pub unassigned_columns: Vec<usize>,
    /// Sum of the input costs over `pairs`.
    pub total_cost: f64,
}

/// Reusable Hungarian solver.
#[derive(Debug, Clone, Default)]
pub struct HungarianSolver {
    /// Padded square cost matrix, row-major.
    padded: Vec<f64>,
    /// Row potentials, 1-based.
    u: Vec<f64>,
    /// Column potentials, 1-based.
    v: Vec<f64>,
    /// `p[j]` is the row matched to column `j`, 0 meaning none.
    p: Vec<usize>,
    /// Previous column on the augmenting path.
    way: Vec<usize>,
    minv: Vec<f64>,
    used: Vec<bool>,
}

impl HungarianSolver {
    /// Creates a solver whose buffers already fit a `capacity`×`capacity`
    /// problem.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut solver = Self::default();
        solver.reserve(capacity);
        solver
    }

    fn reserve(&mut self, size: usize) {
        let len = size + 1;
        if self.u.len() < len {
            self.u.resize(len, 0.0);
            self.v.resize(len, 0.0);
            self.p.resize(len, 0);
            self.way.resize(len, 0);
            self.minv.resize(len, 0.0);
            self.used.resize(len, false);
        }
        if self.padded.len() < size * size {
            self.padded.resize(size * size, PADDING_COST);
        }
    }

    /// Minimum-cost assignment of rows to columns.
    ///
    /// `cost[(i, j)]` is the cost of assigning row `i` to column `j`. Every
    /// row is matched when `rows <= columns` and every column otherwise.
    pub fn solve(&mut self, cost: &DMatrix<f64>) -> Assignment {
        let (rows, cols) = cost.shape();
        if rows == 0 || cols == 0 {
            return Assignment {
                pairs: vec![],
                unassigned_rows: (0..rows).collect(),
                unassigned_columns: (0..cols).collect(),
                total_cost: 0.0,
            };
        }

        let n = rows.max(cols);
        self.reserve(n);
        self.load(cost, n);
        self.run(n);

        let mut pairs: Vec<(usize, usize)> = (1..=n)
            .filter_map(|col| {
                let row = self.p[col];
                (row != 0 && row <= rows && col <= cols).then(|| (row - 1, col - 1))
            })
            .collect();
        pairs.sort_unstable();

        let mut row_taken = vec![false; rows];
        let mut col_taken = vec![false; cols];
        for &(row, col) in &pairs {
            row_taken[row] = true;
            col_taken[col] = true;
        }
        let total_cost = pairs.iter().map(|&(row, col)| cost[(row, col)]).sum();

        Assignment {
            pairs,
            unassigned_rows: (0..rows).filter(|&row| !row_taken[row]).collect(),
            unassigned_columns: (0..cols).filter(|&col| !col_taken[col]).collect(),
            total_cost,
        }
    }

    fn load(&mut self, cost: &DMatrix<f64>, n: usize) {
        let (rows, cols) = cost.shape();
        for row in 0..n {
            for col in 0..n {
                let value = if row < rows && col < cols {
                    cost[(row, col)]
                } else {
                    PADDING_COST
                };
                self.padded[row * n + col] = if value.is_finite() {
                    value
                } else {
                    PADDING_COST
                };
            }
        }
    }

    fn run(&mut self, n: usize) {
        let Self {
            padded,
            u,
            v,
            p,
            way,
            minv,
            used,
        } = self;
        u[..=n].fill(0.0);
        v[..=n].fill(0.0);
        p[..=n].fill(0);
        way[..=n].fill(0);

        for row in 1..=n {
            p[0] = row;
            let mut j0 = 0;
            minv[..=n].fill(f64::INFINITY);
            used[..=n].fill(false);

            // grow an alternating tree until it reaches a free column
            loop {
                used[j0] = true;
                let i0 = p[j0];
                let mut delta = f64::INFINITY;
                let mut j1 = 0;

                for j in 1..=n {
                    if used[j] {
                        continue;
                    }
                    let reduced = padded[(i0 - 1) * n + (j - 1)] - u[i0] - v[j];
                    if reduced < minv[j] {
                        minv[j] = reduced;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }

                for j in 0..=n {
                    if used[j] {
                        u[p[j]] += delta;
                        v[j] -= delta;
                    } else {
                        minv[j] -= delta;
                    }
                }

                j0 = j1;
                if p[j0] == 0 {
                    break;
                }
            }

            // flip the augmenting path
            while j0 != 0 {
                let j1 = way[j0];
                p[j0] = p[j1];
                j0 = j1;
            }
        }
    }
}
