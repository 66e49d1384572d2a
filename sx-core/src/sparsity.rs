//! The `Sparsity` collaborator: a nonzero-coordinate pattern reported by the out-of-scope
//! matrix/sparsity library (`spec.md` §1 "Out of scope"). The core only ever queries nonzero
//! counts and coordinates through this trait; it never constructs or mutates a sparsity value
//! itself.

/// Row/column coordinate of one structural nonzero, in column-major traversal order (the order
/// `spec.md` §4.1 requires for per-output scalar traversal).
pub type NzCoord = (usize, usize);

/// A sparsity pattern: which entries of a (possibly dense) matrix are structurally nonzero.
pub trait Sparsity: Clone + PartialEq + std::fmt::Debug {
    fn nnz(&self) -> usize;
    fn nrow(&self) -> usize;
    fn ncol(&self) -> usize;

    /// Nonzero coordinates in column-major order, matching the traversal `spec.md` §4.1
    /// requires when walking one output's scalar nonzeros.
    fn nz_coords(&self) -> Vec<NzCoord>;

    fn is_dense(&self) -> bool {
        self.nnz() == self.nrow() * self.ncol()
    }
}

/// A plain dense sparsity pattern, used by every test and example in this crate; the real
/// sparse pattern type lives in the out-of-scope matrix library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseSparsity {
    pub nrow: usize,
    pub ncol: usize,
}

impl DenseSparsity {
    pub fn scalar() -> Self {
        DenseSparsity { nrow: 1, ncol: 1 }
    }

    pub fn vector(n: usize) -> Self {
        DenseSparsity { nrow: n, ncol: 1 }
    }
}

impl Sparsity for DenseSparsity {
    fn nnz(&self) -> usize {
        self.nrow * self.ncol
    }

    fn nrow(&self) -> usize {
        self.nrow
    }

    fn ncol(&self) -> usize {
        self.ncol
    }

    fn nz_coords(&self) -> Vec<NzCoord> {
        let mut out = Vec::with_capacity(self.nnz());
        for c in 0..self.ncol {
            for r in 0..self.nrow {
                out.push((r, c));
            }
        }
        out
    }
}
