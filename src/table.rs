use crate::access::Link;
use core::ops::{Index, IndexMut};

/// Dense square matrix stored row-major in one contiguous buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix<T> {
    side: usize,
    cells: Vec<T>,
}

/// Pairwise link strengths: `table[(i, j)]` is the link from node `i` to
/// node `j`.
pub type LinkTable = Matrix<Link>;

impl<T: Copy + Default> Matrix<T> {
    /// `side x side` matrix filled with `T::default()`.
    #[must_use]
    pub fn new(side: usize) -> Self {
        let len = side.checked_mul(side).expect("Matrix::new: [1]");
        Self {
            side,
            cells: vec![T::default(); len],
        }
    }
}

impl<T> Matrix<T> {
    /// Number of rows (and columns).
    #[must_use]
    pub fn side(&self) -> usize {
        self.side
    }

    /// Row `row` as a slice indexed by column.
    #[must_use]
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.side;
        &self.cells[start..start + self.side]
    }

    /// Column `col`, top to bottom.
    pub fn column(&self, col: usize) -> impl Iterator<Item = &T> + '_ {
        assert!(col < self.side, "Matrix::column: [1]");
        self.cells.iter().skip(col).step_by(self.side.max(1))
    }

    #[inline]
    fn offset(&self, (row, col): (usize, usize)) -> usize {
        let side = self.side;
        assert!(
            row < side && col < side,
            "Matrix: ({row}, {col}) out of {side}x{side}"
        );
        row * side + col
    }
}

impl<T> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, at: (usize, usize)) -> &T {
        &self.cells[self.offset(at)]
    }
}

impl<T> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, at: (usize, usize)) -> &mut T {
        let offset = self.offset(at);
        &mut self.cells[offset]
    }
}

impl LinkTable {
    /// Number of strong links into `col`.
    #[must_use]
    pub fn strong_in_degree(&self, col: usize) -> u32 {
        let count = self.column(col).filter(|link| link.is_strong()).count();
        count.try_into().expect("LinkTable::strong_in_degree: [1]")
    }

    /// Transitive closure over strong links: `reach[(i, j)]` is `true` when
    /// a non-empty path of strong links leads from `i` to `j`.
    #[must_use]
    pub fn strong_reachability(&self) -> Matrix<bool> {
        let side = self.side;
        let mut reach = Matrix::<bool>::new(side);
        let mut stack = Vec::with_capacity(side);
        for source in 0..side {
            stack.clear();
            stack.push(source);
            while let Some(node) = stack.pop() {
                for (next, link) in self.row(node).iter().enumerate() {
                    if link.is_strong() && !reach[(source, next)] {
                        reach[(source, next)] = true;
                        stack.push(next);
                    }
                }
            }
        }
        reach
    }
}
