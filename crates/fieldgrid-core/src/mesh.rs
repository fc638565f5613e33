//! The simulation grid descriptor
//!
//! A [`Mesh`] is a plain value: cell counts, physical cell size and periodic
//! repetition counts. The all-zero mesh means "not configured yet"; every
//! other mesh satisfies `size > 0` and `cell_size > 0` on all axes.
//!
//! [`MeshParams`] carries the nine raw configuration values as they arrive from
//! a script or CLI (signed, unchecked) and turns them into a [`Mesh`].

use crate::error::{Error, ParamGroup, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        f.write_str(name)
    }
}

/// Discretized simulation grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    size: [usize; 3],
    cell_size: [f64; 3],
    pbc: [usize; 3],
}

impl Mesh {
    /// Create a configured mesh.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any cell count is zero or any cell size is not a
    /// positive finite number.
    pub fn new(size: [usize; 3], cell_size: [f64; 3], pbc: [usize; 3]) -> Result<Self> {
        if let Some(axis) = Axis::ALL.into_iter().find(|a| size[a.index()] == 0) {
            return Err(Error::invalid(
                ParamGroup::GridSize,
                format!("{axis}-axis cell count must be positive"),
            ));
        }
        checked_cell_count(size)?;
        validate_cell_size(cell_size)?;
        Ok(Self { size, cell_size, pbc })
    }

    /// The "not configured" mesh
    pub const fn unset() -> Self {
        Self {
            size: [0; 3],
            cell_size: [0.0; 3],
            pbc: [0; 3],
        }
    }

    pub fn is_unset(&self) -> bool {
        self.size == [0; 3]
    }

    /// Cell counts per axis
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Cell size per axis, in meters
    pub fn cell_size(&self) -> [f64; 3] {
        self.cell_size
    }

    /// Periodic repetition counts per axis (0 = not periodic)
    pub fn pbc(&self) -> [usize; 3] {
        self.pbc
    }

    /// Total number of cells. Construction guarantees the product fits.
    pub fn n_cells(&self) -> usize {
        self.size.iter().fold(1usize, |acc, &n| acc.saturating_mul(n))
    }

    /// Physical extent per axis, in meters
    pub fn world_size(&self) -> [f64; 3] {
        [
            self.size[0] as f64 * self.cell_size[0],
            self.size[1] as f64 * self.cell_size[1],
            self.size[2] as f64 * self.cell_size[2],
        ]
    }

    /// Whether the grid repeats along any axis
    pub fn is_periodic(&self) -> bool {
        self.pbc.iter().any(|&p| p > 0)
    }

    /// Linear index of cell `[ix, iy, iz]` (x fastest)
    #[inline]
    pub fn index(&self, [ix, iy, iz]: [usize; 3]) -> usize {
        (iz * self.size[1] + iy) * self.size[0] + ix
    }

    /// Inverse of [`Mesh::index`]
    #[inline]
    pub fn coords(&self, index: usize) -> [usize; 3] {
        let nx = self.size[0];
        let ny = self.size[1];
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }

    /// Position of a cell center, with the grid centered on the origin
    pub fn cell_center(&self, cell: [usize; 3]) -> [f64; 3] {
        let mut center = [0.0; 3];
        for axis in 0..3 {
            let offset = 0.5 * (self.size[axis] as f64 - 1.0);
            center[axis] = self.cell_size[axis] * (cell[axis] as f64 - offset);
        }
        center
    }

    /// Same cell counts
    pub fn same_size(&self, other: &Mesh) -> bool {
        self.size == other.size
    }

    /// Same cell size, compared exactly
    pub fn same_cell_size(&self, other: &Mesh) -> bool {
        self.cell_size == other.cell_size
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Display for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            return write!(f, "Mesh(unset)");
        }
        let [nx, ny, nz] = self.size;
        let [cx, cy, cz] = self.cell_size;
        let [px, py, pz] = self.pbc;
        write!(
            f,
            "Mesh({nx}x{ny}x{nz} cells of {cx:e}x{cy:e}x{cz:e} m, pbc [{px}, {py}, {pz}])"
        )
    }
}

/// The nine configuration values of a full mesh request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshParams {
    pub grid_size: [i64; 3],
    pub cell_size: [f64; 3],
    pub pbc: [i64; 3],
}

impl MeshParams {
    pub fn new(grid_size: [i64; 3], cell_size: [f64; 3], pbc: [i64; 3]) -> Self {
        Self {
            grid_size,
            cell_size,
            pbc,
        }
    }

    /// Check all nine values and build the mesh they describe.
    ///
    /// Groups are checked in the order grid size, cell size, PBC; the first
    /// failing group is reported.
    pub fn validate(&self) -> Result<Mesh> {
        let size = validate_grid_size(self.grid_size)?;
        validate_cell_size(self.cell_size)?;
        let pbc = validate_pbc(self.pbc)?;
        Ok(Mesh {
            size,
            cell_size: self.cell_size,
            pbc,
        })
    }
}

impl From<&Mesh> for MeshParams {
    fn from(mesh: &Mesh) -> Self {
        Self {
            grid_size: mesh.size.map(|n| n as i64),
            cell_size: mesh.cell_size,
            pbc: mesh.pbc.map(|p| p as i64),
        }
    }
}

pub(crate) fn validate_grid_size(grid_size: [i64; 3]) -> Result<[usize; 3]> {
    let mut size = [0usize; 3];
    for axis in Axis::ALL {
        let n = grid_size[axis.index()];
        if n <= 0 {
            return Err(Error::invalid(
                ParamGroup::GridSize,
                format!("{axis}-axis cell count {n} must be positive"),
            ));
        }
        size[axis.index()] = usize::try_from(n).map_err(|_| {
            Error::invalid(ParamGroup::GridSize, format!("{axis}-axis cell count {n} is too large"))
        })?;
    }
    checked_cell_count(size)?;
    Ok(size)
}

/// `nx·ny·nz`, rejected as a grid-size error when it does not fit a `usize`.
pub(crate) fn checked_cell_count(size: [usize; 3]) -> Result<usize> {
    size.iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| {
            let [nx, ny, nz] = size;
            Error::invalid(
                ParamGroup::GridSize,
                format!("total cell count {nx}x{ny}x{nz} overflows the address space"),
            )
        })
}

pub(crate) fn validate_cell_size(cell_size: [f64; 3]) -> Result<()> {
    for axis in Axis::ALL {
        let c = cell_size[axis.index()];
        // NaN fails the comparison too
        if !(c > 0.0 && c.is_finite()) {
            return Err(Error::invalid(
                ParamGroup::CellSize,
                format!("{axis}-axis cell size {c} must be positive and finite"),
            ));
        }
    }
    Ok(())
}

pub(crate) fn validate_pbc(pbc: [i64; 3]) -> Result<[usize; 3]> {
    let mut repeats = [0usize; 3];
    for axis in Axis::ALL {
        let p = pbc[axis.index()];
        repeats[axis.index()] = usize::try_from(p).map_err(|_| {
            Error::invalid(ParamGroup::Pbc, format!("{axis}-axis repetition count {p} must not be negative"))
        })?;
    }
    Ok(repeats)
}
