//! Launch geometry for element-wise and cell-wise kernels
//!
//! Two shapes are supported:
//!
//! - **1D**: `n` independent elements, one thread each. Blocks of
//!   [`PlatformLimits::block_size`] threads; when the block count exceeds the
//!   per-axis grid limit the grid is folded over the x and y axes.
//! - **3D**: a `[nx, ny, nz]` cell array. 2D tiles of
//!   `tile_x × tile_y` threads cover each z-slice, with one grid layer per slice.
//!
//! Kernels recover their element index with
//! [`ExecutionContext::global_thread_index`](crate::backend::ExecutionContext::global_thread_index)
//! and must ignore threads past the end; both configurations may overshoot.
//!
//! ```rust
//! use fieldgrid_backends::launch::{configure_1d, PlatformLimits};
//!
//! let config = configure_1d(1000, &PlatformLimits::default());
//! assert_eq!(config.block.x, 512);
//! assert!(config.covers(1000));
//! ```

use crate::backend::{BlockDim, GridDim, LaunchConfig};
use crate::error::{BackendError, Result};
use serde::{Deserialize, Serialize};

/// Threads per block for 1D launches.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Tile width for 3D launches.
pub const DEFAULT_TILE_X: u32 = 32;

/// Tile height for 3D launches.
pub const DEFAULT_TILE_Y: u32 = 32;

/// Maximum blocks along one grid axis.
pub const DEFAULT_MAX_GRID_SIZE: u32 = 65535;

/// Device limits the launch configurer works within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLimits {
    pub block_size: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub max_grid_size: u32,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            tile_x: DEFAULT_TILE_X,
            tile_y: DEFAULT_TILE_Y,
            max_grid_size: DEFAULT_MAX_GRID_SIZE,
        }
    }
}

impl PlatformLimits {
    /// Reject limits that cannot produce a launch.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("block_size", self.block_size),
            ("tile_x", self.tile_x),
            ("tile_y", self.tile_y),
            ("max_grid_size", self.max_grid_size),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(BackendError::InvalidLaunchConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Integer division rounding up. `y` must be positive.
///
/// `div_up(0, y)` is 0.
#[inline]
pub const fn div_up(x: u64, y: u64) -> u64 {
    if x == 0 {
        0
    } else {
        ((x - 1) / y) + 1
    }
}

/// Configure a launch for `n` independent elements.
///
/// `n2 = ceil(n / block_size)` blocks are needed. They are spread as
/// `gx = ceil(n2 / max_grid)` by `gy = ceil(n2 / gx)`, so neither grid axis
/// exceeds the limit for any `n` up to `block_size * max_grid²`. The total
/// thread count is always at least `n`; `n == 0` yields a single empty block.
pub fn configure_1d(n: usize, limits: &PlatformLimits) -> LaunchConfig {
    let block = BlockDim::linear(limits.block_size);
    let n2 = div_up(n as u64, limits.block_size as u64).max(1);
    let gx = div_up(n2, limits.max_grid_size as u64);
    let gy = div_up(n2, gx);

    let config = LaunchConfig::new(GridDim::new(gx as u32, gy as u32, 1), block);
    tracing::trace!(n = n, config = %config, "configure_1d");
    config
}

/// Configure a launch for a 3D cell array of `size = [nx, ny, nz]`.
///
/// Each z-slice is covered by `tile_x × tile_y` tiles; the grid has one layer
/// per slice.
pub fn configure_3d(size: [usize; 3], limits: &PlatformLimits) -> LaunchConfig {
    let block = BlockDim::tile(limits.tile_x, limits.tile_y);
    let gx = div_up(size[0] as u64, limits.tile_x as u64);
    let gy = div_up(size[1] as u64, limits.tile_y as u64);

    let config = LaunchConfig::new(GridDim::new(gx as u32, gy as u32, size[2] as u32), block);
    tracing::trace!(size = ?size, config = %config, "configure_3d");
    config
}
