//! Handles and launch geometry types

use std::fmt;

/// Handle to an allocated device buffer
///
/// Handles are never reused by a backend, so two handles compare equal only
/// if they name the same allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to a device stream (an ordered queue of asynchronous operations)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

impl StreamHandle {
    /// Create a new stream handle
    pub const fn new(id: u64) -> Self {
        StreamHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// Grid dimensions for kernel launch (number of blocks per axis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDim {
    /// Create new grid dimensions
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Get total number of blocks
    pub const fn total_blocks(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for GridDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block dimensions (threads per block per axis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockDim {
    /// Create new block dimensions
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create 1D block
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Create 2D tile
    pub const fn tile(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    /// Get total number of threads per block
    pub const fn total_threads(&self) -> u32 {
        self.x * self.y * self.z
    }
}

impl Default for BlockDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for BlockDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Launch geometry for a kernel dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LaunchConfig {
    /// Grid dimensions (number of blocks in each dimension)
    pub grid: GridDim,

    /// Block dimensions (number of threads per block in each dimension)
    pub block: BlockDim,
}

impl LaunchConfig {
    /// Create new launch configuration
    pub const fn new(grid: GridDim, block: BlockDim) -> Self {
        Self { grid, block }
    }

    /// Get total number of blocks
    pub const fn total_blocks(&self) -> u64 {
        self.grid.total_blocks()
    }

    /// Get total number of threads across all blocks
    pub const fn total_threads(&self) -> u64 {
        self.grid.total_blocks() * self.block.total_threads() as u64
    }

    /// Whether the launch has at least `n` threads
    pub const fn covers(&self, n: u64) -> bool {
        self.total_threads() >= n
    }

    /// Whether every axis covers the matching extent of a 3D problem, with
    /// one block layer per z-slice.
    pub const fn covers_3d(&self, size: [usize; 3]) -> bool {
        self.grid.x as u64 * self.block.x as u64 >= size[0] as u64
            && self.grid.y as u64 * self.block.y as u64 >= size[1] as u64
            && self.grid.z as u64 >= size[2] as u64
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid={}, block={}", self.grid, self.block)
    }
}

/// Position of one thread within a launch
///
/// A 1D launch that had to be split across the x and y grid axes hands the
/// kernel a 2D block index; [`ExecutionContext::global_thread_index`]
/// reconstructs the flat element index from it.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    /// Block index within grid
    pub block_idx: (u32, u32, u32),

    /// Thread index within block
    pub thread_idx: (u32, u32, u32),

    /// Grid dimensions
    pub grid_dim: GridDim,

    /// Block dimensions
    pub block_dim: BlockDim,
}

impl ExecutionContext {
    /// Create new execution context
    pub const fn new(
        block_idx: (u32, u32, u32),
        thread_idx: (u32, u32, u32),
        grid_dim: GridDim,
        block_dim: BlockDim,
    ) -> Self {
        Self {
            block_idx,
            thread_idx,
            grid_dim,
            block_dim,
        }
    }

    /// Get linear block index
    pub const fn block_linear_index(&self) -> u64 {
        let (bx, by, bz) = self.block_idx;
        (bz as u64 * self.grid_dim.y as u64 * self.grid_dim.x as u64) + (by as u64 * self.grid_dim.x as u64) + bx as u64
    }

    /// Get linear thread index within block
    pub const fn thread_linear_index(&self) -> u32 {
        let (tx, ty, tz) = self.thread_idx;
        (tz * self.block_dim.y * self.block_dim.x) + (ty * self.block_dim.x) + tx
    }

    /// Get global linear thread index
    pub const fn global_thread_index(&self) -> u64 {
        self.block_linear_index() * self.block_dim.total_threads() as u64 + self.thread_linear_index() as u64
    }
}
