//! Backend trait and handle types

mod traits;
mod types;

pub(crate) use traits::check_bounds;
pub use traits::Backend;
pub use types::{BlockDim, BufferHandle, ExecutionContext, GridDim, LaunchConfig, StreamHandle};
