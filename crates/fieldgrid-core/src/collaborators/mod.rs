//! Mesh-shaped resources owned by the buffer lifecycle
//!
//! Each collaborator owns its device buffers and knows how to allocate,
//! resize or release them when the mesh changes:
//!
//! - [`MeshField`] - a per-cell field (magnetization, region indices) with
//!   `alloc` / `resize`
//! - [`Geometry`] - shape descriptor plus the mask derived from it
//! - [`Excitation`] - a quantity with mesh-shaped extra terms
//! - [`ThermalNoise`] - lazily created noise buffer
//! - [`KernelCache`] - cached convolution kernels

mod excitation;
mod field;
mod geometry;
mod kernels;
mod noise;

pub use excitation::{DroppedTerm, Excitation, ExtraTerm};
pub use field::MeshField;
pub use geometry::{Geometry, Shape};
pub use kernels::{KernelCache, KernelData, KernelKind};
pub use noise::ThermalNoise;
