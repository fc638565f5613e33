use crate::buffer::FieldBuffer;
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use fieldgrid_backends::Backend;
use serde::Serialize;

/// A spatially varying contribution: a per-cell mask times a constant vector
#[derive(Debug)]
pub struct ExtraTerm {
    name: String,
    multiplier: [f64; 3],
    mask: FieldBuffer,
}

impl ExtraTerm {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplier(&self) -> [f64; 3] {
        self.multiplier
    }

    pub fn mask(&self) -> &FieldBuffer {
        &self.mask
    }
}

/// Record of an extra term removed because the mesh changed shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedTerm {
    /// Quantity the term belonged to (e.g. `"B_ext"`)
    pub quantity: String,
    pub term: String,
    /// Grid the term's mask was built for
    pub size: [usize; 3],
}

/// A quantity such as the external field or current density, with optional
/// mesh-shaped extra terms
#[derive(Debug)]
pub struct Excitation {
    name: &'static str,
    extra_terms: Vec<ExtraTerm>,
}

impl Excitation {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            extra_terms: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn extra_terms(&self) -> &[ExtraTerm] {
        &self.extra_terms
    }

    /// Add `mask × multiplier` as an extra term; `mask` has one value per cell.
    pub fn add_extra_term(
        &mut self,
        backend: &mut dyn Backend,
        mesh: &Mesh,
        name: impl Into<String>,
        mask: &[f32],
        multiplier: [f64; 3],
    ) -> Result<()> {
        let name = name.into();
        if mask.len() != mesh.n_cells() {
            return Err(Error::BufferSizeMismatch {
                expected: mesh.n_cells(),
                actual: mask.len(),
            });
        }

        let buffer = FieldBuffer::for_mesh(backend, &format!("{}.{}", self.name, name), mesh, 1, 4)?;
        if let Err(e) = buffer.upload(backend, mask) {
            buffer.free(backend);
            return Err(e);
        }

        self.extra_terms.push(ExtraTerm {
            name,
            multiplier,
            mask: buffer,
        });
        Ok(())
    }

    /// Remove every extra term, freeing its mask, and report what was dropped.
    pub fn remove_extra_terms(&mut self, backend: &mut dyn Backend) -> Vec<DroppedTerm> {
        self.extra_terms
            .drain(..)
            .map(|term| {
                let dropped = DroppedTerm {
                    quantity: self.name.to_string(),
                    term: term.name,
                    size: term.mask.size(),
                };
                term.mask.free(backend);
                dropped
            })
            .collect()
    }
}
