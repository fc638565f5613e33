use crate::buffer::FieldBuffer;
use crate::error::Result;
use crate::mesh::Mesh;
use fieldgrid_backends::Backend;

/// Thermal-noise scratch buffer (3 components, `f32`)
///
/// Created on first use; a resize releases it and leaves re-creation to the
/// next [`ThermalNoise::noise_buffer`] call.
#[derive(Debug, Default)]
pub struct ThermalNoise {
    noise: Option<FieldBuffer>,
}

impl ThermalNoise {
    pub fn new() -> Self {
        Self::default()
    }

    /// The noise buffer for `mesh`, allocating it if needed
    pub fn noise_buffer(&mut self, backend: &mut dyn Backend, mesh: &Mesh) -> Result<&FieldBuffer> {
        let noise = match self.noise.take() {
            Some(noise) if noise.fits(mesh) => noise,
            stale => {
                if let Some(stale) = stale {
                    stale.free(backend);
                }
                FieldBuffer::for_mesh(backend, "thermal_noise", mesh, 3, 4)?
            }
        };
        Ok(&*self.noise.insert(noise))
    }

    pub fn is_allocated(&self) -> bool {
        self.noise.is_some()
    }

    /// Free the buffer if there is one; returns whether anything was freed.
    pub fn release(&mut self, backend: &mut dyn Backend) -> bool {
        match self.noise.take() {
            Some(noise) => {
                noise.free(backend);
                true
            }
            None => false,
        }
    }
}
