use crate::buffer::FieldBuffer;
use crate::error::Result;
use crate::mesh::Mesh;
use fieldgrid_backends::Backend;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

type Inside = dyn Fn([f64; 3]) -> bool + Send + Sync;

/// A region of space, tested point by point
///
/// Coordinates are in meters with the grid centered on the origin.
#[derive(Clone)]
pub struct Shape {
    name: String,
    inside: Arc<Inside>,
}

impl Shape {
    pub fn new(name: impl Into<String>, inside: impl Fn([f64; 3]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            inside: Arc::new(inside),
        }
    }

    /// All of space
    pub fn universe() -> Self {
        Self::new("universe", |_| true)
    }

    /// Axis-aligned box of the given side lengths, centered on the origin
    pub fn cuboid(sides: [f64; 3]) -> Self {
        let half = sides.map(|s| 0.5 * s);
        Self::new("cuboid", move |p| (0..3).all(|i| p[i].abs() <= half[i]))
    }

    /// Ellipsoid of the given diameters, centered on the origin
    pub fn ellipsoid(diameters: [f64; 3]) -> Self {
        let radii = diameters.map(|d| 0.5 * d);
        Self::new("ellipsoid", move |p| {
            (0..3).map(|i| (p[i] / radii[i]).powi(2)).sum::<f64>() <= 1.0
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, point: [f64; 3]) -> bool {
        (self.inside)(point)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Geometry: the recorded shape and the cell mask derived from it
///
/// Without a shape there is no mask buffer ("nil" geometry) and every cell
/// belongs to the geometry.
#[derive(Debug, Default)]
pub struct Geometry {
    shape: Option<Shape>,
    mask: Option<FieldBuffer>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    pub fn mask(&self) -> Option<&FieldBuffer> {
        self.mask.as_ref()
    }

    pub fn is_nil(&self) -> bool {
        self.mask.is_none()
    }

    /// Record `shape` and derive the mask for `mesh`: 1.0 for cells whose
    /// center lies inside, 0.0 elsewhere. `None` clears the geometry.
    #[tracing::instrument(skip(self, backend, shape), fields(shape = shape.as_ref().map(Shape::name)))]
    pub fn set_geom(&mut self, backend: &mut dyn Backend, mesh: &Mesh, shape: Option<Shape>) -> Result<()> {
        self.release_mask(backend);
        self.shape = shape;

        let Some(shape) = &self.shape else {
            return Ok(());
        };

        let values: Vec<f32> = (0..mesh.n_cells())
            .into_par_iter()
            .map(|i| if shape.contains(mesh.cell_center(mesh.coords(i))) { 1.0 } else { 0.0 })
            .collect();

        let mask = FieldBuffer::for_mesh(backend, "geometry", mesh, 1, std::mem::size_of::<f32>())?;
        if let Err(e) = mask.upload(backend, &values) {
            mask.free(backend);
            return Err(e);
        }

        let inside = values.iter().filter(|&&v| v > 0.0).count();
        tracing::debug!(cells = values.len(), inside = inside, "geometry_mask_built");

        self.mask = Some(mask);
        Ok(())
    }

    /// Rebuild the mask for `mesh` from the recorded shape.
    pub fn rebuild(&mut self, backend: &mut dyn Backend, mesh: &Mesh) -> Result<()> {
        let shape = self.shape.take();
        self.set_geom(backend, mesh, shape)
    }

    /// Free the mask, keeping the recorded shape.
    pub fn release_mask(&mut self, backend: &mut dyn Backend) -> bool {
        match self.mask.take() {
            Some(mask) => {
                mask.free(backend);
                true
            }
            None => false,
        }
    }

    /// Mask contents, or `None` for a nil geometry
    pub fn mask_values(&self, backend: &mut dyn Backend) -> Result<Option<Vec<f32>>> {
        self.mask.as_ref().map(|mask| mask.to_vec(backend)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgrid_backends::CpuBackend;

    fn mesh(size: [usize; 3]) -> Mesh {
        Mesh::new(size, [1.0; 3], [0; 3]).unwrap()
    }

    #[test]
    fn nil_geometry_has_no_mask() {
        let mut backend = CpuBackend::new();
        let mut geometry = Geometry::new();
        geometry.set_geom(&mut backend, &mesh([4, 4, 1]), None).unwrap();

        assert!(geometry.is_nil());
        assert!(geometry.mask_values(&mut backend).unwrap().is_none());
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn cuboid_mask_marks_inner_cells() {
        let mut backend = CpuBackend::new();
        let mut geometry = Geometry::new();
        // Cell centers along x: -1.5, -0.5, 0.5, 1.5
        geometry
            .set_geom(&mut backend, &mesh([4, 1, 1]), Some(Shape::cuboid([2.0, 1.0, 1.0])))
            .unwrap();

        let values = geometry.mask_values(&mut backend).unwrap().unwrap();
        assert_eq!(values, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn rebuild_follows_new_mesh() {
        let mut backend = CpuBackend::new();
        let mut geometry = Geometry::new();
        geometry
            .set_geom(&mut backend, &mesh([2, 2, 1]), Some(Shape::universe()))
            .unwrap();

        geometry.release_mask(&mut backend);
        geometry.rebuild(&mut backend, &mesh([3, 3, 1])).unwrap();

        let values = geometry.mask_values(&mut backend).unwrap().unwrap();
        assert_eq!(values, vec![1.0; 9]);
        assert_eq!(geometry.shape().unwrap().name(), "universe");
        assert_eq!(backend.buffer_count(), 1);
    }

    #[test]
    fn ellipsoid_contains_center_only() {
        let shape = Shape::ellipsoid([2.0, 2.0, 2.0]);
        assert!(shape.contains([0.0, 0.0, 0.0]));
        assert!(shape.contains([0.9, 0.0, 0.0]));
        assert!(!shape.contains([0.8, 0.8, 0.0]));
        assert_eq!(format!("{shape:?}"), "Shape { name: \"ellipsoid\", .. }");
    }

    #[test]
    fn failed_mask_upload_frees_the_mask() {
        use crate::testing::FlakyBackend;

        let mut backend = FlakyBackend::new();
        backend.fail_uploads = true;
        let mut geometry = Geometry::new();

        let result = geometry.set_geom(&mut backend, &mesh([4, 4, 1]), Some(Shape::universe()));
        assert!(result.is_err());
        assert!(geometry.is_nil());
        assert_eq!(backend.inner.buffer_count(), 0);
        assert_eq!(Backend::allocated_bytes(&backend), 0);
    }
}
