//! Dataset payloads: the Cartesian mesh.

use std::any::Any;
use std::sync::Arc;

use crate::collection::{shared, unshared, ArrayCollection, ArrayRef};
use crate::error::{CfError, CfResult};
use crate::extent::Extent;
use crate::metadata::Metadata;
use crate::stream::{BinaryStream, IDENT_MESH};
use crate::VariantArray;

/// Polymorphic dataset payload flowing between pipeline stages.
pub trait Dataset: Send + Sync + std::fmt::Debug {
    /// Stable name matching the stream type stamp.
    fn type_name(&self) -> &'static str;

    /// True when the dataset carries no geometry and no arrays.
    fn is_empty(&self) -> bool;

    /// The dataset's metadata map.
    fn metadata(&self) -> &Metadata;

    /// Serialize for I/O or communication.
    fn to_stream(&self, stream: &mut BinaryStream) -> CfResult<()>;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Shared dataset handle passed along pipeline edges.
pub type DatasetRef = Arc<dyn Dataset>;

/// A structured (Cartesian) mesh over x/y/z coordinate arrays with
/// field collections partitioned by centering.
///
/// Coordinate and field buffers are reference counted: a shallow copy
/// aliases them, a deep copy duplicates them. Metadata is always
/// copied deeply.
#[derive(Debug, Clone)]
pub struct CartesianMesh {
    metadata: Metadata,
    x: ArrayRef,
    y: ArrayRef,
    z: ArrayRef,
    point_arrays: ArrayCollection,
    cell_arrays: ArrayCollection,
    edge_arrays: ArrayCollection,
    face_arrays: ArrayCollection,
    info_arrays: ArrayCollection,
}

impl Default for CartesianMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl CartesianMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self {
            metadata: Metadata::new(),
            x: shared(VariantArray::from(Vec::<f64>::new())),
            y: shared(VariantArray::from(Vec::<f64>::new())),
            z: shared(VariantArray::from(Vec::<f64>::new())),
            point_arrays: ArrayCollection::new(),
            cell_arrays: ArrayCollection::new(),
            edge_arrays: ArrayCollection::new(),
            face_arrays: ArrayCollection::new(),
            info_arrays: ArrayCollection::new(),
        }
    }

    // === temporal metadata ===

    pub fn time(&self) -> Option<f64> {
        self.metadata.get_scalar("time")
    }

    pub fn set_time(&mut self, t: f64) {
        self.metadata.insert("time", t);
    }

    pub fn time_step(&self) -> Option<u64> {
        self.metadata.get_scalar("time_step")
    }

    pub fn set_time_step(&mut self, step: u64) {
        self.metadata.insert("time_step", step);
    }

    pub fn calendar(&self) -> Option<&str> {
        self.metadata.get_string("calendar")
    }

    pub fn set_calendar(&mut self, calendar: &str) {
        self.metadata.insert("calendar", calendar);
    }

    pub fn time_units(&self) -> Option<&str> {
        self.metadata.get_string("time_units")
    }

    pub fn set_time_units(&mut self, units: &str) {
        self.metadata.insert("time_units", units);
    }

    // === spatial metadata ===

    pub fn extent(&self) -> Option<Extent> {
        Extent::from_metadata(&self.metadata, "extent")
    }

    pub fn set_extent(&mut self, extent: Extent) {
        extent.to_metadata(&mut self.metadata, "extent");
    }

    pub fn whole_extent(&self) -> Option<Extent> {
        Extent::from_metadata(&self.metadata, "whole_extent")
    }

    pub fn set_whole_extent(&mut self, extent: Extent) {
        extent.to_metadata(&mut self.metadata, "whole_extent");
    }

    // === coordinates ===

    pub fn x_coordinates(&self) -> &ArrayRef {
        &self.x
    }

    pub fn y_coordinates(&self) -> &ArrayRef {
        &self.y
    }

    pub fn z_coordinates(&self) -> &ArrayRef {
        &self.z
    }

    pub fn set_x_coordinates(&mut self, x: ArrayRef) {
        self.x = x;
    }

    pub fn set_y_coordinates(&mut self, y: ArrayRef) {
        self.y = y;
    }

    pub fn set_z_coordinates(&mut self, z: ArrayRef) {
        self.z = z;
    }

    /// Coordinate array lengths `[|x|, |y|, |z|]`.
    pub fn dims(&self) -> [usize; 3] {
        [
            unshared(&self.x).len(),
            unshared(&self.y).len(),
            unshared(&self.z).len(),
        ]
    }

    // === field collections, by centering ===

    pub fn point_arrays(&self) -> &ArrayCollection {
        &self.point_arrays
    }

    pub fn point_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.point_arrays
    }

    pub fn cell_arrays(&self) -> &ArrayCollection {
        &self.cell_arrays
    }

    pub fn cell_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.cell_arrays
    }

    pub fn edge_arrays(&self) -> &ArrayCollection {
        &self.edge_arrays
    }

    pub fn edge_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.edge_arrays
    }

    pub fn face_arrays(&self) -> &ArrayCollection {
        &self.face_arrays
    }

    pub fn face_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.face_arrays
    }

    /// Non-geometric per-step data (e.g. reference time scalars).
    pub fn information_arrays(&self) -> &ArrayCollection {
        &self.info_arrays
    }

    pub fn information_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.info_arrays
    }

    /// The mesh metadata map.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    // === copy semantics ===

    /// Replace this mesh's metadata with a deep copy of `other`'s.
    pub fn copy_metadata(&mut self, other: &CartesianMesh) {
        self.metadata = other.metadata.clone();
    }

    /// Copy aliasing the coordinate and field buffers.
    pub fn shallow_copy(&self) -> CartesianMesh {
        self.clone()
    }

    /// Copy duplicating every buffer.
    pub fn deep_copy(&self) -> CartesianMesh {
        CartesianMesh {
            metadata: self.metadata.clone(),
            x: shared(unshared(&self.x)),
            y: shared(unshared(&self.y)),
            z: shared(unshared(&self.z)),
            point_arrays: self.point_arrays.deep_copy(),
            cell_arrays: self.cell_arrays.deep_copy(),
            edge_arrays: self.edge_arrays.deep_copy(),
            face_arrays: self.face_arrays.deep_copy(),
            info_arrays: self.info_arrays.deep_copy(),
        }
    }

    /// Check the geometric invariants: array lengths against the
    /// coordinate dimensions, extent bounds against the whole extent.
    pub fn validate(&self) -> CfResult<()> {
        let [nx, ny, nz] = self.dims();
        let n_points = nx * ny * nz;
        let n_cells = nx.saturating_sub(1) * ny.saturating_sub(1) * nz.saturating_sub(1);

        for (name, array) in self.point_arrays.iter() {
            let n = unshared(array).len();
            if n != n_points {
                return Err(CfError::Contract(format!(
                    "point array \"{}\" has {} values, mesh has {} points",
                    name, n, n_points
                )));
            }
        }
        for (name, array) in self.cell_arrays.iter() {
            let n = unshared(array).len();
            if n != n_cells {
                return Err(CfError::Contract(format!(
                    "cell array \"{}\" has {} values, mesh has {} cells",
                    name, n, n_cells
                )));
            }
        }
        if let Some(extent) = self.extent() {
            extent.validate()?;
            if let Some(whole) = self.whole_extent() {
                whole.validate()?;
                if !whole.contains(&extent) {
                    return Err(CfError::Contract(format!(
                        "extent {:?} is outside the whole extent {:?}",
                        extent.0, whole.0
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reconstruct a mesh serialized by [`Dataset::to_stream`].
    pub fn from_stream(stream: &mut BinaryStream) -> CfResult<CartesianMesh> {
        stream.expect_ident(IDENT_MESH)?;
        let metadata = stream.read_metadata()?;
        let x = shared(stream.read_array()?);
        let y = shared(stream.read_array()?);
        let z = shared(stream.read_array()?);
        let mut mesh = CartesianMesh {
            metadata,
            x,
            y,
            z,
            ..CartesianMesh::new()
        };
        mesh.point_arrays = read_collection(stream)?;
        mesh.cell_arrays = read_collection(stream)?;
        mesh.edge_arrays = read_collection(stream)?;
        mesh.face_arrays = read_collection(stream)?;
        mesh.info_arrays = read_collection(stream)?;
        Ok(mesh)
    }
}

fn write_collection(stream: &mut BinaryStream, collection: &ArrayCollection) {
    stream.write_u64(collection.len() as u64);
    for (name, array) in collection.iter() {
        stream.write_string(name);
        stream.write_array(&unshared(array));
    }
}

fn read_collection(stream: &mut BinaryStream) -> CfResult<ArrayCollection> {
    let n = stream.read_u64()? as usize;
    let mut collection = ArrayCollection::new();
    for _ in 0..n {
        let name = stream.read_string()?;
        collection.append(&name, shared(stream.read_array()?));
    }
    Ok(collection)
}

impl Dataset for CartesianMesh {
    fn type_name(&self) -> &'static str {
        "cartesian_mesh"
    }

    fn is_empty(&self) -> bool {
        unshared(&self.x).is_empty()
            && unshared(&self.y).is_empty()
            && unshared(&self.z).is_empty()
            && self.point_arrays.is_empty()
            && self.cell_arrays.is_empty()
            && self.edge_arrays.is_empty()
            && self.face_arrays.is_empty()
            && self.info_arrays.is_empty()
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn to_stream(&self, stream: &mut BinaryStream) -> CfResult<()> {
        stream.write_ident(IDENT_MESH);
        stream.write_metadata(&self.metadata);
        stream.write_array(&unshared(&self.x));
        stream.write_array(&unshared(&self.y));
        stream.write_array(&unshared(&self.z));
        write_collection(stream, &self.point_arrays);
        write_collection(stream, &self.cell_arrays);
        write_collection(stream, &self.edge_arrays);
        write_collection(stream, &self.face_arrays);
        write_collection(stream, &self.info_arrays);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for CartesianMesh {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata
            && unshared(&self.x) == unshared(&other.x)
            && unshared(&self.y) == unshared(&other.y)
            && unshared(&self.z) == unshared(&other.z)
            && self.point_arrays == other.point_arrays
            && self.cell_arrays == other.cell_arrays
            && self.edge_arrays == other.edge_arrays
            && self.face_arrays == other.face_arrays
            && self.info_arrays == other.info_arrays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mesh() -> CartesianMesh {
        let mut mesh = CartesianMesh::new();
        mesh.set_x_coordinates(shared(VariantArray::from(vec![0.0f64, 120.0, 240.0])));
        mesh.set_y_coordinates(shared(VariantArray::from(vec![-90.0f64, 0.0, 90.0])));
        mesh.set_z_coordinates(shared(VariantArray::from(vec![0.0f64])));
        mesh.set_time(7.5);
        mesh.set_time_step(0);
        mesh.set_whole_extent(Extent([0, 2, 0, 2, 0, 0]));
        mesh.set_extent(Extent([0, 2, 0, 2, 0, 0]));
        mesh.point_arrays_mut()
            .append("T", shared(VariantArray::from(vec![1.0f32; 9])));
        mesh.information_arrays_mut()
            .append("time_bnds", shared(VariantArray::from(vec![7.0f64])));
        mesh
    }

    #[test]
    fn test_temporal_accessors() {
        let mut mesh = sample_mesh();
        assert_eq!(mesh.time(), Some(7.5));
        assert_eq!(mesh.time_step(), Some(0));
        assert_eq!(mesh.calendar(), None);
        mesh.set_calendar("noleap");
        mesh.set_time_units("days since 2000-01-01");
        assert_eq!(mesh.calendar(), Some("noleap"));
        assert_eq!(mesh.time_units(), Some("days since 2000-01-01"));
    }

    #[test]
    fn test_validate_checks_point_array_length() {
        let mut mesh = sample_mesh();
        assert!(mesh.validate().is_ok());
        mesh.point_arrays_mut()
            .append("bad", shared(VariantArray::from(vec![0.0f32; 4])));
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_validate_checks_extent_bounds() {
        let mut mesh = sample_mesh();
        mesh.set_extent(Extent([0, 5, 0, 2, 0, 0]));
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_shallow_copy_aliases_arrays() {
        let mesh = sample_mesh();
        let copy = mesh.shallow_copy();
        copy.point_arrays()
            .get("T")
            .unwrap()
            .write()
            .unwrap()
            .set(0, 42.0f32)
            .unwrap();
        assert_eq!(
            unshared(mesh.point_arrays().get("T").unwrap()).get::<f32>(0),
            Some(42.0)
        );
    }

    #[test]
    fn test_deep_copy_does_not_alias() {
        let mesh = sample_mesh();
        let copy = mesh.deep_copy();
        copy.point_arrays()
            .get("T")
            .unwrap()
            .write()
            .unwrap()
            .set(0, 42.0f32)
            .unwrap();
        assert_eq!(
            unshared(mesh.point_arrays().get("T").unwrap()).get::<f32>(0),
            Some(1.0)
        );
    }

    #[test]
    fn test_stream_round_trip() {
        let mesh = sample_mesh();
        let mut bs = BinaryStream::new();
        mesh.to_stream(&mut bs).unwrap();
        let back = CartesianMesh::from_stream(&mut bs).unwrap();
        assert_eq!(back, mesh);
    }

    #[test]
    fn test_empty() {
        assert!(CartesianMesh::new().is_empty());
        assert!(!sample_mesh().is_empty());
    }
}
