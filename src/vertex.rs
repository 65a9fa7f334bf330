//! Per-vertex GI sample points built from mesh attributes.

use glam::Vec3;

use crate::error::{RadiosityError, Result};

/// A GI sample point: one position with an orthonormal tangent frame.
///
/// The frame orients the hemicube: the front face looks along `normal`,
/// the side faces along `±tangent` and `±bitangent`. Built once per bake
/// and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GiVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

impl GiVertex {
    /// Build a sample point from mesh position, normal, and tangent.
    ///
    /// Normal and tangent are normalized; the bitangent is derived as
    /// `normal × tangent` and normalized, completing the frame.
    pub fn new(position: Vec3, normal: Vec3, tangent: Vec3) -> Self {
        let normal = normal.normalize();
        let tangent = tangent.normalize();
        let bitangent = normal.cross(tangent).normalize();
        Self {
            position,
            normal,
            tangent,
            bitangent,
        }
    }
}

/// Borrowed mesh vertex attributes, one entry per vertex.
#[derive(Debug, Clone, Copy)]
pub struct MeshVertices<'a> {
    pub positions: &'a [Vec3],
    pub normals: &'a [Vec3],
    pub tangents: &'a [Vec3],
}

impl MeshVertices<'_> {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Build the per-scene GI vertex vector from mesh attributes.
pub fn build_gi_vertices(mesh: &MeshVertices<'_>) -> Result<Vec<GiVertex>> {
    if mesh.is_empty() {
        return Err(RadiosityError::InvalidParameter(
            "scene mesh has no vertices".to_string(),
        ));
    }
    if mesh.normals.len() != mesh.positions.len() || mesh.tangents.len() != mesh.positions.len() {
        return Err(RadiosityError::InvalidParameter(format!(
            "mismatched vertex attribute counts: {} positions, {} normals, {} tangents",
            mesh.positions.len(),
            mesh.normals.len(),
            mesh.tangents.len()
        )));
    }

    Ok(mesh
        .positions
        .iter()
        .zip(mesh.normals.iter())
        .zip(mesh.tangents.iter())
        .map(|((&position, &normal), &tangent)| GiVertex::new(position, normal, tangent))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_orthonormal() {
        let v = GiVertex::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.3, 2.0, 0.1),
            Vec3::new(-4.0, 0.7, 0.2),
        );
        for axis in [v.normal, v.tangent, v.bitangent] {
            assert!((axis.length() - 1.0).abs() < 1e-5);
        }
        assert!(v.normal.dot(v.bitangent).abs() < 1e-5);
        assert!(v.tangent.dot(v.bitangent).abs() < 1e-5);
    }

    #[test]
    fn canonical_frame() {
        let v = GiVertex::new(Vec3::ZERO, Vec3::Z, Vec3::X);
        assert_eq!(v.normal, Vec3::Z);
        assert_eq!(v.tangent, Vec3::X);
        assert_eq!(v.bitangent, Vec3::Y);
    }

    #[test]
    fn builds_one_gi_vertex_per_mesh_vertex() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let normals = vec![Vec3::Z; 3];
        let tangents = vec![Vec3::X; 3];
        let mesh = MeshVertices {
            positions: &positions,
            normals: &normals,
            tangents: &tangents,
        };
        let vertices = build_gi_vertices(&mesh).unwrap();
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1].position, Vec3::X);
    }

    #[test]
    fn rejects_empty_and_mismatched_meshes() {
        let mesh = MeshVertices {
            positions: &[],
            normals: &[],
            tangents: &[],
        };
        assert!(build_gi_vertices(&mesh).is_err());

        let positions = vec![Vec3::ZERO, Vec3::X];
        let normals = vec![Vec3::Z];
        let tangents = vec![Vec3::X, Vec3::X];
        let mesh = MeshVertices {
            positions: &positions,
            normals: &normals,
            tangents: &tangents,
        };
        assert!(build_gi_vertices(&mesh).is_err());
    }
}
