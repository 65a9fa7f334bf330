//! Hemicube face orientation and clipping geometry.
//!
//! Pure geometry: for a GI vertex this module produces the five camera
//! transforms (one per hemicube face) and the sub-rectangle of each face
//! that actually needs rasterizing. Side faces only ever contribute their
//! outward half, so the inward half is scissored away entirely. This is an
//! exact optimization, not an approximation: the scissored texels carry no
//! form-factor weight.

use glam::Mat4;
use std::f32::consts::FRAC_PI_2;

use crate::atlas::AtlasLayout;
use crate::vertex::GiVertex;

/// Number of faces on a hemicube: one front, four sides.
pub const NUM_HEMICUBE_FACES: usize = 5;

/// Hemicube face, in atlas cell order.
///
/// The face axes for a canonical vertex frame (tangent = +x,
/// bitangent = +y, normal = +z) are +z, +x, -x, +y, -y respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HemicubeFace {
    /// Looks along `+normal`.
    Front,
    /// Looks along `+tangent`.
    PosTangent,
    /// Looks along `-tangent`.
    NegTangent,
    /// Looks along `+bitangent`.
    PosBitangent,
    /// Looks along `-bitangent`.
    NegBitangent,
}

impl HemicubeFace {
    pub const ALL: [HemicubeFace; NUM_HEMICUBE_FACES] = [
        HemicubeFace::Front,
        HemicubeFace::PosTangent,
        HemicubeFace::NegTangent,
        HemicubeFace::PosBitangent,
        HemicubeFace::NegBitangent,
    ];

    pub fn index(self) -> usize {
        match self {
            HemicubeFace::Front => 0,
            HemicubeFace::PosTangent => 1,
            HemicubeFace::NegTangent => 2,
            HemicubeFace::PosBitangent => 3,
            HemicubeFace::NegBitangent => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Axis-aligned pixel rectangle, used for both viewports and scissors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }
}

/// Camera setup the scene renderer needs to rasterize one hemicube face.
#[derive(Debug, Clone, Copy)]
pub struct FaceCamera {
    pub face: HemicubeFace,
    pub view: Mat4,
    pub projection: Mat4,
    /// Full face cell within the atlas.
    pub viewport: PixelRect,
    /// Active sub-rectangle of the cell; side faces use their outward half.
    pub scissor: PixelRect,
}

/// View matrix for one hemicube face of a vertex.
///
/// Left-handed look along the face axis, with the vertex position as the
/// camera origin. The up vector is chosen so the rendered texel grid lines
/// up with the weight table's `(v, u)` convention.
pub fn face_view_matrix(vertex: &GiVertex, face: HemicubeFace) -> Mat4 {
    let (forward, up) = match face {
        HemicubeFace::Front => (vertex.normal, vertex.bitangent),
        HemicubeFace::PosTangent => (vertex.tangent, vertex.bitangent),
        HemicubeFace::NegTangent => (-vertex.tangent, vertex.bitangent),
        HemicubeFace::PosBitangent => (vertex.bitangent, -vertex.normal),
        HemicubeFace::NegBitangent => (-vertex.bitangent, vertex.normal),
    };
    Mat4::look_to_lh(vertex.position, forward, up)
}

/// Shared 90-degree square projection for every hemicube face.
pub fn face_projection(near: f32, far: f32) -> Mat4 {
    Mat4::perspective_lh(FRAC_PI_2, 1.0, near, far)
}

/// Active sub-rectangle of a face cell, relative to the cell origin.
///
/// The midpoint split is exclusive at `face_size / 2` on both halves; for
/// an even face size no texel sits exactly on the hemicube edge, so the
/// split neither drops nor duplicates a weighted texel.
pub fn face_active_rect(face: HemicubeFace, face_size: u32) -> PixelRect {
    let full = face_size;
    let half = face_size / 2;
    match face {
        HemicubeFace::Front => PixelRect {
            left: 0,
            top: 0,
            width: full,
            height: full,
        },
        HemicubeFace::PosTangent => PixelRect {
            left: 0,
            top: 0,
            width: half,
            height: full,
        },
        HemicubeFace::NegTangent => PixelRect {
            left: half,
            top: 0,
            width: half,
            height: full,
        },
        HemicubeFace::PosBitangent => PixelRect {
            left: 0,
            top: half,
            width: full,
            height: half,
        },
        HemicubeFace::NegBitangent => PixelRect {
            left: 0,
            top: 0,
            width: full,
            height: half,
        },
    }
}

/// Build the five face cameras for the vertex occupying `slot` within the
/// current batch's atlas region.
pub fn vertex_face_cameras(
    vertex: &GiVertex,
    slot: u32,
    layout: &AtlasLayout,
    near: f32,
    far: f32,
) -> [FaceCamera; NUM_HEMICUBE_FACES] {
    let projection = face_projection(near, far);
    HemicubeFace::ALL.map(|face| {
        let (left, top) = layout.face_origin(slot, face);
        let viewport = PixelRect {
            left,
            top,
            width: layout.face_size(),
            height: layout.face_size(),
        };
        let local = face_active_rect(face, layout.face_size());
        let scissor = PixelRect {
            left: left + local.left,
            top: top + local.top,
            width: local.width,
            height: local.height,
        };
        FaceCamera {
            face,
            view: face_view_matrix(vertex, face),
            projection,
            viewport,
            scissor,
        }
    })
}
