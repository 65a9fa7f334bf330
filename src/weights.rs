//! Precomputed hemicube delta-form-factor weight tables.
//!
//! A hemicube texel's differential form factor depends only on its position
//! within the face, so the weights are computed once per bake for a single
//! reference hemicube oriented along the vertex normal. The front face has
//! its own table; the four side faces share one table by symmetry.

use std::f32::consts::PI;

use crate::error::{RadiosityError, Result};
use crate::hemicube::HemicubeFace;

/// Delta-form-factor tables for one hemicube face resolution.
///
/// Immutable after construction; shared by reference with every integrator
/// call. The normalization constant [`vertex_weight`](Self::vertex_weight)
/// is the reciprocal of the total weight mass, so a hemicube fully covered
/// by unit radiance integrates to unit irradiance.
#[derive(Debug, Clone)]
pub struct WeightTable {
    face_size: u32,
    /// Front face weights, `face_size * face_size`, row-major `[v][u]`.
    front: Vec<f32>,
    /// Side face weights, `face_size * face_size`, row-major `[v][u]`.
    /// Only half of each side face is ever sampled.
    side: Vec<f32>,
    vertex_weight: f32,
}

impl WeightTable {
    /// Build the tables for the given face resolution.
    ///
    /// The resolution must be a power of two of at least 4 so the side
    /// faces split evenly into an outward half.
    pub fn build(face_size: u32) -> Result<Self> {
        if face_size < 4 || !face_size.is_power_of_two() {
            return Err(RadiosityError::InvalidParameter(format!(
                "hemicube face size must be a power of two >= 4, got {face_size}"
            )));
        }

        let f = face_size as usize;

        // Normalized texel coordinates in [-1, 1].
        let uv: Vec<f32> = (0..f)
            .map(|i| (i as f32 / (f - 1) as f32) * 2.0 - 1.0)
            .collect();

        let mut front = vec![0.0f32; f * f];
        let mut side = vec![0.0f32; f * f];
        for (vi, &v) in uv.iter().enumerate() {
            for (ui, &u) in uv.iter().enumerate() {
                let tmp = 1.0 + u * u + v * v;
                let denom = tmp * tmp * PI;
                front[vi * f + ui] = 1.0 / denom;
                side[vi * f + ui] = u.abs() / denom;
            }
        }

        // Total mass: full front face plus four identical side halves. The
        // side table is summed over its active columns (u < 0 half); the
        // other half is never rasterized and carries no weight.
        let front_sum: f32 = front.iter().sum();
        let mut side_half_sum = 0.0f32;
        for vi in 0..f {
            for ui in 0..f / 2 {
                side_half_sum += side[vi * f + ui];
            }
        }
        let vertex_weight = 1.0 / (front_sum + 4.0 * side_half_sum);

        Ok(Self {
            face_size,
            front,
            side,
            vertex_weight,
        })
    }

    pub fn face_size(&self) -> u32 {
        self.face_size
    }

    /// Reciprocal of the total delta-form-factor mass.
    pub fn vertex_weight(&self) -> f32 {
        self.vertex_weight
    }

    /// Front face weight at texel `(v, u)`.
    #[inline]
    pub fn front(&self, v: u32, u: u32) -> f32 {
        self.front[(v * self.face_size + u) as usize]
    }

    /// Side face weight at texel `(v, u)`.
    #[inline]
    pub fn side(&self, v: u32, u: u32) -> f32 {
        self.side[(v * self.face_size + u) as usize]
    }

    /// Weight of texel `(v, u)` on the given hemicube face.
    ///
    /// The side table stores `|u|`-shaped weights; for the bitangent faces
    /// the outward axis runs along `v`, so their lookup swaps indices.
    #[inline]
    pub fn face_weight(&self, face: HemicubeFace, v: u32, u: u32) -> f32 {
        match face {
            HemicubeFace::Front => self.front(v, u),
            HemicubeFace::PosTangent | HemicubeFace::NegTangent => self.side(v, u),
            HemicubeFace::PosBitangent | HemicubeFace::NegBitangent => self.side(u, v),
        }
    }

    /// Raw front table, row-major, for GPU upload.
    pub fn front_raw(&self) -> &[f32] {
        &self.front
    }

    /// Raw side table, row-major, for GPU upload.
    pub fn side_raw(&self) -> &[f32] {
        &self.side
    }
}
