//! Hemicube GI - a per-vertex radiosity baker for static triangle meshes
//!
//! The baker computes diffuse global illumination by rendering a five-face
//! hemicube around every mesh vertex and integrating the radiance seen
//! through it into irradiance, repeated over multiple bounce passes.
//! Integration runs on one of two numerically equivalent backends:
//! - **CPU**: sequential reference integration over atlas samples
//! - **GPU**: wgpu compute with a two-stage parallel reduction
//!
//! # Features
//! - Precomputed delta form-factor weight tables, normalized so a uniform
//!   hemisphere integrates to exactly one
//! - Batched hemicube rendering into a shared radiance atlas
//! - Multi-bounce pass schedule with ping-pong irradiance accumulation
//! - Pluggable scene renderer: the baker supplies cameras and scissors,
//!   the host supplies rasterization

pub mod atlas;
pub mod baker;
pub mod error;
pub mod hemicube;
pub mod integrator;
pub mod scene;
pub mod vertex;
pub mod weights;

pub use atlas::{AtlasLayout, RadianceAtlas};
pub use baker::{BakeStats, RadiosityBaker};
pub use error::{RadiosityError, Result};
pub use hemicube::{FaceCamera, HemicubeFace, PixelRect, NUM_HEMICUBE_FACES};
pub use integrator::{CpuIntegrator, GpuContext, GpuIntegrator, RadianceIntegrator};
pub use scene::{AtlasSource, PassLighting, SceneInput, SceneRenderer};
pub use vertex::{GiVertex, MeshVertices};
pub use weights::WeightTable;

/// Integration backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Sequential CPU integration - reference implementation
    #[default]
    Cpu,
    /// wgpu compute integration - two-stage parallel reduction
    Gpu,
}

/// Configuration for a radiosity bake
#[derive(Debug, Clone, Copy)]
pub struct RadiosityConfig {
    /// Which integration backend to use
    pub backend: BackendType,
    /// Hemicube face resolution in texels (power of two, at least 4)
    pub face_size: u32,
    /// Vertices rendered and integrated per batch
    pub vertices_per_batch: u32,
    /// Stage-A batches accumulated before a Stage-B reduction (GPU only)
    pub stage_b_interval: u32,
    /// Number of light bounces; the sky pass is scheduled on top of these
    pub bounces: u32,
    /// Near clip distance of the hemicube face cameras
    pub near: f32,
    /// Far clip distance of the hemicube face cameras
    pub far: f32,
    /// Upper bound on the radiance atlas width in texels
    pub max_atlas_width: u32,
    /// Dump each batch's rendered atlas to a BMP file for inspection
    pub export_hemicubes: bool,
}

impl Default for RadiosityConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Cpu,
            face_size: 64,
            vertices_per_batch: 256,
            stage_b_interval: 1,
            bounces: 2,
            near: 0.1,
            far: 3500.0,
            max_atlas_width: 8192,
            export_hemicubes: false,
        }
    }
}
