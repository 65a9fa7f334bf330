//! Contracts between the baker and the external scene renderer.
//!
//! The baker never rasterizes anything itself. It hands the renderer a
//! vertex batch with fully specified face cameras and asks for the atlas
//! back, either as CPU samples or as a GPU texture view depending on the
//! integration backend.

use glam::Vec4;

use crate::atlas::{AtlasLayout, RadianceAtlas};
use crate::error::Result;
use crate::hemicube::{FaceCamera, NUM_HEMICUBE_FACES};
use crate::vertex::{GiVertex, MeshVertices};

/// Scene description handed to a bake.
#[derive(Debug, Clone, Copy)]
pub struct SceneInput<'a> {
    pub mesh: MeshVertices<'a>,
    /// Whether the scene has a skybox. Without one, the sky pass is
    /// skipped entirely.
    pub has_sky: bool,
}

/// What illuminates the scene while a pass's hemicubes are rendered.
#[derive(Debug, Clone, Copy)]
pub enum PassLighting<'a> {
    /// Pass 0: sky radiance and unlit geometry only.
    SkyOnly,
    /// First lit pass: direct light plus the sky's first bounce, bound as
    /// the sky pass's per-vertex irradiance. Empty when the scene has no
    /// sky and the sky pass was skipped.
    DirectAndSky(&'a [Vec4]),
    /// Later passes: only the previous pass's per-vertex irradiance,
    /// bound as a lookup for shading. Never the running total.
    BounceOnly(&'a [Vec4]),
}

/// Rendered atlas handed back to the integrator.
pub enum AtlasSource<'a> {
    /// CPU samples read back through a staging copy.
    Cpu(&'a RadianceAtlas),
    /// GPU texture bound directly as integrator input (Rgba32Float).
    Gpu(&'a wgpu::TextureView),
}

/// External collaborator that rasterizes scene radiance into the atlas.
pub trait SceneRenderer {
    /// Render the five hemicube faces of every vertex in `batch` into the
    /// atlas, using the supplied cameras and the pass's lighting mode.
    fn render_vertex_batch(
        &mut self,
        batch: &[GiVertex],
        cameras: &[[FaceCamera; NUM_HEMICUBE_FACES]],
        layout: &AtlasLayout,
        lighting: &PassLighting<'_>,
    ) -> Result<()>;

    /// The atlas filled by the last `render_vertex_batch` call.
    fn atlas(&mut self) -> Result<AtlasSource<'_>>;
}
