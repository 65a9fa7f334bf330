//! Radiance-to-irradiance integration backends.
//!
//! Both backends turn a rendered hemicube atlas into per-vertex irradiance
//! by summing radiance samples weighted with their delta form factors. The
//! baker drives whichever backend it was given through the
//! [`RadianceIntegrator`] strategy interface; the two must agree to within
//! a small relative epsilon.

mod cpu;
mod gpu;

pub use cpu::CpuIntegrator;
pub use gpu::{FlushState, GpuContext, GpuIntegrator};

use glam::Vec4;

use crate::atlas::AtlasLayout;
use crate::error::Result;
use crate::scene::AtlasSource;
use crate::weights::WeightTable;

/// Integration backend driven by the pass orchestrator.
///
/// Each backend owns its per-scene buffers: two `this_pass` / two
/// `running_total` buffers selected by pass parity, allocated fresh in
/// [`begin_scene`](Self::begin_scene) and replaced wholesale on the next
/// bake. The weight table is shared by reference into every call.
pub trait RadianceIntegrator {
    /// Allocate fresh per-scene buffers for `vertex_count` vertices.
    fn begin_scene(&mut self, vertex_count: usize) -> Result<()>;

    /// Integrate the rendered atlas for the batch starting at
    /// `first_vertex` into the current pass's irradiance buffer.
    ///
    /// `last_batch` flags the final batch of a pass so any deferred
    /// reduction work can be flushed.
    #[allow(clippy::too_many_arguments)]
    fn integrate_batch(
        &mut self,
        atlas: &AtlasSource<'_>,
        weights: &WeightTable,
        layout: &AtlasLayout,
        first_vertex: usize,
        count: usize,
        pass: u32,
        last_batch: bool,
    ) -> Result<()>;

    /// Fold the completed pass into the running total.
    ///
    /// On the first executed pass the running total is the pass buffer
    /// verbatim; afterwards `running_total[pass % 2] =
    /// running_total[(pass - 1) % 2] + this_pass[pass % 2]`.
    fn finish_pass(&mut self, pass: u32, first_executed_pass: bool) -> Result<()>;

    /// This pass's irradiance only, the light source for the next bounce.
    fn pass_irradiance(&mut self, pass: u32) -> Result<Vec<Vec4>>;

    /// Running total after the given pass: the final GI result once the
    /// last pass completes.
    fn final_irradiance(&mut self, pass: u32) -> Result<Vec<Vec4>>;
}
