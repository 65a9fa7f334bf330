//! Multi-bounce bake orchestration.
//!
//! The baker walks a fixed pass schedule: pass 0 renders sky radiance
//! only, pass 1 renders direct light plus the sky's first bounce, and
//! every later pass injects the previous pass's irradiance as the sole
//! light source. Within a pass, vertices are processed in batches: the
//! scene renderer fills the hemicube atlas for a batch, then the
//! integrator folds it into per-vertex irradiance.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use glam::Vec4;

use crate::atlas::AtlasLayout;
use crate::error::{RadiosityError, Result};
use crate::hemicube::{vertex_face_cameras, FaceCamera, NUM_HEMICUBE_FACES};
use crate::integrator::{CpuIntegrator, GpuContext, GpuIntegrator, RadianceIntegrator};
use crate::scene::{AtlasSource, PassLighting, SceneInput, SceneRenderer};
use crate::vertex::{build_gi_vertices, GiVertex};
use crate::weights::WeightTable;
use crate::{BackendType, RadiosityConfig};

/// Timings and counters from the most recent bake.
#[derive(Debug, Clone, Copy, Default)]
pub struct BakeStats {
    pub vertex_count: usize,
    pub passes_executed: u32,
    pub render_time: Duration,
    pub integration_time: Duration,
    pub total_time: Duration,
}

/// Drives the pass schedule over a scene renderer and an integration
/// backend, and holds the resulting per-vertex irradiance.
pub struct RadiosityBaker {
    config: RadiosityConfig,
    weights: WeightTable,
    layout: AtlasLayout,
    integrator: Box<dyn RadianceIntegrator>,
    irradiance: Vec<Vec4>,
    stats: BakeStats,
}

impl RadiosityBaker {
    /// Build a baker with the backend named by the configuration. The GPU
    /// backend acquires its own device; failure to find one is an error,
    /// never a silent fallback to the CPU.
    pub fn new(config: RadiosityConfig) -> Result<Self> {
        let integrator: Box<dyn RadianceIntegrator> = match config.backend {
            BackendType::Cpu => Box::new(CpuIntegrator::new()),
            BackendType::Gpu => {
                let ctx = GpuContext::new()?;
                Box::new(GpuIntegrator::new(
                    ctx,
                    config.face_size,
                    config.vertices_per_batch,
                    config.stage_b_interval,
                )?)
            }
        };
        Self::with_integrator(config, integrator)
    }

    /// Build a baker around an already constructed integration backend.
    pub fn with_integrator(
        config: RadiosityConfig,
        integrator: Box<dyn RadianceIntegrator>,
    ) -> Result<Self> {
        if config.near <= 0.0 || config.far <= config.near {
            return Err(RadiosityError::InvalidParameter(format!(
                "invalid hemicube clip range {}..{}",
                config.near, config.far
            )));
        }
        let weights = WeightTable::build(config.face_size)?;
        let layout = AtlasLayout::new(
            config.face_size,
            config.vertices_per_batch,
            config.max_atlas_width,
        )?;
        Ok(Self {
            config,
            weights,
            layout,
            integrator,
            irradiance: Vec::new(),
            stats: BakeStats::default(),
        })
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    pub fn hemicube_face_size(&self) -> u32 {
        self.config.face_size
    }

    /// Per-vertex irradiance from the last successful bake; empty before
    /// the first bake and after a failed one.
    pub fn final_irradiance(&self) -> &[Vec4] {
        &self.irradiance
    }

    pub fn stats(&self) -> &BakeStats {
        &self.stats
    }

    /// Run the full multi-bounce bake. Fails fast: the first error aborts
    /// the bake and leaves the baker with no result.
    pub fn bake(&mut self, scene: &mut dyn SceneRenderer, input: &SceneInput<'_>) -> Result<()> {
        self.irradiance.clear();
        self.stats = BakeStats::default();
        let start = Instant::now();

        let vertices = build_gi_vertices(&input.mesh)?;
        let vertex_count = vertices.len();
        self.integrator.begin_scene(vertex_count)?;

        // One pass slot for the sky plus one per bounce; always at least
        // one lit pass. Parity of the slot index selects the ping-pong
        // buffers, so skipped slots still count.
        let total_passes = self.config.bounces.max(1) + 1;
        let mut bounce_light: Vec<Vec4> = Vec::new();
        let mut first_executed = true;
        let mut executed = 0u32;
        let mut render_time = Duration::ZERO;
        let mut integration_time = Duration::ZERO;

        for pass in 0..total_passes {
            if pass == 0 && !input.has_sky {
                log::debug!("scene has no sky, skipping sky pass");
                continue;
            }
            let lighting = match pass {
                0 => PassLighting::SkyOnly,
                1 => PassLighting::DirectAndSky(&bounce_light),
                _ => PassLighting::BounceOnly(&bounce_light),
            };
            log::info!(
                "radiosity pass {} of {}: {} vertices",
                pass + 1,
                total_passes,
                vertex_count
            );

            self.run_pass(
                scene,
                &vertices,
                pass,
                &lighting,
                &mut render_time,
                &mut integration_time,
            )?;
            self.integrator.finish_pass(pass, first_executed)?;
            first_executed = false;
            executed += 1;

            // The next pass is lit by this pass's contribution alone,
            // never the running total: that would double-count light. The
            // sky pass's irradiance feeds the first lit pass the same way.
            if pass + 1 < total_passes {
                bounce_light = self.integrator.pass_irradiance(pass)?;
            }
        }

        self.irradiance = self.integrator.final_irradiance(total_passes - 1)?;
        self.stats = BakeStats {
            vertex_count,
            passes_executed: executed,
            render_time,
            integration_time,
            total_time: start.elapsed(),
        };
        log::info!(
            "bake finished: {} vertices, {} passes, render {:?}, integration {:?}, total {:?}",
            vertex_count,
            executed,
            render_time,
            integration_time,
            self.stats.total_time
        );
        Ok(())
    }

    fn run_pass(
        &mut self,
        scene: &mut dyn SceneRenderer,
        vertices: &[GiVertex],
        pass: u32,
        lighting: &PassLighting<'_>,
        render_time: &mut Duration,
        integration_time: &mut Duration,
    ) -> Result<()> {
        let batch_size = (self.config.vertices_per_batch as usize).max(1);
        let mut first = 0usize;
        while first < vertices.len() {
            let count = batch_size.min(vertices.len() - first);
            let last = first + count == vertices.len();
            let batch = &vertices[first..first + count];
            let cameras: Vec<[FaceCamera; NUM_HEMICUBE_FACES]> = batch
                .iter()
                .enumerate()
                .map(|(slot, vertex)| {
                    vertex_face_cameras(
                        vertex,
                        slot as u32,
                        &self.layout,
                        self.config.near,
                        self.config.far,
                    )
                })
                .collect();

            let t = Instant::now();
            scene.render_vertex_batch(batch, &cameras, &self.layout, lighting)?;
            *render_time += t.elapsed();

            let atlas = scene.atlas()?;
            if self.config.export_hemicubes {
                export_atlas(&atlas, first, pass)?;
            }

            let t = Instant::now();
            self.integrator.integrate_batch(
                &atlas,
                &self.weights,
                &self.layout,
                first,
                count,
                pass,
                last,
            )?;
            *integration_time += t.elapsed();

            first += count;
        }
        Ok(())
    }
}

/// Debug dump of the rendered atlas. Only available when the atlas lives
/// on the CPU; a GPU-resident atlas is skipped with a warning.
fn export_atlas(atlas: &AtlasSource<'_>, first_vertex: usize, pass: u32) -> Result<()> {
    match atlas {
        AtlasSource::Cpu(samples) => {
            let path = PathBuf::from(format!(
                "hemicube_faces_vertex{first_vertex}_pass{pass}.bmp"
            ));
            samples.export_bmp(&path)
        }
        AtlasSource::Gpu(_) => {
            log::warn!("hemicube export requested but the atlas is GPU-resident, skipping");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::RadianceAtlas;
    use glam::Vec3;

    fn test_config() -> RadiosityConfig {
        RadiosityConfig {
            backend: BackendType::Cpu,
            face_size: 8,
            vertices_per_batch: 2,
            stage_b_interval: 1,
            bounces: 2,
            near: 0.1,
            far: 100.0,
            max_atlas_width: 8192,
            export_hemicubes: false,
        }
    }

    fn test_mesh() -> (Vec<Vec3>, Vec<Vec3>, Vec<Vec3>) {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let normals = vec![Vec3::Z; 3];
        let tangents = vec![Vec3::X; 3];
        (positions, normals, tangents)
    }

    /// Fills the atlas with one constant radiance per lighting mode, so a
    /// pass's integrated irradiance equals that constant exactly.
    struct ConstantRenderer {
        atlas: RadianceAtlas,
        modes: Vec<&'static str>,
        direct_inputs: Vec<Vec<Vec4>>,
        bounce_inputs: Vec<Vec<Vec4>>,
        batches_rendered: usize,
    }

    impl ConstantRenderer {
        fn new(layout: AtlasLayout) -> Self {
            Self {
                atlas: RadianceAtlas::new(layout),
                modes: Vec::new(),
                direct_inputs: Vec::new(),
                bounce_inputs: Vec::new(),
                batches_rendered: 0,
            }
        }
    }

    impl SceneRenderer for ConstantRenderer {
        fn render_vertex_batch(
            &mut self,
            _batch: &[GiVertex],
            _cameras: &[[FaceCamera; NUM_HEMICUBE_FACES]],
            _layout: &AtlasLayout,
            lighting: &PassLighting<'_>,
        ) -> Result<()> {
            let (mode, value) = match lighting {
                PassLighting::SkyOnly => ("sky", 0.25),
                PassLighting::DirectAndSky(sky) => {
                    self.direct_inputs.push(sky.to_vec());
                    ("direct", 1.0)
                }
                PassLighting::BounceOnly(prev) => {
                    self.bounce_inputs.push(prev.to_vec());
                    ("bounce", 0.5)
                }
            };
            if self.modes.last() != Some(&mode) {
                self.modes.push(mode);
            }
            self.atlas.fill(Vec4::new(value, value, value, 1.0));
            self.batches_rendered += 1;
            Ok(())
        }

        fn atlas(&mut self) -> Result<AtlasSource<'_>> {
            Ok(AtlasSource::Cpu(&self.atlas))
        }
    }

    fn bake_with(has_sky: bool) -> (RadiosityBaker, ConstantRenderer) {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = test_config();
        let mut baker =
            RadiosityBaker::with_integrator(config, Box::new(CpuIntegrator::new())).unwrap();
        let mut renderer = ConstantRenderer::new(*baker.layout());
        let (positions, normals, tangents) = test_mesh();
        let input = SceneInput {
            mesh: crate::vertex::MeshVertices {
                positions: &positions,
                normals: &normals,
                tangents: &tangents,
            },
            has_sky,
        };
        baker.bake(&mut renderer, &input).unwrap();
        (baker, renderer)
    }

    #[test]
    fn sky_scene_runs_sky_direct_and_bounce_passes() {
        let (baker, renderer) = bake_with(true);
        assert_eq!(renderer.modes, vec!["sky", "direct", "bounce"]);
        assert_eq!(baker.stats().passes_executed, 3);
        assert_eq!(baker.stats().vertex_count, 3);
        // Uniform radiance integrates to the constant itself; the final
        // result is the sum over the three passes.
        for v in baker.final_irradiance() {
            for k in 0..3 {
                assert!((v[k] - 1.75).abs() < 1e-4, "channel {k} = {}", v[k]);
            }
            assert_eq!(v.w, 0.0);
        }
    }

    #[test]
    fn skyless_scene_skips_pass_zero_but_keeps_slot_count() {
        let (baker, renderer) = bake_with(false);
        // Three pass slots, two executed: the sky pass is a no-op.
        assert_eq!(renderer.modes, vec!["direct", "bounce"]);
        assert_eq!(baker.stats().passes_executed, 2);
        for v in baker.final_irradiance() {
            assert!((v.x - 1.5).abs() < 1e-4);
        }
    }

    #[test]
    fn first_lit_pass_shades_with_sky_pass_irradiance() {
        let (_, renderer) = bake_with(true);
        // Every batch of the direct pass must see the sky pass's
        // per-vertex irradiance (0.25 for the uniform sky fill).
        assert!(!renderer.direct_inputs.is_empty());
        for seen in &renderer.direct_inputs {
            assert_eq!(seen.len(), 3);
            for v in seen {
                assert!((v.x - 0.25).abs() < 1e-4, "sky bounce input {v}");
            }
        }
    }

    #[test]
    fn skyless_first_lit_pass_gets_empty_sky_bounce() {
        let (_, renderer) = bake_with(false);
        assert!(!renderer.direct_inputs.is_empty());
        for seen in &renderer.direct_inputs {
            assert!(seen.is_empty());
        }
    }

    #[test]
    fn bounce_pass_sees_previous_pass_irradiance_only() {
        let (_, renderer) = bake_with(true);
        // The bounce pass renders once per batch; each time it must see
        // the direct pass's contribution (1.0), not the running total
        // (1.25 after sky + direct).
        assert!(!renderer.bounce_inputs.is_empty());
        for seen in &renderer.bounce_inputs {
            assert_eq!(seen.len(), 3);
            for v in seen {
                assert!((v.x - 1.0).abs() < 1e-4, "bounce input {v}");
            }
        }
    }

    #[test]
    fn batches_cover_all_vertices() {
        let (_, renderer) = bake_with(true);
        // 3 vertices at 2 per batch: two batches per executed pass.
        assert_eq!(renderer.batches_rendered, 2 * 3);
    }

    #[test]
    fn rejects_bad_clip_range() {
        let mut config = test_config();
        config.near = 0.0;
        let result = RadiosityBaker::with_integrator(config, Box::new(CpuIntegrator::new()));
        assert!(matches!(
            result.err(),
            Some(RadiosityError::InvalidParameter(_))
        ));
    }

    #[test]
    fn failed_bake_clears_previous_result() {
        let (mut baker, mut renderer) = bake_with(true);
        assert!(!baker.final_irradiance().is_empty());
        let input = SceneInput {
            mesh: crate::vertex::MeshVertices {
                positions: &[],
                normals: &[],
                tangents: &[],
            },
            has_sky: true,
        };
        assert!(baker.bake(&mut renderer, &input).is_err());
        assert!(baker.final_irradiance().is_empty());
    }
}
