//! Sequential CPU integration backend.

use glam::Vec4;

use crate::atlas::AtlasLayout;
use crate::error::{RadiosityError, Result};
use crate::hemicube::{face_active_rect, HemicubeFace};
use crate::integrator::RadianceIntegrator;
use crate::scene::AtlasSource;
use crate::weights::WeightTable;

/// CPU reference backend: a straight triple loop over faces and their
/// active texels, single-threaded per bake.
///
/// Buffers are `Vec<Vec4>`; glam's `Vec4` is 16-byte aligned, which the
/// 4-wide vector math relies on.
#[derive(Debug, Default)]
pub struct CpuIntegrator {
    this_pass: [Vec<Vec4>; 2],
    running_total: [Vec<Vec4>; 2],
    vertex_count: usize,
}

impl CpuIntegrator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RadianceIntegrator for CpuIntegrator {
    fn begin_scene(&mut self, vertex_count: usize) -> Result<()> {
        if vertex_count == 0 {
            return Err(RadiosityError::InvalidParameter(
                "cannot integrate a scene with zero vertices".to_string(),
            ));
        }
        for buffer in self.this_pass.iter_mut().chain(self.running_total.iter_mut()) {
            buffer.clear();
            buffer.resize(vertex_count, Vec4::ZERO);
        }
        self.vertex_count = vertex_count;
        Ok(())
    }

    fn integrate_batch(
        &mut self,
        atlas: &AtlasSource<'_>,
        weights: &WeightTable,
        layout: &AtlasLayout,
        first_vertex: usize,
        count: usize,
        pass: u32,
        _last_batch: bool,
    ) -> Result<()> {
        let AtlasSource::Cpu(atlas) = atlas else {
            return Err(RadiosityError::InvalidParameter(
                "CPU integrator requires a CPU atlas readback".to_string(),
            ));
        };
        if count as u32 > layout.batch_size() {
            return Err(RadiosityError::InvalidParameter(format!(
                "batch of {count} vertices exceeds atlas capacity of {}",
                layout.batch_size()
            )));
        }
        if first_vertex + count > self.vertex_count {
            return Err(RadiosityError::InvalidParameter(format!(
                "batch {first_vertex}..{} exceeds scene vertex count {}",
                first_vertex + count,
                self.vertex_count
            )));
        }

        let output = &mut self.this_pass[(pass % 2) as usize];
        for slot in 0..count as u32 {
            let mut irradiance = Vec4::ZERO;
            for face in HemicubeFace::ALL {
                let (left, top) = layout.face_origin(slot, face);
                let rect = face_active_rect(face, layout.face_size());
                for v in rect.top..rect.top + rect.height {
                    for u in rect.left..rect.left + rect.width {
                        let radiance = atlas.sample(left + u, top + v).truncate().extend(0.0);
                        // Scaling by the delta form factor turns radiance
                        // into an irradiance contribution.
                        irradiance += radiance * weights.face_weight(face, v, u);
                    }
                }
            }
            output[first_vertex + slot as usize] = irradiance * weights.vertex_weight();
        }
        Ok(())
    }

    fn finish_pass(&mut self, pass: u32, first_executed_pass: bool) -> Result<()> {
        let current = (pass % 2) as usize;
        let previous = ((pass + 1) % 2) as usize;
        if first_executed_pass {
            self.running_total[current] = self.this_pass[current].clone();
        } else {
            // Read last pass's total, write this pass's: the parity split
            // keeps the accumulation free of read/write aliasing.
            for i in 0..self.vertex_count {
                self.running_total[current][i] =
                    self.running_total[previous][i] + self.this_pass[current][i];
            }
        }
        Ok(())
    }

    fn pass_irradiance(&mut self, pass: u32) -> Result<Vec<Vec4>> {
        Ok(self.this_pass[(pass % 2) as usize].clone())
    }

    fn final_irradiance(&mut self, pass: u32) -> Result<Vec<Vec4>> {
        Ok(self.running_total[(pass % 2) as usize].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::RadianceAtlas;

    fn setup(face_size: u32, batch: u32) -> (WeightTable, AtlasLayout, RadianceAtlas) {
        let weights = WeightTable::build(face_size).unwrap();
        let layout = AtlasLayout::new(face_size, batch, 8192).unwrap();
        let atlas = RadianceAtlas::new(layout);
        (weights, layout, atlas)
    }

    #[test]
    fn zero_atlas_integrates_to_exactly_zero() {
        let (weights, layout, atlas) = setup(16, 2);
        let mut integ = CpuIntegrator::new();
        integ.begin_scene(2).unwrap();
        integ
            .integrate_batch(&AtlasSource::Cpu(&atlas), &weights, &layout, 0, 2, 0, true)
            .unwrap();
        integ.finish_pass(0, true).unwrap();
        for v in integ.final_irradiance(0).unwrap() {
            assert_eq!(v, Vec4::ZERO);
        }
    }

    #[test]
    fn uniform_unit_radiance_integrates_to_unit_irradiance() {
        let (weights, layout, mut atlas) = setup(64, 1);
        atlas.fill(Vec4::new(1.0, 1.0, 1.0, 1.0));
        let mut integ = CpuIntegrator::new();
        integ.begin_scene(1).unwrap();
        integ
            .integrate_batch(&AtlasSource::Cpu(&atlas), &weights, &layout, 0, 1, 0, true)
            .unwrap();
        let result = integ.pass_irradiance(0).unwrap()[0];
        // A hemicube fully covered by unit radiance must integrate to unit
        // irradiance; that is what the vertex weight normalizes for.
        for channel in [result.x, result.y, result.z] {
            assert!((channel - 1.0).abs() < 1e-4, "got {result:?}");
        }
        assert_eq!(result.w, 0.0);
    }

    #[test]
    fn accumulation_follows_pass_parity() {
        let (weights, layout, mut atlas) = setup(16, 1);
        atlas.fill(Vec4::splat(0.5));
        let mut integ = CpuIntegrator::new();
        integ.begin_scene(1).unwrap();

        let src = AtlasSource::Cpu(&atlas);
        integ.integrate_batch(&src, &weights, &layout, 0, 1, 0, true).unwrap();
        integ.finish_pass(0, true).unwrap();
        let after_first = integ.final_irradiance(0).unwrap()[0];

        integ.integrate_batch(&src, &weights, &layout, 0, 1, 1, true).unwrap();
        integ.finish_pass(1, false).unwrap();
        let after_second = integ.final_irradiance(1).unwrap()[0];

        assert!((after_second.x - 2.0 * after_first.x).abs() < 1e-5);
        // Pass buffer holds only the last pass's contribution.
        let pass_only = integ.pass_irradiance(1).unwrap()[0];
        assert!((pass_only.x - after_first.x).abs() < 1e-5);
    }

    #[test]
    fn rejects_out_of_range_batches_and_empty_scenes() {
        let (weights, layout, atlas) = setup(16, 1);
        let mut integ = CpuIntegrator::new();
        integ.begin_scene(1).unwrap();
        assert!(integ
            .integrate_batch(&AtlasSource::Cpu(&atlas), &weights, &layout, 1, 1, 0, true)
            .is_err());
        assert!(integ.begin_scene(0).is_err());
    }

    #[test]
    fn rejects_batches_larger_than_the_atlas() {
        // A 2-slot atlas cannot hold a 3-vertex batch; this must be an
        // error, not an out-of-bounds sample.
        let (weights, layout, atlas) = setup(16, 2);
        let mut integ = CpuIntegrator::new();
        integ.begin_scene(4).unwrap();
        let result =
            integ.integrate_batch(&AtlasSource::Cpu(&atlas), &weights, &layout, 0, 3, 0, false);
        assert!(matches!(
            result.err(),
            Some(RadiosityError::InvalidParameter(_))
        ));
    }
}
