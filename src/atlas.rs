//! Hemicube atlas layout and CPU-side radiance storage.
//!
//! All hemicube faces for one vertex batch are packed into a single large
//! render target so the scene renderer never switches targets mid-batch.
//! Cells are laid out row-major, five consecutive cells per vertex.

use std::path::Path;

use glam::Vec4;

use crate::error::{RadiosityError, Result};
use crate::hemicube::{HemicubeFace, NUM_HEMICUBE_FACES};

/// Placement of face cells within the shared atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    face_size: u32,
    batch_size: u32,
    width: u32,
    height: u32,
    faces_per_row: u32,
    faces_per_column: u32,
}

impl AtlasLayout {
    /// Compute the layout for a batch of up to `batch_size` vertices.
    ///
    /// The atlas width is capped at `max_width` (rounded down to a whole
    /// number of cells) and the cells wrap into additional rows.
    pub fn new(face_size: u32, batch_size: u32, max_width: u32) -> Result<Self> {
        let batch_size = batch_size.max(1);
        if face_size == 0 || max_width < face_size {
            return Err(RadiosityError::InvalidParameter(format!(
                "atlas cannot fit a single {face_size}-texel face in a width of {max_width}"
            )));
        }

        let total_faces = batch_size * NUM_HEMICUBE_FACES as u32;
        let width = (max_width.min(total_faces * face_size) / face_size) * face_size;
        let faces_per_row = width / face_size;
        let faces_per_column = total_faces.div_ceil(faces_per_row);

        Ok(Self {
            face_size,
            batch_size,
            width,
            height: faces_per_column * face_size,
            faces_per_row,
            faces_per_column,
        })
    }

    pub fn face_size(&self) -> u32 {
        self.face_size
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn faces_per_row(&self) -> u32 {
        self.faces_per_row
    }

    pub fn faces_per_column(&self) -> u32 {
        self.faces_per_column
    }

    /// Top-left atlas texel of the cell for `face` of the vertex in batch
    /// slot `slot`.
    pub fn face_origin(&self, slot: u32, face: HemicubeFace) -> (u32, u32) {
        let cell = slot * NUM_HEMICUBE_FACES as u32 + face.index() as u32;
        let row = cell / self.faces_per_row;
        let col = cell % self.faces_per_row;
        (col * self.face_size, row * self.face_size)
    }
}

/// CPU-side RGBA radiance samples for one rendered atlas.
#[derive(Debug, Clone)]
pub struct RadianceAtlas {
    layout: AtlasLayout,
    texels: Vec<[f32; 4]>,
}

impl RadianceAtlas {
    /// Allocate a zeroed atlas for the given layout.
    pub fn new(layout: AtlasLayout) -> Self {
        let texels = vec![[0.0; 4]; (layout.width() * layout.height()) as usize];
        Self { layout, texels }
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> Vec4 {
        Vec4::from_array(self.texels[(y * self.layout.width + x) as usize])
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        self.texels[(y * self.layout.width + x) as usize] = value.to_array();
    }

    pub fn fill(&mut self, value: Vec4) {
        self.texels.fill(value.to_array());
    }

    pub fn clear(&mut self) {
        self.texels.fill([0.0; 4]);
    }

    /// Raw texel bytes, tightly packed Rgba32Float rows, for GPU upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Write the atlas to a 24-bit BMP for visual debugging.
    ///
    /// Radiance is clamped to [0, 1] and quantized to 8 bits per channel;
    /// alpha is discarded. Diagnostic only.
    pub fn export_bmp(&self, path: &Path) -> Result<()> {
        let mut img = image::RgbImage::new(self.layout.width, self.layout.height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let texel = self.texels[(y * self.layout.width + x) as usize];
            *pixel = image::Rgb([
                quantize(texel[0]),
                quantize(texel[1]),
                quantize(texel[2]),
            ]);
        }
        img.save_with_format(path, image::ImageFormat::Bmp)
            .map_err(|e| RadiosityError::ExportFailed(format!("{}: {e}", path.display())))
    }
}

fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_fits_small_batches_in_one_row() {
        // 4 vertices * 5 faces * 64 texels = 1280 wide, under the cap.
        let layout = AtlasLayout::new(64, 4, 8192).unwrap();
        assert_eq!(layout.width(), 1280);
        assert_eq!(layout.height(), 64);
        assert_eq!(layout.faces_per_row(), 20);
        assert_eq!(layout.faces_per_column(), 1);
    }

    #[test]
    fn layout_wraps_at_max_width() {
        // 256 vertices * 5 faces at 64 texels would be 81920 wide; capped
        // at 8192 it wraps into 10 rows of 128 cells.
        let layout = AtlasLayout::new(64, 256, 8192).unwrap();
        assert_eq!(layout.width(), 8192);
        assert_eq!(layout.faces_per_row(), 128);
        assert_eq!(layout.faces_per_column(), 10);
        assert_eq!(layout.height(), 640);
    }

    #[test]
    fn face_origins_are_row_major() {
        let layout = AtlasLayout::new(64, 256, 8192).unwrap();
        assert_eq!(layout.face_origin(0, HemicubeFace::Front), (0, 0));
        assert_eq!(layout.face_origin(0, HemicubeFace::NegBitangent), (4 * 64, 0));
        assert_eq!(layout.face_origin(1, HemicubeFace::Front), (5 * 64, 0));
        // Cell 128 is the first cell of the second cell row.
        assert_eq!(layout.face_origin(25, HemicubeFace::PosBitangent), (0, 64));
    }

    #[test]
    fn rejects_width_smaller_than_one_face() {
        assert!(AtlasLayout::new(64, 1, 32).is_err());
    }

    #[test]
    fn sample_round_trips() {
        let layout = AtlasLayout::new(4, 1, 8192).unwrap();
        let mut atlas = RadianceAtlas::new(layout);
        atlas.set(3, 2, Vec4::new(0.1, 0.2, 0.3, 1.0));
        assert_eq!(atlas.sample(3, 2), Vec4::new(0.1, 0.2, 0.3, 1.0));
        assert_eq!(atlas.sample(0, 0), Vec4::ZERO);
        atlas.clear();
        assert_eq!(atlas.sample(3, 2), Vec4::ZERO);
    }

    #[test]
    fn bmp_export_writes_readable_image() {
        let layout = AtlasLayout::new(4, 1, 8192).unwrap();
        let mut atlas = RadianceAtlas::new(layout);
        atlas.fill(Vec4::new(1.0, 0.5, 0.0, 1.0));

        let path = std::env::temp_dir().join("hemicube_gi_atlas_export_test.bmp");
        atlas.export_bmp(&path).unwrap();
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (layout.width(), layout.height()));
        assert_eq!(img.get_pixel(0, 0).0, [255, 128, 0]);
        std::fs::remove_file(&path).ok();
    }
}
