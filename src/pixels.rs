//! Pixel-buffer capability for 2D raster data
//!
//! Callers that ingest or serve image slices need a raster's raw bytes and
//! row stride without caring about its concrete representation. Each raster
//! type implements [`PixelBuffer`]; consumers dispatch through the trait
//! instead of inspecting concrete types.

/// Access to a raster's raw pixel bytes.
pub trait PixelBuffer {
    /// Underlying pixel bytes, row-major.
    fn data(&self) -> &[u8];

    /// Bytes per row.
    fn stride(&self) -> i32;
}

/// 8-bit grayscale raster.
#[derive(Debug, Clone)]
pub struct GrayRaster {
    pix: Vec<u8>,
    width: usize,
    height: usize,
}

impl GrayRaster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pix: vec![0; width * height],
            width,
            height,
        }
    }

    pub fn from_vec(pix: Vec<u8>, width: usize) -> Self {
        let height = if width == 0 { 0 } else { pix.len() / width };
        Self { pix, width, height }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pix_mut(&mut self) -> &mut [u8] {
        &mut self.pix
    }
}

impl PixelBuffer for GrayRaster {
    fn data(&self) -> &[u8] {
        &self.pix
    }

    fn stride(&self) -> i32 {
        self.width as i32
    }
}

/// 16-bit grayscale raster, two bytes per pixel.
#[derive(Debug, Clone)]
pub struct Gray16Raster {
    pix: Vec<u8>,
    width: usize,
}

impl Gray16Raster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pix: vec![0; width * height * 2],
            width,
        }
    }
}

impl PixelBuffer for Gray16Raster {
    fn data(&self) -> &[u8] {
        &self.pix
    }

    fn stride(&self) -> i32 {
        (self.width * 2) as i32
    }
}

/// 8-bit RGBA raster, four bytes per pixel.
#[derive(Debug, Clone)]
pub struct RgbaRaster {
    pix: Vec<u8>,
    width: usize,
}

impl RgbaRaster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pix: vec![0; width * height * 4],
            width,
        }
    }

    pub fn pix_mut(&mut self) -> &mut [u8] {
        &mut self.pix
    }
}

impl PixelBuffer for RgbaRaster {
    fn data(&self) -> &[u8] {
        &self.pix
    }

    fn stride(&self) -> i32 {
        (self.width * 4) as i32
    }
}

/// Count the non-zero bytes in a buffer, a quick occupancy check when
/// debugging ingested slices.
pub fn count_nonzero(buf: &[u8]) -> usize {
    buf.iter().filter(|&&b| b != 0).count()
}
