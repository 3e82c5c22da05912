//! Region decoding on top of the `image` crate.
//!
//! A [`RegionDecoder`] hands out sub-rectangles of an encoded image at a
//! power-of-two downsample factor. Implementations are stateful and not
//! reentrant; [`super::SamplingDecoder`] serializes every call.

use std::io::Cursor;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use tracing::{debug, trace};

use crate::error::{DecoderError, Result};
use crate::viewport::PixelRect;

/// Decoded pixels. Tiles, the background and the thumbnail all use RGBA8.
pub type Bitmap = RgbaImage;

/// Clockwise rotation applied to the native image to get display orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Rotation0 => 0,
            Rotation::Rotation90 => 90,
            Rotation::Rotation180 => 180,
            Rotation::Rotation270 => 270,
        }
    }

    /// Only the four right angles are accepted; anything else is a caller bug.
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::Rotation0),
            90 => Ok(Rotation::Rotation90),
            180 => Ok(Rotation::Rotation180),
            270 => Ok(Rotation::Rotation270),
            other => Err(DecoderError::IllegalRotation(other)),
        }
    }

    /// Rotation component of an EXIF orientation. Mirroring is not supported
    /// at the decode boundary, so pure flips map to no rotation.
    pub fn from_orientation(orientation: Orientation) -> Self {
        match orientation {
            Orientation::Rotate90 | Orientation::Rotate90FlipH => Rotation::Rotation90,
            Orientation::Rotate180 => Rotation::Rotation180,
            Orientation::Rotate270 | Orientation::Rotate270FlipH => Rotation::Rotation270,
            _ => Rotation::Rotation0,
        }
    }

    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Rotation90 | Rotation::Rotation270)
    }

    /// Display-orientation size of a native `width x height` image.
    pub fn display_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Map a rectangle in display space back into native decoder space.
    ///
    /// `display_width`/`display_height` are the post-rotation dimensions.
    pub fn to_native_rect(
        self,
        rect: PixelRect,
        display_width: u32,
        display_height: u32,
    ) -> PixelRect {
        match self {
            Rotation::Rotation0 => rect,
            Rotation::Rotation90 => PixelRect::new(
                rect.top,
                display_width.saturating_sub(rect.right),
                rect.bottom,
                display_width.saturating_sub(rect.left),
            ),
            Rotation::Rotation180 => PixelRect::new(
                display_width.saturating_sub(rect.right),
                display_height.saturating_sub(rect.bottom),
                display_width.saturating_sub(rect.left),
                display_height.saturating_sub(rect.top),
            ),
            Rotation::Rotation270 => PixelRect::new(
                display_height.saturating_sub(rect.bottom),
                rect.left,
                display_height.saturating_sub(rect.top),
                rect.right,
            ),
        }
    }

    /// Rotate a natively decoded bitmap clockwise into display orientation.
    pub fn rotate_bitmap(self, bitmap: Bitmap) -> Bitmap {
        match self {
            Rotation::Rotation0 => bitmap,
            Rotation::Rotation90 => imageops::rotate90(&bitmap),
            Rotation::Rotation180 => imageops::rotate180(&bitmap),
            Rotation::Rotation270 => imageops::rotate270(&bitmap),
        }
    }
}

impl TryFrom<i32> for Rotation {
    type Error = DecoderError;

    fn try_from(degrees: i32) -> Result<Self> {
        Rotation::from_degrees(degrees)
    }
}

/// Platform region-decoding capability.
pub trait RegionDecoder: Send {
    /// Native (pre-rotation) width.
    fn width(&self) -> u32;

    /// Native (pre-rotation) height.
    fn height(&self) -> u32;

    /// Decode `rect` (native space) downsampled by `in_sample_size`.
    fn decode_region(&mut self, in_sample_size: u32, rect: PixelRect) -> Result<Bitmap>;

    fn recycle(&mut self);

    fn is_recycled(&self) -> bool;
}

/// Size of a region decoded at `in_sample_size`, rounded up like the
/// platform decoders do.
pub fn sampled_dimensions(width: u32, height: u32, in_sample_size: u32) -> (u32, u32) {
    let sample = in_sample_size.max(1);
    (width.div_ceil(sample).max(1), height.div_ceil(sample).max(1))
}

/// [`RegionDecoder`] backed by the `image` crate.
///
/// The codecs in `image` cannot seek into the compressed stream, so the
/// source is decoded once at construction and regions are cut out of it.
#[derive(Debug)]
pub struct ImageRegionDecoder {
    source: Option<RgbaImage>,
    width: u32,
    height: u32,
    orientation: Rotation,
}

impl ImageRegionDecoder {
    /// Create a decoder from encoded bytes, detecting the format and the
    /// EXIF orientation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes)
            .map_err(|e| DecoderError::Construction(format!("unrecognized image data: {e}")))?;

        let mut decoder = ImageReader::with_format(Cursor::new(bytes), format).into_decoder()?;
        let orientation = decoder
            .orientation()
            .map(Rotation::from_orientation)
            .unwrap_or_default();
        let image = DynamicImage::from_decoder(decoder)?;

        debug!(
            ?format,
            width = image.width(),
            height = image.height(),
            ?orientation,
            "Opened region decoder"
        );

        Ok(Self::with_orientation(image.to_rgba8(), orientation))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Wrap an already decoded image.
    pub fn from_image(image: RgbaImage) -> Self {
        Self::with_orientation(image, Rotation::Rotation0)
    }

    fn with_orientation(image: RgbaImage, orientation: Rotation) -> Self {
        let (width, height) = image.dimensions();
        Self {
            source: Some(image),
            width,
            height,
            orientation,
        }
    }

    /// Rotation hint read from the EXIF orientation tag.
    pub fn exif_rotation(&self) -> Rotation {
        self.orientation
    }
}

impl RegionDecoder for ImageRegionDecoder {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn decode_region(&mut self, in_sample_size: u32, rect: PixelRect) -> Result<Bitmap> {
        let source = self.source.as_ref().ok_or(DecoderError::Recycled)?;

        if rect.is_empty() || rect.right > self.width || rect.bottom > self.height {
            return Err(DecoderError::InvalidRegion {
                x: rect.left,
                y: rect.top,
                width: rect.width(),
                height: rect.height(),
                source_width: self.width,
                source_height: self.height,
            });
        }

        let region =
            imageops::crop_imm(source, rect.left, rect.top, rect.width(), rect.height()).to_image();
        if in_sample_size <= 1 {
            return Ok(region);
        }

        let (out_w, out_h) = sampled_dimensions(rect.width(), rect.height(), in_sample_size);
        trace!(?rect, in_sample_size, out_w, out_h, "Decoding region");
        Ok(imageops::resize(&region, out_w, out_h, FilterType::Triangle))
    }

    fn recycle(&mut self) {
        self.source = None;
    }

    fn is_recycled(&self) -> bool {
        self.source.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Rotation0);
        assert_eq!(Rotation::try_from(270).unwrap(), Rotation::Rotation270);
        assert!(matches!(
            Rotation::from_degrees(45),
            Err(DecoderError::IllegalRotation(45))
        ));
        assert!(Rotation::from_degrees(-90).is_err());
        assert!(Rotation::from_degrees(360).is_err());
    }

    #[test]
    fn test_rotation_from_orientation() {
        assert_eq!(
            Rotation::from_orientation(Orientation::Rotate90),
            Rotation::Rotation90
        );
        assert_eq!(
            Rotation::from_orientation(Orientation::Rotate270FlipH),
            Rotation::Rotation270
        );
        assert_eq!(
            Rotation::from_orientation(Orientation::FlipVertical),
            Rotation::Rotation0
        );
    }

    #[test]
    fn test_native_rect_mapping() {
        // Native 40x20 image; display is 20x40 for 90/270
        let rect = PixelRect::new(2, 5, 8, 15);
        assert_eq!(
            Rotation::Rotation90.to_native_rect(rect, 20, 40),
            PixelRect::new(5, 12, 15, 18)
        );
        assert_eq!(
            Rotation::Rotation270.to_native_rect(rect, 20, 40),
            PixelRect::new(25, 2, 35, 8)
        );
        // Native and display 40x20 for 180
        assert_eq!(
            Rotation::Rotation180.to_native_rect(rect, 40, 20),
            PixelRect::new(32, 5, 38, 15)
        );
    }

    #[test]
    fn test_decode_region_full_resolution() {
        let mut decoder = ImageRegionDecoder::from_image(gradient(64, 32));
        let bitmap = decoder
            .decode_region(1, PixelRect::new(10, 4, 20, 12))
            .unwrap();
        assert_eq!(bitmap.dimensions(), (10, 8));
        assert_eq!(bitmap.get_pixel(0, 0), &Rgba([10, 4, 14, 255]));
    }

    #[test]
    fn test_decode_region_sampled_rounds_up() {
        let mut decoder = ImageRegionDecoder::from_image(gradient(64, 32));
        let bitmap = decoder
            .decode_region(4, PixelRect::new(0, 0, 63, 30))
            .unwrap();
        assert_eq!(bitmap.dimensions(), (16, 8));
    }

    #[test]
    fn test_decode_region_out_of_bounds() {
        let mut decoder = ImageRegionDecoder::from_image(gradient(16, 16));
        let err = decoder
            .decode_region(1, PixelRect::new(8, 8, 17, 12))
            .unwrap_err();
        assert!(matches!(err, DecoderError::InvalidRegion { .. }));
    }

    #[test]
    fn test_recycled_decoder_fails_soft() {
        let mut decoder = ImageRegionDecoder::from_image(gradient(16, 16));
        decoder.recycle();
        assert!(decoder.is_recycled());
        assert!(matches!(
            decoder.decode_region(1, PixelRect::from_size(16, 16)),
            Err(DecoderError::Recycled)
        ));
    }

    #[test]
    fn test_from_bytes_png() {
        let mut bytes = Vec::new();
        gradient(24, 12)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoder = ImageRegionDecoder::from_bytes(&bytes).unwrap();
        assert_eq!((decoder.width(), decoder.height()), (24, 12));
        assert_eq!(decoder.exif_rotation(), Rotation::Rotation0);
    }

    #[test]
    fn test_from_bytes_garbage_is_construction_error() {
        let err = ImageRegionDecoder::from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DecoderError::Construction(_)));
    }
}
