use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Illegal rotation angle: {0}")]
    IllegalRotation(i32),

    #[error("Region decoder has been recycled")]
    Recycled,

    #[error("Invalid decode region {x},{y} {width}x{height} for {source_width}x{source_height} source")]
    InvalidRegion {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        source_width: u32,
        source_height: u32,
    },

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not create region decoder: {0}")]
    Construction(String),
}

pub type Result<T> = std::result::Result<T, DecoderError>;
