use crate::models::CandidateFile;
use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat};
use std::path::Path;
use thiserror::Error;

pub const CONVERSION_FAILED_MESSAGE: &str = "Could not convert image to a supported format";

/// Image containers the processing backend does not accept as-is.
const LEGACY_EXTENSIONS: &[&str] = &["tif", "tiff", "bmp"];

const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Image decode/encode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Conversion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub fn needs_conversion(file: &CandidateFile) -> bool {
    LEGACY_EXTENSIONS.contains(&file.extension().as_str())
}

fn jpeg_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{}.jpg", stem)
}

fn convert_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = std::io::Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
    Ok(out.into_inner())
}

/// Re-encodes a legacy image as JPEG on a blocking thread.
pub async fn normalize(file: CandidateFile) -> Result<CandidateFile, NormalizeError> {
    let source = file.data.clone();
    let converted = tokio::task::spawn_blocking(move || convert_to_jpeg(&source)).await??;

    tracing::debug!(
        "Converted {} ({} bytes) to JPEG ({} bytes)",
        file.file_name,
        file.data.len(),
        converted.len()
    );

    Ok(CandidateFile {
        path: file.path,
        file_name: jpeg_name(&file.file_name),
        content_type: mime::IMAGE_JPEG.to_string(),
        data: Bytes::from(converted),
    })
}
