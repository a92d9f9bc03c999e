//! Snapshot encoding: PNG file → base64 wrapped in `ImageData`.
//!
//! VLM APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. The snapshot provider already wrote a
//! PNG to disk, so encoding is read + verify + base64 — but the verify step
//! matters: shipping a truncated or non-PNG file to the API wastes a paid
//! vision call on a guaranteed failure, and the resulting provider error is
//! far less actionable than "snapshot file is not a PNG".

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Encoding failures, surfaced as extraction errors at the row boundary.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to read snapshot '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot '{path}' is not a PNG image")]
    NotPng { path: String },
}

/// Encode a snapshot file as a base64 PNG ready for the VLM API.
///
/// ## Why `detail: "high"`?
/// OpenAI's tiling algorithm divides images into 512 px tiles. `detail:
/// "high"` enables the full tile budget, which a full-page screenshot needs —
/// at low detail the model sees one 512 px thumbnail of an entire page and
/// navigation text, prices, and footer contacts dissolve into noise.
pub fn encode_snapshot(path: &Path) -> Result<ImageData, EncodeError> {
    let bytes = std::fs::read(path).map_err(|e| EncodeError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    match image::guess_format(&bytes) {
        Ok(image::ImageFormat::Png) => {}
        _ => {
            return Err(EncodeError::NotPng {
                path: path.display().to_string(),
            })
        }
    }

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded snapshot → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn write_png(path: &Path) {
        let img = image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([255, 0, 0, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        std::fs::write(path, &buf).expect("write png");
    }

    #[test]
    fn encode_valid_png() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("shot.png");
        write_png(&path);

        let data = encode_snapshot(&path).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn encode_rejects_non_png() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"definitely not an image").expect("write");

        match encode_snapshot(&path) {
            Err(EncodeError::NotPng { .. }) => {}
            other => panic!("expected NotPng, got {other:?}"),
        }
    }

    #[test]
    fn encode_rejects_missing_file() {
        match encode_snapshot(Path::new("/no/such/shot.png")) {
            Err(EncodeError::Read { .. }) => {}
            other => panic!("expected Read error, got {other:?}"),
        }
    }
}
