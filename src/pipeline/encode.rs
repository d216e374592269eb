//! Image encoding: page PNG on disk → base64 `ImageData` for the model request.
//!
//! The rendered files are already PNG, so encoding is a read plus base64.
//! PNG keeps text edges crisp; JPEG artefacts hurt transcription accuracy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// Default `detail` hint; asks tiling models for full resolution.
pub const DEFAULT_IMAGE_DETAIL: &str = "high";

/// Wrap raw PNG bytes as an image attachment.
pub fn encode_png(bytes: &[u8], detail: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail(detail)
}

/// Read a page image from disk and encode it.
pub async fn encode_page_file(path: &Path, detail: &str) -> std::io::Result<ImageData> {
    let bytes = tokio::fs::read(path).await?;
    Ok(encode_png(&bytes, detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[tokio::test]
    async fn encode_rendered_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page-0001.png");
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        let data = encode_page_file(&path, DEFAULT_IMAGE_DETAIL).await.unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = encode_page_file(Path::new("/no/such/page.png"), "high")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
