//! Image references for vision requests
//!
//! Remote images are passed through as URLs. Local files are inlined as
//! base64 data URLs.

use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};

/// Prompt used when describing an image sent in chat
pub const DESCRIBE_IMAGE_PROMPT: &str = "Describe this image in detail. What do you see?";

/// Turn user input into something the vision endpoint accepts
///
/// `http`, `https` and `data` URLs are used as-is. Anything else is read as
/// a local file path.
pub async fn resolve_image_reference(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Image reference is empty");
    }

    if let Ok(url) = url::Url::parse(trimmed) {
        if matches!(url.scheme(), "http" | "https" | "data") {
            return Ok(trimmed.to_string());
        }
    }

    image_data_url(Path::new(trimmed)).await
}

/// Read a local image into a `data:` URL
pub async fn image_data_url(path: &Path) -> Result<String> {
    let mime_type = get_mime_type(path)?;
    let image_data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image: {:?}", path))?;

    Ok(format!("data:{};base64,{}", mime_type, STANDARD.encode(&image_data)))
}

/// MIME type from the file extension
fn get_mime_type(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        _ => anyhow::bail!("Unsupported image format: {:?}", path),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_mime_type() {
        assert_eq!(get_mime_type(Path::new("test.png")).unwrap(), "image/png");
        assert_eq!(get_mime_type(Path::new("test.JPEG")).unwrap(), "image/jpeg");
        assert!(get_mime_type(Path::new("test.exe")).is_err());
        assert!(get_mime_type(Path::new("noext")).is_err());
    }

    #[tokio::test]
    async fn test_remote_urls_pass_through() {
        let url = "https://example.com/cat.png";
        assert_eq!(resolve_image_reference(url).await.unwrap(), url);

        let data = "data:image/png;base64,AAAA";
        assert_eq!(resolve_image_reference(data).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_local_file_becomes_data_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pixel.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let resolved = resolve_image_reference(path.to_str().unwrap()).await.unwrap();
        assert_eq!(resolved, "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        assert!(resolve_image_reference("/definitely/not/here.png").await.is_err());
        assert!(resolve_image_reference("  ").await.is_err());
    }
}
