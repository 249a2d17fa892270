use anyhow::{bail, Context, Result};
use base64::Engine;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions offered by the file picker.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// An image the user picked, plus the data URL sent to the model.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub path: PathBuf,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    pub data_url: String,
}

impl UploadedImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Sniff the format from the bytes and build the data URL.
    ///
    /// The extension is ignored; a `.png` holding a JPEG is sent as JPEG.
    pub fn from_bytes(path: PathBuf, bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes)
            .with_context(|| format!("{} is not a recognised image", path.display()))?;

        if !matches!(
            format,
            ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif
        ) {
            bail!("Unsupported image format {:?}. Use JPG, PNG or WEBP.", format);
        }

        let (width, height) = image::ImageReader::with_format(Cursor::new(&bytes), format)
            .into_dimensions()
            .with_context(|| format!("Failed to read image header of {}", path.display()))?;

        let media_type = format.to_mime_type().to_string();
        let data_url = encode_data_url(&media_type, &bytes);

        info!(
            path = %path.display(),
            media_type = %media_type,
            width,
            height,
            size = bytes.len(),
            "Loaded image"
        );

        Ok(UploadedImage {
            path,
            media_type,
            width,
            height,
            bytes,
            data_url,
        })
    }
}

pub async fn read_image(path: &Path) -> Result<UploadedImage> {
    debug!(path = %path.display(), "Reading image");
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    UploadedImage::from_bytes(path.to_path_buf(), bytes)
}

pub fn encode_data_url(media_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        media_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub media_type: &'a str,
    pub payload: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataUrlError {
    #[error("data URL has no media type delimiters")]
    MissingMediaType,
    #[error("data URL has no payload separator")]
    MissingPayload,
}

/// Split `data:<media type>;base64,<payload>`.
///
/// The media type is whatever lies between the first `:` and the first `;`,
/// the payload whatever follows the first `,`. Neither part is validated.
pub fn parse_data_url(data_url: &str) -> Result<DataUrl<'_>, DataUrlError> {
    let colon = data_url.find(':').ok_or(DataUrlError::MissingMediaType)?;
    let semicolon = data_url.find(';').ok_or(DataUrlError::MissingMediaType)?;
    if semicolon <= colon {
        return Err(DataUrlError::MissingMediaType);
    }
    let comma = data_url.find(',').ok_or(DataUrlError::MissingPayload)?;

    Ok(DataUrl {
        media_type: &data_url[colon + 1..semicolon],
        payload: &data_url[comma + 1..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 transparent PNG
    const PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn pixel_bytes() -> Vec<u8> {
        base64::engine::general_purpose::STANDARD.decode(PIXEL_PNG).unwrap()
    }

    #[test]
    fn test_parse_data_url() {
        let parsed = parse_data_url("data:image/webp;base64,AAAA").unwrap();
        assert_eq!(parsed.media_type, "image/webp");
        assert_eq!(parsed.payload, "AAAA");
    }

    #[test]
    fn test_payload_is_everything_after_first_comma() {
        let parsed = parse_data_url("data:image/png;base64,ab,cd").unwrap();
        assert_eq!(parsed.payload, "ab,cd");
    }

    #[test]
    fn test_malformed_data_urls() {
        assert_eq!(parse_data_url("not a data url"), Err(DataUrlError::MissingMediaType));
        assert_eq!(parse_data_url("data:image/png,AAAA"), Err(DataUrlError::MissingMediaType));
        assert_eq!(parse_data_url("data:image/png;base64"), Err(DataUrlError::MissingPayload));
    }

    #[test]
    fn test_from_bytes_sniffs_png() {
        let image = UploadedImage::from_bytes(PathBuf::from("folio.jpg"), pixel_bytes()).unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!((image.width, image.height), (1, 1));
        assert_eq!(image.data_url, format!("data:image/png;base64,{}", PIXEL_PNG));
        assert_eq!(image.file_name(), "folio.jpg");

        let parsed = parse_data_url(&image.data_url).unwrap();
        assert_eq!(parsed.media_type, "image/png");
        assert_eq!(parsed.payload, PIXEL_PNG);
    }

    #[test]
    fn test_from_bytes_rejects_non_images() {
        let result = UploadedImage::from_bytes(PathBuf::from("notes.txt"), b"plain text".to_vec());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let result = read_image(Path::new("/definitely/not/here.png")).await;
        assert!(result.is_err());
    }
}
