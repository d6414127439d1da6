//! Image intake: upload validation, URL download and preprocessing into
//! the tensor layout the model expects.

use std::time::Duration;

use image::imageops::FilterType;
use reqwest::{Client, Url};
use thiserror::Error;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 300;

/// Upload extensions accepted by `POST /predict`.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Rejected image input. Nothing is written to the store for these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("No image provided")]
    NoImage,

    #[error("No selected file")]
    NoSelectedFile,

    #[error("Invalid file type")]
    InvalidType,

    #[error("File too large")]
    TooLarge,

    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to fetch image: {0}")]
    Fetch(String),

    #[error("Failed to preprocess image: {0}")]
    Decode(String),

    #[error("Malformed request: {0}")]
    Malformed(String),
}

/// Normalized RGB image, row-major HWC, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Nested `[height][width][3]` form used by JSON model servers.
    #[must_use]
    pub fn to_nested(&self) -> Vec<Vec<[f32; 3]>> {
        self.data
            .chunks_exact(3)
            .map(|px| [px[0], px[1], px[2]])
            .collect::<Vec<_>>()
            .chunks(self.width as usize)
            .map(<[[f32; 3]]>::to_vec)
            .collect()
    }
}

/// Check an uploaded file before decoding it.
pub fn validate_upload(filename: &str, len: usize, max_bytes: usize) -> Result<(), InputError> {
    if filename.is_empty() {
        return Err(InputError::NoSelectedFile);
    }
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .ok_or(InputError::InvalidType)?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(InputError::InvalidType);
    }
    if len > max_bytes {
        return Err(InputError::TooLarge);
    }
    Ok(())
}

/// Decode, convert to RGB, resize to `INPUT_SIZE` square and scale to `[0, 1]`.
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, InputError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| InputError::Decode(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Lanczos3);

    let data = resized
        .into_raw()
        .into_iter()
        .map(|channel| f32::from(channel) / 255.0)
        .collect();

    Ok(ImageTensor {
        width: INPUT_SIZE,
        height: INPUT_SIZE,
        data,
    })
}

/// Downloads images referenced by URL, capped at the upload limit.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, max_bytes })
    }

    pub async fn fetch(&self, raw_url: &str) -> Result<Vec<u8>, InputError> {
        let url = Url::parse(raw_url).map_err(|e| InputError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(InputError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InputError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(InputError::Fetch(format!(
                "server returned {}",
                response.status()
            )));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(InputError::TooLarge);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| InputError::Fetch(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(InputError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(bytes = body.len(), "downloaded image");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, pixel: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(pixel));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn validate_upload_accepts_known_extensions() {
        assert!(validate_upload("banana.png", 10, 100).is_ok());
        assert!(validate_upload("bottle.JPG", 10, 100).is_ok());
        assert!(validate_upload("can.final.jpeg", 10, 100).is_ok());
    }

    #[test]
    fn validate_upload_rejections() {
        assert_eq!(validate_upload("", 10, 100), Err(InputError::NoSelectedFile));
        assert_eq!(validate_upload("README", 10, 100), Err(InputError::InvalidType));
        assert_eq!(validate_upload("scan.gif", 10, 100), Err(InputError::InvalidType));
        assert_eq!(validate_upload("big.png", 101, 100), Err(InputError::TooLarge));
    }

    #[test]
    fn validate_upload_limit_is_inclusive() {
        assert!(validate_upload("edge.png", 100, 100).is_ok());
    }

    #[test]
    fn preprocess_resizes_and_normalizes() {
        let tensor = preprocess(&png(40, 20, [255, 0, 51])).unwrap();
        assert_eq!(tensor.width, INPUT_SIZE);
        assert_eq!(tensor.height, INPUT_SIZE);
        assert_eq!(tensor.data.len(), (INPUT_SIZE * INPUT_SIZE * 3) as usize);
        assert!(tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((tensor.data[0] - 1.0).abs() < 0.01);
        assert!(tensor.data[1].abs() < 0.01);
        assert!((tensor.data[2] - 0.2).abs() < 0.01);
    }

    #[test]
    fn preprocess_rejects_garbage() {
        assert!(matches!(preprocess(b"not an image"), Err(InputError::Decode(_))));
    }

    #[test]
    fn nested_layout_is_height_by_width_by_channel() {
        let tensor = ImageTensor {
            width: 2,
            height: 1,
            data: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        };
        assert_eq!(tensor.to_nested(), vec![vec![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]]);
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_urls() {
        let fetcher = ImageFetcher::new(Duration::from_secs(1), 1024).unwrap();
        assert!(matches!(
            fetcher.fetch("file:///etc/passwd").await,
            Err(InputError::InvalidUrl(_))
        ));
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(InputError::InvalidUrl(_))
        ));
    }
}
