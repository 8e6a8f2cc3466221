//! Digit recognition for the gate CAPTCHA
//!
//! OCR is best effort. When the engine is missing or fails the recognizer
//! answers with an empty guess; the gate attempt still happens and is
//! expected to fail.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Upper bound for one OCR run
const OCR_TIMEOUT: Duration = Duration::from_secs(20);

/// Reads the digits of a CAPTCHA image
#[async_trait]
pub trait DigitRecognizer: Send + Sync {
    /// Whether an engine is installed at all
    async fn is_available(&self) -> bool;

    /// Digits in a base64-encoded image; empty when nothing was recognized
    async fn recognize(&self, image_base64: &str) -> String;
}

/// Keep only ASCII digits of the engine output
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Decode a base64 image payload, tolerating embedded whitespace
pub fn decode_image(image_base64: &str) -> Option<Vec<u8>> {
    let compact: String = image_base64.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    STANDARD.decode(compact.as_bytes()).ok()
}

/// Write the decoded CAPTCHA where the engine can read it
async fn write_image(path: &Path, image: &[u8]) -> Result<(), String> {
    tokio::fs::write(path, image)
        .await
        .map_err(|e| format!("tempfile write: {e}"))
}

/// `tesseract` CLI in single-block digits mode
pub struct TesseractOcr {
    binary: String,
    available: OnceCell<bool>,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            available: OnceCell::new(),
        }
    }

    async fn run(&self, image: &[u8]) -> Result<String, String> {
        let file = tempfile::Builder::new()
            .prefix("gate-captcha-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| format!("tempfile: {e}"))?;
        write_image(file.path(), image).await?;

        let child = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .args(["--oem", "3", "--psm", "6", "digits"])
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(OCR_TIMEOUT, child)
            .await
            .map_err(|_| "ocr timed out".to_string())?
            .map_err(|e| format!("spawn {}: {e}", self.binary))?;

        if !output.status.success() {
            return Err(format!("ocr exited with {}", output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl DigitRecognizer for TesseractOcr {
    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let version = Command::new(&self.binary)
                    .arg("--version")
                    .kill_on_drop(true)
                    .output()
                    .await;
                match version {
                    Ok(output) => output.status.success(),
                    Err(e) => {
                        warn!(binary = %self.binary, error = %e, "OCR engine unavailable");
                        false
                    }
                }
            })
            .await
    }

    async fn recognize(&self, image_base64: &str) -> String {
        if !self.is_available().await {
            return String::new();
        }
        let Some(image) = decode_image(image_base64) else {
            debug!("captcha image is not valid base64");
            return String::new();
        };
        match self.run(&image).await {
            Ok(raw) => {
                let digits = digits_only(&raw);
                debug!(raw = raw.trim(), digits = %digits, "ocr result");
                digits
            }
            Err(e) => {
                warn!(error = %e, "ocr failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only(" 12 3a4\n"), "1234");
        assert_eq!(digits_only("abc"), "");
    }

    #[tokio::test]
    async fn test_write_image_replaces_contents() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"stale bytes that are longer").unwrap();
        write_image(file.path(), b"\x89PNG").await.unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"\x89PNG");

        let missing = file.path().with_extension("d").join("none.png");
        assert!(write_image(&missing, b"x").await.unwrap_err().starts_with("tempfile write"));
    }

    #[test]
    fn test_decode_image() {
        assert_eq!(decode_image("aGk=\n"), Some(b"hi".to_vec()));
        assert_eq!(decode_image("   "), None);
        assert_eq!(decode_image("!!!"), None);
    }

    #[tokio::test]
    async fn test_missing_engine_gives_empty_guess() {
        let ocr = TesseractOcr::new("definitely-not-an-ocr-binary-7f3a");
        assert!(!ocr.is_available().await);
        assert_eq!(ocr.recognize("aGk=").await, "");
    }
}
