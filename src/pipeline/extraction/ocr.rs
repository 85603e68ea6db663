use std::io::Write;
use std::process::Command;

use super::ExtractionError;

/// Image-to-text recognition.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// Runs the `tesseract` command-line tool on a temporary copy of the image.
pub struct TesseractCli {
    command: String,
    lang: String,
}

impl TesseractCli {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            lang: "eng".to_string(),
        }
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, ExtractionError> {
        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(image_bytes)?;
        input.flush()?;

        let output = Command::new(&self.command)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ExtractionError::OcrUnavailable(format!("{} not found", self.command))
                }
                _ => ExtractionError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::OcrProcessing(stderr.trim().to_string()));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|e| ExtractionError::Encoding(e.to_string()))?;
        tracing::debug!(chars = text.len(), "Tesseract finished");
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
pub use mock::MockOcr;

#[cfg(test)]
mod mock {
    use std::sync::Mutex;

    use super::{ExtractionError, OcrEngine};

    /// Mock OCR engine for testing: returns configured text and counts calls.
    pub struct MockOcr {
        result: Result<String, String>,
        calls: Mutex<usize>,
    }

    impl MockOcr {
        pub fn new(text: &str) -> Self {
            Self {
                result: Ok(text.to_string()),
                calls: Mutex::new(0),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                result: Err(reason.to_string()),
                calls: Mutex::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.lock().map(|c| *c).unwrap_or(0)
        }
    }

    impl OcrEngine for MockOcr {
        fn recognize(&self, _image_bytes: &[u8]) -> Result<String, ExtractionError> {
            if let Ok(mut calls) = self.calls.lock() {
                *calls += 1;
            }
            self.result
                .clone()
                .map_err(ExtractionError::OcrProcessing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = TesseractCli::new("definitely-not-a-real-ocr-binary");
        let err = engine.recognize(&[0x89, 0x50, 0x4E, 0x47]).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrUnavailable(_)));
    }

    #[test]
    fn mock_counts_calls() {
        let ocr = MockOcr::new("Glucose: 110");
        assert_eq!(ocr.recognize(b"img").unwrap(), "Glucose: 110");
        assert_eq!(ocr.calls(), 1);
        assert!(MockOcr::failing("blurry").recognize(b"img").is_err());
    }
}
