//! Content-type detection from magic bytes. The filename extension is only
//! consulted when the bytes are not recognized.

/// Bytes inspected when deciding whether content is text.
const TEXT_PROBE_LEN: usize = 8192;

pub fn sniff_mime(bytes: &[u8], filename: &str) -> String {
    let header = &bytes[..bytes.len().min(16)];
    let sniffed = match header {
        [0x25, 0x50, 0x44, 0x46, ..] => Some("application/pdf"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some("image/tiff"),
        [b'B', b'M', ..] if bytes.len() > 14 => Some("image/bmp"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ if header.len() >= 12 && &header[4..8] == b"ftyp" => Some("image/heic"),
        [0x50, 0x4B, 0x03, 0x04, ..] => Some("application/zip"),
        _ => None,
    };
    if let Some(mime) = sniffed {
        return mime.to_string();
    }

    let guessed = mime_guess::from_path(filename).first();
    if is_likely_text(bytes) {
        // Keep a more specific text subtype (csv, markdown) when the name offers one.
        return match guessed {
            Some(m) if m.type_() == mime_guess::mime::TEXT => m.essence_str().to_string(),
            _ => "text/plain".to_string(),
        };
    }
    match guessed {
        Some(m) if m.type_() != mime_guess::mime::TEXT => m.essence_str().to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// Valid UTF-8 without NUL bytes in the first chunk. A multi-byte character
/// cut at the probe boundary still counts as text.
fn is_likely_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let probe = &bytes[..bytes.len().min(TEXT_PROBE_LEN)];
    if probe.contains(&0) {
        return false;
    }
    match std::str::from_utf8(probe) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && probe.len() == TEXT_PROBE_LEN,
    }
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

pub fn is_text(mime: &str) -> bool {
    mime.starts_with("text/")
}

/// Only images (OCR) and text (read directly) have an extraction path.
pub fn is_extractable(mime: &str) -> bool {
    is_image(mime) || is_text(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_win_over_extension() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_mime(&png, "scan.pdf"), "image/png");
        assert_eq!(sniff_mime(b"%PDF-1.7\n...", "report.txt"), "application/pdf");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0], "x"), "image/jpeg");
    }

    #[test]
    fn text_content_detected() {
        assert_eq!(sniff_mime(b"BP 120/80 HR 72", "vitals"), "text/plain");
        assert_eq!(sniff_mime(b"a,b\n1,2\n", "labs.csv"), "text/csv");
        // A misleading image extension does not make text an image.
        assert_eq!(sniff_mime(b"plain words", "photo.jpg"), "text/plain");
    }

    #[test]
    fn binary_falls_back_to_extension_or_octet_stream() {
        let blob = [0u8, 1, 2, 3, 0, 9];
        assert_eq!(sniff_mime(&blob, "form.docx"), mime_guess::from_path("form.docx").first_or_octet_stream().essence_str());
        assert_eq!(sniff_mime(&blob, "unknown"), "application/octet-stream");
        assert_eq!(sniff_mime(&[], "empty"), "application/octet-stream");
    }

    #[test]
    fn extractable_types() {
        assert!(is_extractable("image/png"));
        assert!(is_extractable("text/plain"));
        assert!(!is_extractable("application/pdf"));
    }
}
