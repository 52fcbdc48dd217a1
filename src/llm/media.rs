use std::io::Cursor;

use image::ImageReader;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// Reads just enough of the buffer to confirm it is an image we can describe.
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

pub fn normalize_gemini_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        "video/quicktime" => "video/mov".to_string(),
        "video/x-msvideo" => "video/avi".to_string(),
        "video/x-ms-wmv" => "video/wmv".to_string(),
        _ => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn recognizes_png_headers() {
        assert_eq!(detect_mime_type(PNG_1X1).as_deref(), Some("image/png"));
        assert_eq!(image_dimensions(PNG_1X1), Some((1, 1)));
    }

    #[test]
    fn rejects_garbage_as_image() {
        assert_eq!(image_dimensions(b"definitely not an image"), None);
    }

    #[test]
    fn normalizes_vendor_mime_aliases() {
        assert_eq!(normalize_gemini_mime_type("IMAGE/JPG"), "image/jpeg");
        assert_eq!(normalize_gemini_mime_type("video/quicktime"), "video/mov");
        assert_eq!(normalize_gemini_mime_type("video/mp4"), "video/mp4");
    }
}
