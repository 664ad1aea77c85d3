use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

/// Payload formats passed through untouched.
const ACCEPTED_FORMATS: &[ImageFormat] = &[ImageFormat::Png, ImageFormat::Jpeg];

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

/// Sniff the payload rather than trusting a declared label.
pub fn is_accepted_payload(data: &[u8]) -> bool {
    image::guess_format(data)
        .map(|format| ACCEPTED_FORMATS.contains(&format))
        .unwrap_or(false)
}

/// Return `data` unchanged when it is already PNG or JPEG, otherwise decode
/// and re-encode it as PNG.
pub fn canonicalize(data: Vec<u8>) -> Result<Vec<u8>, image::ImageError> {
    if is_accepted_payload(&data) {
        return Ok(data);
    }
    let decoded = image::load_from_memory(&data)?;
    encode_png(&decoded)
}

#[cfg(test)]
pub(crate) fn blank_png(width: u32, height: u32) -> Vec<u8> {
    encode_png(&DynamicImage::new_rgb8(width, height)).unwrap()
}
