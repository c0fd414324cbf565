use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};

/// Parse a 3 or 6 digit hexadecimal RGB color (with or without a leading
/// `#`) into `[r, g, b]`.
pub fn parse_hex_color(s: &str) -> Result<[u8; 3], Box<dyn std::error::Error>> {
    let s = s.trim_start_matches('#');
    let expand = |c: char| -> Result<u8, Box<dyn std::error::Error>> {
        let v = c.to_digit(16).ok_or("invalid hex digit")?;
        Ok((v * 16 + v) as u8)
    };
    match s.len() {
        3 => {
            let chars: Vec<char> = s.chars().collect();
            Ok([expand(chars[0])?, expand(chars[1])?, expand(chars[2])?])
        }
        6 => {
            let byte = |i: usize| -> Result<u8, Box<dyn std::error::Error>> {
                Ok(u8::from_str_radix(&s[i..i + 2], 16)?)
            };
            Ok([byte(0)?, byte(2)?, byte(4)?])
        }
        _ => Err("hex color must be 3 or 6 digits".into()),
    }
}

/// Swap a BGRA8 buffer's red and blue channels in place, producing RGBA8.
pub fn bgra_to_rgba(buffer: &mut [u8]) {
    for px in buffer.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

/// Write an RGBA8 `buffer` (`width * height * 4` bytes) out as a PNG file.
pub fn save_rgba_png(
    path: &std::path::Path,
    buffer: &[u8],
    width: u32,
    height: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
    let encoder = PngEncoder::new_with_quality(writer, CompressionType::Best, FilterType::Sub);
    encoder.write_image(buffer, width, height, ColorType::Rgba8)?;
    Ok(())
}

/// Write an RGB8 `buffer` (`width * height * 3` bytes) out as a PNG file.
pub fn save_rgb_png(
    path: &std::path::Path,
    buffer: &[u8],
    width: u32,
    height: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
    let encoder = PngEncoder::new_with_quality(writer, CompressionType::Best, FilterType::Sub);
    encoder.write_image(buffer, width, height, ColorType::Rgb8)?;
    Ok(())
}
