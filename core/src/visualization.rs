use anyhow::{bail, Context, Result};
use base64::Engine;
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn png_data_url(bytes: &[u8], width: u32, height: u32, color: ColorType) -> Result<String> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(bytes, width, height, color)
        .context("failed to encode PNG data")?;

    let base64 = base64::engine::general_purpose::STANDARD.encode(&buffer);
    Ok(format!("data:image/png;base64,{base64}"))
}

/// Encode a grayscale image (values in [0, 1]) as a PNG data URL.
pub fn encode_luma_png_data_url(width: u32, height: u32, pixels: &[f32]) -> Result<String> {
    if pixels.len() != (width * height) as usize {
        bail!(
            "pixel buffer length {} does not match image size {}x{}",
            pixels.len(),
            width,
            height
        );
    }
    let encoded: Vec<u8> = pixels.iter().map(|&v| to_byte(v)).collect();
    png_data_url(&encoded, width, height, ColorType::L8)
}

/// Encode a planar (CHW) RGB image with values in [0, 1] as a PNG data URL.
pub fn encode_planar_rgb_png_data_url(width: u32, height: u32, pixels: &[f32]) -> Result<String> {
    let plane = (width * height) as usize;
    if pixels.len() != plane * 3 {
        bail!(
            "pixel buffer length {} does not match RGB image size {}x{}",
            pixels.len(),
            width,
            height
        );
    }

    let encoded = planar_to_interleaved(pixels, plane);
    png_data_url(&encoded, width, height, ColorType::Rgb8)
}

/// Pick the encoder matching the channel count of a flattened dataset image.
pub fn encode_image_data_url(channels: usize, width: u32, height: u32, pixels: &[f32]) -> Result<String> {
    match channels {
        1 => encode_luma_png_data_url(width, height, pixels),
        3 => encode_planar_rgb_png_data_url(width, height, pixels),
        other => bail!("cannot encode an image with {other} channels"),
    }
}

fn planar_to_interleaved(pixels: &[f32], plane: usize) -> Vec<u8> {
    let (red, rest) = pixels.split_at(plane);
    let (green, blue) = rest.split_at(plane);
    let mut encoded = Vec::with_capacity(plane * 3);
    for i in 0..plane {
        encoded.push(to_byte(red[i]));
        encoded.push(to_byte(green[i]));
        encoded.push(to_byte(blue[i]));
    }
    encoded
}
