//! Blur-hash placeholder decoding
//!
//! Cards paint a decoded blur hash until the poster arrives. Decoding is
//! pure CPU work on a few hundred pixels, so the shell does it on the UI
//! thread and caches the resulting texture by hash.

use std::f32::consts::PI;

use crate::error::BlurHashError;

const ALPHABET: &[u8; 83] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz#$%*+,-.:;=?@[]^_{|}~";

fn digit(c: u8) -> Result<u32, BlurHashError> {
    ALPHABET
        .iter()
        .position(|&a| a == c)
        .map(|p| p as u32)
        .ok_or(BlurHashError::InvalidChar(c as char))
}

fn decode83(s: &[u8]) -> Result<u32, BlurHashError> {
    s.iter().try_fold(0u32, |acc, &c| Ok(acc * 83 + digit(c)?))
}

fn srgb_to_linear(value: u32) -> f32 {
    let v = value as f32 / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(value: f32) -> u8 {
    let v = value.clamp(0.0, 1.0);
    let srgb = if v <= 0.003_130_8 {
        v * 12.92 * 255.0 + 0.5
    } else {
        (1.055 * v.powf(1.0 / 2.4) - 0.055) * 255.0 + 0.5
    };
    srgb.clamp(0.0, 255.0) as u8
}

fn sign_pow(value: f32, exp: f32) -> f32 {
    value.abs().powf(exp).copysign(value)
}

/// Component grid and colors of a validated hash
struct Components {
    num_x: usize,
    num_y: usize,
    colors: Vec<[f32; 3]>,
}

fn components(hash: &str, punch: f32) -> Result<Components, BlurHashError> {
    let bytes = hash.as_bytes();
    if bytes.len() < 6 {
        return Err(BlurHashError::TooShort(bytes.len()));
    }

    let size_flag = decode83(&bytes[0..1])? as usize;
    let num_y = size_flag / 9 + 1;
    let num_x = size_flag % 9 + 1;
    let expected = 4 + 2 * num_x * num_y;
    if bytes.len() != expected {
        return Err(BlurHashError::LengthMismatch { expected, actual: bytes.len() });
    }

    let max_value = (decode83(&bytes[1..2])? as f32 + 1.0) / 166.0 * punch;

    let dc = decode83(&bytes[2..6])?;
    let mut colors = Vec::with_capacity(num_x * num_y);
    colors.push([srgb_to_linear(dc >> 16), srgb_to_linear((dc >> 8) & 255), srgb_to_linear(dc & 255)]);

    for pair in bytes[6..].chunks(2) {
        let value = decode83(pair)?;
        let quant = [value / (19 * 19), (value / 19) % 19, value % 19];
        colors.push(quant.map(|q| sign_pow((q as f32 - 9.0) / 9.0, 2.0) * max_value));
    }
    Ok(Components { num_x, num_y, colors })
}

/// Decode to `width * height` RGBA pixels. `punch` scales the contrast.
pub fn decode(hash: &str, width: usize, height: usize, punch: f32) -> Result<Vec<u8>, BlurHashError> {
    let Components { num_x, num_y, colors } = components(hash, punch)?;
    let mut pixels = Vec::with_capacity(width * height * 4);

    // Cosine tables per axis; the inner loop is then multiply-adds only
    let basis = |n: usize, size: usize| -> Vec<Vec<f32>> {
        (0..size)
            .map(|p| (0..n).map(|k| (PI * p as f32 * k as f32 / size as f32).cos()).collect())
            .collect()
    };
    let bx = basis(num_x, width);
    let by = basis(num_y, height);

    for y in 0..height {
        for x in 0..width {
            let mut rgb = [0.0f32; 3];
            for j in 0..num_y {
                for i in 0..num_x {
                    let weight = bx[x][i] * by[y][j];
                    let color = colors[i + j * num_x];
                    for c in 0..3 {
                        rgb[c] += color[c] * weight;
                    }
                }
            }
            pixels.extend_from_slice(&[linear_to_srgb(rgb[0]), linear_to_srgb(rgb[1]), linear_to_srgb(rgb[2]), 255]);
        }
    }
    Ok(pixels)
}

/// The hash's DC component as sRGB, a flat fill for tiny placeholders
pub fn average_color(hash: &str) -> Option<[u8; 3]> {
    let bytes = hash.as_bytes();
    let dc = decode83(bytes.get(2..6)?).ok()?;
    Some([(dc >> 16) as u8, ((dc >> 8) & 255) as u8, (dc & 255) as u8])
}
