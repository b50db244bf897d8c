// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Helpers shared across the region codecs: subrect finding, tile analysis,
//! and pixel (and CPixel) packing against an arbitrary client `PixelFormat`.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// A subrectangle of a single solid color, as produced by `find_subrects`.
#[derive(Debug, Clone, Copy)]
pub struct Subrect {
    /// RGBA32 (server-internal) color of this subrectangle.
    pub color: u32,
    /// X offset within the tile/region being subdivided.
    pub x: u16,
    /// Y offset within the tile/region being subdivided.
    pub y: u16,
    /// Width in pixels.
    pub w: u16,
    /// Height in pixels.
    pub h: u16,
}

/// Reads every pixel of `region` out of `fb` and returns them in RGBA32
/// (server-internal) form, row-major. The region codecs convert to the
/// client's pixel format only at the point they actually serialize a pixel
/// so the subrect/tile analysis always runs in one canonical color space.
#[must_use]
pub fn extract_rgba(fb: &FrameBuffer, region: &Region) -> Vec<u32> {
    fb.extract(region)
}

/// Finds the most common pixel value — the encoders' choice of "background".
#[must_use]
pub fn get_background_color(pixels: &[u32]) -> u32 {
    if pixels.is_empty() {
        return 0;
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *counts.entry(pixel).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(color, _)| color)
        .unwrap_or(pixels[0])
}

/// Finds maximal same-color rectangles of non-background pixels via a
/// greedy largest-rectangle-from-each-unmarked-pixel scan (RRE/CoRRE/
/// Hextile subrect search, spec.md §4.5).
#[must_use]
pub fn find_subrects(pixels: &[u32], width: usize, height: usize, bg_color: u32) -> Vec<Subrect> {
    let mut subrects = Vec::new();
    let mut marked = vec![false; pixels.len()];

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if marked[idx] || pixels[idx] == bg_color {
                continue;
            }
            let color = pixels[idx];

            let mut max_w = 0;
            for test_x in x..width {
                let test_idx = y * width + test_x;
                if marked[test_idx] || pixels[test_idx] != color {
                    break;
                }
                max_w = test_x - x + 1;
            }

            let mut h = 1;
            'outer: for test_y in (y + 1)..height {
                for test_x in x..(x + max_w) {
                    let test_idx = test_y * width + test_x;
                    if marked[test_idx] || pixels[test_idx] != color {
                        break 'outer;
                    }
                }
                h = test_y - y + 1;
            }

            let mut best_w = max_w;
            let mut best_h = h;

            let mut max_h = 0;
            for test_y in y..height {
                let test_idx = test_y * width + x;
                if marked[test_idx] || pixels[test_idx] != color {
                    break;
                }
                max_h = test_y - y + 1;
            }

            let mut w2 = 1;
            'outer2: for test_x in (x + 1)..width {
                for test_y in y..(y + max_h) {
                    let test_idx = test_y * width + test_x;
                    if marked[test_idx] || pixels[test_idx] != color {
                        break 'outer2;
                    }
                }
                w2 = test_x - x + 1;
            }

            if w2 * max_h > best_w * best_h {
                best_w = w2;
                best_h = max_h;
            }

            for dy in 0..best_h {
                for dx in 0..best_w {
                    marked[(y + dy) * width + (x + dx)] = true;
                }
            }

            subrects.push(Subrect {
                color,
                x: x as u16,
                y: y as u16,
                w: best_w as u16,
                h: best_h as u16,
            });
        }
    }

    subrects
}

/// Extracts a `tw x th` tile at `(x, y)` from a flat row-major pixel array.
#[must_use]
pub fn extract_tile(pixels: &[u32], width: usize, x: usize, y: usize, tw: usize, th: usize) -> Vec<u32> {
    let mut tile = Vec::with_capacity(tw * th);
    for dy in 0..th {
        tile.extend_from_slice(&pixels[(y + dy) * width + x..(y + dy) * width + x + tw]);
    }
    tile
}

/// Classifies a tile: `(is_solid, is_mono, bg, fg)`. `is_mono` tiles have
/// exactly two distinct colors; `fg` is meaningless unless `is_mono`.
#[must_use]
pub fn analyze_tile_colors(pixels: &[u32]) -> (bool, bool, u32, u32) {
    if pixels.is_empty() {
        return (true, true, 0, 0);
    }
    let mut colors: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *colors.entry(pixel).or_insert(0) += 1;
    }
    if colors.len() == 1 {
        return (true, true, pixels[0], 0);
    }
    if colors.len() == 2 {
        let mut sorted: Vec<_> = colors.into_iter().collect();
        sorted.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
        return (false, true, sorted[0].0, sorted[1].0);
    }
    (false, false, get_background_color(pixels), 0)
}

/// `true` if every pixel in the slice is identical.
#[must_use]
pub fn check_solid_color(pixels: &[u32]) -> Option<u32> {
    let first = *pixels.first()?;
    pixels.iter().all(|&p| p == first).then_some(first)
}

/// An ordered-by-frequency palette of distinct pixel values.
#[must_use]
pub fn build_palette(pixels: &[u32]) -> Vec<u32> {
    let mut colors: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *colors.entry(pixel).or_insert(0) += 1;
    }
    let mut palette: Vec<_> = colors.into_iter().collect();
    palette.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    palette.into_iter().map(|(color, _)| color).collect()
}

/// Converts one RGBA32 (server-internal) pixel to a raw value packed per
/// `fmt`, and writes it in `fmt`'s declared byte order using the full
/// `bits_per_pixel` width (used by Raw/RRE/CoRRE/Hextile bodies, which
/// carry full-width pixels, not the compacted `CPixel` form).
pub fn put_pixel(buf: &mut BytesMut, rgba: u32, fmt: &PixelFormat) {
    let value = PixelFormat::convert(rgba, &PixelFormat::rgba32(), fmt);
    write_raw(buf, value, fmt);
}

fn write_raw(buf: &mut BytesMut, value: u32, fmt: &PixelFormat) {
    match fmt.bits_per_pixel {
        8 => buf.put_u8(value as u8),
        16 => {
            if fmt.big_endian {
                buf.put_u16(value as u16);
            } else {
                buf.put_u16_le(value as u16);
            }
        }
        24 => {
            let bytes = value.to_le_bytes();
            if fmt.big_endian {
                buf.put_slice(&[bytes[2], bytes[1], bytes[0]]);
            } else {
                buf.put_slice(&[bytes[0], bytes[1], bytes[2]]);
            }
        }
        _ => {
            if fmt.big_endian {
                buf.put_u32(value);
            } else {
                buf.put_u32_le(value);
            }
        }
    }
}

/// Reads one full-width pixel per `fmt` and converts it back to RGBA32.
pub fn read_pixel(buf: &mut BytesMut, fmt: &PixelFormat) -> Result<u32> {
    let need = usize::from(fmt.bits_per_pixel / 8).max(1);
    if buf.len() < need {
        return Err(VncError::Format("truncated pixel".into()));
    }
    let value = match fmt.bits_per_pixel {
        8 => u32::from(buf.get_u8()),
        16 => {
            if fmt.big_endian {
                u32::from(buf.get_u16())
            } else {
                u32::from(buf.get_u16_le())
            }
        }
        24 => {
            let b = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
            if fmt.big_endian {
                (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
            } else {
                (u32::from(b[2]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[0])
            }
        }
        _ => {
            if fmt.big_endian {
                buf.get_u32()
            } else {
                buf.get_u32_le()
            }
        }
    };
    Ok(PixelFormat::convert(value, fmt, &PixelFormat::rgba32()))
}

/// The number of bytes a `CPixel` occupies for a given client format: the
/// full pixel width, minus one byte when `bpp == 32` and depth `<= 24`
/// (the unused channel byte is omitted — spec.md §4.5 CPixel, GLOSSARY).
#[must_use]
pub fn cpixel_size(fmt: &PixelFormat) -> usize {
    if fmt.bits_per_pixel == 32 && fmt.depth <= 24 {
        3
    } else {
        usize::from(fmt.bits_per_pixel / 8).max(1)
    }
}

/// Writes one RGBA32 pixel in the compact `CPixel` form used by TRLE/ZRLE.
pub fn put_cpixel(buf: &mut BytesMut, rgba: u32, fmt: &PixelFormat) {
    let value = PixelFormat::convert(rgba, &PixelFormat::rgba32(), fmt);
    if cpixel_size(fmt) == 3 {
        let bytes = value.to_le_bytes();
        // omit the unused (4th) channel byte; keep the other three in the
        // client's declared order.
        if fmt.big_endian {
            buf.put_slice(&[bytes[2], bytes[1], bytes[0]]);
        } else {
            buf.put_slice(&[bytes[0], bytes[1], bytes[2]]);
        }
    } else {
        write_raw(buf, value, fmt);
    }
}

/// Reads one `CPixel` and converts it back to RGBA32.
pub fn read_cpixel(buf: &mut BytesMut, fmt: &PixelFormat) -> Result<u32> {
    if cpixel_size(fmt) == 3 {
        if buf.len() < 3 {
            return Err(VncError::Format("truncated CPixel".into()));
        }
        let b = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
        let value = if fmt.big_endian {
            (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
        } else {
            (u32::from(b[2]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[0])
        };
        Ok(PixelFormat::convert(value, fmt, &PixelFormat::rgba32()))
    } else {
        read_pixel(buf, fmt)
    }
}
