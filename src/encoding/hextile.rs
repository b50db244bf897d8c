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

//! Hextile: divides the rectangle into 16x16 tiles and encodes each
//! independently, with background/foreground colors persisting from the
//! previous tile unless re-specified.

use bytes::{Buf, BufMut, BytesMut};

use super::common::{analyze_tile_colors, extract_tile, find_subrects, put_pixel, read_pixel};
use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::{
    PixelFormat, HEXTILE_ANY_SUBRECTS, HEXTILE_BACKGROUND_SPECIFIED, HEXTILE_FOREGROUND_SPECIFIED,
    HEXTILE_RAW, HEXTILE_SUBRECTS_COLOURED,
};
use crate::region::Region;

/// Encodes `region` of `fb` as Hextile in `client_pf`.
#[allow(clippy::cast_possible_truncation)]
pub fn encode(fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> BytesMut {
    let pixels = fb.extract(region);
    let width = region.w;
    let height = region.h;
    let pixel_size = usize::from(client_pf.bits_per_pixel / 8).max(1);

    let mut buf = BytesMut::new();
    let mut last_bg: Option<u32> = None;
    let mut last_fg: Option<u32> = None;

    for tile_y in (0..height).step_by(16) {
        for tile_x in (0..width).step_by(16) {
            let tile_w = 16.min(width - tile_x);
            let tile_h = 16.min(height - tile_y);
            let tile_pixels = extract_tile(
                &pixels,
                usize::from(width),
                usize::from(tile_x),
                usize::from(tile_y),
                usize::from(tile_w),
                usize::from(tile_h),
            );

            let (is_solid, is_mono, bg, fg) = analyze_tile_colors(&tile_pixels);
            let tile_start = buf.len();
            buf.put_u8(0); // placeholder subencoding
            let mut subencoding: u8 = 0;

            if is_solid {
                if Some(bg) != last_bg {
                    subencoding |= HEXTILE_BACKGROUND_SPECIFIED;
                    put_pixel(&mut buf, bg, client_pf);
                    last_bg = Some(bg);
                }
            } else {
                let subrects =
                    find_subrects(&tile_pixels, usize::from(tile_w), usize::from(tile_h), bg);
                let raw_size = usize::from(tile_w) * usize::from(tile_h) * pixel_size;
                let bg_overhead = if Some(bg) == last_bg { 0 } else { pixel_size };
                let fg_overhead = if is_mono && Some(fg) != last_fg { pixel_size } else { 0 };
                let subrect_data = subrects.len() * (if is_mono { 2 } else { pixel_size + 2 });
                let encoded_size = bg_overhead + fg_overhead + 1 + subrect_data;

                if subrects.is_empty() || subrects.len() > 255 || encoded_size > raw_size {
                    buf.truncate(tile_start);
                    buf.put_u8(HEXTILE_RAW);
                    for &pixel in &tile_pixels {
                        put_pixel(&mut buf, pixel, client_pf);
                    }
                    last_bg = None;
                    last_fg = None;
                    continue;
                }

                if Some(bg) != last_bg {
                    subencoding |= HEXTILE_BACKGROUND_SPECIFIED;
                    put_pixel(&mut buf, bg, client_pf);
                    last_bg = Some(bg);
                }
                subencoding |= HEXTILE_ANY_SUBRECTS;

                if is_mono {
                    if Some(fg) != last_fg {
                        subencoding |= HEXTILE_FOREGROUND_SPECIFIED;
                        put_pixel(&mut buf, fg, client_pf);
                        last_fg = Some(fg);
                    }
                    buf.put_u8(subrects.len() as u8);
                    for sr in subrects {
                        buf.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
                        buf.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
                    }
                } else {
                    subencoding |= HEXTILE_SUBRECTS_COLOURED;
                    last_fg = None;
                    buf.put_u8(subrects.len() as u8);
                    for sr in subrects {
                        put_pixel(&mut buf, sr.color, client_pf);
                        buf.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
                        buf.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
                    }
                }
            }

            buf[tile_start] = subencoding;
        }
    }

    buf
}

/// Decodes a Hextile rectangle body into a `w x h` RGBA32 pixel array.
pub fn decode(body: &mut BytesMut, w: u16, h: u16, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    let mut out = vec![0u32; usize::from(w) * usize::from(h)];
    let mut last_bg = 0u32;
    let mut last_fg = 0u32;

    for tile_y in (0..h).step_by(16) {
        for tile_x in (0..w).step_by(16) {
            let tile_w = 16.min(w - tile_x);
            let tile_h = 16.min(h - tile_y);
            if body.is_empty() {
                return Err(VncError::CodecFormat("truncated Hextile tile".into()));
            }
            let subencoding = body.get_u8();

            let mut tile = vec![last_bg; usize::from(tile_w) * usize::from(tile_h)];

            if subencoding & HEXTILE_RAW != 0 {
                for p in &mut tile {
                    *p = read_pixel(body, client_pf)?;
                }
            } else {
                if subencoding & HEXTILE_BACKGROUND_SPECIFIED != 0 {
                    last_bg = read_pixel(body, client_pf)?;
                }
                tile.fill(last_bg);

                if subencoding & HEXTILE_FOREGROUND_SPECIFIED != 0 {
                    last_fg = read_pixel(body, client_pf)?;
                }

                if subencoding & HEXTILE_ANY_SUBRECTS != 0 {
                    if body.is_empty() {
                        return Err(VncError::CodecFormat("truncated Hextile subrect count".into()));
                    }
                    let count = body.get_u8();
                    let coloured = subencoding & HEXTILE_SUBRECTS_COLOURED != 0;
                    for _ in 0..count {
                        let color = if coloured {
                            read_pixel(body, client_pf)?
                        } else {
                            last_fg
                        };
                        if body.len() < 2 {
                            return Err(VncError::CodecFormat("truncated Hextile subrect".into()));
                        }
                        let xy = body.get_u8();
                        let wh = body.get_u8();
                        let x = xy >> 4;
                        let y = xy & 0x0F;
                        let sw = (wh >> 4) + 1;
                        let sh = (wh & 0x0F) + 1;
                        for dy in 0..sh {
                            for dx in 0..sw {
                                let px = x + dx;
                                let py = y + dy;
                                if px < tile_w as u8 && py < tile_h as u8 {
                                    tile[usize::from(py) * usize::from(tile_w) + usize::from(px)] = color;
                                }
                            }
                        }
                    }
                }
            }

            for dy in 0..tile_h {
                for dx in 0..tile_w {
                    let gx = tile_x + dx;
                    let gy = tile_y + dy;
                    out[usize::from(gy) * usize::from(w) + usize::from(gx)] =
                        tile[usize::from(dy) * usize::from(tile_w) + usize::from(dx)];
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_tile_round_trips() {
        let mut fb = FrameBuffer::new(32, 32);
        fb.fill(&fb.bounds(), 0xAABBCC);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, 32, 32, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn mixed_tiles_round_trip() {
        let mut fb = FrameBuffer::new(20, 20);
        fb.fill(&fb.bounds(), 0x000000);
        fb.fill(&Region::new(1, 1, 4, 4), 0xFF0000);
        // force a chaotic (raw-fallback) tile
        for y in 16..20 {
            for x in 16..20 {
                fb.set_pixel(x, y, u32::from(x as u16) * 7919 + u32::from(y as u16) * 104729);
            }
        }
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, 20, 20, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }
}
