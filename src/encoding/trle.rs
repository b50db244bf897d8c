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

//! TRLE (Tile Run-Length Encoding): the unwrapped 64x64-tile subencoding
//! stream ZRLE wraps in a persistent zlib stream (spec.md §4.5). Kept as
//! its own module since both TRLE (encoding 15) and ZRLE (encoding 16,
//! `trle::encode_region` output fed through zlib) share it byte-for-byte.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use super::common::{build_palette, put_cpixel, read_cpixel};
use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// Tile edge length for both TRLE and ZRLE (spec.md §4.5).
pub const TILE_SIZE: u16 = 64;

const SUB_RAW: u8 = 0;
const SUB_SOLID: u8 = 1;
const SUB_PLAIN_RLE: u8 = 128;

fn write_run_length(buf: &mut BytesMut, run_len: u32) {
    let mut n = run_len - 1;
    while n >= 255 {
        buf.put_u8(255);
        n -= 255;
    }
    buf.put_u8(n as u8);
}

fn read_run_length(buf: &mut BytesMut) -> Result<u32> {
    let mut sum = 0u32;
    loop {
        if buf.is_empty() {
            return Err(VncError::CodecFormat("truncated TRLE run length".into()));
        }
        let b = buf.get_u8();
        sum += u32::from(b);
        if b != 255 {
            return Ok(sum + 1);
        }
    }
}

/// Encodes the whole `region` of `fb` as a sequence of 64x64 TRLE tiles,
/// row-major, back to back (no outer length/compression framing — that's
/// ZRLE's job).
#[must_use]
pub fn encode_region(fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> BytesMut {
    let mut out = BytesMut::new();
    for tile in region.divide_blocks(TILE_SIZE) {
        let pixels = fb.extract(&tile);
        encode_tile(&mut out, &pixels, tile.w, tile.h, client_pf);
    }
    out
}

/// Decodes a TRLE tile stream for `region` back into RGBA32 pixels, laid
/// out row-major over the whole region.
pub fn decode_region(body: &mut BytesMut, region: &Region, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    let mut out = vec![0u32; usize::from(region.w) * usize::from(region.h)];
    for tile in region.divide_blocks(TILE_SIZE) {
        let tile_pixels = decode_tile(body, tile.w, tile.h, client_pf)?;
        for dy in 0..tile.h {
            for dx in 0..tile.w {
                let gx = (tile.x - region.x) as u16 + dx;
                let gy = (tile.y - region.y) as u16 + dy;
                out[usize::from(gy) * usize::from(region.w) + usize::from(gx)] =
                    tile_pixels[usize::from(dy) * usize::from(tile.w) + usize::from(dx)];
            }
        }
    }
    Ok(out)
}

fn bits_for_palette(size: usize) -> u32 {
    match size {
        2 => 1,
        3..=4 => 2,
        _ => 4,
    }
}

fn encode_tile(buf: &mut BytesMut, pixels: &[u32], w: u16, h: u16, client_pf: &PixelFormat) {
    if pixels.iter().all(|&p| p == pixels[0]) {
        buf.put_u8(SUB_SOLID);
        put_cpixel(buf, pixels[0], client_pf);
        return;
    }

    let palette = build_palette(pixels);
    let cpixel_size = super::common::cpixel_size(client_pf);
    let raw_bytes = pixels.len() * cpixel_size;

    // plain RLE cost estimate: one CPixel plus one-or-more length bytes per run.
    let mut run_count = 0usize;
    let mut length_bytes = 0usize;
    {
        let mut i = 0;
        while i < pixels.len() {
            let color = pixels[i];
            let mut run = 1;
            while i + run < pixels.len() && pixels[i + run] == color {
                run += 1;
            }
            run_count += 1;
            length_bytes += 1 + (run - 1) / 255;
            i += run;
        }
    }
    let plain_rle_bytes = run_count * cpixel_size + length_bytes;

    if palette.len() <= 16 {
        let bits = bits_for_palette(palette.len());
        let row_bytes = (usize::from(w) * bits as usize + 7) / 8;
        let packed_bytes = palette.len() * cpixel_size + row_bytes * usize::from(h);
        if packed_bytes <= raw_bytes && packed_bytes <= plain_rle_bytes {
            buf.put_u8(palette.len() as u8);
            for &c in &palette {
                put_cpixel(buf, c, client_pf);
            }
            let index_of: HashMap<u32, u8> =
                palette.iter().enumerate().map(|(i, &c)| (c, i as u8)).collect();
            for row in pixels.chunks(usize::from(w)) {
                let mut acc = 0u8;
                let mut filled = 0u32;
                for &p in row {
                    let idx = index_of[&p];
                    acc |= idx << (8 - filled - bits as u32);
                    filled += bits as u32;
                    if filled == 8 {
                        buf.put_u8(acc);
                        acc = 0;
                        filled = 0;
                    }
                }
                if filled > 0 {
                    buf.put_u8(acc);
                }
            }
            return;
        }
    }

    if plain_rle_bytes < raw_bytes {
        if palette.len() <= 127 {
            buf.put_u8(128 + palette.len() as u8);
            for &c in &palette {
                put_cpixel(buf, c, client_pf);
            }
            let index_of: HashMap<u32, u8> =
                palette.iter().enumerate().map(|(i, &c)| (c, i as u8)).collect();
            let mut i = 0;
            while i < pixels.len() {
                let color = pixels[i];
                let mut run = 1;
                while i + run < pixels.len() && pixels[i + run] == color {
                    run += 1;
                }
                let idx = index_of[&color];
                if run == 1 {
                    buf.put_u8(idx);
                } else {
                    buf.put_u8(idx | 0x80);
                    write_run_length(buf, run as u32);
                }
                i += run;
            }
        } else {
            buf.put_u8(SUB_PLAIN_RLE);
            let mut i = 0;
            while i < pixels.len() {
                let color = pixels[i];
                let mut run = 1;
                while i + run < pixels.len() && pixels[i + run] == color {
                    run += 1;
                }
                put_cpixel(buf, color, client_pf);
                write_run_length(buf, run as u32);
                i += run;
            }
        }
        return;
    }

    buf.put_u8(SUB_RAW);
    for &p in pixels {
        put_cpixel(buf, p, client_pf);
    }
}

fn decode_tile(body: &mut BytesMut, w: u16, h: u16, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    if body.is_empty() {
        return Err(VncError::CodecFormat("truncated TRLE tile".into()));
    }
    let sub = body.get_u8();
    let count = usize::from(w) * usize::from(h);

    match sub {
        SUB_RAW => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(read_cpixel(body, client_pf)?);
            }
            Ok(out)
        }
        SUB_SOLID => {
            let color = read_cpixel(body, client_pf)?;
            Ok(vec![color; count])
        }
        2..=16 => {
            let palette_size = usize::from(sub);
            let mut palette = Vec::with_capacity(palette_size);
            for _ in 0..palette_size {
                palette.push(read_cpixel(body, client_pf)?);
            }
            let bits = bits_for_palette(palette_size);
            let row_bytes = (usize::from(w) * bits as usize + 7) / 8;
            let mut out = Vec::with_capacity(count);
            for _ in 0..h {
                if body.len() < row_bytes {
                    return Err(VncError::CodecFormat("truncated TRLE packed row".into()));
                }
                let row = body.split_to(row_bytes);
                let mut filled = 0u32;
                let mut byte_idx = 0usize;
                let mut acc = row[0];
                for _ in 0..w {
                    if filled == 8 {
                        byte_idx += 1;
                        acc = row[byte_idx];
                        filled = 0;
                    }
                    let mask = ((1u16 << bits) - 1) as u8;
                    let idx = (acc >> (8 - filled - bits)) & mask;
                    out.push(*palette.get(usize::from(idx)).ok_or_else(|| {
                        VncError::CodecFormat("TRLE packed palette index out of range".into())
                    })?);
                    filled += bits;
                }
            }
            Ok(out)
        }
        17..=127 | 129 => Err(VncError::CodecFormat(format!("reserved TRLE subencoding {sub}"))),
        SUB_PLAIN_RLE => {
            let mut out = Vec::with_capacity(count);
            while out.len() < count {
                let color = read_cpixel(body, client_pf)?;
                let run = read_run_length(body)? as usize;
                out.extend(std::iter::repeat(color).take(run));
            }
            if out.len() != count {
                return Err(VncError::CodecFormat("TRLE plain RLE overrun".into()));
            }
            Ok(out)
        }
        _ => {
            // 130..=255 palette RLE
            let palette_size = usize::from(sub) - 128;
            let mut palette = Vec::with_capacity(palette_size);
            for _ in 0..palette_size {
                palette.push(read_cpixel(body, client_pf)?);
            }
            let mut out = Vec::with_capacity(count);
            while out.len() < count {
                if body.is_empty() {
                    return Err(VncError::CodecFormat("truncated TRLE palette RLE".into()));
                }
                let b = body.get_u8();
                let idx = usize::from(b & 0x7F);
                let color = *palette
                    .get(idx)
                    .ok_or_else(|| VncError::CodecFormat("TRLE palette RLE index out of range".into()))?;
                if b & 0x80 == 0 {
                    out.push(color);
                } else {
                    let run = read_run_length(body)? as usize;
                    out.extend(std::iter::repeat(color).take(run));
                }
            }
            if out.len() != count {
                return Err(VncError::CodecFormat("TRLE palette RLE overrun".into()));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_tile_round_trips() {
        let mut fb = FrameBuffer::new(64, 64);
        fb.fill(&fb.bounds(), 0x00112233);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode_region(&fb, &region, &pf);
        let pixels = decode_region(&mut body, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn small_palette_tile_round_trips() {
        let mut fb = FrameBuffer::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                fb.set_pixel(x, y, if (x + y) % 2 == 0 { 0xFF0000 } else { 0x00FF00 });
            }
        }
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode_region(&fb, &region, &pf);
        let pixels = decode_region(&mut body, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn noisy_tile_round_trips_across_boundary() {
        let mut fb = FrameBuffer::new(128, 65);
        for y in 0..65 {
            for x in 0..128 {
                fb.set_pixel(x, y, (u32::from(x as u16) * 2654435761u32) ^ u32::from(y as u16));
            }
        }
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode_region(&fb, &region, &pf);
        let pixels = decode_region(&mut body, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn run_length_round_trips_large_runs() {
        let mut buf = BytesMut::new();
        write_run_length(&mut buf, 1);
        write_run_length(&mut buf, 256);
        write_run_length(&mut buf, 512);
        assert_eq!(read_run_length(&mut buf).unwrap(), 1);
        assert_eq!(read_run_length(&mut buf).unwrap(), 256);
        assert_eq!(read_run_length(&mut buf).unwrap(), 512);
    }
}
