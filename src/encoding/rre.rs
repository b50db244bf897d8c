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

//! RRE (Rise-and-Run-length Encoding): a background color plus a list of
//! subrectangles with their own colors. Effective for large solid regions.
//! Header: `u32 subrectCount`, `pixel bgColor`; per subrect:
//! `pixel, u16 x, u16 y, u16 w, u16 h`.

use bytes::{Buf, BufMut, BytesMut};

use super::common::{find_subrects, get_background_color, put_pixel, read_pixel};
use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// Encodes `region` of `fb` as RRE in `client_pf`. Falls back to an
/// all-background (zero subrect) body if the subdivision doesn't shrink
/// the payload below a raw encoding of the same region.
#[allow(clippy::cast_possible_truncation)]
pub fn encode(fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> BytesMut {
    let pixels = fb.extract(region);
    let bg = get_background_color(&pixels);
    let subrects = find_subrects(&pixels, usize::from(region.w), usize::from(region.h), bg);

    let pixel_size = usize::from(client_pf.bits_per_pixel / 8).max(1);
    let encoded_size = 4 + pixel_size + subrects.len() * (pixel_size + 8);
    let raw_size = usize::from(region.w) * usize::from(region.h) * pixel_size;
    if encoded_size >= raw_size {
        let mut buf = BytesMut::with_capacity(4 + pixel_size);
        buf.put_u32(0);
        put_pixel(&mut buf, bg, client_pf);
        return buf;
    }

    let mut buf = BytesMut::with_capacity(encoded_size);
    buf.put_u32(subrects.len() as u32);
    put_pixel(&mut buf, bg, client_pf);
    for sr in subrects {
        put_pixel(&mut buf, sr.color, client_pf);
        buf.put_u16(sr.x);
        buf.put_u16(sr.y);
        buf.put_u16(sr.w);
        buf.put_u16(sr.h);
    }
    buf
}

/// Decodes an RRE rectangle body into a `w x h` RGBA32 pixel array.
pub fn decode(body: &mut BytesMut, w: u16, h: u16, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    if body.len() < 4 {
        return Err(VncError::CodecFormat("truncated RRE header".into()));
    }
    let count = body.get_u32();
    let bg = read_pixel(body, client_pf)?;
    let mut out = vec![bg; usize::from(w) * usize::from(h)];

    for _ in 0..count {
        let color = read_pixel(body, client_pf)?;
        if body.len() < 8 {
            return Err(VncError::CodecFormat("truncated RRE subrect".into()));
        }
        let x = body.get_u16();
        let y = body.get_u16();
        let sw = body.get_u16();
        let sh = body.get_u16();
        for dy in 0..sh {
            for dx in 0..sw {
                let px = x + dx;
                let py = y + dy;
                if px < w && py < h {
                    out[usize::from(py) * usize::from(w) + usize::from(px)] = color;
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
    fn solid_region_round_trips() {
        let mut fb = FrameBuffer::new(8, 8);
        fb.fill(&fb.bounds(), PixelFormat::rgba32().pack(10, 20, 30, 255));
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, 8, 8, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn region_with_subrect_round_trips() {
        let mut fb = FrameBuffer::new(10, 10);
        fb.fill(&fb.bounds(), 0xFF0000);
        fb.fill(&Region::new(2, 2, 3, 3), 0x00FF00);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, 10, 10, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }
}
