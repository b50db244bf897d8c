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

//! CoRRE (Compact RRE): like RRE but subrect coordinates are `u8`, so tiles
//! must be at most 255x255. Falls back to RRE if the region is larger.

use bytes::{Buf, BufMut, BytesMut};

use super::common::{find_subrects, get_background_color, put_pixel, read_pixel};
use super::rre;
use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// Encodes `region` of `fb` as CoRRE in `client_pf`. Delegates to plain RRE
/// when the region exceeds CoRRE's `u8` coordinate range (spec.md §4.5).
#[allow(clippy::cast_possible_truncation)]
pub fn encode(fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> BytesMut {
    if region.w > 255 || region.h > 255 {
        return rre::encode(fb, region, client_pf);
    }

    let pixels = fb.extract(region);
    let bg = get_background_color(&pixels);
    let subrects = find_subrects(&pixels, usize::from(region.w), usize::from(region.h), bg);

    let pixel_size = usize::from(client_pf.bits_per_pixel / 8).max(1);
    let mut buf = BytesMut::with_capacity(4 + pixel_size + subrects.len() * (pixel_size + 4));
    buf.put_u32(subrects.len() as u32);
    put_pixel(&mut buf, bg, client_pf);
    for sr in subrects {
        put_pixel(&mut buf, sr.color, client_pf);
        buf.put_u8(sr.x as u8);
        buf.put_u8(sr.y as u8);
        buf.put_u8(sr.w as u8);
        buf.put_u8(sr.h as u8);
    }
    buf
}

/// Decodes a CoRRE rectangle body into a `w x h` RGBA32 pixel array.
pub fn decode(body: &mut BytesMut, w: u16, h: u16, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    if body.len() < 4 {
        return Err(VncError::CodecFormat("truncated CoRRE header".into()));
    }
    let count = body.get_u32();
    let bg = read_pixel(body, client_pf)?;
    let mut out = vec![bg; usize::from(w) * usize::from(h)];

    for _ in 0..count {
        let color = read_pixel(body, client_pf)?;
        if body.len() < 4 {
            return Err(VncError::CodecFormat("truncated CoRRE subrect".into()));
        }
        let x = u16::from(body.get_u8());
        let y = u16::from(body.get_u8());
        let sw = u16::from(body.get_u8());
        let sh = u16::from(body.get_u8());
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
    fn small_region_round_trips() {
        let mut fb = FrameBuffer::new(16, 16);
        fb.fill(&fb.bounds(), 0x112233);
        fb.fill(&Region::new(4, 4, 4, 4), 0x445566);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, 16, 16, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }
}
