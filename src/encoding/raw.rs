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

//! Raw encoding: pixel data sent row by row with no compression, in the
//! client's negotiated pixel byte width and byte order.

use bytes::BytesMut;

use super::common::{put_pixel, read_pixel};
use crate::error::Result;
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// Encodes `region` of `fb` as Raw pixel data in `client_pf`.
#[must_use]
pub fn encode(fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> BytesMut {
    let bytes_per_pixel = usize::from(client_pf.bits_per_pixel / 8).max(1);
    let mut buf = BytesMut::with_capacity(usize::from(region.w) * usize::from(region.h) * bytes_per_pixel);
    for rgba in fb.extract(region) {
        put_pixel(&mut buf, rgba, client_pf);
    }
    buf
}

/// Decodes a Raw-encoded rectangle body back into RGBA32 pixels.
pub fn decode(body: &mut BytesMut, w: u16, h: u16, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    let count = usize::from(w) * usize::from(h);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_pixel(body, client_pf)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rgba32() {
        let mut fb = FrameBuffer::new(2, 2);
        fb.set_pixel(0, 0, PixelFormat::rgba32().pack(255, 0, 0, 255));
        fb.set_pixel(1, 0, PixelFormat::rgba32().pack(0, 255, 0, 255));
        fb.set_pixel(0, 1, PixelFormat::rgba32().pack(0, 0, 255, 255));
        fb.set_pixel(1, 1, PixelFormat::rgba32().pack(255, 255, 255, 255));
        let region = Region::new(0, 0, 2, 2);
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, 2, 2, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn round_trips_rgb565() {
        let mut fb = FrameBuffer::new(1, 1);
        fb.set_pixel(0, 0, PixelFormat::rgba32().pack(255, 0, 0, 255));
        let region = Region::new(0, 0, 1, 1);
        let pf = PixelFormat::rgb565();

        let mut body = encode(&fb, &region, &pf);
        assert_eq!(body.len(), 2);
        let pixels = decode(&mut body, 1, 1, &pf).unwrap();
        let (r, g, b, _) = PixelFormat::rgba32().unpack(pixels[0]);
        assert_eq!((r, g, b), (255, 0, 0));
    }
}
