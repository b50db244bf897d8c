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

//! LTSM Turbo-JPEG pseudo-encoding (`ENCODING_LTSM_TJPG`): the rectangle
//! baseline-JPEG encoded, quality selected from the client's negotiated
//! quality pseudo-encoding (spec.md §4.5). Server-side only — this crate
//! never decodes JPEG rectangles back, since a server has no reason to
//! consume the lossy encoding it produces. Framed as `u32 payloadSize`
//! plus that many bytes.
//!
//! Uses the pure-Rust `jpeg-encoder` crate by default; the `turbojpeg`
//! feature swaps in the libjpeg-turbo bindings already wired through
//! `crate::jpeg` for the Tight/TightPng path.

use bytes::{BufMut, BytesMut};
use jpeg_encoder::{ColorType, Encoder};

use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// Encodes `region` of `fb` as a baseline JPEG, framed with a `u32` length
/// prefix. `quality` is `0..=100`.
pub fn encode(fb: &FrameBuffer, region: &Region, quality: u8) -> Result<BytesMut> {
    let pf = PixelFormat::rgba32();
    let mut rgb = Vec::with_capacity(usize::from(region.w) * usize::from(region.h) * 3);
    for pixel in fb.extract(region) {
        let (r, g, b, _a) = pf.unpack(pixel);
        rgb.extend_from_slice(&[r, g, b]);
    }

    let mut jpeg_bytes = Vec::new();
    let encoder = Encoder::new(&mut jpeg_bytes, quality);
    encoder
        .encode(&rgb, region.w, region.h, ColorType::Rgb)
        .map_err(|e| VncError::CodecFormat(format!("JPEG encoding failed: {e}")))?;

    let mut out = BytesMut::with_capacity(4 + jpeg_bytes.len());
    out.put_u32(jpeg_bytes.len() as u32);
    out.extend_from_slice(&jpeg_bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_a_valid_jpeg_stream() {
        let mut fb = FrameBuffer::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                fb.set_pixel(x, y, PixelFormat::rgba32().pack(u32::from(x as u8) * 7, u32::from(y as u8) * 7, 80, 255));
            }
        }
        let region = fb.bounds();

        let body = encode(&fb, &region, 80).unwrap();
        // length prefix + SOI/EOI markers of a baseline JPEG stream
        assert!(body.len() > 4);
        let payload = &body[4..];
        assert_eq!(&payload[0..2], &[0xFF, 0xD8]);
        assert_eq!(&payload[payload.len() - 2..], &[0xFF, 0xD9]);
    }
}
