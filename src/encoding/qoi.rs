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

//! LTSM QOI pseudo-encoding (`ENCODING_LTSM_QOI`): the rectangle encoded
//! as a self-contained QOI image. Unlike Raw/RRE/TRLE/etc., QOI carries
//! its own fixed RGBA8 pixel layout in the wire format itself, so the
//! client's negotiated `PixelFormat` plays no role in the byte stream —
//! only in how the decoded RGBA8 is converted back to the server's
//! internal framebuffer representation, which is RGBA8 already. Framed as
//! `u32 payloadSize` plus that many bytes, same shape as the other LTSM
//! pseudo-encodings.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

fn rgba_bytes(fb: &FrameBuffer, region: &Region) -> Vec<u8> {
    let pf = PixelFormat::rgba32();
    let mut out = Vec::with_capacity(usize::from(region.w) * usize::from(region.h) * 4);
    for pixel in fb.extract(region) {
        let (r, g, b, a) = pf.unpack(pixel);
        out.extend_from_slice(&[r, g, b, a]);
    }
    out
}

/// Encodes `region` of `fb` as a QOI image, framed with a `u32` length
/// prefix.
pub fn encode(fb: &FrameBuffer, region: &Region) -> Result<BytesMut> {
    let raw = rgba_bytes(fb, region);
    let encoded = ::qoi::encode_to_vec(&raw, u32::from(region.w), u32::from(region.h))
        .map_err(|e| VncError::CodecFormat(format!("QOI encoding failed: {e}")))?;

    let mut out = BytesMut::with_capacity(4 + encoded.len());
    out.put_u32(encoded.len() as u32);
    out.extend_from_slice(&encoded);
    Ok(out)
}

/// Decodes a length-prefixed QOI rectangle body into a `w x h` RGBA32
/// pixel array.
pub fn decode(body: &mut BytesMut, w: u16, h: u16) -> Result<Vec<u32>> {
    if body.len() < 4 {
        return Err(VncError::CodecFormat("truncated QOI length".into()));
    }
    let len = body.get_u32() as usize;
    if body.len() < len {
        return Err(VncError::CodecFormat("truncated QOI payload".into()));
    }
    let payload = body.split_to(len);
    let (header, pixels) = ::qoi::decode_to_vec(&payload)
        .map_err(|e| VncError::CodecFormat(format!("QOI decoding failed: {e}")))?;

    if header.width != u32::from(w) || header.height != u32::from(h) {
        return Err(VncError::CodecFormat("QOI image dimensions mismatch".into()));
    }

    let pf = PixelFormat::rgba32();
    let channels = header.channels.as_u8() as usize;
    let count = usize::from(w) * usize::from(h);
    let mut out = Vec::with_capacity(count);
    for chunk in pixels.chunks(channels) {
        let a = if channels == 4 { chunk[3] } else { 255 };
        out.push(pf.pack(u32::from(chunk[0]), u32::from(chunk[1]), u32::from(chunk[2]), u32::from(a)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_solid_region() {
        let mut fb = FrameBuffer::new(16, 16);
        fb.fill(&fb.bounds(), PixelFormat::rgba32().pack(10, 200, 30, 255));
        let region = fb.bounds();

        let mut body = encode(&fb, &region).unwrap();
        let pixels = decode(&mut body, region.w, region.h).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn round_trips_patterned_region() {
        let mut fb = FrameBuffer::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                fb.set_pixel(x, y, PixelFormat::rgba32().pack(u32::from(x as u8) * 30, u32::from(y as u8) * 30, 0, 255));
            }
        }
        let region = fb.bounds();

        let mut body = encode(&fb, &region).unwrap();
        let pixels = decode(&mut body, region.w, region.h).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }
}
