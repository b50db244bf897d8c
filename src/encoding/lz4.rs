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

//! LTSM LZ4 pseudo-encoding (`ENCODING_LTSM_LZ4`): the whole rectangle's
//! raw pixel data, in the client's negotiated pixel format, through one
//! LZ4 block per rectangle (no persistent dictionary — LZ4 block mode has
//! none to carry). Framed as `u32 payloadSize` plus that many bytes.

use bytes::{Buf, BufMut, BytesMut};

use super::common::{put_pixel, read_pixel};
use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

/// Encodes `region` of `fb` as an LZ4-compressed rectangle body.
pub fn encode(fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> BytesMut {
    let bytes_per_pixel = usize::from(client_pf.bits_per_pixel / 8).max(1);
    let mut raw = BytesMut::with_capacity(usize::from(region.w) * usize::from(region.h) * bytes_per_pixel);
    for pixel in fb.extract(region) {
        put_pixel(&mut raw, pixel, client_pf);
    }

    let compressed = lz4_flex::compress_prepend_size(&raw);
    let mut out = BytesMut::with_capacity(4 + compressed.len());
    out.put_u32(compressed.len() as u32);
    out.extend_from_slice(&compressed);
    out
}

/// Decodes an LZ4-compressed rectangle body into a `w x h` RGBA32 pixel
/// array.
pub fn decode(body: &mut BytesMut, w: u16, h: u16, client_pf: &PixelFormat) -> Result<Vec<u32>> {
    if body.len() < 4 {
        return Err(VncError::CodecFormat("truncated LZ4 length".into()));
    }
    let len = body.get_u32() as usize;
    if body.len() < len {
        return Err(VncError::CodecFormat("truncated LZ4 payload".into()));
    }
    let compressed = body.split_to(len);
    let raw = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| VncError::CodecFormat(format!("LZ4 decompression failed: {e}")))?;

    let count = usize::from(w) * usize::from(h);
    let mut raw_buf = BytesMut::from(&raw[..]);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_pixel(&mut raw_buf, client_pf)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rgba32() {
        let mut fb = FrameBuffer::new(16, 16);
        fb.fill(&fb.bounds(), 0x112233);
        fb.fill(&Region::new(2, 2, 5, 5), 0x998877);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut body = encode(&fb, &region, &pf);
        let pixels = decode(&mut body, region.w, region.h, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut body = BytesMut::new();
        body.put_u32(100);
        body.extend_from_slice(&[0u8; 4]);
        let pf = PixelFormat::rgba32();
        assert!(decode(&mut body, 4, 4, &pf).is_err());
    }
}
