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

//! Zlib encoding: Raw pixel data for the whole rectangle (no tiling, no
//! subrects), deflated through one zlib stream held for the lifetime of
//! the connection. Framed as `u32 compressedLength` plus that many
//! deflated bytes, same shape as ZRLE's outer framing (spec.md §4.5).

use bytes::{Buf, BufMut, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::common::{put_pixel, read_pixel};
use crate::error::{Result, VncError};
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;

const CHUNK: usize = 65536;

fn compress_persistent(compressor: &mut Compress, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; CHUNK];
    let before_in = compressor.total_in();
    let before_out = compressor.total_out();
    let mut pos = 0usize;

    loop {
        let status = compressor.compress(&input[pos..], &mut chunk, FlushCompress::Sync)?;
        let consumed = (compressor.total_in() - before_in) as usize - pos;
        let produced = (compressor.total_out() - before_out) as usize - out.len();
        out.extend_from_slice(&chunk[..produced]);
        pos += consumed;

        match status {
            Status::StreamEnd => break,
            Status::BufError => {
                return Err(VncError::CodecFormat("zlib compression buffer error".into()))
            }
            Status::Ok => {
                if pos >= input.len() {
                    break;
                }
            }
        }
    }

    Ok(out)
}

fn decompress_persistent(decompressor: &mut Decompress, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; CHUNK];
    let before_in = decompressor.total_in();
    let before_out = decompressor.total_out();
    let mut pos = 0usize;

    loop {
        let status = decompressor.decompress(&input[pos..], &mut chunk, FlushDecompress::Sync)?;
        let consumed = (decompressor.total_in() - before_in) as usize - pos;
        let produced = (decompressor.total_out() - before_out) as usize - out.len();
        out.extend_from_slice(&chunk[..produced]);
        pos += consumed;

        match status {
            Status::StreamEnd => break,
            Status::BufError => {
                return Err(VncError::CodecFormat("zlib decompression buffer error".into()))
            }
            Status::Ok => {
                if pos >= input.len() {
                    break;
                }
            }
        }
    }

    Ok(out)
}

/// A persistent Zlib compression stream, one per connection.
pub struct ZlibEncoder {
    compress: Compress,
}

impl Default for ZlibEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibEncoder {
    /// Creates a fresh compressor with an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            compress: Compress::new(Compression::default(), true),
        }
    }

    /// Encodes `region` of `fb` as a Zlib rectangle body in `client_pf`.
    pub fn encode_region(&mut self, fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> Result<BytesMut> {
        let bytes_per_pixel = usize::from(client_pf.bits_per_pixel / 8).max(1);
        let mut raw = BytesMut::with_capacity(usize::from(region.w) * usize::from(region.h) * bytes_per_pixel);
        for pixel in fb.extract(region) {
            put_pixel(&mut raw, pixel, client_pf);
        }

        let compressed = compress_persistent(&mut self.compress, &raw)?;
        let mut out = BytesMut::with_capacity(4 + compressed.len());
        out.put_u32(compressed.len() as u32);
        out.extend_from_slice(&compressed);
        Ok(out)
    }
}

/// The decoding counterpart of [`ZlibEncoder`], stateful for the same
/// reason [`super::zrle::ZrleDecoder`] is.
pub struct ZlibDecoder {
    decompress: Decompress,
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibDecoder {
    /// Creates a fresh decompressor with an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
        }
    }

    /// Decodes one Zlib rectangle body into `region`-shaped RGBA32 pixels.
    pub fn decode_region(&mut self, body: &mut BytesMut, region: &Region, client_pf: &PixelFormat) -> Result<Vec<u32>> {
        if body.len() < 4 {
            return Err(VncError::CodecFormat("truncated Zlib length".into()));
        }
        let len = body.get_u32() as usize;
        if body.len() < len {
            return Err(VncError::CodecFormat("truncated Zlib payload".into()));
        }
        let compressed = body.split_to(len);
        let raw = decompress_persistent(&mut self.decompress, &compressed)?;
        let mut raw_buf = BytesMut::from(&raw[..]);

        let count = usize::from(region.w) * usize::from(region.h);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_pixel(&mut raw_buf, client_pf)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_matched_stream() {
        let mut fb = FrameBuffer::new(24, 24);
        fb.fill(&fb.bounds(), 0x998877);
        fb.fill(&Region::new(2, 2, 6, 6), 0x334455);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut encoder = ZlibEncoder::new();
        let mut decoder = ZlibDecoder::new();

        let mut body = encoder.encode_region(&fb, &region, &pf).unwrap();
        let pixels = decoder.decode_region(&mut body, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }
}
