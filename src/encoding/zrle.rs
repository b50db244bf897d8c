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

//! ZRLE (Zlib Run-Length Encoding): the TRLE tile stream (`super::trle`)
//! deflated through one zlib stream that stays alive for the lifetime of
//! the connection. Each rectangle is framed as `u32 compressedLength` plus
//! that many deflated bytes (spec.md §4.5) — the dictionary is never reset
//! between rectangles, so a `ZrleEncoder`/`ZrleDecoder` pair must be held
//! per-session, not recreated per update.

use bytes::{Buf, BufMut, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::trle;
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

/// A persistent ZRLE compression stream, one per connection.
pub struct ZrleEncoder {
    compress: Compress,
}

impl Default for ZrleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZrleEncoder {
    /// Creates a fresh compressor with an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            compress: Compress::new(Compression::default(), true),
        }
    }

    /// Encodes `region` of `fb` as a ZRLE rectangle body (length-prefixed,
    /// deflated TRLE tile stream), advancing this encoder's dictionary.
    pub fn encode_region(&mut self, fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> Result<BytesMut> {
        let tiles = trle::encode_region(fb, region, client_pf);
        let compressed = compress_persistent(&mut self.compress, &tiles)?;

        let mut out = BytesMut::with_capacity(4 + compressed.len());
        out.put_u32(compressed.len() as u32);
        out.extend_from_slice(&compressed);
        Ok(out)
    }
}

/// The decoding counterpart of [`ZrleEncoder`]. Must be matched to exactly
/// one encoder's byte stream — decoding with a freshly created decoder
/// against anything but the first rectangle of a session will fail, since
/// the zlib dictionary has diverged.
pub struct ZrleDecoder {
    decompress: Decompress,
}

impl Default for ZrleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZrleDecoder {
    /// Creates a fresh decompressor with an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
        }
    }

    /// Decodes one ZRLE rectangle body into `region`-shaped RGBA32 pixels.
    pub fn decode_region(&mut self, body: &mut BytesMut, region: &Region, client_pf: &PixelFormat) -> Result<Vec<u32>> {
        if body.len() < 4 {
            return Err(VncError::CodecFormat("truncated ZRLE length".into()));
        }
        let len = body.get_u32() as usize;
        if body.len() < len {
            return Err(VncError::CodecFormat("truncated ZRLE payload".into()));
        }
        let compressed = body.split_to(len);
        let tiles = decompress_persistent(&mut self.decompress, &compressed)?;
        let mut tile_buf = BytesMut::from(&tiles[..]);
        trle::decode_region(&mut tile_buf, region, client_pf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_matched_stream() {
        let mut fb = FrameBuffer::new(32, 32);
        fb.fill(&fb.bounds(), 0x112233);
        fb.fill(&Region::new(4, 4, 8, 8), 0x445566);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut encoder = ZrleEncoder::new();
        let mut decoder = ZrleDecoder::new();

        let mut body = encoder.encode_region(&fb, &region, &pf).unwrap();
        let pixels = decoder.decode_region(&mut body, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    #[test]
    fn dictionary_persists_across_rectangles() {
        let mut fb = FrameBuffer::new(16, 16);
        fb.fill(&fb.bounds(), 0xAABBCC);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut encoder = ZrleEncoder::new();
        let _first = encoder.encode_region(&fb, &region, &pf).unwrap();
        fb.fill(&Region::new(0, 0, 4, 4), 0x010203);
        let second = encoder.encode_region(&fb, &region, &pf).unwrap();

        // A fresh decoder has no dictionary history and must not be able
        // to decode a rectangle that isn't the first on the stream.
        let mut fresh = ZrleDecoder::new();
        let mut body = second.clone();
        assert!(fresh.decode_region(&mut body, &region, &pf).is_err());

        // The matching, stateful decoder (replaying both rectangles in
        // order) succeeds.
        let mut matched = ZrleDecoder::new();
        let mut first_copy = encoder_replay(&fb, &region, &pf);
        let _ = matched.decode_region(&mut first_copy, &region, &pf).unwrap();
        let mut second_copy = second;
        let pixels = matched.decode_region(&mut second_copy, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }

    // Re-derives the first rectangle's bytes for the matched-decoder half
    // of `dictionary_persists_across_rectangles`, since a `Compress`
    // stream can't be rewound to re-emit earlier output.
    fn encoder_replay(fb_final: &FrameBuffer, region: &Region, pf: &PixelFormat) -> BytesMut {
        let mut fb = FrameBuffer::new(fb_final.width(), fb_final.height());
        fb.fill(&fb.bounds(), 0xAABBCC);
        let mut encoder = ZrleEncoder::new();
        encoder.encode_region(&fb, region, pf).unwrap()
    }
}
