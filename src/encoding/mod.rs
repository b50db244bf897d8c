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

//! Region codecs for framebuffer updates: Raw, RRE, CoRRE, Hextile, TRLE,
//! ZRLE, Zlib, and the LTSM pseudo-encodings (LZ4, QOI, Turbo-JPEG).
//! `select_encoding` implements the server's preference order (spec.md
//! §4.4.6) over whatever the client advertised via `SetEncodings`.

use bytes::BytesMut;

use crate::error::Result;
use crate::framebuffer::FrameBuffer;
use crate::protocol::{
    PixelFormat, ENCODING_CORRE, ENCODING_HEXTILE, ENCODING_LTSM_LZ4, ENCODING_LTSM_QOI,
    ENCODING_LTSM_TJPG, ENCODING_RAW, ENCODING_RRE, ENCODING_TRLE, ENCODING_ZRLE,
};
use crate::region::Region;

pub mod common;
pub mod corre;
pub mod hextile;
pub mod jpeg;
pub mod lz4;
pub mod qoi;
pub mod raw;
pub mod rre;
pub mod trle;
pub mod video;
pub mod zlib;
pub mod zrle;

/// The server's preference order for picking an encoding out of the
/// client's advertised set, most to least preferred (spec.md §4.4.6).
/// `ENCODING_H264`/`AV1`/`VP8` are deliberately absent: no encoder exists
/// (see `video.rs`), so they are never selected even if a client lists
/// them.
pub const ENCODING_PREFERENCE: &[i32] = &[
    ENCODING_LTSM_QOI,
    ENCODING_LTSM_LZ4,
    ENCODING_LTSM_TJPG,
    ENCODING_ZRLE,
    ENCODING_TRLE,
    ENCODING_HEXTILE,
    ENCODING_CORRE,
    ENCODING_RRE,
    ENCODING_RAW,
];

/// Picks the best encoding this crate can produce out of a client's
/// advertised `SetEncodings` list, falling back to Raw (always valid)
/// when the client listed nothing this crate supports.
#[must_use]
pub fn select_encoding(client_encodings: &[i32]) -> i32 {
    for candidate in ENCODING_PREFERENCE {
        if client_encodings.contains(candidate) {
            return *candidate;
        }
    }
    ENCODING_RAW
}

/// A stateful handle to one negotiated region codec for one connection.
///
/// Most encodings are pure functions of the framebuffer region and the
/// client's pixel format (`Raw`, `RRE`, `CoRRE`, `Hextile`, `TRLE`, the
/// LTSM pseudo-encodings); `Zlib` and `ZRLE` additionally carry a
/// persistent zlib stream that must survive across calls for the
/// lifetime of the connection (spec.md §4.5), so this is an enum over
/// owned encoder/decoder state rather than a stateless dispatch table.
pub enum Codec {
    /// Raw pixel data, no compression.
    Raw,
    /// Rise-and-run-length encoding.
    Rre,
    /// Compact RRE (u8 subrect coordinates).
    CoRre,
    /// 16x16 tiled background/foreground/subrect encoding.
    Hextile,
    /// Unwrapped 64x64 tile stream (TRLE).
    Trle,
    /// TRLE wrapped in a persistent zlib stream.
    Zrle(Box<zrle::ZrleEncoder>, Box<zrle::ZrleDecoder>),
    /// Whole-region raw pixels through a persistent zlib stream.
    Zlib(Box<zlib::ZlibEncoder>, Box<zlib::ZlibDecoder>),
    /// LTSM LZ4 block compression pseudo-encoding.
    Lz4,
    /// LTSM QOI image pseudo-encoding.
    Qoi,
    /// LTSM Turbo-JPEG pseudo-encoding (encode-only; `quality` 0..=100).
    Jpeg {
        /// JPEG quality level, 0-100.
        quality: u8,
    },
}

impl Codec {
    /// Builds the codec handle for a negotiated RFB encoding constant.
    /// Returns `None` for anything not in `ENCODING_PREFERENCE` (the
    /// caller should have already run the value through
    /// [`select_encoding`]).
    #[must_use]
    pub fn for_encoding(encoding: i32) -> Option<Self> {
        match encoding {
            ENCODING_RAW => Some(Codec::Raw),
            ENCODING_RRE => Some(Codec::Rre),
            ENCODING_CORRE => Some(Codec::CoRre),
            ENCODING_HEXTILE => Some(Codec::Hextile),
            ENCODING_TRLE => Some(Codec::Trle),
            ENCODING_ZRLE => Some(Codec::Zrle(
                Box::new(zrle::ZrleEncoder::new()),
                Box::new(zrle::ZrleDecoder::new()),
            )),
            ENCODING_LTSM_LZ4 => Some(Codec::Lz4),
            ENCODING_LTSM_QOI => Some(Codec::Qoi),
            ENCODING_LTSM_TJPG => Some(Codec::Jpeg { quality: 75 }),
            _ => None,
        }
    }

    /// Builds a (non-RFB-pseudo-encoding) `Zlib` codec handle explicitly;
    /// `ENCODING_ZLIB` is a plain numeric encoding but isn't in the
    /// client preference table since ZRLE dominates it in practice.
    #[must_use]
    pub fn zlib() -> Self {
        Codec::Zlib(Box::new(zlib::ZlibEncoder::new()), Box::new(zlib::ZlibDecoder::new()))
    }

    /// Sets the JPEG quality level (0-100); a no-op for every other codec.
    pub fn set_quality(&mut self, quality: u8) {
        if let Codec::Jpeg { quality: q } = self {
            *q = quality;
        }
    }

    /// Encodes `region` of `fb` for `client_pf`.
    pub fn encode(&mut self, fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> Result<BytesMut> {
        Ok(match self {
            Codec::Raw => raw::encode(fb, region, client_pf),
            Codec::Rre => rre::encode(fb, region, client_pf),
            Codec::CoRre => corre::encode(fb, region, client_pf),
            Codec::Hextile => hextile::encode(fb, region, client_pf),
            Codec::Trle => trle::encode_region(fb, region, client_pf),
            Codec::Zrle(enc, _) => enc.encode_region(fb, region, client_pf)?,
            Codec::Zlib(enc, _) => enc.encode_region(fb, region, client_pf)?,
            Codec::Lz4 => lz4::encode(fb, region, client_pf),
            Codec::Qoi => qoi::encode(fb, region)?,
            Codec::Jpeg { quality } => jpeg::encode(fb, region, *quality)?,
        })
    }

    /// Decodes a rectangle body encoded by the matching `Codec` instance.
    pub fn decode(&mut self, body: &mut BytesMut, region: &Region, client_pf: &PixelFormat) -> Result<Vec<u32>> {
        match self {
            Codec::Raw => raw::decode(body, region.w, region.h, client_pf),
            Codec::Rre => rre::decode(body, region.w, region.h, client_pf),
            Codec::CoRre => corre::decode(body, region.w, region.h, client_pf),
            Codec::Hextile => hextile::decode(body, region.w, region.h, client_pf),
            Codec::Trle => trle::decode_region(body, region, client_pf),
            Codec::Zrle(_, dec) => dec.decode_region(body, region, client_pf),
            Codec::Zlib(_, dec) => dec.decode_region(body, region, client_pf),
            Codec::Lz4 => lz4::decode(body, region.w, region.h, client_pf),
            Codec::Qoi => qoi::decode(body, region.w, region.h),
            Codec::Jpeg { .. } => Err(crate::error::VncError::CodecFormat(
                "JPEG rectangles are not decoded by this crate".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_most_preferred_advertised_encoding() {
        let client = vec![ENCODING_RAW, ENCODING_HEXTILE, ENCODING_ZRLE];
        assert_eq!(select_encoding(&client), ENCODING_ZRLE);
    }

    #[test]
    fn falls_back_to_raw_when_nothing_recognized() {
        let client = vec![12345, -9999];
        assert_eq!(select_encoding(&client), ENCODING_RAW);
    }

    #[test]
    fn codec_round_trips_through_trait_dispatch() {
        let mut fb = FrameBuffer::new(16, 16);
        fb.fill(&fb.bounds(), 0x112233);
        let region = fb.bounds();
        let pf = PixelFormat::rgba32();

        let mut codec = Codec::for_encoding(ENCODING_HEXTILE).unwrap();
        let mut body = codec.encode(&fb, &region, &pf).unwrap();
        let pixels = codec.decode(&mut body, &region, &pf).unwrap();
        assert_eq!(pixels, fb.extract(&region));
    }
}
