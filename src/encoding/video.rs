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

//! H.264/AV1/VP8 pseudo-encodings (`ENCODING_H264`, `ENCODING_AV1`,
//! `ENCODING_VP8`): protocol-compatibility constants only. No encoder is
//! implemented — see `crate::protocol::ENCODING_H264` for the precedent
//! this follows (mainstream VNC servers dropped video-codec encodings
//! rather than maintain them against ever-changing codec SDKs).
//!
//! `VideoCodec` exists so a future, separately-versioned crate could slot
//! a real encoder in behind this trait without touching the dispatch
//! logic in `encoding/mod.rs`.

use crate::error::Result;
use crate::framebuffer::FrameBuffer;
use crate::protocol::PixelFormat;
use crate::region::Region;
use bytes::BytesMut;

/// A streaming video encoder for one of the `ENCODING_H264`/`AV1`/`VP8`
/// pseudo-encodings. Not implemented by this crate (spec.md §1 Non-goals).
pub trait VideoCodec {
    /// Encodes one frame of `region` from `fb`, producing the encoding's
    /// native bitstream chunk (NAL units, OBUs, ...).
    fn encode_frame(&mut self, fb: &FrameBuffer, region: &Region, client_pf: &PixelFormat) -> Result<BytesMut>;

    /// Forces the next `encode_frame` call to emit a keyframe.
    fn request_keyframe(&mut self);
}
