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

//! VNC Remote Framebuffer (RFB) protocol constants and structures.
//!
//! This module provides the fundamental building blocks for RFB protocol
//! communication: protocol version negotiation, message types, security
//! handshakes, encodings, and pixel format definitions, plus the LTSM
//! extensions layered on top of stock RFB (the in-band channel mux and
//! the extended clipboard).
//!
//! # Protocol Overview
//!
//! The RFB protocol operates in the following phases:
//! 1. **Protocol Version** - Server and client agree on protocol version
//! 2. **Security Handshake** - Authentication method selection and execution
//! 3. **Initialization** - Exchange of framebuffer parameters and capabilities
//! 4. **Normal Operation** - Ongoing message exchange for input events and screen updates

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VncError};

/// The RFB protocol version string advertised by the server.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// RFB 3.3 client version string.
pub const PROTOCOL_VERSION_3_3: &str = "RFB 003.003\n";
/// RFB 3.7 client version string.
pub const PROTOCOL_VERSION_3_7: &str = "RFB 003.007\n";
/// RFB 3.8 client version string.
pub const PROTOCOL_VERSION_3_8: &str = "RFB 003.008\n";

/// The three protocol versions a client may request (spec.md §4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfbVersion {
    /// `RFB 003.003\n` — single `u32` security type, no negotiation.
    V3_3,
    /// `RFB 003.007\n`
    V3_7,
    /// `RFB 003.008\n`
    V3_8,
}

impl RfbVersion {
    /// Parses one of the three accepted 12-byte version strings.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"RFB 003.003\n" => Ok(RfbVersion::V3_3),
            b"RFB 003.007\n" => Ok(RfbVersion::V3_7),
            b"RFB 003.008\n" => Ok(RfbVersion::V3_8),
            other => Err(VncError::HandshakeVersion(other.to_vec())),
        }
    }
}

// Client-to-Server Message Types

/// Message type: Client requests to change the pixel format.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;
/// Message type: Client specifies supported encodings.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;
/// Message type: Client requests a framebuffer update.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
/// Message type: Client sends a keyboard event.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;
/// Message type: Client sends a pointer (mouse) event.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;
/// Message type: Client sends cut text (clipboard data).
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;
/// Message type: Client toggles continuous `FramebufferUpdate` streaming.
pub const CLIENT_MSG_ENABLE_CONTINUOUS_UPDATES: u8 = 150;
/// Message type: Client proposes a new screen layout.
pub const CLIENT_MSG_SET_DESKTOP_SIZE: u8 = 251;
/// Message type: LTSM in-band channel multiplexer datagram.
pub const CLIENT_MSG_LTSM: u8 = 119;

// Server-to-Client Message Types

/// Message type: Server sends a framebuffer update.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;
/// Message type: Server sets colour map entries (unused; true-colour only).
#[allow(dead_code)]
pub const SERVER_MSG_SET_COLOUR_MAP_ENTRIES: u8 = 1;
/// Message type: Server sends a bell (beep) notification.
pub const SERVER_MSG_BELL: u8 = 2;
/// Message type: Server sends cut text (clipboard data).
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// Encoding Types

/// Encoding type: Raw pixel data.
pub const ENCODING_RAW: i32 = 0;
/// Encoding type: Copy Rectangle.
pub const ENCODING_COPYRECT: i32 = 1;
/// Encoding type: Rise-and-Run-length Encoding.
pub const ENCODING_RRE: i32 = 2;
/// Encoding type: Compact RRE.
pub const ENCODING_CORRE: i32 = 4;
/// Encoding type: Hextile.
pub const ENCODING_HEXTILE: i32 = 5;
/// Encoding type: Zlib compressed raw pixels.
pub const ENCODING_ZLIB: i32 = 6;
/// Encoding type: Tile Run-Length Encoding.
pub const ENCODING_TRLE: i32 = 15;
/// Encoding type: Zlib-wrapped TRLE.
pub const ENCODING_ZRLE: i32 = 16;

/// Encoding type: H.264 video. Defined for protocol compatibility only —
/// see SPEC_FULL.md; no in-crate encoder is registered for it.
#[allow(dead_code)]
pub const ENCODING_H264: i32 = 0x4832_3634;
/// Encoding type: AV1 video (see `ENCODING_H264`).
#[allow(dead_code)]
pub const ENCODING_AV1: i32 = 0x4156_3031;
/// Encoding type: VP8 video (see `ENCODING_H264`).
#[allow(dead_code)]
pub const ENCODING_VP8: i32 = 0x5650_3038;

/// LTSM pseudo-encoding: payload is `u32 rawSize, u32 payloadSize, bytes` of
/// LZ4-compressed raw pixels (spec.md §1, §4.5).
pub const ENCODING_LTSM_LZ4: i32 = -0x4C54_534C;
/// LTSM pseudo-encoding: QOI-compressed region.
pub const ENCODING_LTSM_QOI: i32 = -0x4C54_5351;
/// LTSM pseudo-encoding: JPEG-compressed region ("TJPG").
pub const ENCODING_LTSM_TJPG: i32 = -0x4C54_534A;

/// Pseudo-encoding: Rich Cursor.
pub const ENCODING_CURSOR: i32 = -239;
/// Pseudo-encoding: LastRect — terminates the rectangle list early.
pub const ENCODING_LAST_RECT: i32 = -224;
/// Pseudo-encoding: Desktop Size.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;
/// Pseudo-encoding: server↔client `ContinuousUpdates` capability.
pub const ENCODING_CONTINUOUS_UPDATES: i32 = -313;
/// Pseudo-encoding: `ExtendedDesktopSize` (resize negotiation / notification).
pub const ENCODING_EXTENDED_DESKTOP_SIZE: i32 = -308;
/// Pseudo-encoding: Extended Clipboard capability announcement.
pub const ENCODING_EXT_CLIPBOARD: i32 = -1100;
/// Pseudo-encoding: the in-band LTSM channel multiplexer ("LTSM" ASCII).
pub const ENCODING_LTSM: i32 = 0x4C54_534D;

/// Pseudo-encoding: JPEG Quality Level 0 (lowest quality, highest compression).
pub const ENCODING_QUALITY_LEVEL_0: i32 = -32;
/// Pseudo-encoding: JPEG Quality Level 9 (highest quality, lowest compression).
pub const ENCODING_QUALITY_LEVEL_9: i32 = -23;
/// Pseudo-encoding: Compression Level 0 (no compression, fastest).
pub const ENCODING_COMPRESS_LEVEL_0: i32 = -256;
/// Pseudo-encoding: Compression Level 9 (maximum compression, slowest).
pub const ENCODING_COMPRESS_LEVEL_9: i32 = -247;

/// Quality-level → libjpeg-turbo-equivalent JPEG quality table (0..=9).
pub const TIGHT2TURBO_QUAL: [u8; 10] = [15, 29, 41, 42, 62, 77, 79, 86, 92, 100];

// Hextile subencoding flags

/// Hextile: Raw pixel data for this tile.
pub const HEXTILE_RAW: u8 = 1 << 0;
/// Hextile: Background color is specified.
pub const HEXTILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;
/// Hextile: Foreground color is specified.
pub const HEXTILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;
/// Hextile: Tile contains subrectangles.
pub const HEXTILE_ANY_SUBRECTS: u8 = 1 << 3;
/// Hextile: Subrectangles are colored (not monochrome).
pub const HEXTILE_SUBRECTS_COLOURED: u8 = 1 << 4;
/// Hextile: tile body is zlib-compressed raw pixels.
pub const HEXTILE_ZLIB_RAW: u8 = 1 << 5;
/// Hextile: tile body is zlib-compressed.
pub const HEXTILE_ZLIB: u8 = 1 << 6;

// Security Types

/// Security type: Invalid/Unknown.
#[allow(dead_code)]
pub const SECURITY_TYPE_INVALID: u8 = 0;
/// Security type: None (no authentication).
pub const SECURITY_TYPE_NONE: u8 = 1;
/// Security type: VNC Authentication (DES challenge-response).
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;
/// Security type: VeNCrypt (TLS/X509 inner tunnel).
pub const SECURITY_TYPE_VENCRYPT: u8 = 19;
/// Security type: GSSAPI (Kerberos).
pub const SECURITY_TYPE_GSSAPI: u8 = 77;

// Security Results

/// Security result: Authentication successful.
pub const SECURITY_RESULT_OK: u32 = 0;
/// Security result: Authentication failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// Represents the pixel format of a `FrameBuffer` and of an RFB peer.
///
/// Extends the 16-byte RFB wire record (spec.md §4.4.3) with an alpha
/// channel (`amax`, `ashift`) that never appears on the wire but is
/// needed internally so `convert` can round-trip a 32-bit RGBA
/// `FrameSource` losslessly (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel (8, 16, 24, or 32).
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// `true` if pixel data is big-endian.
    pub big_endian: bool,
    /// `true` if the pixel format is true-colour (not colormapped).
    pub true_colour: bool,
    /// Maximum red color value.
    pub red_max: u16,
    /// Maximum green color value.
    pub green_max: u16,
    /// Maximum blue color value.
    pub blue_max: u16,
    /// Maximum alpha value (0 if the format carries no alpha).
    pub alpha_max: u16,
    /// Bit shift to apply to get the red component.
    pub red_shift: u8,
    /// Bit shift to apply to get the green component.
    pub green_shift: u8,
    /// Bit shift to apply to get the blue component.
    pub blue_shift: u8,
    /// Bit shift to apply to get the alpha component.
    pub alpha_shift: u8,
}

impl PixelFormat {
    /// Creates a standard 32-bit RGBA pixel format (server-internal default).
    #[must_use]
    pub fn rgba32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            alpha_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
            alpha_shift: 24,
        }
    }

    /// 16-bit RGB565 (5/6/5 bits, no alpha).
    #[must_use]
    pub fn rgb565() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_colour: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            alpha_max: 0,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
            alpha_shift: 0,
        }
    }

    /// 16-bit RGB555 (5/5/5 bits, no alpha).
    #[must_use]
    pub fn rgb555() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 15,
            big_endian: false,
            true_colour: true,
            red_max: 31,
            green_max: 31,
            blue_max: 31,
            alpha_max: 0,
            red_shift: 10,
            green_shift: 5,
            blue_shift: 0,
            alpha_shift: 0,
        }
    }

    /// 8-bit BGR233 (3/3/2 bits, no alpha).
    #[must_use]
    pub fn bgr233() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_colour: true,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            alpha_max: 0,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
            alpha_shift: 0,
        }
    }

    /// Validates bits-per-pixel, depth, and that channel masks fit.
    ///
    /// Mirrors spec.md §3's invariant: `max > 0` and `(max << shift)` fits
    /// in `bpp` for every channel.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if !matches!(self.bits_per_pixel, 8 | 16 | 24 | 32) {
            return false;
        }
        if self.depth == 0 || self.depth > 32 {
            return false;
        }
        if !self.true_colour && self.bits_per_pixel != 8 {
            return false;
        }
        if self.true_colour {
            for &(max, shift) in &[
                (self.red_max, self.red_shift),
                (self.green_max, self.green_shift),
                (self.blue_max, self.blue_shift),
                (self.alpha_max, self.alpha_shift),
            ] {
                if max == 0 {
                    continue;
                }
                let top_bit = 16 - max.leading_zeros();
                if shift as u32 + top_bit > u32::from(self.bits_per_pixel) {
                    return false;
                }
            }
        }
        true
    }

    /// `true` if this format is compatible with `rgba32` (no translation needed).
    #[must_use]
    pub fn is_compatible_with_rgba32(&self) -> bool {
        *self == Self::rgba32()
    }

    /// Packs an `(r, g, b, a)` tuple (each already scaled to this format's
    /// channel ranges) into a raw pixel value.
    #[must_use]
    pub fn pack(&self, r: u32, g: u32, b: u32, a: u32) -> u32 {
        (r << self.red_shift) | (g << self.green_shift) | (b << self.blue_shift) | (a << self.alpha_shift)
    }

    /// Unpacks a raw pixel value into `(r, g, b, a)` channel values in this
    /// format's own ranges (i.e. each component is `0..=max`).
    #[must_use]
    pub fn unpack(&self, pixel: u32) -> (u32, u32, u32, u32) {
        let r = (pixel >> self.red_shift) & u32::from(self.red_max);
        let g = (pixel >> self.green_shift) & u32::from(self.green_max);
        let b = (pixel >> self.blue_shift) & u32::from(self.blue_max);
        let a = if self.alpha_max == 0 {
            0
        } else {
            (pixel >> self.alpha_shift) & u32::from(self.alpha_max)
        };
        (r, g, b, a)
    }

    /// Converts a pixel from `src`'s format to `dst`'s format, rescaling
    /// each channel by integer multiply-divide (spec.md §4.2): `c' = (c *
    /// dst.max + src.max/2) / src.max`.
    #[must_use]
    pub fn convert(pixel: u32, src: &PixelFormat, dst: &PixelFormat) -> u32 {
        let (r, g, b, a) = src.unpack(pixel);
        let rescale = |c: u32, src_max: u16, dst_max: u16| -> u32 {
            if src_max == 0 || dst_max == 0 {
                return 0;
            }
            (c * u32::from(dst_max) + u32::from(src_max) / 2) / u32::from(src_max)
        };
        let r = rescale(r, src.red_max, dst.red_max);
        let g = rescale(g, src.green_max, dst.green_max);
        let b = rescale(b, src.blue_max, dst.blue_max);
        let a = rescale(a, src.alpha_max, dst.alpha_max);
        dst.pack(r, g, b, a)
    }

    /// Writes the 16-byte RFB wire record (alpha is never serialized).
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(u8::from(self.big_endian));
        buf.put_u8(u8::from(self.true_colour));
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Reads the 16-byte RFB wire record. Alpha fields are left at zero —
    /// the wire carries no alpha channel.
    pub fn from_bytes(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 16 {
            return Err(VncError::Format("truncated PixelFormat".into()));
        }
        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian: buf.get_u8() != 0,
            true_colour: buf.get_u8() != 0,
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            alpha_max: 0,
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
            alpha_shift: 0,
        };
        buf.advance(3);
        Ok(pf)
    }
}

/// The `ServerInit` message sent once, right after security negotiation.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Framebuffer width in pixels.
    pub framebuffer_width: u16,
    /// Framebuffer height in pixels.
    pub framebuffer_height: u16,
    /// The server's native pixel format.
    pub pixel_format: PixelFormat,
    /// Desktop name, sent as length-prefixed UTF-8.
    pub name: String,
}

impl ServerInit {
    /// Serializes `ServerInit` per spec.md §4.4.3.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);
        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// One screen in a `SetDesktopSize` layout proposal (spec.md §4.4.4).
#[derive(Debug, Clone, Copy)]
pub struct ScreenInfo {
    /// Screen identifier.
    pub id: u32,
    /// X offset within the virtual desktop.
    pub x: u16,
    /// Y offset within the virtual desktop.
    pub y: u16,
    /// Screen width.
    pub w: u16,
    /// Screen height.
    pub h: u16,
    /// Screen flags (opaque to this layer).
    pub flags: u32,
}

/// Status codes the server replies with in an `ExtendedDesktopSize` rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopSizeStatus {
    /// The resize succeeded.
    Ok = 0,
    /// The resize request was administratively prohibited.
    Prohibited = 1,
    /// The requested layout is invalid.
    InvalidLayout = 2,
    /// The requested screen id does not exist.
    NoSuchScreen = 3,
}

/// All client-to-server message bodies, once fully parsed.
#[derive(Debug)]
pub enum ClientMessage {
    /// Client requests a specific pixel format for framebuffer updates.
    SetPixelFormat(PixelFormat),
    /// Client specifies the ordered list of encodings it supports.
    SetEncodings(Vec<i32>),
    /// Client requests a framebuffer update for a specific region.
    FramebufferUpdateRequest {
        /// If true, only send changes since the last update.
        incremental: bool,
        /// X coordinate of the requested region.
        x: u16,
        /// Y coordinate of the requested region.
        y: u16,
        /// Width of the requested region.
        width: u16,
        /// Height of the requested region.
        height: u16,
    },
    /// Client sends a keyboard key event.
    KeyEvent {
        /// `true` if pressed, `false` if released.
        down: bool,
        /// X Window System keysym.
        key: u32,
    },
    /// Client sends a pointer (mouse) event.
    PointerEvent {
        /// Bitmask of currently pressed mouse buttons.
        button_mask: u8,
        /// X coordinate of the pointer.
        x: u16,
        /// Y coordinate of the pointer.
        y: u16,
    },
    /// Plain-text clipboard paste (non-negative length field).
    ClientCutText(String),
    /// Extended-clipboard frame (negative length field; spec.md §4.7).
    ExtClipboard(Vec<u8>),
    /// Client toggles continuous `FramebufferUpdate` streaming.
    EnableContinuousUpdates {
        /// `true` to enable, `false` to disable.
        enable: bool,
        /// Initial streaming region.
        x: u16,
        /// Initial streaming region.
        y: u16,
        /// Initial streaming region.
        width: u16,
        /// Initial streaming region.
        height: u16,
    },
    /// Client proposes a new screen layout.
    SetDesktopSize {
        /// Requested virtual desktop width.
        width: u16,
        /// Requested virtual desktop height.
        height: u16,
        /// Per-screen layout entries.
        screens: Vec<ScreenInfo>,
    },
    /// An LTSM channel-mux datagram (message type 119).
    Ltsm {
        /// Target channel id (0 = system/JSON control channel).
        channel: u8,
        /// Channel-level flags.
        flags: u16,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },
}

/// A rectangle header in a `FramebufferUpdate` message.
#[derive(Debug, Clone, Copy)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the rectangle in pixels.
    pub width: u16,
    /// Height of the rectangle in pixels.
    pub height: u16,
    /// The encoding used for this rectangle's body (may be a pseudo-encoding).
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the 12-byte rectangle header (spec.md §4.4.5).
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }

    /// Reads a 12-byte rectangle header.
    pub fn read_header(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 12 {
            return Err(VncError::Format("truncated rectangle header".into()));
        }
        Ok(Self {
            x: buf.get_u16(),
            y: buf.get_u16(),
            width: buf.get_u16(),
            height: buf.get_u16(),
            encoding: buf.get_i32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_round_trip_rgba32_to_rgb565() {
        let src = PixelFormat::rgba32();
        let dst = PixelFormat::rgb565();
        // pure red in rgba32 (alpha irrelevant to rgb565, which has none)
        let red = src.pack(255, 0, 0, 255);
        let converted = PixelFormat::convert(red, &src, &dst);
        let back = PixelFormat::convert(converted, &dst, &src);
        let (r, g, b, _) = src.unpack(back);
        // 8-bit -> 5-bit -> 8-bit is lossy; within one quantization step
        assert!(r >= 247);
        assert_eq!(g, 0);
        assert_eq!(b, 0);
    }

    #[test]
    fn pixel_format_write_read_round_trip() {
        let pf = PixelFormat::rgb565();
        let mut buf = BytesMut::new();
        pf.write_to(&mut buf);
        assert_eq!(buf.len(), 16);
        let back = PixelFormat::from_bytes(&mut buf).unwrap();
        assert_eq!(pf.bits_per_pixel, back.bits_per_pixel);
        assert_eq!(pf.red_max, back.red_max);
        assert_eq!(pf.red_shift, back.red_shift);
    }

    #[test]
    fn rejects_unknown_version() {
        assert!(RfbVersion::parse(b"RFB 004.000\n").is_err());
        assert_eq!(RfbVersion::parse(b"RFB 003.008\n").unwrap(), RfbVersion::V3_8);
    }

    #[test]
    fn is_valid_rejects_overflowing_masks() {
        let mut pf = PixelFormat::rgb565();
        pf.red_shift = 12; // 5 bits at shift 12 overflows 16bpp
        assert!(!pf.is_valid());
    }
}
