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

//! Extended clipboard sub-protocol (spec.md §4.7), carried inside
//! `ClientCutText`/`ServerCutText` frames with a negative length field.
//! The first 4 bytes of the payload are a big-endian flags word: the top
//! byte names the operation (`Caps`/`Request`/`Peek`/`Notify`/`Provide`),
//! the low 16 bits are a type bitmask.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Result, VncError};

/// Plain text clipboard content.
pub const TYPE_TEXT: u16 = 1 << 0;
/// Rich Text Format content.
pub const TYPE_RTF: u16 = 1 << 1;
/// HTML content.
pub const TYPE_HTML: u16 = 1 << 2;
/// Device-independent bitmap (image) content.
pub const TYPE_DIB: u16 = 1 << 3;
/// A list of file paths.
pub const TYPE_FILES: u16 = 1 << 4;

const TYPE_MASK: u32 = 0xFFFF;
const ALL_TYPES_THIS_CRATE_SENDS: u16 = TYPE_TEXT | TYPE_RTF | TYPE_HTML | TYPE_DIB | TYPE_FILES;

const OP_CAPS: u32 = 1 << 24;
const OP_REQUEST: u32 = 1 << 25;
const OP_PEEK: u32 = 1 << 26;
const OP_NOTIFY: u32 = 1 << 27;
const OP_PROVIDE: u32 = 1 << 28;
const OP_MASK: u32 = OP_REQUEST | OP_PEEK | OP_NOTIFY | OP_PROVIDE;

/// Per-type maximum unsolicited payload sizes advertised in a `Caps` message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeSizes {
    /// Max size for `TYPE_TEXT`.
    pub text: u32,
    /// Max size for `TYPE_RTF`.
    pub rtf: u32,
    /// Max size for `TYPE_HTML`.
    pub html: u32,
    /// Max size for `TYPE_DIB`.
    pub dib: u32,
    /// Max size for `TYPE_FILES`.
    pub files: u32,
}

/// One parsed extended-clipboard frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtClipMessage {
    /// Capability advertisement: the peer's supported type/op bits and
    /// the maximum unsolicited size it declares per supported type.
    Caps { flags: u32, sizes: TypeSizes },
    /// The peer is requesting clipboard data for `types`.
    Request { types: u16 },
    /// The peer wants a `Notify` of currently-available formats.
    Peek,
    /// The peer announces which formats are currently available.
    Notify { types: u16 },
    /// The peer is providing clipboard data: one `(type, bytes)` pair per
    /// bit that was outstanding from an earlier `Request`.
    Provide(Vec<(u16, Vec<u8>)>),
}

/// Tracks the two-sided capability/request state one `ExtClip` endpoint
/// needs across messages (spec.md §4.7), mirroring the teacher's LTSM
/// protocol counterpart: the caller still drives the actual selection
/// source (clipboard, X11 selection, ...) via spec.md §4.8's
/// `ClipboardEndpoint` trait.
pub struct ExtClipboard {
    local_flags: u32,
    local_sizes: TypeSizes,
    remote_flags: u32,
    pending_provide_types: u16,
}

impl ExtClipboard {
    /// Builds a fresh endpoint advertising `local_flags`/`local_sizes`
    /// (the op bits this side supports plus its max unsolicited sizes).
    #[must_use]
    pub fn new(local_flags: u32, local_sizes: TypeSizes) -> Self {
        Self { local_flags, local_sizes, remote_flags: 0, pending_provide_types: 0 }
    }

    /// The peer's most recently announced capability/request flags.
    #[must_use]
    pub fn remote_flags(&self) -> u32 {
        self.remote_flags
    }

    /// Builds this side's `Caps` frame.
    #[must_use]
    pub fn encode_caps(&self) -> Vec<u8> {
        let allow_types = u32::from(ALL_TYPES_THIS_CRATE_SENDS) & self.local_flags & TYPE_MASK;
        let allow_ops = self.local_flags & OP_MASK;
        let allow = allow_types | allow_ops;

        let mut buf = BytesMut::new();
        buf.put_u32(OP_CAPS | allow);
        if allow & u32::from(TYPE_TEXT) != 0 {
            buf.put_u32(self.local_sizes.text);
        }
        if allow & u32::from(TYPE_RTF) != 0 {
            buf.put_u32(self.local_sizes.rtf);
        }
        if allow & u32::from(TYPE_HTML) != 0 {
            buf.put_u32(self.local_sizes.html);
        }
        if allow & u32::from(TYPE_DIB) != 0 {
            buf.put_u32(self.local_sizes.dib);
        }
        if allow & u32::from(TYPE_FILES) != 0 {
            buf.put_u32(self.local_sizes.files);
        }
        buf.to_vec()
    }

    /// Builds a `Request` frame asking the peer to `Provide` `types`,
    /// restricted to types the peer's last `Caps` allowed.
    pub fn encode_request(&mut self, types: u16) -> Vec<u8> {
        let allow = self.remote_flags as u16 & types;
        self.pending_provide_types |= allow;
        let mut buf = BytesMut::new();
        buf.put_u32(OP_REQUEST | u32::from(allow));
        buf.to_vec()
    }

    /// Builds a `Peek` frame.
    #[must_use]
    pub fn encode_peek() -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(OP_PEEK);
        buf.to_vec()
    }

    /// Builds a `Notify` frame announcing `types` are available locally.
    #[must_use]
    pub fn encode_notify(&self, types: u16) -> Vec<u8> {
        let allow = self.remote_flags as u16 & types;
        let mut buf = BytesMut::new();
        buf.put_u32(OP_NOTIFY | u32::from(allow));
        buf.to_vec()
    }

    /// Builds a `Provide` frame: `data` supplies the bytes for each type
    /// bit set in `types`, in ascending bit order, zlib-compressed as one
    /// stream (a fresh stream per message, not persisted across calls).
    pub fn encode_provide(types: u16, mut data: impl FnMut(u16) -> Vec<u8>) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        for bit in mask_unpack_bits(types) {
            let payload = data(bit);
            let mut header = [0u8; 4];
            header.copy_from_slice(&(payload.len() as u32).to_be_bytes());
            encoder
                .write_all(&header)
                .and_then(|()| encoder.write_all(&payload))
                .map_err(|e| VncError::Format(format!("extended clipboard deflate failed: {e}")))?;
        }
        let zipped = encoder
            .finish()
            .map_err(|e| VncError::Format(format!("extended clipboard deflate flush failed: {e}")))?;

        let mut buf = BytesMut::with_capacity(4 + zipped.len());
        buf.put_u32(zipped.len() as u32);
        buf.extend_from_slice(&zipped);
        Ok(buf.to_vec())
    }

    /// Parses one extended-clipboard payload (the bytes carried inside
    /// the negative-length `CutText` frame, flags word included).
    pub fn recv(&mut self, payload: &[u8]) -> Result<ExtClipMessage> {
        if payload.len() < 4 {
            return Err(VncError::Format("extended clipboard frame too short".into()));
        }
        let mut buf = BytesMut::from(payload);
        let flags = buf.get_u32();

        if flags & OP_CAPS != 0 {
            let types_count = (flags & TYPE_MASK).count_ones() as usize;
            if types_count * 4 > buf.len() {
                return Err(VncError::Format("extended clipboard caps: truncated sizes".into()));
            }
            let mut sizes = TypeSizes::default();
            if flags & u32::from(TYPE_TEXT) != 0 {
                sizes.text = buf.get_u32();
            }
            if flags & u32::from(TYPE_RTF) != 0 {
                sizes.rtf = buf.get_u32();
            }
            if flags & u32::from(TYPE_HTML) != 0 {
                sizes.html = buf.get_u32();
            }
            if flags & u32::from(TYPE_DIB) != 0 {
                sizes.dib = buf.get_u32();
            }
            if flags & u32::from(TYPE_FILES) != 0 {
                sizes.files = buf.get_u32();
            }
            self.remote_flags = flags & !OP_CAPS;
            return Ok(ExtClipMessage::Caps { flags: self.remote_flags, sizes });
        }

        let op_count = (flags & OP_MASK).count_ones();
        if op_count != 1 {
            return Err(VncError::Format(format!("extended clipboard: invalid op flags 0x{flags:08x}")));
        }

        match flags & OP_MASK {
            OP_REQUEST => Ok(ExtClipMessage::Request { types: (flags & TYPE_MASK) as u16 }),
            OP_PEEK => Ok(ExtClipMessage::Peek),
            OP_NOTIFY => Ok(ExtClipMessage::Notify { types: (flags & TYPE_MASK) as u16 }),
            OP_PROVIDE => {
                let len = buf.get_u32() as usize;
                if buf.len() < len {
                    return Err(VncError::Format("extended clipboard provide: truncated zlib payload".into()));
                }
                let zipped = buf.split_to(len);
                let mut inflater = ZlibDecoder::new(&zipped[..]);
                let mut pairs = Vec::new();
                for bit in mask_unpack_bits(self.pending_provide_types) {
                    let mut len_bytes = [0u8; 4];
                    inflater
                        .read_exact(&mut len_bytes)
                        .map_err(|e| VncError::Format(format!("extended clipboard inflate failed: {e}")))?;
                    let item_len = u32::from_be_bytes(len_bytes) as usize;
                    let mut item = vec![0u8; item_len];
                    inflater
                        .read_exact(&mut item)
                        .map_err(|e| VncError::Format(format!("extended clipboard inflate failed: {e}")))?;
                    pairs.push((bit, item));
                    self.pending_provide_types &= !bit;
                }
                Ok(ExtClipMessage::Provide(pairs))
            }
            _ => unreachable!("op_count == 1 guarantees exactly one of OP_MASK's bits"),
        }
    }
}

fn mask_unpack_bits(mask: u16) -> Vec<u16> {
    (0..16u16).map(|i| 1u16 << i).filter(|bit| mask & bit != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_round_trips() {
        let sizes = TypeSizes { text: 4096, rtf: 0, html: 0, dib: 0, files: 0 };
        let local = ExtClipboard::new(u32::from(TYPE_TEXT) | OP_REQUEST | OP_NOTIFY, sizes);
        let frame = local.encode_caps();

        let mut remote = ExtClipboard::new(0, TypeSizes::default());
        let msg = remote.recv(&frame).unwrap();
        match msg {
            ExtClipMessage::Caps { flags, sizes: got } => {
                assert_eq!(flags & u32::from(TYPE_TEXT), u32::from(TYPE_TEXT));
                assert_eq!(got.text, 4096);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn request_peek_notify_round_trip() {
        let mut sender = ExtClipboard::new(u32::from(TYPE_TEXT) | OP_REQUEST, TypeSizes::default());
        sender.remote_flags = u32::from(TYPE_TEXT) | OP_PROVIDE;

        let request = sender.encode_request(TYPE_TEXT);
        let mut receiver = ExtClipboard::new(0, TypeSizes::default());
        match receiver.recv(&request).unwrap() {
            ExtClipMessage::Request { types } => assert_eq!(types, TYPE_TEXT),
            other => panic!("wrong variant: {other:?}"),
        }

        let peek = ExtClipboard::encode_peek();
        assert!(matches!(receiver.recv(&peek).unwrap(), ExtClipMessage::Peek));

        let mut notifier = ExtClipboard::new(0, TypeSizes::default());
        notifier.remote_flags = u32::from(TYPE_TEXT);
        let notify = notifier.encode_notify(TYPE_TEXT);
        match receiver.recv(&notify).unwrap() {
            ExtClipMessage::Notify { types } => assert_eq!(types, TYPE_TEXT),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn provide_round_trips_through_zlib() {
        let mut provider = ExtClipboard::new(u32::from(TYPE_TEXT) | OP_PROVIDE, TypeSizes::default());
        provider.pending_provide_types = TYPE_TEXT;
        let frame = ExtClipboard::encode_provide(TYPE_TEXT, |_| b"hello clipboard".to_vec()).unwrap();

        let mut receiver = ExtClipboard::new(0, TypeSizes::default());
        receiver.pending_provide_types = TYPE_TEXT;
        match receiver.recv(&frame).unwrap() {
            ExtClipMessage::Provide(pairs) => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].0, TYPE_TEXT);
                assert_eq!(pairs[0].1, b"hello clipboard");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_frame_with_multiple_ops() {
        let mut buf = BytesMut::new();
        buf.put_u32(OP_REQUEST | OP_PEEK);
        let mut endpoint = ExtClipboard::new(0, TypeSizes::default());
        assert!(endpoint.recv(&buf).is_err());
    }
}
