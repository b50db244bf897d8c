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

//! Session orchestration (spec.md §4.8): owns the negotiated codec,
//! pixel format, `ChannelMux`, and extended-clipboard state for one
//! connection, and exposes the four traits the embedding application
//! implements to supply actual screen pixels, input injection, local
//! clipboard content, and display-mode control. Everything else about
//! a connection is internal to this crate.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelMux};
use crate::encoding::Codec;
use crate::error::Result;
use crate::extclipboard::ExtClipboard;
use crate::protocol::{DesktopSizeStatus, PixelFormat, ScreenInfo};
use crate::region::Region;

/// Supplies current screen contents and reports damage/resize to a `Session`.
pub trait FrameSource: Send + Sync {
    /// Copies the current pixels of `region` into an RGBA32 buffer.
    fn snapshot(&self, region: &Region) -> Vec<u32>;

    /// The framebuffer's current dimensions.
    fn dimensions(&self) -> (u16, u16);

    /// Takes (and clears) any damage accumulated since the last call.
    /// Returns `None` if nothing changed.
    fn take_damage(&self) -> Option<Region>;
}

/// Injects input events originating from the remote client into the
/// local session (X11, a Wayland compositor, ...).
pub trait InputSink: Send + Sync {
    /// Injects a keyboard event.
    fn key_event(&self, down: bool, key: u32);

    /// Injects a pointer (mouse) event.
    fn pointer_event(&self, x: u16, y: u16, button_mask: u8);
}

/// Reads and writes the local clipboard/selection content the extended
/// clipboard sub-protocol exchanges with the remote peer.
pub trait ClipboardEndpoint: Send + Sync {
    /// The type bits currently available locally (spec.md §4.7).
    fn local_types(&self) -> u16;

    /// Fetches local clipboard data for one type bit.
    fn local_data(&self, type_bit: u16) -> Vec<u8>;

    /// Stores clipboard data the remote peer provided for one type bit.
    fn store_remote_data(&self, type_bit: u16, data: Vec<u8>);
}

/// Changes the local display's mode in response to a client-proposed
/// `SetDesktopSize` (the randr-equivalent control surface).
pub trait DisplayControl: Send + Sync {
    /// Applies (or rejects) a proposed layout, returning the status the
    /// server replies to the client with.
    fn set_desktop_size(&self, width: u16, height: u16, screens: &[ScreenInfo]) -> DesktopSizeStatus;
}

/// Per-connection session state: negotiated pixel format/encoding,
/// accumulated damage, the channel mux, and extended-clipboard state.
pub struct Session {
    client_pf: PixelFormat,
    client_encodings: Vec<i32>,
    codec: Option<Codec>,
    negotiated_encoding: i32,
    damage: Option<Region>,
    channels: ChannelMux,
    open_channels: HashMap<u8, Channel>,
    channel_egress_tx: mpsc::UnboundedSender<(u8, Vec<u8>)>,
    channel_egress_rx: Option<mpsc::UnboundedReceiver<(u8, Vec<u8>)>>,
    ext_clipboard: ExtClipboard,
    continuous_updates: bool,
}

impl Session {
    /// Builds a fresh session with the server's native pixel format as
    /// the initial (pre-`SetPixelFormat`) client format, per spec.md
    /// §4.4.3's `ServerInit`.
    #[must_use]
    pub fn new(native_pf: PixelFormat, ext_clipboard: ExtClipboard) -> Self {
        let (channel_egress_tx, channel_egress_rx) = mpsc::unbounded_channel();
        Self {
            client_pf: native_pf,
            client_encodings: Vec::new(),
            codec: None,
            negotiated_encoding: crate::protocol::ENCODING_RAW,
            damage: None,
            channels: ChannelMux::new(),
            open_channels: HashMap::new(),
            channel_egress_tx,
            channel_egress_rx: Some(channel_egress_rx),
            ext_clipboard,
            continuous_updates: false,
        }
    }

    /// `true` until the client has sent its first `SetEncodings`
    /// (spec.md §5's "session not activated" timeout watches this).
    #[must_use]
    pub fn client_encodings_empty(&self) -> bool {
        self.client_encodings.is_empty()
    }

    /// The RFB encoding constant of the codec `encode_region` will use.
    #[must_use]
    pub fn negotiated_encoding(&self) -> i32 {
        self.negotiated_encoding
    }

    /// Mutable access to the negotiated codec, if `SetEncodings` has run.
    pub fn codec_mut(&mut self) -> Option<&mut Codec> {
        self.codec.as_mut()
    }

    /// The client's currently negotiated pixel format.
    #[must_use]
    pub fn client_pixel_format(&self) -> &PixelFormat {
        &self.client_pf
    }

    /// Applies a `SetPixelFormat` request.
    pub fn set_pixel_format(&mut self, pf: PixelFormat) {
        self.client_pf = pf;
    }

    /// Applies a `SetEncodings` request, selecting this crate's best
    /// codec out of the advertised list (spec.md §4.4.6).
    pub fn set_encodings(&mut self, encodings: Vec<i32>) {
        let chosen = crate::encoding::select_encoding(&encodings);
        self.client_encodings = encodings;
        self.codec = crate::encoding::Codec::for_encoding(chosen);
        self.negotiated_encoding = if self.codec.is_some() { chosen } else { crate::protocol::ENCODING_RAW };
    }

    /// Whether the client has advertised the extended-clipboard
    /// pseudo-encoding (spec.md §4.7: the server must reply with `Caps`
    /// to every `SetEncodings` that lists it).
    #[must_use]
    pub fn wants_ext_clipboard(&self) -> bool {
        self.client_encodings.contains(&crate::protocol::ENCODING_EXT_CLIPBOARD)
    }

    /// Whether the client has advertised the LTSM channel mux encoding.
    #[must_use]
    pub fn wants_ltsm_channels(&self) -> bool {
        self.client_encodings.contains(&crate::protocol::ENCODING_LTSM)
    }

    /// Toggles continuous-update streaming (message type 150).
    pub fn set_continuous_updates(&mut self, enable: bool) {
        self.continuous_updates = enable;
    }

    /// Whether continuous-update streaming is currently enabled.
    #[must_use]
    pub fn continuous_updates(&self) -> bool {
        self.continuous_updates
    }

    /// Merges newly damaged pixels into the pending region (spec.md §5
    /// "damage region ... joined by damage notifications").
    pub fn merge_damage(&mut self, region: Region) {
        self.damage = Some(match self.damage.take() {
            Some(existing) => existing.join(&region),
            None => region,
        });
    }

    /// Takes (and clears) the pending damage region.
    pub fn take_damage(&mut self) -> Option<Region> {
        self.damage.take()
    }

    /// Encodes `region` of `fb` with the negotiated codec, falling back
    /// to Raw if no `SetEncodings` has arrived yet.
    pub fn encode_region(&mut self, fb: &crate::framebuffer::FrameBuffer, region: &Region) -> Result<bytes::BytesMut> {
        let pf = self.client_pf.clone();
        match &mut self.codec {
            Some(codec) => codec.encode(fb, region, &pf),
            None => Ok(crate::encoding::raw::encode(fb, region, &pf)),
        }
    }

    /// Mutable access to this session's channel mux.
    pub fn channels_mut(&mut self) -> &mut ChannelMux {
        &mut self.channels
    }

    /// Admits a new LTSM channel (spec.md §4.6 `ChannelOpen`). Retains
    /// the admitted `Channel` so its ingress receiver stays alive for
    /// `ChannelMux::dispatch`, and spawns the egress-forwarding task
    /// that shuttles local-endpoint writes back out to the wire
    /// (spec.md §5's "each channel runs two tasks that shuttle between
    /// a local endpoint and the `ChannelMux`").
    pub fn open_channel(&mut self, id: u8, kind: impl Into<String>) {
        let (channel, mut egress_rx) = self.channels.admit(id, kind);
        let egress_tx = self.channel_egress_tx.clone();
        tokio::spawn(async move {
            while let Some(payload) = egress_rx.recv().await {
                if egress_tx.send((id, payload)).is_err() {
                    break;
                }
            }
        });
        self.open_channels.insert(id, channel);
    }

    /// Closes a channel and drops its retained endpoint, ending its
    /// egress-forwarding task.
    pub fn close_channel(&mut self, id: u8) {
        self.channels.close(id);
        self.open_channels.remove(&id);
    }

    /// Mutable access to a specific admitted channel's endpoint, i.e.
    /// the hook a local sink (FUSE/PKCS#11 bridge) uses to read
    /// ingress bytes (`from_wire`) or queue egress bytes (`to_wire`).
    pub(crate) fn channel_mut(&mut self, id: u8) -> Option<&mut Channel> {
        self.open_channels.get_mut(&id)
    }

    /// Takes this session's channel-egress receiver. The message loop
    /// calls this once, at session start, to learn what every admitted
    /// channel has queued up to send to the client.
    pub fn take_channel_egress(&mut self) -> Option<mpsc::UnboundedReceiver<(u8, Vec<u8>)>> {
        self.channel_egress_rx.take()
    }

    /// Mutable access to this session's extended-clipboard state.
    pub fn ext_clipboard_mut(&mut self) -> &mut ExtClipboard {
        &mut self.ext_clipboard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extclipboard::TypeSizes;
    use crate::framebuffer::FrameBuffer;
    use crate::protocol::ENCODING_HEXTILE;

    #[test]
    fn set_encodings_picks_a_codec_and_exposes_flags() {
        let mut session = Session::new(PixelFormat::rgba32(), ExtClipboard::new(0, TypeSizes::default()));
        assert!(session.codec.is_none());

        session.set_encodings(vec![ENCODING_HEXTILE, crate::protocol::ENCODING_EXT_CLIPBOARD]);
        assert!(session.codec.is_some());
        assert!(session.wants_ext_clipboard());
        assert!(!session.wants_ltsm_channels());
    }

    #[test]
    fn damage_merges_and_drains() {
        let mut session = Session::new(PixelFormat::rgba32(), ExtClipboard::new(0, TypeSizes::default()));
        assert!(session.take_damage().is_none());

        session.merge_damage(Region { x: 0, y: 0, w: 10, h: 10 });
        session.merge_damage(Region { x: 20, y: 20, w: 5, h: 5 });
        let merged = session.take_damage().unwrap();
        assert_eq!(merged, Region { x: 0, y: 0, w: 25, h: 25 });
        assert!(session.take_damage().is_none());
    }

    #[test]
    fn encodes_with_raw_fallback_before_set_encodings() {
        let mut session = Session::new(PixelFormat::rgba32(), ExtClipboard::new(0, TypeSizes::default()));
        let mut fb = FrameBuffer::new(4, 4);
        fb.fill(&fb.bounds(), 0xABCDEF);
        let region = fb.bounds();
        let body = session.encode_region(&fb, &region).unwrap();
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn open_channel_keeps_dispatch_working() {
        use crate::channel::ChannelFrame;

        let mut session = Session::new(PixelFormat::rgba32(), ExtClipboard::new(0, TypeSizes::default()));
        session.open_channel(1, "fuse");

        // Without retaining the admitted `Channel`, its ingress receiver
        // drops immediately and every dispatch fails.
        session
            .channels_mut()
            .dispatch(ChannelFrame { channel: 1, flags: 0, payload: b"ping".to_vec() })
            .unwrap();

        let received = session.channel_mut(1).unwrap().from_wire.try_recv().unwrap();
        assert_eq!(received, b"ping");
    }

    #[tokio::test]
    async fn open_channel_forwards_egress_to_the_shared_queue() {
        let mut session = Session::new(PixelFormat::rgba32(), ExtClipboard::new(0, TypeSizes::default()));
        session.open_channel(4, "pkcs11");

        session.channel_mut(4).unwrap().to_wire.send(b"pong".to_vec()).unwrap();

        let mut egress = session.take_channel_egress().unwrap();
        let (id, payload) = egress.recv().await.unwrap();
        assert_eq!(id, 4);
        assert_eq!(payload, b"pong");
    }

    #[tokio::test]
    async fn close_channel_drops_the_endpoint() {
        let mut session = Session::new(PixelFormat::rgba32(), ExtClipboard::new(0, TypeSizes::default()));
        session.open_channel(2, "fuse");
        session.close_channel(2);
        assert!(session.channel_mut(2).is_none());
    }
}
