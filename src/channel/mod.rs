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

//! The in-band LTSM channel multiplexer (spec.md §4.6): framed
//! datagrams carried either as a `FramebufferUpdate` rectangle with
//! encoding `ENCODING_LTSM` (server → client) or as client-to-server
//! message type 119. Channel 0 is the JSON system control channel;
//! non-zero channels carry the FUSE ([`fuse`]) or PKCS#11 ([`pkcs11`])
//! sub-protocols, or arbitrary caller-defined bytes.

pub mod fuse;
pub mod pkcs11;

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, VncError};

/// Reserved channel id for JSON system control messages.
pub const SYSTEM_CHANNEL: u8 = 0;

/// One LTSM channel-mux frame: `u8 channel, u16 flags, u32 length,
/// bytes[length]` (spec.md §4.6, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFrame {
    /// Target channel id.
    pub channel: u8,
    /// Channel-level flags (opaque to the mux).
    pub flags: u16,
    /// Frame payload.
    pub payload: Vec<u8>,
}

impl ChannelFrame {
    /// Encodes the frame body (channel id through payload, no outer
    /// rectangle/message wrapper).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(7 + self.payload.len());
        buf.put_u8(self.channel);
        buf.put_u16(self.flags);
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a frame body out of `buf`, consuming exactly what it reads.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 7 {
            return Err(VncError::ChannelError("truncated channel frame header".into()));
        }
        let channel = buf.get_u8();
        let flags = buf.get_u16();
        let length = buf.get_u32() as usize;
        if buf.len() < length {
            return Err(VncError::ChannelError("truncated channel frame payload".into()));
        }
        let payload = buf.split_to(length).to_vec();
        Ok(Self { channel, flags, payload })
    }
}

/// The system channel's JSON command set (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum SystemCommand {
    /// Requests a new non-zero channel be opened.
    ChannelOpen {
        /// Channel id to assign.
        id: u8,
        /// Channel kind (e.g. `"fuse"`, `"pkcs11"`).
        kind: String,
        /// Target path/address the channel proxies to.
        target: String,
        /// Requested access mode (e.g. `"ro"`, `"rw"`).
        mode: String,
    },
    /// Requests the peer listen for connections on behalf of a channel.
    ChannelListen {
        /// Channel kind to listen for.
        kind: String,
        /// Local address/path to listen on.
        address: String,
    },
    /// Requests a channel be torn down.
    ChannelClose {
        /// Channel id to close.
        id: u8,
    },
    /// Confirms a channel was admitted and is ready for data.
    ChannelConnected {
        /// Channel id.
        id: u8,
    },
    /// Reports a channel-level failure.
    ChannelError {
        /// Channel id, if the error is channel-specific.
        id: Option<u8>,
        /// Human-readable reason.
        reason: String,
    },
    /// Legacy FUSE proxy negotiation (superseded by a `ChannelOpen` of
    /// kind `"fuse"`, kept for protocol compatibility).
    FuseProxy {
        /// Shared mount point path.
        mount_point: String,
    },
    /// Token-based authentication handoff.
    TokenAuth {
        /// Opaque token bytes, base64 or provider-defined.
        token: String,
    },
    /// Announces a successful login following `TokenAuth`.
    LoginSuccess {
        /// Authenticated username.
        username: String,
    },
    /// Client environment/capability variables.
    ClientVariables {
        /// Arbitrary key/value variables the client advertises.
        vars: HashMap<String, String>,
    },
    /// Server-side keyboard layout change.
    KeyboardChange {
        /// New layout identifier (e.g. an XKB layout name).
        layout: String,
    },
    /// A synthetic keyboard event delivered out-of-band from the normal
    /// `KeyEvent` RFB message.
    KeyboardEvent {
        /// X Window System keysym.
        key: u32,
        /// `true` if pressed, `false` if released.
        pressed: bool,
    },
    /// Reports that the session's cursor shape transfer failed.
    CursorFailed {
        /// Human-readable reason.
        reason: String,
    },
    /// Requests a batch of files be transferred over a data channel.
    TransferFiles {
        /// Channel id carrying the actual bytes.
        channel: u8,
        /// Source paths to transfer.
        paths: Vec<String>,
    },
}

impl SystemCommand {
    /// Serializes to the JSON bytes carried as a channel-0 payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VncError::ChannelError(format!("system command encode: {e}")))
    }

    /// Parses a channel-0 payload.
    pub fn from_payload(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| VncError::ChannelError(format!("system command decode: {e}")))
    }
}

/// What a channel is permitted to do, decided by the caller's
/// `create_channel_allow` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Read-only.
    ReadOnly,
    /// Read-write.
    ReadWrite,
}

/// Admission policy: decides whether a `ChannelOpen` for `kind`/`target`
/// at `mode` is allowed. Implemented by the embedding application
/// (spec.md §4.8 treats authorization policy as an external concern).
pub trait ChannelPolicy: Send + Sync {
    /// Returns `true` if the channel may be admitted.
    fn create_channel_allow(&self, kind: &str, target: &str, mode: ChannelMode) -> bool;
}

/// A single admitted non-zero channel: an mpsc pair shuttling bytes
/// between the mux and a local endpoint task (spec.md §5 "Auxiliary I/O").
pub struct Channel {
    /// Channel id.
    pub id: u8,
    /// Channel kind (`"fuse"`, `"pkcs11"`, or caller-defined).
    pub kind: String,
    /// Egress: bytes queued here are sent out over the `Wire`.
    pub to_wire: mpsc::UnboundedSender<Vec<u8>>,
    /// Ingress: bytes arriving from the peer for this channel.
    pub from_wire: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Owns every admitted channel for one session and dispatches incoming
/// [`ChannelFrame`]s to the right queue.
pub struct ChannelMux {
    channels: HashMap<u8, mpsc::UnboundedSender<Vec<u8>>>,
}

impl Default for ChannelMux {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMux {
    /// Builds an empty mux (no channels admitted yet).
    #[must_use]
    pub fn new() -> Self {
        Self { channels: HashMap::new() }
    }

    /// Admits channel `id`, returning the session-side `Channel` handle
    /// and the egress receiver the driver polls to learn what bytes
    /// `Channel::to_wire` queued for writing out over the `Wire`.
    pub fn admit(&mut self, id: u8, kind: impl Into<String>) -> (Channel, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (to_endpoint_tx, to_endpoint_rx) = mpsc::unbounded_channel();
        let (to_wire_tx, to_wire_rx) = mpsc::unbounded_channel();
        self.channels.insert(id, to_endpoint_tx);
        (Channel { id, kind: kind.into(), to_wire: to_wire_tx, from_wire: to_endpoint_rx }, to_wire_rx)
    }

    /// Closes and forgets channel `id`.
    pub fn close(&mut self, id: u8) {
        self.channels.remove(&id);
    }

    /// Routes an incoming frame's payload to its channel's ingress
    /// queue. Channel 0 is never routed here — the caller decodes it as
    /// a [`SystemCommand`] directly.
    pub fn dispatch(&self, frame: ChannelFrame) -> Result<()> {
        if frame.channel == SYSTEM_CHANNEL {
            return Err(VncError::ChannelError("system channel must be handled by the caller".into()));
        }
        match self.channels.get(&frame.channel) {
            Some(sender) => {
                if sender.send(frame.payload).is_err() {
                    warn!("channel {} endpoint dropped, closing", frame.channel);
                    return Err(VncError::ChannelError(format!("channel {} endpoint closed", frame.channel)));
                }
                Ok(())
            }
            None => Err(VncError::ChannelError(format!("frame for unopened channel {}", frame.channel))),
        }
    }

    /// Shuts down every channel (spec.md §5 "on transport loss").
    pub fn shutdown_all(&mut self) {
        debug!("channel mux: shutting down {} channel(s)", self.channels.len());
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = ChannelFrame { channel: 3, flags: 0x1234, payload: b"payload bytes".to_vec() };
        let mut encoded = frame.encode();
        let decoded = ChannelFrame::decode(&mut encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn system_command_round_trips_through_json() {
        let cmd = SystemCommand::ChannelOpen {
            id: 5,
            kind: "fuse".into(),
            target: "/home/user".into(),
            mode: "ro".into(),
        };
        let bytes = cmd.to_payload().unwrap();
        let back = SystemCommand::from_payload(&bytes).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn dispatch_requires_admitted_channel() {
        let mux = ChannelMux::new();
        let frame = ChannelFrame { channel: 9, flags: 0, payload: vec![] };
        assert!(mux.dispatch(frame).is_err());
    }

    #[test]
    fn admitted_channel_receives_dispatched_payload() {
        let mut mux = ChannelMux::new();
        let (mut channel, _egress_rx) = mux.admit(4, "fuse");
        mux.dispatch(ChannelFrame { channel: 4, flags: 0, payload: b"hi".to_vec() }).unwrap();
        let received = channel.from_wire.try_recv().unwrap();
        assert_eq!(received, b"hi");
    }
}
