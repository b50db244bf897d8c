//! Server events that can be received by the application.

use std::net::SocketAddr;

use crate::protocol::ScreenInfo;

/// Events emitted by the VNC server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A client has connected to the server.
    ClientConnected {
        /// Unique client identifier.
        id: usize,
        /// Client's socket address.
        address: SocketAddr,
    },

    /// A client has disconnected from the server.
    ClientDisconnected {
        /// Unique client identifier.
        id: usize,
    },

    /// Pointer movement or button event from a client.
    PointerEvent {
        /// Client identifier.
        client_id: usize,
        /// X coordinate.
        x: u16,
        /// Y coordinate.
        y: u16,
        /// Button mask (bit 0 = left, bit 1 = middle, bit 2 = right).
        button_mask: u8,
    },

    /// Key press or release event from a client.
    KeyEvent {
        /// Client identifier.
        client_id: usize,
        /// Key symbol (X11 keysym).
        key: u32,
        /// True if pressed, false if released.
        pressed: bool,
    },

    /// Clipboard text received from a client.
    ClipboardReceived {
        /// Client identifier.
        client_id: usize,
        /// Clipboard text content.
        text: String,
    },

    /// A client proposed a new desktop layout via `SetDesktopSize`.
    DesktopResizeRequested {
        /// Client identifier.
        client_id: usize,
        /// Requested virtual desktop width.
        width: u16,
        /// Requested virtual desktop height.
        height: u16,
        /// Per-screen layout entries.
        screens: Vec<ScreenInfo>,
    },

    /// A `ChannelOpen` system command was admitted for a client.
    ChannelOpened {
        /// Client identifier.
        client_id: usize,
        /// Admitted channel id.
        channel: u8,
        /// Channel kind (`"fuse"`, `"pkcs11"`, ...).
        kind: String,
    },

    /// A non-zero LTSM channel was closed.
    ChannelClosed {
        /// Client identifier.
        client_id: usize,
        /// Closed channel id.
        channel: u8,
    },

    /// Raw bytes arrived on a non-zero LTSM channel.
    ChannelDataReceived {
        /// Client identifier.
        client_id: usize,
        /// Source channel id.
        channel: u8,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },

    /// The client announced its extended-clipboard capabilities.
    ExtClipboardCaps {
        /// Client identifier.
        client_id: usize,
        /// The client's supported type/op bitmask.
        flags: u32,
    },

    /// The client provided extended-clipboard data for one type.
    ExtClipboardData {
        /// Client identifier.
        client_id: usize,
        /// Which type bit this data is for (spec.md §4.7).
        type_bit: u16,
        /// The clipboard bytes for that type.
        data: Vec<u8>,
    },
}
