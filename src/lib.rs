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


//! # rustvncserver
//!
//! A pure Rust VNC/RFB server with an embedded LTSM side-channel
//! multiplexer for FUSE file transfer, PKCS#11 smart-card forwarding,
//! and the extended clipboard protocol.
//!
//! ## Features
//!
//! - **RFB 3.8 handshake**: version negotiation, VNC-DES/VeNCrypt-TLS/
//!   GSSAPI security types, `ClientInit`/`ServerInit`.
//! - **Region codecs**: Raw, RRE, CoRRE, Hextile, TRLE, ZRLE, Zlib, and
//!   the LTSM pseudo-encodings (LZ4, QOI, Turbo-JPEG).
//! - **LTSM channel mux**: a framed multiplexer carried over the RFB
//!   connection (`ClientMsgLtsm`/pseudo-encoding `Ltsm`) that services a
//!   FUSE bridge, a PKCS#11 bridge, and a JSON system-control channel.
//! - **Extended clipboard**: the multi-type (`text`/`rtf`/`html`/`dib`/
//!   `files`) clipboard protocol alongside plain `CutText`.
//! - **Async I/O**: built on Tokio for concurrent client handling.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rustvncserver::{VncServer, ServerEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = VncServer::new(1920, 1080);
//!     server.set_password(Some("secret".to_string()));
//!
//!     let server_handle = tokio::spawn({
//!         let server = server.clone();
//!         async move { server.listen(5900).await }
//!     });
//!
//!     // server.update_framebuffer(&pixels, 0, 0, 1920, 1080);
//!
//!     server_handle.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Your Application              │
//! │  • Provide framebuffer data             │
//! │  • Receive ServerEvent's                │
//! │  • Control server lifecycle             │
//! └──────────────────┬──────────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │           VncServer (Public)            │
//! │  • TCP listener, client ids             │
//! │  • Shared FrameBuffer + damage broadcast│
//! └──────────────────┬──────────────────────┘
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌────────┐ ┌────────┐ ┌────────┐
//!   │Session1│ │Session2│ │SessionN│   client.rs + session.rs
//!   └───┬────┘ └────────┘ └────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │   Codec (encoding/*)  │  ChannelMux      │
//! │   RFB framebuffer     │  FUSE / PKCS#11  │
//! │   updates             │  / ExtClipboard  │
//! └─────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod error;
pub mod events;
pub mod framebuffer;
pub mod jpeg;
pub mod protocol;
pub mod region;
pub mod server;
pub mod session;

// Internal modules
mod auth;
mod channel;
mod client;
mod extclipboard;
mod protocol_core;
mod wire;

// Re-exports
pub use error::{Result, VncError};
pub use events::ServerEvent;
pub use framebuffer::FrameBuffer;
pub use protocol::PixelFormat;
pub use region::Region;
pub use server::VncServer;
pub use session::{ClipboardEndpoint, DisplayControl, FrameSource, InputSink};

#[cfg(feature = "turbojpeg")]
pub use jpeg::TurboJpegEncoder;

/// VNC protocol version.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
