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

//! Per-connection driver: runs the handshake (spec.md §4.4.1-§4.4.3),
//! then the RFB message loop and the LTSM side channels for one client
//! (spec.md §5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::auth::VncAuth;
use crate::channel::{ChannelFrame, SystemCommand, SYSTEM_CHANNEL};
use crate::error::{Result, SecurityError, VncError};
use crate::events::ServerEvent;
use crate::extclipboard::{ExtClipMessage, ExtClipboard, TypeSizes};
use crate::framebuffer::FrameBuffer;
use crate::protocol::{
    ClientMessage, PixelFormat, Rectangle, RfbVersion, ServerInit, ENCODING_LTSM, PROTOCOL_VERSION,
    SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH,
};
use crate::region::Region;
use crate::session::Session;
use crate::wire::{SecureStream, Wire};

/// How long a freshly-accepted session may go without a `SetEncodings`
/// before it is torn down (spec.md §5 "Timeouts").
pub const SESSION_NOT_ACTIVATED_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable configuration for one accepted connection.
pub struct ClientConfig {
    /// Assigned client id (for `ServerEvent`s).
    pub id: usize,
    /// Peer address.
    pub addr: SocketAddr,
    /// VNC password candidates; empty means `SECURITY_TYPE_NONE` only.
    pub passwords: Vec<String>,
    /// Desktop name sent in `ServerInit`.
    pub desktop_name: String,
    /// Shared framebuffer.
    pub framebuffer: Arc<std::sync::Mutex<FrameBuffer>>,
    /// Outbound event sink back to the embedding application.
    pub events: mpsc::UnboundedSender<ServerEvent>,
    /// Broadcasts damaged regions from `VncServer::update_framebuffer`.
    pub damage: tokio::sync::broadcast::Sender<Region>,
}

/// Runs the full handshake then the message loop for one connection.
/// Returns when the peer disconnects or a fatal error occurs.
pub async fn run<S: SecureStream>(stream: S, config: ClientConfig) -> Result<()> {
    let mut wire = Wire::new(stream);
    let native_pf = PixelFormat::rgba32();

    negotiate_version(&mut wire).await?;
    negotiate_security(&mut wire, &config.passwords).await?;
    read_client_init(&mut wire).await?;

    let (width, height) = {
        let fb = config.framebuffer.lock().unwrap();
        (fb.width(), fb.height())
    };
    let server_init = ServerInit {
        framebuffer_width: width,
        framebuffer_height: height,
        pixel_format: native_pf.clone(),
        name: config.desktop_name.clone(),
    };
    let mut init_buf = BytesMut::new();
    server_init.write_to(&mut init_buf);
    wire.write_all(&init_buf).await?;
    wire.flush().await?;

    info!("client {} ({}) activated", config.id, config.addr);
    let _ = config.events.send(ServerEvent::ClientConnected { id: config.id, address: config.addr });

    let ext_clipboard = ExtClipboard::new(
        u32::from(crate::extclipboard::TYPE_TEXT) | (1 << 25) | (1 << 26) | (1 << 27) | (1 << 28),
        TypeSizes { text: 1 << 20, rtf: 0, html: 0, dib: 0, files: 0 },
    );
    let mut session = Session::new(native_pf, ext_clipboard);

    let result = message_loop(&mut wire, &mut session, &config).await;
    let _ = config.events.send(ServerEvent::ClientDisconnected { id: config.id });
    result
}

async fn negotiate_version<S: SecureStream>(wire: &mut Wire<S>) -> Result<()> {
    wire.write_all(PROTOCOL_VERSION.as_bytes()).await?;
    wire.flush().await?;
    let raw = wire.read_exact(12).await?;
    let version = RfbVersion::parse(&raw)?;
    debug!("client requested protocol version {version:?}");
    Ok(())
}

async fn negotiate_security<S: SecureStream>(wire: &mut Wire<S>, passwords: &[String]) -> Result<()> {
    let offered: Vec<u8> =
        if passwords.is_empty() { vec![SECURITY_TYPE_NONE] } else { vec![SECURITY_TYPE_VNC_AUTH, SECURITY_TYPE_NONE] };

    let mut buf = BytesMut::new();
    buf.put_u8(offered.len() as u8);
    buf.put_slice(&offered);
    wire.write_all(&buf).await?;
    wire.flush().await?;

    let chosen = wire.read_u8().await?;
    if !offered.contains(&chosen) {
        send_security_result(wire, false, "unsupported security type").await?;
        return Err(VncError::HandshakeSecurity(SecurityError::BadType));
    }

    if chosen == SECURITY_TYPE_VNC_AUTH {
        let challenge = VncAuth::generate_challenge();
        wire.write_all(&challenge).await?;
        wire.flush().await?;
        let response_bytes = wire.read_exact(16).await?;
        let mut response = [0u8; 16];
        response.copy_from_slice(&response_bytes);
        if VncAuth::verify_response(&challenge, &response, passwords) {
            send_security_result(wire, true, "").await?;
        } else {
            send_security_result(wire, false, "authentication failed").await?;
            return Err(VncAuth::auth_failed());
        }
    } else {
        send_security_result(wire, true, "").await?;
    }
    Ok(())
}

async fn send_security_result<S: SecureStream>(wire: &mut Wire<S>, ok: bool, reason: &str) -> Result<()> {
    let mut buf = BytesMut::new();
    buf.put_u32(if ok { SECURITY_RESULT_OK } else { SECURITY_RESULT_FAILED });
    if !ok {
        let reason_bytes = reason.as_bytes();
        buf.put_u32(reason_bytes.len() as u32);
        buf.put_slice(reason_bytes);
    }
    wire.write_all(&buf).await?;
    wire.flush().await
}

async fn read_client_init<S: SecureStream>(wire: &mut Wire<S>) -> Result<bool> {
    let shared = wire.read_u8().await? != 0;
    Ok(shared)
}

async fn message_loop<S: SecureStream>(wire: &mut Wire<S>, session: &mut Session, config: &ClientConfig) -> Result<()> {
    let activated_deadline = Instant::now() + SESSION_NOT_ACTIVATED_TIMEOUT;
    let mut pending_update: Option<(bool, Region)> = None;
    let mut damage_rx = config.damage.subscribe();
    let mut channel_egress = session.take_channel_egress().expect("channel egress receiver taken once");

    loop {
        enum Event {
            Client(ClientMessage),
            Damage(Region),
            ChannelEgress(u8, Vec<u8>),
        }

        let event = tokio::select! {
            msg = crate::protocol_core::read_client_message(wire) => Event::Client(msg?),
            damaged = damage_rx.recv() => {
                match damaged {
                    Ok(region) => Event::Damage(region),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        Event::Damage(Region::new(0, 0, u16::MAX, u16::MAX))
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => continue,
                }
            }
            egress = channel_egress.recv() => {
                match egress {
                    Some((channel, payload)) => Event::ChannelEgress(channel, payload),
                    None => continue,
                }
            }
            () = tokio::time::sleep_until(activated_deadline), if session.client_encodings_empty() => {
                return Err(VncError::Timeout);
            }
        };

        let msg = match event {
            Event::Damage(region) => {
                session.merge_damage(region);
                if session.continuous_updates() {
                    if let Some(damage) = session.take_damage() {
                        send_framebuffer_update(wire, session, config, false, damage).await?;
                    }
                }
                continue;
            }
            Event::ChannelEgress(channel, payload) => {
                send_ltsm_frame(wire, channel, payload).await?;
                continue;
            }
            Event::Client(msg) => msg,
        };

        match msg {
            ClientMessage::SetPixelFormat(pf) => session.set_pixel_format(pf),
            ClientMessage::SetEncodings(encodings) => {
                session.set_encodings(encodings);
                if session.wants_ext_clipboard() {
                    send_ext_clipboard(wire, session.ext_clipboard_mut().encode_caps()).await?;
                }
            }
            ClientMessage::FramebufferUpdateRequest { incremental, x, y, width, height } => {
                let region = Region { x: x as i16, y: y as i16, w: width, h: height };
                pending_update = Some((incremental, region));
            }
            ClientMessage::KeyEvent { down, key } => {
                let _ = config.events.send(ServerEvent::KeyEvent { client_id: config.id, key, pressed: down });
            }
            ClientMessage::PointerEvent { button_mask, x, y } => {
                let _ = config.events.send(ServerEvent::PointerEvent { client_id: config.id, x, y, button_mask });
            }
            ClientMessage::ClientCutText(text) => {
                let _ = config.events.send(ServerEvent::ClipboardReceived { client_id: config.id, text });
            }
            ClientMessage::ExtClipboard(payload) => {
                handle_ext_clipboard(wire, session, config, &payload).await?;
            }
            ClientMessage::EnableContinuousUpdates { enable, x, y, width, height } => {
                session.set_continuous_updates(enable);
                if enable {
                    pending_update = Some((false, Region { x: x as i16, y: y as i16, w: width, h: height }));
                }
            }
            ClientMessage::SetDesktopSize { width, height, screens } => {
                let _ = config.events.send(ServerEvent::DesktopResizeRequested {
                    client_id: config.id,
                    width,
                    height,
                    screens,
                });
            }
            ClientMessage::Ltsm { channel, flags: _, payload } => {
                handle_ltsm(session, config, channel, payload)?;
            }
        }

        if let Some((incremental, region)) = pending_update.take() {
            send_framebuffer_update(wire, session, config, incremental, region).await?;
        }
    }
}

async fn send_framebuffer_update<S: SecureStream>(
    wire: &mut Wire<S>,
    session: &mut Session,
    config: &ClientConfig,
    incremental: bool,
    requested: Region,
) -> Result<()> {
    let region = if incremental {
        match session.take_damage() {
            Some(damage) => damage.intersect(&requested),
            None => return Ok(()),
        }
    } else {
        Some(requested)
    };
    let Some(region) = region else { return Ok(()) };
    if region.w == 0 || region.h == 0 {
        return Ok(());
    }

    let fb = config.framebuffer.lock().unwrap();
    let body = session.encode_region(&fb, &region)?;
    let encoding = session.negotiated_encoding();
    drop(fb);

    let mut out = BytesMut::new();
    out.put_u8(0); // SERVER_MSG_FRAMEBUFFER_UPDATE
    out.put_u8(0); // padding
    out.put_u16(1); // one rectangle
    let rect = Rectangle {
        x: region.x as u16,
        y: region.y as u16,
        width: region.w,
        height: region.h,
        encoding,
    };
    rect.write_header(&mut out);
    out.extend_from_slice(&body);

    wire.write_all(&out).await?;
    wire.flush().await
}

/// Frames a server→client LTSM channel datagram as a `FramebufferUpdate`
/// rectangle with pseudo-encoding `ENCODING_LTSM` (spec.md §4.6/§4.4.5):
/// body `u32 rawSize, u32 payloadSize, payload`, where `payload` is the
/// channel frame itself (`u8 channel, u16 flags, u32 length, bytes`).
/// `rawSize` is the uncompressed application payload length; `payloadSize`
/// is the byte length of the following framed payload.
async fn send_ltsm_frame<S: SecureStream>(wire: &mut Wire<S>, channel: u8, payload: Vec<u8>) -> Result<()> {
    let raw_size = payload.len() as u32;
    let framed = ChannelFrame { channel, flags: 0, payload }.encode();
    let payload_size = framed.len() as u32;

    let mut out = BytesMut::with_capacity(16 + framed.len());
    out.put_u8(0); // SERVER_MSG_FRAMEBUFFER_UPDATE
    out.put_u8(0); // padding
    out.put_u16(1); // one rectangle
    let rect = Rectangle { x: 0, y: 0, width: 0, height: 0, encoding: ENCODING_LTSM };
    rect.write_header(&mut out);
    out.put_u32(raw_size);
    out.put_u32(payload_size);
    out.extend_from_slice(&framed);

    wire.write_all(&out).await?;
    wire.flush().await
}

async fn send_ext_clipboard<S: SecureStream>(wire: &mut Wire<S>, payload: Vec<u8>) -> Result<()> {
    let mut out = BytesMut::with_capacity(8 + payload.len());
    out.put_u8(3); // SERVER_MSG_SERVER_CUT_TEXT
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(0);
    out.put_i32(-(payload.len() as i32));
    out.extend_from_slice(&payload);
    wire.write_all(&out).await?;
    wire.flush().await
}

async fn handle_ext_clipboard<S: SecureStream>(
    wire: &mut Wire<S>,
    session: &mut Session,
    config: &ClientConfig,
    payload: &[u8],
) -> Result<()> {
    let msg = session.ext_clipboard_mut().recv(payload)?;
    match msg {
        ExtClipMessage::Caps { flags, .. } => {
            let _ = config.events.send(ServerEvent::ExtClipboardCaps { client_id: config.id, flags });
        }
        ExtClipMessage::Peek => {
            let notify = session.ext_clipboard_mut().encode_notify(0xFFFF);
            send_ext_clipboard(wire, notify).await?;
        }
        ExtClipMessage::Request { types } => {
            let frame = ExtClipboard::encode_provide(types, |_bit| Vec::new())?;
            send_ext_clipboard(wire, frame).await?;
        }
        ExtClipMessage::Notify { .. } => {}
        ExtClipMessage::Provide(pairs) => {
            for (type_bit, data) in pairs {
                let _ = config.events.send(ServerEvent::ExtClipboardData { client_id: config.id, type_bit, data });
            }
        }
    }
    Ok(())
}

fn handle_ltsm(session: &mut Session, config: &ClientConfig, channel: u8, payload: Vec<u8>) -> Result<()> {
    if channel == SYSTEM_CHANNEL {
        let cmd = SystemCommand::from_payload(&payload)?;
        match cmd {
            SystemCommand::ChannelOpen { id, kind, .. } => {
                session.open_channel(id, kind.clone());
                let _ = config.events.send(ServerEvent::ChannelOpened { client_id: config.id, channel: id, kind });
            }
            SystemCommand::ChannelClose { id } => {
                session.close_channel(id);
                let _ = config.events.send(ServerEvent::ChannelClosed { client_id: config.id, channel: id });
            }
            other => {
                warn!("client {}: unhandled system command {other:?}", config.id);
            }
        }
        return Ok(());
    }

    let frame = ChannelFrame { channel, flags: 0, payload };
    let payload_for_event = frame.payload.clone();
    match session.channels_mut().dispatch(frame) {
        Ok(()) => {
            let _ = config.events.send(ServerEvent::ChannelDataReceived {
                client_id: config.id,
                channel,
                payload: payload_for_event,
            });
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            warn!("client {}: {e}", config.id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn version_negotiation_accepts_rfb_3_8() {
        let (mut client, server) = duplex(4096);
        let mut wire = Wire::new(server);
        let handshake = tokio::spawn(async move { negotiate_version(&mut wire).await });

        let mut advertised = [0u8; 12];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut advertised).await.unwrap();
        assert_eq!(&advertised, PROTOCOL_VERSION.as_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut client, b"RFB 003.008\n").await.unwrap();

        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn security_negotiation_succeeds_with_none() {
        let (mut client, server) = duplex(4096);
        let mut wire = Wire::new(server);
        let handshake = tokio::spawn(async move { negotiate_security(&mut wire, &[]).await });

        let mut header = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut header).await.unwrap();
        assert_eq!(header, [1, SECURITY_TYPE_NONE]);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[SECURITY_TYPE_NONE]).await.unwrap();

        let mut result = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut result).await.unwrap();
        assert_eq!(u32::from_be_bytes(result), SECURITY_RESULT_OK);

        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn security_negotiation_rejects_bad_response() {
        let (mut client, server) = duplex(4096);
        let mut wire = Wire::new(server);
        let passwords = vec!["secret".to_string()];
        let handshake = tokio::spawn(async move { negotiate_security(&mut wire, &passwords).await });

        let mut header = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut header).await.unwrap();
        assert_eq!(header, [2, SECURITY_TYPE_VNC_AUTH, SECURITY_TYPE_NONE]);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[SECURITY_TYPE_VNC_AUTH]).await.unwrap();

        let mut challenge = [0u8; 16];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut challenge).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0u8; 16]).await.unwrap();

        assert!(handshake.await.unwrap().is_err());
    }
}
