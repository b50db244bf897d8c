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

//! Client-to-server message parsing (spec.md §4.4.4), split out of the
//! connection driver so the wire grammar can be exercised without a live
//! socket.

use bytes::BytesMut;

use crate::error::{Result, VncError};
use crate::protocol::{
    ClientMessage, PixelFormat, ScreenInfo, CLIENT_MSG_CLIENT_CUT_TEXT,
    CLIENT_MSG_ENABLE_CONTINUOUS_UPDATES, CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST,
    CLIENT_MSG_KEY_EVENT, CLIENT_MSG_LTSM, CLIENT_MSG_POINTER_EVENT, CLIENT_MSG_SET_DESKTOP_SIZE,
    CLIENT_MSG_SET_ENCODINGS, CLIENT_MSG_SET_PIXEL_FORMAT,
};
use crate::wire::{SecureStream, Wire};

/// Reads one complete `ClientMessage` off `wire`, blocking (asynchronously)
/// until the message type byte and its full body have arrived.
pub async fn read_client_message<S: SecureStream>(wire: &mut Wire<S>) -> Result<ClientMessage> {
    let msg_type = wire.read_u8().await?;
    match msg_type {
        CLIENT_MSG_SET_PIXEL_FORMAT => {
            wire.skip(3).await?;
            let raw = wire.read_exact(16).await?;
            let mut buf = BytesMut::from(&raw[..]);
            let pf = PixelFormat::from_bytes(&mut buf)?;
            Ok(ClientMessage::SetPixelFormat(pf))
        }
        CLIENT_MSG_SET_ENCODINGS => {
            wire.skip(1).await?;
            let count = wire.read_u16_be().await?;
            let mut encodings = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                encodings.push(wire.read_i32_be().await?);
            }
            Ok(ClientMessage::SetEncodings(encodings))
        }
        CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
            let incremental = wire.read_u8().await? != 0;
            let x = wire.read_u16_be().await?;
            let y = wire.read_u16_be().await?;
            let width = wire.read_u16_be().await?;
            let height = wire.read_u16_be().await?;
            Ok(ClientMessage::FramebufferUpdateRequest { incremental, x, y, width, height })
        }
        CLIENT_MSG_KEY_EVENT => {
            let down = wire.read_u8().await? != 0;
            wire.skip(2).await?;
            let key = wire.read_u32_be().await?;
            Ok(ClientMessage::KeyEvent { down, key })
        }
        CLIENT_MSG_POINTER_EVENT => {
            let button_mask = wire.read_u8().await?;
            let x = wire.read_u16_be().await?;
            let y = wire.read_u16_be().await?;
            Ok(ClientMessage::PointerEvent { button_mask, x, y })
        }
        CLIENT_MSG_CLIENT_CUT_TEXT => {
            wire.skip(3).await?;
            let length = wire.read_i32_be().await?;
            if length >= 0 {
                let bytes = wire.read_exact(length as usize).await?;
                let text = String::from_utf8_lossy(&bytes).into_owned();
                Ok(ClientMessage::ClientCutText(text))
            } else {
                let len = length
                    .checked_neg()
                    .ok_or_else(|| VncError::Format("ClientCutText length overflow".into()))?;
                let payload = wire.read_exact(len as usize).await?;
                Ok(ClientMessage::ExtClipboard(payload))
            }
        }
        CLIENT_MSG_ENABLE_CONTINUOUS_UPDATES => {
            let enable = wire.read_u8().await? != 0;
            let x = wire.read_u16_be().await?;
            let y = wire.read_u16_be().await?;
            let width = wire.read_u16_be().await?;
            let height = wire.read_u16_be().await?;
            Ok(ClientMessage::EnableContinuousUpdates { enable, x, y, width, height })
        }
        CLIENT_MSG_SET_DESKTOP_SIZE => {
            wire.skip(1).await?;
            let width = wire.read_u16_be().await?;
            let height = wire.read_u16_be().await?;
            let screen_count = wire.read_u8().await?;
            wire.skip(1).await?;
            let mut screens = Vec::with_capacity(usize::from(screen_count));
            for _ in 0..screen_count {
                let id = wire.read_u32_be().await?;
                let x = wire.read_u16_be().await?;
                let y = wire.read_u16_be().await?;
                let w = wire.read_u16_be().await?;
                let h = wire.read_u16_be().await?;
                let flags = wire.read_u32_be().await?;
                screens.push(ScreenInfo { id, x, y, w, h, flags });
            }
            Ok(ClientMessage::SetDesktopSize { width, height, screens })
        }
        CLIENT_MSG_LTSM => {
            let channel = wire.read_u8().await?;
            let flags = wire.read_u16_be().await?;
            let length = wire.read_u32_be().await?;
            let payload = wire.read_exact(length as usize).await?;
            Ok(ClientMessage::Ltsm { channel, flags, payload })
        }
        other => Err(VncError::Format(format!("unknown client message type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use tokio::io::duplex;

    use super::*;
    use crate::wire::Wire;

    async fn feed_and_parse(bytes: &[u8]) -> Result<ClientMessage> {
        let (client, server) = duplex(4096);
        let mut server_wire = Wire::new(server);
        let mut client_half = client;
        tokio::io::AsyncWriteExt::write_all(&mut client_half, bytes).await.unwrap();
        drop(client_half);
        read_client_message(&mut server_wire).await
    }

    #[tokio::test]
    async fn parses_framebuffer_update_request() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(3); // message type
        bytes.put_u8(1); // incremental
        bytes.put_u16(0);
        bytes.put_u16(0);
        bytes.put_u16(800);
        bytes.put_u16(600);

        let msg = feed_and_parse(&bytes).await.unwrap();
        match msg {
            ClientMessage::FramebufferUpdateRequest { incremental, width, height, .. } => {
                assert!(incremental);
                assert_eq!(width, 800);
                assert_eq!(height, 600);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn parses_set_encodings() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(2);
        bytes.put_u8(0);
        bytes.put_u16(2);
        bytes.put_i32(15);
        bytes.put_i32(0);

        let msg = feed_and_parse(&bytes).await.unwrap();
        match msg {
            ClientMessage::SetEncodings(list) => assert_eq!(list, vec![15, 0]),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn parses_negative_length_cut_text_as_ext_clipboard() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(6);
        bytes.put_u8(0);
        bytes.put_u8(0);
        bytes.put_u8(0);
        bytes.put_i32(-4);
        bytes.put_slice(&[1, 2, 3, 4]);

        let msg = feed_and_parse(&bytes).await.unwrap();
        match msg {
            ClientMessage::ExtClipboard(payload) => assert_eq!(payload, vec![1, 2, 3, 4]),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn parses_ltsm_channel_frame() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(119);
        bytes.put_u8(3); // channel
        bytes.put_u16(0); // flags
        bytes.put_u32(5);
        bytes.put_slice(b"hello");

        let msg = feed_and_parse(&bytes).await.unwrap();
        match msg {
            ClientMessage::Ltsm { channel, payload, .. } => {
                assert_eq!(channel, 3);
                assert_eq!(payload, b"hello");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_unknown_message_type() {
        let bytes = [250u8];
        assert!(feed_and_parse(&bytes).await.is_err());
    }
}
