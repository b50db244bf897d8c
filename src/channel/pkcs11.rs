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

//! PKCS#11 bridge sub-protocol (spec.md §4.6, §6), carried over a
//! non-zero LTSM channel. Like the FUSE bridge, every field is
//! little-endian. The client end loads a Cryptoki provider and executes
//! requests; the server end issues them and consumes replies.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VncError};

/// PKCS#11 bridge operation codes (`0xFC01..0xFC12`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Pkcs11Op {
    Init = 0xFC01,
    GetSlots = 0xFC02,
    GetSlotMechanisms = 0xFC03,
    GetSlotCertificates = 0xFC04,
    SignData = 0xFC11,
    DecryptData = 0xFC12,
}

impl Pkcs11Op {
    /// Maps a raw `u16` op code back to its variant.
    pub fn from_u16(raw: u16) -> Result<Self> {
        Ok(match raw {
            0xFC01 => Pkcs11Op::Init,
            0xFC02 => Pkcs11Op::GetSlots,
            0xFC03 => Pkcs11Op::GetSlotMechanisms,
            0xFC04 => Pkcs11Op::GetSlotCertificates,
            0xFC11 => Pkcs11Op::SignData,
            0xFC12 => Pkcs11Op::DecryptData,
            other => return Err(VncError::ChannelError(format!("unknown PKCS#11 op code 0x{other:04x}"))),
        })
    }
}

fn put_bytes16(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(data);
}

fn get_bytes16(buf: &mut BytesMut) -> Result<Vec<u8>> {
    if buf.len() < 2 {
        return Err(VncError::ChannelError("truncated PKCS#11 u16-length field".into()));
    }
    let len = usize::from(buf.get_u16_le());
    if buf.len() < len {
        return Err(VncError::ChannelError("truncated PKCS#11 u16-length body".into()));
    }
    Ok(buf.split_to(len).to_vec())
}

/// A `SignData`/`DecryptData` request: `u64 slot, u64 mechType, u16
/// pinLen, bytes[pinLen], u16 certIdLen, bytes[certIdLen], u32 dataLen,
/// bytes[dataLen]` (spec.md §6). The client-side session logs in with
/// `pin`, finds the private key by `cert_id` (matched against
/// `CKA_ID`), and runs `C_SignInit`/`C_Sign` or the decrypt equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoOperation {
    /// Target slot id.
    pub slot: u64,
    /// Requested Cryptoki mechanism (`CKM_*`).
    pub mech_type: u64,
    /// User PIN for the session login.
    pub pin: Vec<u8>,
    /// Certificate/key id (`CKA_ID`) to operate with.
    pub cert_id: Vec<u8>,
    /// Data to sign or decrypt.
    pub data: Vec<u8>,
}

impl CryptoOperation {
    /// Encodes the request body (without the leading `u16` op code).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u64_le(self.slot);
        buf.put_u64_le(self.mech_type);
        put_bytes16(&mut buf, &self.pin);
        put_bytes16(&mut buf, &self.cert_id);
        buf.put_u32_le(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes a request body.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 16 {
            return Err(VncError::ChannelError("truncated PKCS#11 crypto request header".into()));
        }
        let slot = buf.get_u64_le();
        let mech_type = buf.get_u64_le();
        let pin = get_bytes16(buf)?;
        let cert_id = get_bytes16(buf)?;
        if buf.len() < 4 {
            return Err(VncError::ChannelError("truncated PKCS#11 crypto request data length".into()));
        }
        let data_len = buf.get_u32_le() as usize;
        if buf.len() < data_len {
            return Err(VncError::ChannelError("truncated PKCS#11 crypto request data".into()));
        }
        let data = buf.split_to(data_len).to_vec();
        Ok(Self { slot, mech_type, pin, cert_id, data })
    }

    /// Validates `mech_type` is in `supported` before the caller invokes
    /// the provider, per spec.md §9's resolved open question: reject a
    /// mechanism mismatch instead of silently forwarding it.
    pub fn check_mechanism_supported(&self, supported: &[u64]) -> Result<()> {
        if supported.contains(&self.mech_type) {
            Ok(())
        } else {
            Err(VncError::ChannelError(format!(
                "mechanism 0x{:016x} not supported on slot {}",
                self.mech_type, self.slot
            )))
        }
    }
}

/// Reply to `SignData`/`DecryptData`: `u32 outLen, bytes[outLen]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoReply {
    /// The signed/decrypted bytes.
    pub data: Vec<u8>,
}

impl CryptoReply {
    /// Encodes the reply.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.data.len());
        buf.put_u32_le(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes the reply.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 4 {
            return Err(VncError::ChannelError("truncated PKCS#11 crypto reply length".into()));
        }
        let len = buf.get_u32_le() as usize;
        if buf.len() < len {
            return Err(VncError::ChannelError("truncated PKCS#11 crypto reply body".into()));
        }
        Ok(Self { data: buf.split_to(len).to_vec() })
    }
}

/// One PKCS#11 slot's presence/info summary, as returned by `GetSlots`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSummary {
    /// Cryptoki slot id.
    pub slot_id: u64,
    /// Raw `CK_SLOT_INFO` bytes, if the provider reported one.
    pub slot_info: Option<Vec<u8>>,
    /// Raw `CK_TOKEN_INFO` bytes, if the provider reported one.
    pub token_info: Option<Vec<u8>>,
}

fn put_optional_info(buf: &mut BytesMut, info: &Option<Vec<u8>>) {
    match info {
        Some(bytes) => {
            buf.put_u8(1);
            put_bytes16(buf, bytes);
        }
        None => buf.put_u8(0),
    }
}

fn get_optional_info(buf: &mut BytesMut) -> Result<Option<Vec<u8>>> {
    if buf.is_empty() {
        return Err(VncError::ChannelError("truncated PKCS#11 slot info presence flag".into()));
    }
    if buf.get_u8() == 0 {
        Ok(None)
    } else {
        Ok(Some(get_bytes16(buf)?))
    }
}

/// `GetSlots` request: `u8 tokenPresentOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetSlotsRequest {
    /// If true, only slots with a token present are returned.
    pub token_present_only: bool,
}

impl GetSlotsRequest {
    /// Encodes the request body.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1);
        buf.put_u8(u8::from(self.token_present_only));
        buf
    }

    /// Decodes the request body.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.is_empty() {
            return Err(VncError::ChannelError("truncated GetSlots request".into()));
        }
        Ok(Self { token_present_only: buf.get_u8() != 0 })
    }
}

/// `GetSlots` reply: `u16 count` then per-slot summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSlotsReply {
    /// Slot summaries, in provider enumeration order.
    pub slots: Vec<SlotSummary>,
}

impl GetSlotsReply {
    /// Encodes the reply.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16_le(self.slots.len() as u16);
        for slot in &self.slots {
            buf.put_u64_le(slot.slot_id);
            put_optional_info(&mut buf, &slot.slot_info);
            put_optional_info(&mut buf, &slot.token_info);
        }
        buf
    }

    /// Decodes the reply.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 2 {
            return Err(VncError::ChannelError("truncated GetSlots reply count".into()));
        }
        let count = buf.get_u16_le();
        let mut slots = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            if buf.len() < 8 {
                return Err(VncError::ChannelError("truncated GetSlots reply entry".into()));
            }
            let slot_id = buf.get_u64_le();
            let slot_info = get_optional_info(buf)?;
            let token_info = get_optional_info(buf)?;
            slots.push(SlotSummary { slot_id, slot_info, token_info });
        }
        Ok(Self { slots })
    }
}

/// `Init` reply: `u16 errLen, bytes[errLen]` then, only on success (an
/// empty error string), `u16 ver` and the raw Cryptoki library-info
/// struct bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitReply {
    /// The provider failed to load.
    Error(String),
    /// The provider loaded successfully.
    Ok {
        /// Negotiated protocol version.
        ver: u16,
        /// Raw `CK_INFO` bytes (cryptoki version, manufacturer, flags,
        /// description) as reported by the provider.
        library_info: Vec<u8>,
    },
}

impl InitReply {
    /// Encodes the reply.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            InitReply::Error(reason) => {
                let bytes = reason.as_bytes();
                buf.put_u16_le(bytes.len() as u16);
                buf.put_slice(bytes);
            }
            InitReply::Ok { ver, library_info } => {
                buf.put_u16_le(0);
                buf.put_u16_le(*ver);
                buf.extend_from_slice(library_info);
            }
        }
        buf
    }

    /// Decodes the reply.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < 2 {
            return Err(VncError::ChannelError("truncated PKCS#11 Init reply".into()));
        }
        let err_len = usize::from(buf.get_u16_le());
        if err_len > 0 {
            if buf.len() < err_len {
                return Err(VncError::ChannelError("truncated PKCS#11 Init error string".into()));
            }
            let reason = String::from_utf8_lossy(&buf.split_to(err_len)).into_owned();
            return Ok(InitReply::Error(reason));
        }
        if buf.len() < 2 {
            return Err(VncError::ChannelError("truncated PKCS#11 Init version".into()));
        }
        let ver = buf.get_u16_le();
        let library_info = buf.split_off(0).to_vec();
        Ok(InitReply::Ok { ver, library_info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_operation_round_trips() {
        let op = CryptoOperation {
            slot: 1,
            mech_type: 0x0000_0001,
            pin: b"1234".to_vec(),
            cert_id: vec![0xAA, 0xBB],
            data: b"sign me".to_vec(),
        };
        let mut encoded = op.encode();
        assert_eq!(CryptoOperation::decode(&mut encoded).unwrap(), op);
    }

    #[test]
    fn mechanism_check_rejects_unsupported() {
        let op = CryptoOperation { slot: 0, mech_type: 99, pin: vec![], cert_id: vec![], data: vec![] };
        assert!(op.check_mechanism_supported(&[1, 2, 3]).is_err());
        assert!(op.check_mechanism_supported(&[99]).is_ok());
    }

    #[test]
    fn crypto_reply_round_trips() {
        let reply = CryptoReply { data: vec![1, 2, 3, 4, 5] };
        let mut encoded = reply.encode();
        assert_eq!(CryptoReply::decode(&mut encoded).unwrap(), reply);
    }

    #[test]
    fn get_slots_round_trips_with_mixed_info_presence() {
        let reply = GetSlotsReply {
            slots: vec![
                SlotSummary { slot_id: 0, slot_info: Some(vec![1, 2]), token_info: None },
                SlotSummary { slot_id: 1, slot_info: None, token_info: Some(vec![3, 4, 5]) },
            ],
        };
        let mut encoded = reply.encode();
        assert_eq!(GetSlotsReply::decode(&mut encoded).unwrap(), reply);
    }

    #[test]
    fn init_reply_round_trips_both_variants() {
        let err = InitReply::Error("provider not found".into());
        let mut encoded = err.encode();
        assert_eq!(InitReply::decode(&mut encoded).unwrap(), err);

        let ok = InitReply::Ok { ver: 20240723, library_info: vec![1, 2, 3, 4] };
        let mut encoded = ok.encode();
        assert_eq!(InitReply::decode(&mut encoded).unwrap(), ok);
    }
}
