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

//! Security-type handshakes (spec.md §4.4.2): VNC DES challenge-response,
//! the VeNCrypt TLS sub-handshake, and a GSSAPI negotiation-shape stub.

use std::sync::Arc;

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{rustls, TlsAcceptor};

use crate::error::{Result, SecurityError, VncError};

/// Length of a VNC authentication challenge/response, in bytes.
pub const CHALLENGE_LEN: usize = 16;

/// Bit-reverses each byte of `password` (truncated/zero-padded to 8
/// bytes) to build the DES key VNC auth historically used — a quirk of
/// the original RFB implementation, not a real security property.
fn des_key_from_password(password: &[u8]) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (i, slot) in key.iter_mut().enumerate() {
        *slot = password.get(i).copied().unwrap_or(0).reverse_bits();
    }
    key
}

fn des_encrypt_block(key: &[u8; 8], block: &mut [u8; 8]) {
    let cipher = Des::new(GenericArray::from_slice(key));
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    block.copy_from_slice(ga.as_slice());
}

/// VNC authentication: a 16-byte random challenge, DES-encrypted in two
/// 8-byte ECB blocks under a password-derived key.
pub struct VncAuth;

impl VncAuth {
    /// Generates a fresh 16-byte challenge.
    #[must_use]
    pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);
        challenge
    }

    /// Encrypts `challenge` under `password` the way a conforming client
    /// does, producing the expected response.
    #[must_use]
    pub fn expected_response(challenge: &[u8; CHALLENGE_LEN], password: &[u8]) -> [u8; CHALLENGE_LEN] {
        let key = des_key_from_password(password);
        let mut out = [0u8; CHALLENGE_LEN];
        for (chunk_in, chunk_out) in challenge.chunks_exact(8).zip(out.chunks_exact_mut(8)) {
            let mut block: [u8; 8] = chunk_in.try_into().unwrap();
            des_encrypt_block(&key, &mut block);
            chunk_out.copy_from_slice(&block);
        }
        out
    }

    /// Checks `response` against `challenge` for any password in
    /// `candidates` (one line per entry of the password file, spec.md
    /// §6 "Persisted state"), succeeding on the first match.
    #[must_use]
    pub fn verify_response(
        challenge: &[u8; CHALLENGE_LEN],
        response: &[u8; CHALLENGE_LEN],
        candidates: &[String],
    ) -> bool {
        candidates
            .iter()
            .any(|password| Self::expected_response(challenge, password.as_bytes()) == *response)
    }

    /// Fails a security handshake with the standard `AuthFailed` kind.
    pub fn auth_failed() -> VncError {
        VncError::HandshakeSecurity(SecurityError::AuthFailed)
    }
}

/// Minimal shape of a GSSAPI negotiation result. This crate does not
/// implement Kerberos context establishment itself (spec.md §1
/// Non-goals treat the cryptographic transport as an external
/// collaborator) — `negotiate` models only the wire-visible shape: a
/// caller supplies an already-established context's accept/reject
/// outcome and this records whether the post-auth `continue:tls` JSON
/// blob chains into VeNCrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GssapiOutcome {
    /// Whether the context negotiation (performed by the caller's
    /// Kerberos library) succeeded.
    pub accepted: bool,
    /// Whether the post-auth blob requested chaining into a VeNCrypt
    /// TLS tunnel.
    pub continue_tls: bool,
}

/// Parses the optional post-GSSAPI JSON blob (`{"continue":"tls"}`) into
/// a `continue_tls` flag. Any other or absent blob means no chaining.
#[must_use]
pub fn parse_gssapi_continuation(blob: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(blob)
        .ok()
        .and_then(|v| v.get("continue").and_then(|c| c.as_str()).map(|s| s == "tls"))
        .unwrap_or(false)
}

/// VeNCrypt's own sub-negotiation version, always 0.2 for the subtypes
/// this crate offers.
pub const VENCRYPT_MAJOR: u8 = 0;
pub const VENCRYPT_MINOR: u8 = 2;

/// VeNCrypt subtypes this crate accepts, in preference order. Plain and
/// the non-TLS `X509None`/anonymous variants are deliberately absent —
/// every TLS subtype here terminates in a real certificate handshake.
pub const VENCRYPT_X509VNC: u32 = 261;
pub const VENCRYPT_X509PLAIN: u32 = 262;

/// Wraps a `tokio_rustls::TlsAcceptor` for the VeNCrypt `X509Vnc`/
/// `X509Plain` subtypes: once the client picks one of
/// [`VENCRYPT_X509VNC`]/[`VENCRYPT_X509PLAIN`], every remaining protocol
/// byte (including the VNC auth that follows, for `X509Vnc`) flows
/// through the returned TLS stream.
#[derive(Clone)]
pub struct VeNCryptAcceptor {
    inner: TlsAcceptor,
}

impl VeNCryptAcceptor {
    /// Builds an acceptor from an already-assembled `rustls` server
    /// config (certificate chain + private key loaded by the caller via
    /// `rustls-pemfile`, per spec.md §6 configuration).
    #[must_use]
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self { inner: TlsAcceptor::from(config) }
    }

    /// Completes the TLS server handshake over `stream`, handing back a
    /// wire-compatible `AsyncRead + AsyncWrite` for the rest of the
    /// session.
    pub async fn accept<S>(&self, stream: S) -> Result<tokio_rustls::server::TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| VncError::HandshakeSecurity(SecurityError::TlsFailed(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password_verifies() {
        let challenge = [1u8; CHALLENGE_LEN];
        let response = VncAuth::expected_response(&challenge, b"secret");
        assert!(VncAuth::verify_response(&challenge, &response, &["wrong".into(), "secret".into()]));
    }

    #[test]
    fn mismatched_password_fails() {
        let challenge = VncAuth::generate_challenge();
        let response = VncAuth::expected_response(&challenge, b"secret");
        assert!(!VncAuth::verify_response(&challenge, &response, &["other".into()]));
    }

    #[test]
    fn gssapi_continuation_detects_tls_chain() {
        assert!(parse_gssapi_continuation(br#"{"continue":"tls"}"#));
        assert!(!parse_gssapi_continuation(br#"{"continue":"none"}"#));
        assert!(!parse_gssapi_continuation(b"not json"));
    }
}
