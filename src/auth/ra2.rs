//! RA2 ("RSA-AES") authentication.
//!
//! A linear handshake: exchange RSA public keys, exchange RSA-encrypted
//! randoms, derive two directional AES-EAX session ciphers, exchange
//! authenticated hashes, then send credentials under the session cipher.
//!
//! The machine is resumable in the same way the rectangle decoders are —
//! [`Ra2Handshake::process`] consumes whatever bytes are queued and
//! reports [`Ra2Status::Pending`] when it needs more — and additionally
//! suspends on two application-level events: the user approving the
//! server's key fingerprint, and the user supplying credentials. Tearing
//! the connection down fails any suspended wait with
//! [`RfbError::Disconnected`] instead of leaving it dangling.

use rand::RngCore;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::crypto::AesEax;
use crate::error::RfbError;
use crate::socket::Socket;

/// Fresh keypair size for every handshake; keys are never reused across
/// connections.
const CLIENT_KEY_BITS: usize = 2048;
const CLIENT_KEY_BYTES: usize = CLIENT_KEY_BITS / 8;

// ── Credentials ──────────────────────────────────────────────────

/// Credentials supplied by the embedding application. The handshake polls
/// these on every [`Ra2Handshake::process`] call, so they may show up at
/// any point after the `CredentialsRequired` signal.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

// ── Ra2Cipher ────────────────────────────────────────────────────

/// One direction of the authenticated session channel.
///
/// Each direction has its own AES-EAX cipher and its own 128-bit
/// big-endian message counter, used as the AEAD nonce and incremented by
/// exactly one after every message — the two directions never share
/// counter state.
pub struct Ra2Cipher {
    eax: AesEax,
    counter: [u8; 16],
}

impl Ra2Cipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            eax: AesEax::new(key),
            counter: [0; 16],
        }
    }

    /// Wrap a message: `u16 plaintext-length || ciphertext || tag`, with
    /// the length doubling as AEAD associated data.
    pub fn make_message(&mut self, message: &[u8]) -> Vec<u8> {
        let ad = (message.len() as u16).to_be_bytes();
        let mut out = Vec::with_capacity(2 + message.len() + 16);
        out.extend_from_slice(&ad);
        out.extend_from_slice(&self.eax.encrypt(&self.counter, &ad, message));
        self.increment_counter();
        out
    }

    /// Unwrap `ciphertext || tag` for a message of the given advertised
    /// plaintext length. Returns `None` when authentication fails. The
    /// counter advances either way — the message occupied its slot.
    pub fn receive_message(&mut self, length: usize, data: &[u8]) -> Option<Vec<u8>> {
        let ad = (length as u16).to_be_bytes();
        let result = self.eax.decrypt(&self.counter, &ad, data);
        self.increment_counter();
        result
    }

    /// Current counter value (the next message's nonce).
    pub fn counter(&self) -> &[u8; 16] {
        &self.counter
    }

    fn increment_counter(&mut self) {
        for byte in self.counter.iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }
}

// ── Handshake ────────────────────────────────────────────────────

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ra2Status {
    /// Waiting on more socket bytes, on `approve_server`, or on
    /// credentials; invoke `process` again when any of those change.
    Pending,
    /// The server's public key needs an out-of-band trust decision. Call
    /// [`Ra2Handshake::approve_server`] to continue. Raised once.
    VerifyServer { public_key: Vec<u8> },
    /// Credentials of the given kinds are needed. Raised once.
    CredentialsRequired { types: &'static [&'static str] },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ServerPublicKey,
    AwaitKeyApproval,
    ServerRandom,
    ServerHash,
    Subtype,
    Credentials,
    Done,
    Failed,
}

pub struct Ra2Handshake {
    state: State,
    /// Server modulus length in bytes; zero until the length field has
    /// been read and validated.
    server_key_bytes: usize,
    server_public_key: Vec<u8>,
    server_rsa: Option<RsaPublicKey>,
    client_rsa: Option<RsaPrivateKey>,
    client_public_key: Vec<u8>,
    client_random: [u8; 16],
    client_cipher: Option<Ra2Cipher>,
    server_cipher: Option<Ra2Cipher>,
    expected_server_hash: [u8; 20],
    subtype: u8,
    approved: bool,
    verify_raised: bool,
    credentials_raised: bool,
}

impl Ra2Handshake {
    pub fn new() -> Self {
        Self {
            state: State::ServerPublicKey,
            server_key_bytes: 0,
            server_public_key: Vec::new(),
            server_rsa: None,
            client_rsa: None,
            client_public_key: Vec::new(),
            client_random: [0; 16],
            client_cipher: None,
            server_cipher: None,
            expected_server_hash: [0; 20],
            subtype: 0,
            approved: false,
            verify_raised: false,
            credentials_raised: false,
        }
    }

    /// The user accepted the server's key; the handshake resumes on the
    /// next `process` call.
    pub fn approve_server(&mut self) {
        self.approved = true;
    }

    /// Tear down: any suspended wait resolves to `Err(Disconnected)`.
    pub fn disconnect(&mut self) {
        self.state = State::Failed;
    }

    /// Drive the handshake as far as the queued bytes, approval state and
    /// credentials allow.
    pub fn process(
        &mut self,
        sock: &mut Socket,
        credentials: &Credentials,
    ) -> Result<Ra2Status, RfbError> {
        loop {
            match self.state {
                State::ServerPublicKey => {
                    match self.read_server_public_key(sock)? {
                        None => return Ok(Ra2Status::Pending),
                        Some(()) => {}
                    }
                    self.state = State::AwaitKeyApproval;
                    if !self.verify_raised {
                        self.verify_raised = true;
                        return Ok(Ra2Status::VerifyServer {
                            public_key: self.server_public_key.clone(),
                        });
                    }
                }
                State::AwaitKeyApproval => {
                    if !self.approved {
                        return Ok(Ra2Status::Pending);
                    }
                    self.send_client_public_key(sock)?;
                    self.send_client_random(sock)?;
                    self.state = State::ServerRandom;
                }
                State::ServerRandom => {
                    if sock.rq_wait(2 + CLIENT_KEY_BYTES, 0) {
                        return Ok(Ra2Status::Pending);
                    }
                    self.read_server_random_and_derive(sock)?;
                    self.state = State::ServerHash;
                }
                State::ServerHash => {
                    if sock.rq_wait(2 + 20 + 16, 0) {
                        return Ok(Ra2Status::Pending);
                    }
                    self.verify_server_hash(sock)?;
                    self.state = State::Subtype;
                }
                State::Subtype => {
                    if sock.rq_wait(2 + 1 + 16, 0) {
                        return Ok(Ra2Status::Pending);
                    }
                    self.read_subtype(sock)?;
                    self.state = State::Credentials;
                    if !self.has_credentials(credentials) && !self.credentials_raised {
                        self.credentials_raised = true;
                        return Ok(Ra2Status::CredentialsRequired {
                            types: if self.subtype == 1 {
                                &["username", "password"]
                            } else {
                                &["password"]
                            },
                        });
                    }
                }
                State::Credentials => {
                    if !self.has_credentials(credentials) {
                        return Ok(Ra2Status::Pending);
                    }
                    self.send_credentials(sock, credentials)?;
                    self.state = State::Done;
                }
                State::Done => return Ok(Ra2Status::Done),
                State::Failed => return Err(RfbError::Disconnected),
            }
        }
    }

    // ── Steps ────────────────────────────────────────────────────

    fn read_server_public_key(&mut self, sock: &mut Socket) -> Result<Option<()>, RfbError> {
        if self.server_key_bytes == 0 {
            if sock.rq_wait(4, 0) {
                return Ok(None);
            }
            // Keep the raw length field: it is part of the exported key.
            let length_field = sock.rq_peek_bytes(4).to_vec();
            let bits = sock.rq_shift32();
            // Validated before any buffer is sized from it.
            if !(1024..=8192).contains(&bits) {
                return Err(RfbError::BadServerKeyLength(bits));
            }
            self.server_key_bytes = bits.div_ceil(8) as usize;
            self.server_public_key = length_field;
        }

        if sock.rq_wait(self.server_key_bytes * 2, 0) {
            return Ok(None);
        }

        let n = sock.rq_shift_bytes(self.server_key_bytes);
        let e = sock.rq_shift_bytes(self.server_key_bytes);

        let key = RsaPublicKey::new_with_max_size(
            BigUint::from_bytes_be(&n),
            BigUint::from_bytes_be(&e),
            8192,
        )
        .map_err(|e| RfbError::Rsa(format!("bad server public key: {e}")))?;
        self.server_rsa = Some(key);

        self.server_public_key.extend_from_slice(&n);
        self.server_public_key.extend_from_slice(&e);

        Ok(Some(()))
    }

    fn send_client_public_key(&mut self, sock: &mut Socket) -> Result<(), RfbError> {
        debug!(bits = CLIENT_KEY_BITS, "generating client RSA keypair");
        let key = RsaPrivateKey::new(&mut OsRng, CLIENT_KEY_BITS)?;

        let n = pad_be(&key.n().to_bytes_be(), CLIENT_KEY_BYTES);
        let e = pad_be(&key.e().to_bytes_be(), CLIENT_KEY_BYTES);

        let mut wire = (CLIENT_KEY_BITS as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&n);
        wire.extend_from_slice(&e);

        sock.sq_push_bytes(&wire)?;
        sock.flush()?;

        self.client_public_key = wire;
        self.client_rsa = Some(key);
        Ok(())
    }

    fn send_client_random(&mut self, sock: &mut Socket) -> Result<(), RfbError> {
        OsRng.fill_bytes(&mut self.client_random);

        let server_rsa = self.server_rsa.as_ref().ok_or(RfbError::Disconnected)?;
        let encrypted = server_rsa.encrypt(&mut OsRng, Pkcs1v15Encrypt, &self.client_random)?;

        sock.sq_push16(self.server_key_bytes as u16)?;
        sock.sq_push_bytes(&encrypted)?;
        sock.flush()
    }

    fn read_server_random_and_derive(&mut self, sock: &mut Socket) -> Result<(), RfbError> {
        if sock.rq_shift16() as usize != CLIENT_KEY_BYTES {
            return Err(RfbError::ProtocolViolation(
                "RA2: wrong encrypted message length".into(),
            ));
        }
        let encrypted = sock.rq_shift_bytes(CLIENT_KEY_BYTES);
        let client_rsa = self.client_rsa.as_ref().ok_or(RfbError::Disconnected)?;
        let server_random = client_rsa
            .decrypt(Pkcs1v15Encrypt, &encrypted)
            .map_err(|_| RfbError::AuthenticationFailed("corrupted server encrypted random"))?;
        if server_random.len() != 16 {
            return Err(RfbError::AuthenticationFailed(
                "corrupted server encrypted random",
            ));
        }

        // Session keys: SHA-1 over the concatenated randoms, truncated to
        // 16 bytes. The concatenation order differs per direction and must
        // not be swapped.
        let client_key = session_key(&server_random, &self.client_random);
        let server_key = session_key(&self.client_random, &server_random);
        self.client_cipher = Some(Ra2Cipher::new(&client_key));
        self.server_cipher = Some(Ra2Cipher::new(&server_key));

        // Hashes over both exported public keys, again direction-ordered.
        let mut server_hash_input = self.server_public_key.clone();
        server_hash_input.extend_from_slice(&self.client_public_key);
        self.expected_server_hash = Sha1::digest(&server_hash_input).into();

        let mut client_hash_input = self.client_public_key.clone();
        client_hash_input.extend_from_slice(&self.server_public_key);
        let client_hash: [u8; 20] = Sha1::digest(&client_hash_input).into();

        let client_cipher = self.client_cipher.as_mut().ok_or(RfbError::Disconnected)?;
        let message = client_cipher.make_message(&client_hash);
        sock.sq_push_bytes(&message)?;
        sock.flush()
    }

    fn verify_server_hash(&mut self, sock: &mut Socket) -> Result<(), RfbError> {
        if sock.rq_shift16() != 20 {
            return Err(RfbError::ProtocolViolation("RA2: wrong server hash".into()));
        }
        let data = sock.rq_shift_bytes(20 + 16);
        let server_cipher = self.server_cipher.as_mut().ok_or(RfbError::Disconnected)?;
        let received = server_cipher
            .receive_message(20, &data)
            .ok_or(RfbError::AuthenticationFailed("message failed to authenticate"))?;

        if received[..] != self.expected_server_hash[..] {
            return Err(RfbError::AuthenticationFailed("wrong server hash"));
        }
        Ok(())
    }

    fn read_subtype(&mut self, sock: &mut Socket) -> Result<(), RfbError> {
        if sock.rq_shift16() != 1 {
            return Err(RfbError::ProtocolViolation("RA2: wrong subtype".into()));
        }
        let data = sock.rq_shift_bytes(1 + 16);
        let server_cipher = self.server_cipher.as_mut().ok_or(RfbError::Disconnected)?;
        let subtype = server_cipher
            .receive_message(1, &data)
            .ok_or(RfbError::AuthenticationFailed("message failed to authenticate"))?[0];

        if subtype != 1 && subtype != 2 {
            return Err(RfbError::ProtocolViolation(format!(
                "RA2: wrong subtype {subtype}"
            )));
        }
        self.subtype = subtype;
        Ok(())
    }

    fn has_credentials(&self, credentials: &Credentials) -> bool {
        match self.subtype {
            1 => credentials.username.is_some() && credentials.password.is_some(),
            2 => credentials.password.is_some(),
            _ => false,
        }
    }

    fn send_credentials(
        &mut self,
        sock: &mut Socket,
        credentials: &Credentials,
    ) -> Result<(), RfbError> {
        // UTF-8 encoded, truncated to 255 bytes per field. Subtype 2 sends
        // a zero-length username.
        let username = if self.subtype == 1 {
            truncated(credentials.username.as_deref().unwrap_or(""))
        } else {
            &[]
        };
        let password = truncated(credentials.password.as_deref().unwrap_or(""));

        let mut message = Vec::with_capacity(2 + username.len() + password.len());
        message.push(username.len() as u8);
        message.extend_from_slice(username);
        message.push(password.len() as u8);
        message.extend_from_slice(password);

        let client_cipher = self.client_cipher.as_mut().ok_or(RfbError::Disconnected)?;
        let wrapped = client_cipher.make_message(&message);
        sock.sq_push_bytes(&wrapped)?;
        sock.flush()
    }
}

impl Default for Ra2Handshake {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn session_key(first: &[u8], second: &[u8]) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(first);
    hasher.update(second);
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// Left-pad big-endian bytes to `size` (BigUint drops leading zeros).
fn pad_be(bytes: &[u8], size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size];
    out[size - bytes.len()..].copy_from_slice(bytes);
    out
}

fn truncated(s: &str) -> &[u8] {
    let bytes = s.as_bytes();
    &bytes[..bytes.len().min(255)]
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::socket_with_data;

    #[test]
    fn counter_increments_big_endian_with_carry() {
        let mut cipher = Ra2Cipher::new(&[0u8; 16]);
        for _ in 0..3 {
            cipher.make_message(b"x");
        }
        let mut expected = [0u8; 16];
        expected[15] = 3;
        assert_eq!(cipher.counter(), &expected);
    }

    #[test]
    fn counter_carry_propagates_across_all_bytes() {
        let mut cipher = Ra2Cipher::new(&[0u8; 16]);
        cipher.counter = [0xff; 16];
        cipher.make_message(b"x");
        assert_eq!(cipher.counter(), &[0u8; 16]);

        cipher.counter = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0xff];
        cipher.make_message(b"x");
        assert_eq!(
            cipher.counter(),
            &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0]
        );
    }

    #[test]
    fn directions_never_share_counter_state() {
        let mut a = Ra2Cipher::new(&[1u8; 16]);
        let mut b = Ra2Cipher::new(&[2u8; 16]);
        a.make_message(b"one");
        a.make_message(b"two");
        b.make_message(b"one");
        assert_eq!(a.counter()[15], 2);
        assert_eq!(b.counter()[15], 1);
    }

    #[test]
    fn message_framing_roundtrip() {
        let key = [0x42u8; 16];
        let mut sender = Ra2Cipher::new(&key);
        let mut receiver = Ra2Cipher::new(&key);

        let wire = sender.make_message(b"hello ra2");
        assert_eq!(wire.len(), 2 + 9 + 16);
        assert_eq!(&wire[..2], &[0, 9]);

        let plain = receiver.receive_message(9, &wire[2..]).unwrap();
        assert_eq!(plain, b"hello ra2");
    }

    #[test]
    fn tampered_message_is_rejected_but_counter_advances() {
        let key = [0x42u8; 16];
        let mut sender = Ra2Cipher::new(&key);
        let mut receiver = Ra2Cipher::new(&key);

        let mut wire = sender.make_message(b"payload");
        wire[3] ^= 0x01;
        assert!(receiver.receive_message(7, &wire[2..]).is_none());
        assert_eq!(receiver.counter()[15], 1);
    }

    #[test]
    fn key_length_below_1024_is_rejected_before_allocation() {
        let mut sock = socket_with_data(&[0x00, 0x00, 0x01, 0x00]); // 256 bits
        let mut hs = Ra2Handshake::new();
        assert!(matches!(
            hs.process(&mut sock, &Credentials::default()),
            Err(RfbError::BadServerKeyLength(256))
        ));
    }

    #[test]
    fn key_length_above_8192_is_rejected() {
        let mut sock = socket_with_data(&[0x00, 0x01, 0x00, 0x01]); // 65537 bits
        let mut hs = Ra2Handshake::new();
        assert!(matches!(
            hs.process(&mut sock, &Credentials::default()),
            Err(RfbError::BadServerKeyLength(65537))
        ));
    }

    #[test]
    fn pending_until_length_field_arrives() {
        let mut sock = socket_with_data(&[0x00, 0x00]);
        let mut hs = Ra2Handshake::new();
        assert_eq!(
            hs.process(&mut sock, &Credentials::default()).unwrap(),
            Ra2Status::Pending
        );
    }

    #[test]
    fn disconnect_fails_suspended_waits_distinguishably() {
        let mut sock = socket_with_data(&[]);
        let mut hs = Ra2Handshake::new();
        assert_eq!(
            hs.process(&mut sock, &Credentials::default()).unwrap(),
            Ra2Status::Pending
        );

        hs.disconnect();
        assert!(matches!(
            hs.process(&mut sock, &Credentials::default()),
            Err(RfbError::Disconnected)
        ));
    }
}
