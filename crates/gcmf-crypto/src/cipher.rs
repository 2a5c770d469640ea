//! Per-session AES-256-GCM state: key schedule, nonce cursor and AAD.
//!
//! The nonce width is chosen at runtime and may be any length of at least
//! 12 bytes, while `aes-gcm` fixes it in the type. 12-byte nonces use
//! `AesGcm` directly; every other width goes through `WideNonceGcm`, which
//! derives the initial counter block with GHASH as GCM prescribes.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use ctr::cipher::{BlockEncrypt, InnerIvInit, StreamCipher, StreamCipherCoreWrapper};
use ctr::flavors::Ctr32BE;
use ctr::CtrCore;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroize;

use crate::error::StreamError;
use crate::keys::StreamKey;
use crate::nonce;
use crate::{KEY_SIZE, MIN_NONCE_SIZE, TAG_SIZE};

trait GcmVariant: Send + Sync {
    fn seal(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error>;
    fn open(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error>;
}

impl GcmVariant for AesGcm<Aes256, U12> {
    fn seal(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        self.encrypt(Nonce::<Self>::from_slice(nonce), Payload { msg, aad })
    }

    fn open(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        self.decrypt(Nonce::<Self>::from_slice(nonce), Payload { msg, aad })
    }
}

type CtrStream<'a> = StreamCipherCoreWrapper<CtrCore<&'a Aes256, Ctr32BE>>;

/// AES-256-GCM for nonces of any width, built from the block cipher, GHASH
/// and a 32-bit big-endian counter.
struct WideNonceGcm {
    cipher: Aes256,
    hash_key: ghash::Key,
}

impl WideNonceGcm {
    fn new(key: &[u8]) -> Result<Self, StreamError> {
        let cipher = Aes256::new_from_slice(key).map_err(|_| StreamError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        let mut hash_key = ghash::Key::default();
        cipher.encrypt_block(&mut hash_key);
        Ok(Self { cipher, hash_key })
    }

    /// J0 = GHASH(IV || pad || 0^64 || [len(IV)]_64)
    fn initial_block(&self, nonce: &[u8]) -> ghash::Block {
        let mut ghash = GHash::new(&self.hash_key);
        ghash.update_padded(nonce);
        let mut lengths = ghash::Block::default();
        lengths[8..].copy_from_slice(&((nonce.len() as u64) * 8).to_be_bytes());
        ghash.update(&[lengths]);
        ghash.finalize()
    }

    /// Keystream positioned at J0: the first block masks the tag, the rest
    /// encrypts the payload.
    fn keystream(&self, nonce: &[u8]) -> (CtrStream<'_>, ghash::Block) {
        let j0 = self.initial_block(nonce);
        let mut ctr = CtrStream::from_core(CtrCore::inner_iv_init(&self.cipher, &j0));
        let mut mask = ghash::Block::default();
        ctr.apply_keystream(&mut mask);
        (ctr, mask)
    }

    fn tag(&self, mask: &ghash::Block, aad: &[u8], ciphertext: &[u8]) -> ghash::Block {
        let mut ghash = GHash::new(&self.hash_key);
        ghash.update_padded(aad);
        ghash.update_padded(ciphertext);
        let mut lengths = ghash::Block::default();
        lengths[..8].copy_from_slice(&((aad.len() as u64) * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&((ciphertext.len() as u64) * 8).to_be_bytes());
        ghash.update(&[lengths]);
        let mut tag = ghash.finalize();
        for (t, m) in tag.iter_mut().zip(mask.iter()) {
            *t ^= m;
        }
        tag
    }
}

impl GcmVariant for WideNonceGcm {
    fn seal(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let (mut ctr, mask) = self.keystream(nonce);
        let mut out = Vec::with_capacity(msg.len() + TAG_SIZE);
        out.extend_from_slice(msg);
        ctr.try_apply_keystream(&mut out).map_err(|_| aes_gcm::Error)?;
        let tag = self.tag(&mask, aad, &out);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn open(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let body_len = msg.len().checked_sub(TAG_SIZE).ok_or(aes_gcm::Error)?;
        let (body, tag) = msg.split_at(body_len);
        let (mut ctr, mask) = self.keystream(nonce);
        let expected = self.tag(&mask, aad, body);
        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return Err(aes_gcm::Error);
        }
        let mut out = body.to_vec();
        ctr.try_apply_keystream(&mut out).map_err(|_| aes_gcm::Error)?;
        Ok(out)
    }
}

impl Drop for WideNonceGcm {
    fn drop(&mut self) {
        self.hash_key.as_mut_slice().zeroize();
    }
}

fn build_gcm(key: &[u8], nonce_len: usize) -> Result<Box<dyn GcmVariant>, StreamError> {
    if nonce_len < MIN_NONCE_SIZE {
        return Err(StreamError::InvalidNonceLength {
            min: MIN_NONCE_SIZE,
            actual: nonce_len,
        });
    }
    if nonce_len == 12 {
        let gcm = AesGcm::<Aes256, U12>::new_from_slice(key).map_err(|_| {
            StreamError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: key.len(),
            }
        })?;
        return Ok(Box::new(gcm));
    }
    Ok(Box::new(WideNonceGcm::new(key)?))
}

/// AES-256-GCM bound to one stream: seals or opens chunk after chunk,
/// advancing the nonce by one each time.
///
/// The nonce only advances after a successful operation, so a failed open
/// leaves the cursor on the chunk that failed.
pub struct ChunkCipher {
    gcm: Box<dyn GcmVariant>,
    nonce: Vec<u8>,
    aad: Vec<u8>,
    chunk_index: u64,
}

impl ChunkCipher {
    /// Build a cipher for a session; `nonce` and `aad` are copied.
    pub fn new(key: &StreamKey, nonce: &[u8], aad: &[u8]) -> Result<Self, StreamError> {
        Ok(Self {
            gcm: build_gcm(key.as_bytes(), nonce.len())?,
            nonce: nonce.to_vec(),
            aad: aad.to_vec(),
            chunk_index: 0,
        })
    }

    /// Seal `plaintext` (possibly empty) as the next chunk.
    pub fn seal_next(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, StreamError> {
        let sealed = self
            .gcm
            .seal(&self.nonce, &self.aad, plaintext)
            .map_err(|_| StreamError::Seal {
                chunk: self.chunk_index,
            })?;
        self.advance();
        Ok(sealed)
    }

    /// Authenticate and decrypt the next chunk.
    pub fn open_next(&mut self, sealed: &[u8]) -> Result<Vec<u8>, StreamError> {
        if sealed.len() < TAG_SIZE {
            return Err(StreamError::Authentication {
                chunk: self.chunk_index,
            });
        }
        let plaintext = self
            .gcm
            .open(&self.nonce, &self.aad, sealed)
            .map_err(|_| StreamError::Authentication {
                chunk: self.chunk_index,
            })?;
        self.advance();
        Ok(plaintext)
    }

    /// Index of the chunk the next seal/open applies to.
    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    /// Nonce the next seal/open will use.
    pub fn current_nonce(&self) -> &[u8] {
        &self.nonce
    }

    fn advance(&mut self) {
        if nonce::increment(&mut self.nonce) {
            warn!(
                chunk = self.chunk_index,
                nonce_len = self.nonce.len(),
                "nonce wrapped to zero"
            );
        }
        self.chunk_index += 1;
    }
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher")
            .field("nonce_len", &self.nonce.len())
            .field("aad_len", &self.aad.len())
            .field("chunk_index", &self.chunk_index)
            .finish()
    }
}
