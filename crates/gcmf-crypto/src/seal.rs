//! Pull-based encryption: wrap any `Read` of plaintext and read ciphertext
//! out of it.
//!
//! At most one plaintext chunk and one sealed chunk are held in memory,
//! whatever the stream length.

use std::io::{self, Read, Write};

use tracing::{debug, warn};

use crate::cipher::ChunkCipher;
use crate::error::StreamError;
use crate::keys::StreamParams;

/// Encrypting reader over a plaintext source.
///
/// Every chunk except the last is exactly `chunk_size` plaintext bytes; short
/// reads from the source are retried until the chunk is full or the source
/// hits EOF. An empty source still yields one tag-only chunk.
///
/// A failed source read or seal aborts the session: the error is returned
/// once and every later call fails with [`StreamError::Aborted`].
pub struct ChunkSealer<R> {
    source: R,
    cipher: ChunkCipher,
    chunk: Vec<u8>,
    sealed: Vec<u8>,
    sealed_pos: usize,
    sealed_any: bool,
    done_reading: bool,
    aborted: bool,
}

impl<R: Read> ChunkSealer<R> {
    pub fn new(source: R, params: &StreamParams) -> Result<Self, StreamError> {
        let cipher = ChunkCipher::new(params.key(), params.nonce(), params.aad())?;
        Ok(Self {
            source,
            cipher,
            chunk: vec![0u8; params.chunk_size()],
            sealed: Vec::new(),
            sealed_pos: 0,
            sealed_any: false,
            done_reading: false,
            aborted: false,
        })
    }

    /// Copy the next ciphertext bytes into `dest`.
    ///
    /// Seals a new chunk only once the previous one has been handed out in
    /// full. Returns `Ok(0)` once the source is exhausted and every sealed
    /// byte has been delivered (or when `dest` is empty).
    pub fn produce_next(&mut self, dest: &mut [u8]) -> Result<usize, StreamError> {
        if self.aborted {
            return Err(StreamError::Aborted);
        }
        if dest.is_empty() {
            return Ok(0);
        }

        if self.unreturned() == 0 && !self.done_reading {
            if let Err(e) = self.seal_chunk() {
                self.aborted = true;
                warn!(chunk = self.cipher.chunk_index(), error = %e, "sealing aborted");
                return Err(e);
            }
        }

        let pending = &self.sealed[self.sealed_pos..];
        let n = pending.len().min(dest.len());
        dest[..n].copy_from_slice(&pending[..n]);
        self.sealed_pos += n;
        Ok(n)
    }

    /// Drain the whole stream into `sink`, returning ciphertext bytes written.
    pub fn copy_to<W: Write>(&mut self, sink: &mut W) -> Result<u64, StreamError> {
        let mut buf = vec![0u8; self.chunk.len() + crate::TAG_SIZE];
        let mut written = 0u64;
        loop {
            let n = self.produce_next(&mut buf)?;
            if n == 0 {
                return Ok(written);
            }
            sink.write_all(&buf[..n])?;
            written += n as u64;
        }
    }

    /// True once EOF was seen and all sealed bytes were handed out.
    pub fn is_done(&self) -> bool {
        !self.aborted && self.done_reading && self.unreturned() == 0
    }

    pub fn chunks_sealed(&self) -> u64 {
        self.cipher.chunk_index()
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn unreturned(&self) -> usize {
        self.sealed.len() - self.sealed_pos
    }

    fn seal_chunk(&mut self) -> Result<(), StreamError> {
        let read = self.fill_chunk()?;
        if read > 0 || !self.sealed_any {
            self.sealed = self.cipher.seal_next(&self.chunk[..read])?;
            self.sealed_pos = 0;
            self.sealed_any = true;
            debug!(
                chunk = self.cipher.chunk_index() - 1,
                plaintext_len = read,
                last = self.done_reading,
                "sealed chunk"
            );
        }
        Ok(())
    }

    fn fill_chunk(&mut self) -> Result<usize, StreamError> {
        let mut filled = 0;
        while filled < self.chunk.len() {
            match self.source.read(&mut self.chunk[filled..]) {
                Ok(0) => {
                    self.done_reading = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Read for ChunkSealer<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.produce_next(buf).map_err(io::Error::from)
    }
}

/// Seal everything from `source` into `sink`. Returns ciphertext bytes written.
pub fn seal_stream<R: Read, W: Write>(
    source: R,
    sink: &mut W,
    params: &StreamParams,
) -> Result<u64, StreamError> {
    let mut sealer = ChunkSealer::new(source, params)?;
    sealer.copy_to(sink)
}
