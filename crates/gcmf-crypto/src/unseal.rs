//! Random-access decryption: ciphertext arrives as `(offset, bytes)` writes in
//! any order and any split, plaintext leaves strictly in order.
//!
//! Writes at the cursor are consumed straight from the caller's buffer;
//! writes ahead of it are copied into an offset-ordered map and drained once
//! the gap before them closes. Reassembled ciphertext fills a buffer of exactly
//! one sealed chunk, which is opened and written out the moment it is full.
//! Only [`ChunkUnsealer::finalize`] knows the stream has ended, so the last
//! (short or empty) chunk is opened there.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::cipher::ChunkCipher;
use crate::error::StreamError;
use crate::keys::StreamParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Aborted,
    Finalized,
}

struct UnsealState<W> {
    sink: Option<W>,
    cipher: ChunkCipher,
    chunk: Vec<u8>,
    chunk_len: usize,
    next_offset: u64,
    pending: BTreeMap<u64, Vec<u8>>,
    flushed_any: bool,
    status: Status,
}

/// Decrypting sink addressed by absolute ciphertext offset.
///
/// All state sits behind one mutex, so `accept` may be called concurrently
/// from several threads (e.g. ranged reads on a worker pool). The sink is
/// owned by the session until [`finalize`](Self::finalize) hands it back, and
/// is dropped with the session otherwise.
pub struct ChunkUnsealer<W: Write> {
    state: Mutex<UnsealState<W>>,
}

impl<W: Write> ChunkUnsealer<W> {
    pub fn new(sink: W, params: &StreamParams) -> Result<Self, StreamError> {
        let cipher = ChunkCipher::new(params.key(), params.nonce(), params.aad())?;
        let chunk_len = params.sealed_chunk_size();
        Ok(Self {
            state: Mutex::new(UnsealState {
                sink: Some(sink),
                cipher,
                chunk: Vec::with_capacity(chunk_len),
                chunk_len,
                next_offset: 0,
                pending: BTreeMap::new(),
                flushed_any: false,
                status: Status::Open,
            }),
        })
    }

    /// Feed ciphertext starting at absolute `offset`.
    ///
    /// Never rejects a write for arriving early: it is buffered until the
    /// bytes before it show up. Bytes that were already consumed are ignored.
    /// Returns `bytes.len()`. Any error aborts the session.
    pub fn accept(&self, bytes: &[u8], offset: u64) -> Result<usize, StreamError> {
        let mut state = self.lock()?;
        state.ensure_open()?;
        if bytes.is_empty() {
            return Ok(0);
        }
        if let Err(e) = state.accept(bytes, offset) {
            state.status = Status::Aborted;
            return Err(e);
        }
        Ok(bytes.len())
    }

    /// Open whatever ciphertext is still buffered as the last chunk, flush the
    /// sink and hand it back.
    ///
    /// When nothing was ever opened, an empty final chunk is still
    /// authenticated, so a missing or truncated stream cannot pass as empty
    /// plaintext. Only the first call does any work; later calls return
    /// [`StreamError::Finalized`]. The sink is released on every path.
    pub fn finalize(&self) -> Result<W, StreamError> {
        let mut state = self.lock()?;
        match state.status {
            Status::Finalized => return Err(StreamError::Finalized),
            Status::Aborted => {
                state.status = Status::Finalized;
                state.sink.take();
                return Err(StreamError::Aborted);
            }
            Status::Open => {}
        }
        state.status = Status::Finalized;

        let result = state.finish();
        state.sink.take();
        result
    }

    /// Feed everything `source` yields as contiguous ciphertext starting at
    /// `offset`, reading `buf_len` bytes at a time. Returns bytes consumed.
    pub fn accept_reader<R: Read>(
        &self,
        mut source: R,
        offset: u64,
        buf_len: usize,
    ) -> Result<u64, StreamError> {
        let mut buf = vec![0u8; buf_len.max(1)];
        let mut consumed = 0u64;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => return Ok(consumed),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let at = offset
                .checked_add(consumed)
                .ok_or(StreamError::OffsetOverflow { offset, len: n })?;
            self.accept(&buf[..n], at)?;
            consumed += n as u64;
        }
    }

    /// Offset of the next ciphertext byte needed to make progress.
    pub fn next_offset(&self) -> u64 {
        self.with_state(|s| s.next_offset)
    }

    /// Number of out-of-order writes waiting on a gap.
    pub fn pending_ranges(&self) -> usize {
        self.with_state(|s| s.pending.len())
    }

    pub fn chunks_unsealed(&self) -> u64 {
        self.with_state(|s| s.cipher.chunk_index())
    }

    fn lock(&self) -> Result<MutexGuard<'_, UnsealState<W>>, StreamError> {
        self.state.lock().map_err(|_| StreamError::Aborted)
    }

    fn with_state<T>(&self, f: impl FnOnce(&UnsealState<W>) -> T) -> T {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

impl<W: Write> Drop for ChunkUnsealer<W> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.status == Status::Open && (state.next_offset > 0 || !state.pending.is_empty()) {
            warn!(
                next_offset = state.next_offset,
                pending = state.pending.len(),
                "unsealer dropped without finalize; final chunk discarded"
            );
        }
    }
}

impl<W: Write> UnsealState<W> {
    fn ensure_open(&self) -> Result<(), StreamError> {
        match self.status {
            Status::Open => Ok(()),
            Status::Aborted => Err(StreamError::Aborted),
            Status::Finalized => Err(StreamError::Finalized),
        }
    }

    fn accept(&mut self, bytes: &[u8], offset: u64) -> Result<(), StreamError> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(StreamError::OffsetOverflow {
                offset,
                len: bytes.len(),
            })?;
        if end <= self.next_offset {
            debug!(offset, len = bytes.len(), "ignoring already consumed ciphertext");
            return Ok(());
        }

        if offset > self.next_offset {
            self.pending
                .entry(offset)
                .and_modify(|held| {
                    if held.len() < bytes.len() {
                        *held = bytes.to_vec();
                    }
                })
                .or_insert_with(|| bytes.to_vec());
            return Ok(());
        }

        let skip = (self.next_offset - offset) as usize;
        self.append(&bytes[skip..])?;
        self.drain_pending()
    }

    /// Consume buffered writes that now start at or before the cursor.
    fn drain_pending(&mut self) -> Result<(), StreamError> {
        while let Some(entry) = self.pending.first_entry() {
            let start = *entry.key();
            if start > self.next_offset {
                break;
            }
            let buf = entry.remove();
            let end = start + buf.len() as u64;
            if end <= self.next_offset {
                continue;
            }
            let skip = (self.next_offset - start) as usize;
            self.append(&buf[skip..])?;
        }
        Ok(())
    }

    /// Copy contiguous ciphertext into the chunk buffer, opening each chunk
    /// as soon as it is full.
    fn append(&mut self, mut data: &[u8]) -> Result<(), StreamError> {
        self.next_offset += data.len() as u64;
        while !data.is_empty() {
            let take = (self.chunk_len - self.chunk.len()).min(data.len());
            self.chunk.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.chunk.len() == self.chunk_len {
                self.unseal_chunk()?;
            }
        }
        Ok(())
    }

    fn unseal_chunk(&mut self) -> Result<(), StreamError> {
        let plaintext = self.cipher.open_next(&self.chunk)?;
        let sink = self.sink.as_mut().ok_or(StreamError::Finalized)?;
        sink.write_all(&plaintext)?;
        debug!(
            chunk = self.cipher.chunk_index() - 1,
            ciphertext_len = self.chunk.len(),
            "unsealed chunk"
        );
        self.flushed_any = true;
        self.chunk.clear();
        Ok(())
    }

    fn finish(&mut self) -> Result<W, StreamError> {
        if !self.pending.is_empty() {
            return Err(StreamError::MissingRange {
                next_offset: self.next_offset,
                pending: self.pending.len(),
            });
        }
        if !self.chunk.is_empty() || !self.flushed_any {
            self.unseal_chunk()?;
        }
        let mut sink = self.sink.take().ok_or(StreamError::Finalized)?;
        sink.flush()?;
        Ok(sink)
    }
}

/// Decrypt a sequential ciphertext stream from `source` into `sink`,
/// returning the sink once the final chunk has been authenticated.
pub fn unseal_stream<R: Read, W: Write>(
    source: R,
    sink: W,
    params: &StreamParams,
) -> Result<W, StreamError> {
    let unsealer = ChunkUnsealer::new(sink, params)?;
    unsealer.accept_reader(source, 0, params.chunk_size())?;
    unsealer.finalize()
}
