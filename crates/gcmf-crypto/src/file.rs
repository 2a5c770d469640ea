//! Filesystem drivers: seal or unseal one file into another.
//!
//! Output goes to a temp file next to the destination and is renamed into
//! place only after the last chunk authenticated (unless
//! [`FileOptions::atomic`] is off), so a failed decrypt leaves nothing
//! behind at the output path.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StreamError;
use crate::keys::StreamParams;
use crate::seal::ChunkSealer;
use crate::unseal::ChunkUnsealer;

/// Progress callback: `(bytes_done, bytes_total)` of the input file.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct FileOptions {
    /// Replace an existing output file instead of failing with
    /// [`StreamError::OutputExists`].
    pub overwrite: bool,
    /// Stage output in a temp file and rename it into place on success.
    pub atomic: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            atomic: true,
        }
    }
}

/// What one file operation moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileReport {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks: u64,
}

enum OutputKind {
    Atomic(NamedTempFile),
    Direct(File),
}

/// Destination file plus the bytes written into it.
struct OutputFile {
    kind: OutputKind,
    path: PathBuf,
    written: u64,
}

impl OutputFile {
    fn create(path: &Path, options: &FileOptions) -> Result<Self, StreamError> {
        if path.exists() {
            if !options.overwrite {
                return Err(StreamError::OutputExists(path.to_path_buf()));
            }
            info!(path = %path.display(), "overwriting output file");
        }

        let kind = if options.atomic {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            // Temp files are created with mode 0600 on unix.
            let tmp = tempfile::Builder::new()
                .prefix(".gcmf-")
                .suffix(".tmp")
                .tempfile_in(dir)?;
            debug!(tmp = %tmp.path().display(), "staging output");
            OutputKind::Atomic(tmp)
        } else {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(0o600);
            }
            OutputKind::Direct(opts.open(path)?)
        };

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    fn file(&mut self) -> &mut File {
        match &mut self.kind {
            OutputKind::Atomic(tmp) => tmp.as_file_mut(),
            OutputKind::Direct(file) => file,
        }
    }

    /// Make the output visible at its final path. Returns bytes written.
    fn commit(mut self) -> Result<u64, StreamError> {
        self.file().flush()?;
        self.file().sync_all()?;
        if let OutputKind::Atomic(tmp) = self.kind {
            tmp.persist(&self.path)?;
        }
        Ok(self.written)
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file().write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file().flush()
    }
}

/// Reader that reports cumulative bytes to a [`ProgressFn`].
struct ProgressReader<'a, R> {
    inner: R,
    done: u64,
    total: u64,
    progress: Option<&'a ProgressFn>,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.done += n as u64;
        if let Some(progress) = self.progress {
            progress(self.done, self.total);
        }
        Ok(n)
    }
}

fn open_input(path: &Path) -> Result<(File, u64), StreamError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StreamError::InputNotFound(path.to_path_buf()),
        _ => StreamError::Io(e),
    })?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// Seal `input` into `output`.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    params: &StreamParams,
    options: &FileOptions,
    progress: Option<&ProgressFn>,
) -> Result<FileReport, StreamError> {
    let (file, total) = open_input(input)?;
    let mut out = OutputFile::create(output, options)?;

    let reader = ProgressReader {
        inner: file,
        done: 0,
        total,
        progress,
    };
    let mut sealer = ChunkSealer::new(reader, params)?;
    sealer.copy_to(&mut out)?;
    let chunks = sealer.chunks_sealed();
    let bytes_in = sealer.into_inner().done;
    let bytes_out = out.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes_in,
        bytes_out,
        chunks,
        "encrypted file"
    );
    Ok(FileReport {
        bytes_in,
        bytes_out,
        chunks,
    })
}

/// Unseal `input` into `output`, reading the ciphertext front to back.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    params: &StreamParams,
    options: &FileOptions,
    progress: Option<&ProgressFn>,
) -> Result<FileReport, StreamError> {
    let (file, total) = open_input(input)?;
    let out = OutputFile::create(output, options)?;

    let reader = ProgressReader {
        inner: file,
        done: 0,
        total,
        progress,
    };
    let unsealer = ChunkUnsealer::new(out, params)?;
    let bytes_in = unsealer.accept_reader(reader, 0, params.sealed_chunk_size())?;
    let out = unsealer.finalize()?;
    let chunks = unsealer.chunks_unsealed();
    let bytes_out = out.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes_in,
        bytes_out,
        chunks,
        "decrypted file"
    );
    Ok(FileReport {
        bytes_in,
        bytes_out,
        chunks,
    })
}

fn read_range<W: Write>(
    handle: &mut io::Result<File>,
    start: u64,
    len: u64,
    unsealer: &ChunkUnsealer<W>,
) -> Result<(), StreamError> {
    let file = handle
        .as_mut()
        .map_err(|e| io::Error::new(e.kind(), e.to_string()))?;
    let mut buf = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut buf)?;
    unsealer.accept(&buf, start)?;
    Ok(())
}

/// Unseal `input` into `output` with ranged reads on a pool of `workers`
/// threads (0 = one per CPU).
///
/// Ranges are sealed-chunk aligned and dispatched in windows of
/// `workers * 2`, so at most one window of ciphertext waits on a gap at any
/// time. Each worker reads through its own file handle.
pub fn decrypt_file_parallel(
    input: &Path,
    output: &Path,
    params: &StreamParams,
    options: &FileOptions,
    workers: usize,
    progress: Option<&ProgressFn>,
) -> Result<FileReport, StreamError> {
    let (_, total) = open_input(input)?;
    let out = OutputFile::create(output, options)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("gcmf-unseal-{i}"))
        .build()?;
    let window = pool.current_num_threads() * 2;

    let range_len = params.sealed_chunk_size() as u64;
    let ranges: Vec<(u64, u64)> = (0..total)
        .step_by(range_len as usize)
        .map(|start| (start, range_len.min(total - start)))
        .collect();

    debug!(
        ranges = ranges.len(),
        threads = pool.current_num_threads(),
        window,
        "parallel decrypt"
    );

    let unsealer = ChunkUnsealer::new(out, params)?;
    let done = AtomicU64::new(0);
    // Once one worker fails, the rest see `Aborted`; keep the first real cause.
    let cause: Mutex<Option<StreamError>> = Mutex::new(None);

    for batch in ranges.chunks(window) {
        let result = pool.install(|| {
            batch.par_iter().try_for_each_init(
                || File::open(input),
                |handle, &(start, len)| -> Result<(), StreamError> {
                    read_range(handle, start, len, &unsealer).map_err(|e| {
                        if matches!(e, StreamError::Aborted) {
                            return e;
                        }
                        if let Ok(mut slot) = cause.lock() {
                            slot.get_or_insert(e);
                        }
                        StreamError::Aborted
                    })?;

                    let so_far = done.fetch_add(len, Ordering::Relaxed) + len;
                    if let Some(progress) = progress {
                        progress(so_far, total);
                    }
                    Ok(())
                },
            )
        });
        if let Err(e) = result {
            let cause = cause.into_inner().ok().flatten();
            return Err(cause.unwrap_or(e));
        }
    }

    let out = unsealer.finalize()?;
    let chunks = unsealer.chunks_unsealed();
    let bytes_out = out.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes_in = total,
        bytes_out,
        chunks,
        workers = pool.current_num_threads(),
        "decrypted file in parallel"
    );
    Ok(FileReport {
        bytes_in: total,
        bytes_out,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TAG_SIZE;
    use std::sync::Arc;

    fn params() -> StreamParams {
        StreamParams::new(&[3u8; 32], &[9u8; 12], b"file-aad")
            .unwrap()
            .with_chunk_size(64)
            .unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain.bin");
        let sealed = tmp.path().join("plain.bin.enc");
        let restored = tmp.path().join("restored.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&plain, &data).unwrap();

        let enc = encrypt_file(&plain, &sealed, &params(), &FileOptions::default(), None).unwrap();
        assert_eq!(enc.bytes_in, 1000);
        assert_eq!(enc.chunks, 16);
        assert_eq!(enc.bytes_out, 1000 + 16 * TAG_SIZE as u64);

        let dec = decrypt_file(&sealed, &restored, &params(), &FileOptions::default(), None).unwrap();
        assert_eq!(dec.bytes_out, 1000);
        assert_eq!(dec.chunks, 16);
        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[test]
    fn test_missing_input() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let err = encrypt_file(
            &missing,
            &tmp.path().join("out"),
            &params(),
            &FileOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::InputNotFound(p) if p == missing));
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn test_refuses_overwrite_when_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let output = tmp.path().join("out");
        std::fs::write(&input, b"data").unwrap();
        std::fs::write(&output, b"keep me").unwrap();

        let options = FileOptions {
            overwrite: false,
            ..FileOptions::default()
        };
        let err = encrypt_file(&input, &output, &params(), &options, None).unwrap_err();
        assert!(matches!(err, StreamError::OutputExists(_)));
        assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
    }

    #[test]
    fn test_overwrites_existing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let output = tmp.path().join("out");
        std::fs::write(&input, b"data").unwrap();
        std::fs::write(&output, b"stale contents that are longer").unwrap();

        encrypt_file(&input, &output, &params(), &FileOptions::default(), None).unwrap();
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 4 + TAG_SIZE as u64);
    }

    #[test]
    fn test_failed_decrypt_leaves_no_output() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let sealed = tmp.path().join("sealed");
        let output = tmp.path().join("out");
        std::fs::write(&input, vec![1u8; 300]).unwrap();
        encrypt_file(&input, &sealed, &params(), &FileOptions::default(), None).unwrap();

        let mut bytes = std::fs::read(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&sealed, &bytes).unwrap();

        let err = decrypt_file(&sealed, &output, &params(), &FileOptions::default(), None).unwrap_err();
        assert!(err.is_authentication());
        assert!(!output.exists());
        // No staging files left behind either.
        let leftovers = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn test_direct_output_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let output = tmp.path().join("out");
        std::fs::write(&input, b"direct").unwrap();

        let options = FileOptions {
            atomic: false,
            ..FileOptions::default()
        };
        encrypt_file(&input, &output, &params(), &options, None).unwrap();
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 6 + TAG_SIZE as u64);
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        std::fs::write(&input, b"secret").unwrap();

        for atomic in [true, false] {
            let output = tmp.path().join(format!("out-{atomic}"));
            let options = FileOptions {
                atomic,
                ..FileOptions::default()
            };
            encrypt_file(&input, &output, &params(), &options, None).unwrap();
            let mode = std::fs::metadata(&output).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "atomic={atomic}");
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let sealed = tmp.path().join("sealed");
        let seq = tmp.path().join("seq");
        let par = tmp.path().join("par");
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&input, &data).unwrap();
        encrypt_file(&input, &sealed, &params(), &FileOptions::default(), None).unwrap();

        decrypt_file(&sealed, &seq, &params(), &FileOptions::default(), None).unwrap();
        let report =
            decrypt_file_parallel(&sealed, &par, &params(), &FileOptions::default(), 3, None)
                .unwrap();

        assert_eq!(report.bytes_out, 5000);
        assert_eq!(std::fs::read(&seq).unwrap(), data);
        assert_eq!(std::fs::read(&par).unwrap(), data);
    }

    #[test]
    fn test_parallel_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let sealed = tmp.path().join("sealed");
        let output = tmp.path().join("out");
        std::fs::write(&input, b"").unwrap();
        encrypt_file(&input, &sealed, &params(), &FileOptions::default(), None).unwrap();

        decrypt_file_parallel(&sealed, &output, &params(), &FileOptions::default(), 2, None)
            .unwrap();
        assert!(std::fs::read(&output).unwrap().is_empty());
    }

    #[test]
    fn test_progress_reaches_total() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in");
        let sealed = tmp.path().join("sealed");
        let output = tmp.path().join("out");
        std::fs::write(&input, vec![0u8; 777]).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Box::new(move |done, total| {
            assert!(done <= total);
            sink.fetch_max(done, Ordering::Relaxed);
        });

        encrypt_file(&input, &sealed, &params(), &FileOptions::default(), Some(&progress)).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 777);

        seen.store(0, Ordering::Relaxed);
        let sealed_len = std::fs::metadata(&sealed).unwrap().len();
        decrypt_file_parallel(&sealed, &output, &params(), &FileOptions::default(), 2, Some(&progress))
            .unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), sealed_len);
    }
}
