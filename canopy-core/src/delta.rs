//! Signature / delta / patch.
//!
//! The three operations behind delta transfer:
//!
//! 1. the side holding a stale copy computes a **signature** of it
//!    (weak + strong checksum per block),
//! 2. the side holding the current content computes a **delta** against that
//!    signature (copy-block and literal-bytes instructions),
//! 3. the stale side **patches** its copy with the delta to obtain the
//!    current content.
//!
//! [`DeltaEngine`] is the narrow interface the client and server depend on.
//! [`BlockDelta`] implements it in process.
//!
//! ## Formats
//!
//! ```text
//! signature := "cnS1" block_size:u32 { weak:u32 strong:[u8; 16] }*
//! delta     := "cnD1" { op }* 0x00
//! op        := 0x01 offset:u64 len:u32        copy from basis
//!            | 0x02 len:u32 bytes[len]        literal
//! ```
//!
//! All integers are big-endian. The last signature block may cover fewer
//! than `block_size` bytes.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use thiserror::Error;

use crate::rolling::RollingChecksum;

/// Default signature block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

const SIGNATURE_MAGIC: &[u8; 4] = b"cnS1";
const DELTA_MAGIC: &[u8; 4] = b"cnD1";
const STRONG_LEN: usize = 16;

const OP_END: u8 = 0x00;
const OP_COPY: u8 = 0x01;
const OP_LITERAL: u8 = 0x02;

/// Literal runs are flushed once they reach this size.
const MAX_LITERAL: usize = 64 * 1024;
/// Read granularity for the target stream.
const READ_CHUNK: usize = 256 * 1024;

/// Errors from the delta engine.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// Reading an input or writing the output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input does not start with the expected magic bytes.
    #[error("not a {kind} stream")]
    BadMagic {
        /// "signature" or "delta".
        kind: &'static str,
    },

    /// The input is structurally invalid.
    #[error("corrupt {kind}: {reason}")]
    Corrupt {
        /// "signature" or "delta".
        kind: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// Block size out of range.
    #[error("invalid block size {0} (must be 1..={MAX_BLOCK_SIZE})")]
    InvalidBlockSize(usize),
}

/// Something that can be read and seeked, usable as a trait object.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Signature / delta / patch over byte streams.
pub trait DeltaEngine: Send + Sync {
    /// Write the signature of `basis` to `out`.
    fn signature(&self, basis: &mut dyn Read, out: &mut dyn Write) -> Result<(), DeltaError>;

    /// Read a whole signature and report whether it is well formed.
    fn check_signature(&self, signature: &mut dyn Read) -> Result<(), DeltaError>;

    /// Write the delta that turns the signed basis into `target`.
    fn delta(
        &self,
        signature: &mut dyn Read,
        target: &mut dyn Read,
        out: &mut dyn Write,
    ) -> Result<(), DeltaError>;

    /// Apply `delta` to `basis`, writing the reconstructed content to `out`.
    fn patch(
        &self,
        basis: &mut dyn ReadSeek,
        delta: &mut dyn Read,
        out: &mut dyn Write,
    ) -> Result<(), DeltaError>;
}

/// In-process block-matching delta engine.
#[derive(Debug, Clone, Copy)]
pub struct BlockDelta {
    block_size: usize,
}

impl Default for BlockDelta {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl BlockDelta {
    /// Engine producing signatures with the given block size.
    pub fn with_block_size(block_size: usize) -> Result<Self, DeltaError> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(DeltaError::InvalidBlockSize(block_size));
        }
        Ok(Self { block_size })
    }

    /// Block size used for new signatures.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl DeltaEngine for BlockDelta {
    fn signature(&self, basis: &mut dyn Read, out: &mut dyn Write) -> Result<(), DeltaError> {
        out.write_all(SIGNATURE_MAGIC)?;
        out.write_all(&(self.block_size as u32).to_be_bytes())?;

        let mut block = vec![0u8; self.block_size];
        loop {
            let n = read_full(basis, &mut block)?;
            if n == 0 {
                break;
            }
            let chunk = &block[..n];
            out.write_all(&RollingChecksum::new(chunk).digest().to_be_bytes())?;
            out.write_all(&strong_sum(chunk))?;
            if n < self.block_size {
                break;
            }
        }
        out.flush()?;
        Ok(())
    }

    fn check_signature(&self, signature: &mut dyn Read) -> Result<(), DeltaError> {
        Signature::read_from(signature).map(|_| ())
    }

    fn delta(
        &self,
        signature: &mut dyn Read,
        target: &mut dyn Read,
        out: &mut dyn Write,
    ) -> Result<(), DeltaError> {
        let sig = Signature::read_from(signature)?;
        let bs = sig.block_size;
        let mut ops = OpWriter::new(out)?;

        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK + bs);
        let mut start = 0usize;
        let mut eof = false;
        let mut rolling: Option<RollingChecksum> = None;

        loop {
            if buf.len() - start < bs && !eof {
                buf.drain(..start);
                start = 0;
                eof = fill(target, &mut buf, READ_CHUNK)?;
                continue;
            }

            let avail = buf.len() - start;
            if avail == 0 {
                break;
            }

            if avail < bs {
                // Tail shorter than a block: may still match a short last block.
                let tail = &buf[start..];
                match sig.find(RollingChecksum::new(tail).digest(), tail) {
                    Some(index) => ops.copy((index * bs) as u64, tail.len() as u32)?,
                    None => ops.literal(tail)?,
                }
                break;
            }

            let weak = rolling
                .get_or_insert_with(|| RollingChecksum::new(&buf[start..start + bs]))
                .digest();
            if let Some(index) = sig.find(weak, &buf[start..start + bs]) {
                ops.copy((index * bs) as u64, bs as u32)?;
                start += bs;
                rolling = None;
                continue;
            }

            ops.literal(&buf[start..start + 1])?;
            start += 1;
            if buf.len() - start >= bs {
                if let Some(r) = rolling.as_mut() {
                    r.roll(buf[start - 1], buf[start + bs - 1]);
                }
            } else {
                rolling = None;
            }
        }

        ops.finish()
    }

    fn patch(
        &self,
        basis: &mut dyn ReadSeek,
        delta: &mut dyn Read,
        out: &mut dyn Write,
    ) -> Result<(), DeltaError> {
        expect_magic(delta, DELTA_MAGIC, "delta")?;

        loop {
            let mut op = [0u8; 1];
            if read_full(delta, &mut op)? == 0 {
                return Err(corrupt("delta", "missing end marker"));
            }
            match op[0] {
                OP_END => break,
                OP_COPY => {
                    let offset = read_u64(delta, "delta")?;
                    let len = read_u32(delta, "delta")? as u64;
                    basis.seek(SeekFrom::Start(offset))?;
                    let copied = io::copy(&mut (&mut *basis).take(len), out)?;
                    if copied != len {
                        return Err(corrupt(
                            "delta",
                            format!("copy of {len} bytes at {offset} runs past end of basis"),
                        ));
                    }
                }
                OP_LITERAL => {
                    let len = read_u32(delta, "delta")? as u64;
                    let copied = io::copy(&mut (&mut *delta).take(len), out)?;
                    if copied != len {
                        return Err(corrupt("delta", "literal truncated"));
                    }
                }
                other => return Err(corrupt("delta", format!("unknown op {other:#04x}"))),
            }
        }

        out.flush()?;
        Ok(())
    }
}

/// A parsed signature with its weak-checksum lookup table.
struct Signature {
    block_size: usize,
    strong: Vec<[u8; STRONG_LEN]>,
    by_weak: HashMap<u32, Vec<usize>>,
}

impl Signature {
    fn read_from(input: &mut dyn Read) -> Result<Self, DeltaError> {
        expect_magic(input, SIGNATURE_MAGIC, "signature")?;
        let block_size = read_u32(input, "signature")? as usize;
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(DeltaError::InvalidBlockSize(block_size));
        }

        let mut strong = Vec::new();
        let mut by_weak: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut record = [0u8; 4 + STRONG_LEN];
        loop {
            match read_full(input, &mut record)? {
                0 => break,
                n if n < record.len() => {
                    return Err(corrupt("signature", "truncated block record"));
                }
                _ => {}
            }
            let weak = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
            let mut sum = [0u8; STRONG_LEN];
            sum.copy_from_slice(&record[4..]);
            by_weak.entry(weak).or_default().push(strong.len());
            strong.push(sum);
        }

        Ok(Self {
            block_size,
            strong,
            by_weak,
        })
    }

    /// Index of a basis block whose content equals `window`.
    fn find(&self, weak: u32, window: &[u8]) -> Option<usize> {
        let candidates = self.by_weak.get(&weak)?;
        let sum = strong_sum(window);
        candidates.iter().copied().find(|&i| self.strong[i] == sum)
    }
}

/// Buffers adjacent operations so runs of literals and contiguous copies are
/// emitted as single instructions.
struct OpWriter<'a> {
    out: &'a mut dyn Write,
    literal: Vec<u8>,
    copy: Option<(u64, u64)>,
}

impl<'a> OpWriter<'a> {
    fn new(out: &'a mut dyn Write) -> Result<Self, DeltaError> {
        out.write_all(DELTA_MAGIC)?;
        Ok(Self {
            out,
            literal: Vec::new(),
            copy: None,
        })
    }

    fn copy(&mut self, offset: u64, len: u32) -> Result<(), DeltaError> {
        self.flush_literal()?;
        let len = len as u64;
        match self.copy.as_mut() {
            Some((start, run)) if *start + *run == offset && *run + len <= u32::MAX as u64 => {
                *run += len;
            }
            _ => {
                self.flush_copy()?;
                self.copy = Some((offset, len));
            }
        }
        Ok(())
    }

    fn literal(&mut self, bytes: &[u8]) -> Result<(), DeltaError> {
        self.flush_copy()?;
        self.literal.extend_from_slice(bytes);
        if self.literal.len() >= MAX_LITERAL {
            self.flush_literal()?;
        }
        Ok(())
    }

    fn flush_copy(&mut self) -> Result<(), DeltaError> {
        if let Some((offset, len)) = self.copy.take() {
            self.out.write_all(&[OP_COPY])?;
            self.out.write_all(&offset.to_be_bytes())?;
            self.out.write_all(&(len as u32).to_be_bytes())?;
        }
        Ok(())
    }

    fn flush_literal(&mut self) -> Result<(), DeltaError> {
        if !self.literal.is_empty() {
            self.out.write_all(&[OP_LITERAL])?;
            self.out.write_all(&(self.literal.len() as u32).to_be_bytes())?;
            self.out.write_all(&self.literal)?;
            self.literal.clear();
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), DeltaError> {
        self.flush_copy()?;
        self.flush_literal()?;
        self.out.write_all(&[OP_END])?;
        self.out.flush()?;
        Ok(())
    }
}

fn strong_sum(data: &[u8]) -> [u8; STRONG_LEN] {
    let hash = blake3::hash(data);
    let mut sum = [0u8; STRONG_LEN];
    sum.copy_from_slice(&hash.as_bytes()[..STRONG_LEN]);
    sum
}

/// Read until `buf` is full or the reader is exhausted. Returns bytes read.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Append up to `want` bytes from `reader` to `buf`. Returns true at end of input.
fn fill(reader: &mut dyn Read, buf: &mut Vec<u8>, want: usize) -> io::Result<bool> {
    let old = buf.len();
    buf.resize(old + want, 0);
    let n = read_full(reader, &mut buf[old..])?;
    buf.truncate(old + n);
    Ok(n < want)
}

fn expect_magic(
    input: &mut dyn Read,
    magic: &[u8; 4],
    kind: &'static str,
) -> Result<(), DeltaError> {
    let mut got = [0u8; 4];
    if read_full(input, &mut got)? != 4 || &got != magic {
        return Err(DeltaError::BadMagic { kind });
    }
    Ok(())
}

fn read_u32(input: &mut dyn Read, kind: &'static str) -> Result<u32, DeltaError> {
    let mut b = [0u8; 4];
    if read_full(input, &mut b)? != 4 {
        return Err(corrupt(kind, "truncated integer"));
    }
    Ok(u32::from_be_bytes(b))
}

fn read_u64(input: &mut dyn Read, kind: &'static str) -> Result<u64, DeltaError> {
    let mut b = [0u8; 8];
    if read_full(input, &mut b)? != 8 {
        return Err(corrupt(kind, "truncated integer"));
    }
    Ok(u64::from_be_bytes(b))
}

fn corrupt(kind: &'static str, reason: impl Into<String>) -> DeltaError {
    DeltaError::Corrupt {
        kind,
        reason: reason.into(),
    }
}
