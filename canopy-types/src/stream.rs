//! Streaming JSON manifest format.
//!
//! A manifest travels as a bare concatenation of independently encoded
//! [`FileRecord`] objects with no outer array, so the producer can emit
//! records as it discovers them and the consumer can decode them as bytes
//! arrive. The encoder writes one object per line; the decoder accepts any
//! whitespace between objects.

use std::io::Write;

use crate::{FileRecord, Manifest, WireError};

/// Write one record followed by a newline.
pub fn encode_record<W: Write>(writer: &mut W, record: &FileRecord) -> Result<(), WireError> {
    serde_json::to_writer(&mut *writer, record).map_err(|e| {
        if e.is_io() {
            WireError::Io(e.into())
        } else {
            WireError::Encode(e)
        }
    })?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Incremental decoder for a manifest stream.
///
/// Feed body chunks as they arrive; every complete record is inserted into
/// the caller's manifest immediately, so records decoded before a failure
/// are kept even when the same chunk also holds the malformed data.
#[derive(Debug, Default)]
pub struct ManifestDecoder {
    pending: Vec<u8>,
    decoded: usize,
}

impl ManifestDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records decoded so far.
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    /// Decode every complete record in `chunk` (plus any bytes held over from
    /// earlier chunks) into `out`.
    ///
    /// A record split across chunks is held until the rest arrives. Data that
    /// can never form a record returns [`WireError::Malformed`]; the decoder
    /// should not be fed again afterwards.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Manifest) -> Result<(), WireError> {
        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        let mut stream =
            serde_json::Deserializer::from_slice(&self.pending).into_iter::<FileRecord>();
        let result = loop {
            match stream.next() {
                None => break Ok(()),
                Some(Ok(record)) => {
                    consumed = stream.byte_offset();
                    self.decoded += 1;
                    out.insert(record);
                }
                // Incomplete record, wait for more bytes.
                Some(Err(e)) if e.is_eof() => break Ok(()),
                Some(Err(e)) => {
                    break Err(WireError::Malformed {
                        index: self.decoded,
                        source: e,
                    })
                }
            }
        };

        self.pending.drain(..consumed);
        result
    }

    /// Signal end of stream. Fails if a partial record is still buffered.
    pub fn finish(self) -> Result<(), WireError> {
        let pending = self
            .pending
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .count();
        if pending == 0 {
            Ok(())
        } else {
            Err(WireError::Truncated {
                pending: self.pending.len(),
            })
        }
    }
}
