//! Content fingerprints.
//!
//! Manifests carry a 64-bit xxHash64 of each regular file's content. The
//! hash is computed by streaming the file, never by loading it whole.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use xxhash_rust::xxh64::Xxh64;

const READ_BUFFER: usize = 64 * 1024;

/// Hash everything `reader` yields.
pub fn content_hash<R: Read>(mut reader: R) -> io::Result<u64> {
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.digest())
}

/// Hash the content of the file at `path`.
pub fn file_hash(path: &Path) -> io::Result<u64> {
    content_hash(File::open(path)?)
}
