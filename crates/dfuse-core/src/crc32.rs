//! CRC32 as used by the DFU file suffix.
//!
//! Reflected polynomial 0xEDB88320, initial state 0xFFFFFFFF, final XOR
//! 0xFFFFFFFF (same parameters as zlib/gzip).

use std::io;

const POLYNOMIAL: u32 = 0xEDB8_8320;
const INITIAL_STATE: u32 = 0xFFFF_FFFF;
const FINAL_XOR: u32 = 0xFFFF_FFFF;

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = make_table();

/// Feeds `bytes` into a running CRC state. The result is *not* finalized and
/// can be passed back into `update` to continue the computation.
pub fn update(mut state: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes {
        state = (state >> 8) ^ TABLE[((state ^ byte as u32) & 0xFF) as usize];
    }
    state
}

/// Turns a running state into the checksum value.
pub fn finalize(state: u32) -> u32 {
    state ^ FINAL_XOR
}

/// One-shot checksum of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    finalize(update(INITIAL_STATE, bytes))
}

/// Running checksum that can stand in for an output stream.
///
/// Anything that serializes itself into an `impl Write` can be written into
/// a `Crc32` to checksum exactly the bytes it would have produced, without
/// keeping them around.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
    len: u64,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    pub fn new() -> Self {
        Self {
            state: INITIAL_STATE,
            len: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.state = update(self.state, bytes);
        self.len += bytes.len() as u64;
    }

    /// Checksum of everything fed in so far. Does not consume the state, more
    /// bytes may still be added afterwards.
    pub fn finalize(&self) -> u32 {
        finalize(self.state)
    }

    /// Number of bytes fed in so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl io::Write for Crc32 {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Passes bytes through to `inner` and checksums the ones it accepted.
#[derive(Debug)]
pub struct Checksummed<W> {
    inner: W,
    crc: Crc32,
}

impl<W: io::Write> Checksummed<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
        }
    }

    pub fn crc(&self) -> &Crc32 {
        &self.crc
    }

    pub fn into_parts(self) -> (W, Crc32) {
        (self.inner, self.crc)
    }
}

impl<W: io::Write> io::Write for Checksummed<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.crc.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(&[]), 0);
        assert_eq!(Crc32::new().finalize(), 0);
        assert!(Crc32::new().is_empty());
    }

    #[test]
    fn table_entries() {
        assert_eq!(TABLE[0], 0);
        assert_eq!(TABLE[1], 0x7707_3096);
        assert_eq!(TABLE[255], 0x2D02_EF8D);
    }

    #[test]
    fn repeated_calls_agree() {
        let data = b"The quick brown fox jumps over the lazy dog";
        assert_eq!(crc32(data), crc32(data));
        assert_eq!(crc32(data), 0x414F_A339);
    }

    #[test]
    fn chained_update_matches_one_shot() {
        let first = b"DfuSe\x01";
        let second = b"\x00\x00\x00\x00\x00 trailing data";

        let state = update(INITIAL_STATE, first);
        let state = update(state, second);

        let whole: Vec<u8> = first.iter().chain(second.iter()).copied().collect();
        assert_eq!(finalize(state), crc32(&whole));
    }

    #[test]
    fn writer_matches_one_shot() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut crc = Crc32::new();
        for chunk in data.chunks(7) {
            crc.write_all(chunk).unwrap();
        }

        assert_eq!(crc.len(), 1000);
        assert_eq!(crc.finalize(), crc32(&data));
    }

    #[test]
    fn finalize_is_not_destructive() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        let _ = crc.finalize();
        crc.update(b"56789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }

    fn serialize(mut output: impl Write) {
        output.write_all(b"12345").unwrap();
        output.write_all(b"6789").unwrap();
    }

    #[test]
    fn writes_through_a_borrow_reach_the_accumulator() {
        let mut crc = Crc32::new();
        serialize(&mut crc);
        assert_eq!(crc.finalize(), 0xCBF4_3926);
        assert_eq!(crc.len(), 9);
    }

    /// Accepts at most three bytes per call.
    struct Trickle(Vec<u8>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn checksummed_covers_accepted_bytes() {
        let mut output = Checksummed::new(Trickle(Vec::new()));
        serialize(&mut output);
        assert_eq!(output.crc().len(), 9);

        let (inner, crc) = output.into_parts();
        assert_eq!(inner.0, b"123456789");
        assert_eq!(crc.finalize(), crc32(&inner.0));
    }
}
