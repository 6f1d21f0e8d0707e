use std::io::{self, Stdout, Write};

use pbr::{ProgressBar, Units};

/// Counts the bytes of a DfuSe file on their way to disk. The bar is
/// completed when the writer is dropped, which is when the file has been
/// fully written and flushed.
pub struct ProgressBarReporter<T: Write> {
    pb: ProgressBar<Stdout>,
    inner: T,
}

impl<T: Write> ProgressBarReporter<T> {
    pub fn new(total_bytes: u64, inner: T) -> Self {
        let mut pb = ProgressBar::new(total_bytes);
        pb.set_units(Units::Bytes);
        pb.message("Writing ");

        Self { pb, inner }
    }
}

impl<T: Write> Write for ProgressBarReporter<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.pb.add(written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Write> Drop for ProgressBarReporter<T> {
    fn drop(&mut self) {
        self.pb.finish();
    }
}
