use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Line oriented, bzip2 compressed output file. The compressed stream is
/// finished when the sink is dropped, so partial output stays readable if a
/// search fails part way through.
pub struct CompressedSink {
    path: PathBuf,
    encoder: BzEncoder<BufWriter<File>>,
}

impl CompressedSink {
    /// Create (or truncate) the file at `path`, creating parent directories
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            encoder: BzEncoder::new(BufWriter::new(file), Compression::best()),
        })
    }

    /// Serialize `record` as JSON followed by a newline
    pub fn write_record<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.encoder, record)?;
        self.encoder.write_all(b"\n")
    }

    /// Finish the compressed stream and flush it to disk
    pub fn finish(self) -> io::Result<PathBuf> {
        let mut writer = self.encoder.finish()?;
        writer.flush()?;
        Ok(self.path)
    }
}

#[cfg(test)]
pub(crate) fn read_lines(path: &Path) -> Vec<String> {
    use bzip2::read::BzDecoder;
    use std::io::Read;

    let mut text = String::new();
    BzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text.lines().map(str::to_string).collect()
}
