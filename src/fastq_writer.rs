//! FASTQ pair writer - routes reads to R1/R2 in sequencing orientation
//!
//! Reads on the reverse strand are stored reference-forward in the BAM, so
//! they are reverse-complemented (and their qualities reversed) before being
//! written. Output files are gzip-compressed with flate2 unless compression is
//! turned off.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::aligned_read::{AlignedRead, Mate};

/// Highest Phred value representable in Sanger FASTQ
pub const MAX_PHRED: u8 = 93;

const PHRED_OFFSET: u8 = 33;

// ============================================================================
// Sequence Helpers
// ============================================================================

/// Watson-Crick complement, case preserved; other symbols unchanged
#[inline]
pub fn complement_base(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        other => other,
    }
}

pub fn reverse_complement_in_place(seq: &mut [u8]) {
    seq.reverse();
    for base in seq.iter_mut() {
        *base = complement_base(*base);
    }
}

/// Raw quality to its FASTQ character
#[inline]
pub fn encode_quality(q: u8) -> u8 {
    q.min(MAX_PHRED) + PHRED_OFFSET
}

// ============================================================================
// Output Sinks
// ============================================================================

/// One FASTQ output file, gzip or plain
pub enum FastqSink {
    Gzip(GzEncoder<BufWriter<File>>),
    Plain(BufWriter<File>),
}

impl FastqSink {
    /// # Arguments
    /// * `path` - Output file, truncated if present
    /// * `compress` - Gzip the stream
    /// * `level` - gzip level 0-9, ignored for plain output
    pub fn create<P: AsRef<Path>>(path: P, compress: bool, level: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create FASTQ output {}", path.display()))?;
        let buffered = BufWriter::with_capacity(1024 * 1024, file);
        if compress {
            Ok(FastqSink::Gzip(GzEncoder::new(
                buffered,
                Compression::new(level.min(9)),
            )))
        } else {
            Ok(FastqSink::Plain(buffered))
        }
    }

    /// Flush everything and, for gzip, write the trailer
    pub fn finish(self) -> Result<()> {
        match self {
            FastqSink::Gzip(encoder) => {
                let mut inner = encoder.finish().context("Failed to finish gzip stream")?;
                inner.flush().context("Failed to flush FASTQ output")?;
            }
            FastqSink::Plain(mut writer) => {
                writer.flush().context("Failed to flush FASTQ output")?;
            }
        }
        Ok(())
    }
}

impl Write for FastqSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FastqSink::Gzip(w) => w.write(buf),
            FastqSink::Plain(w) => w.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            FastqSink::Gzip(w) => w.write_all(buf),
            FastqSink::Plain(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FastqSink::Gzip(w) => w.flush(),
            FastqSink::Plain(w) => w.flush(),
        }
    }
}

// ============================================================================
// Pair Writer
// ============================================================================

/// Records written per stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FastqCounts {
    /// Written to R1, unpaired reads included
    pub r1: u64,
    pub r2: u64,
    /// Reads with neither mate flag (routed to R1)
    pub unpaired: u64,
}

pub struct FastqPairWriter<W: Write> {
    r1: W,
    r2: W,
    seq_buf: Vec<u8>,
    qual_buf: Vec<u8>,
    counts: FastqCounts,
}

impl<W: Write> FastqPairWriter<W> {
    pub fn new(r1: W, r2: W) -> Self {
        Self {
            r1,
            r2,
            seq_buf: Vec::with_capacity(512),
            qual_buf: Vec::with_capacity(512),
            counts: FastqCounts::default(),
        }
    }

    pub fn counts(&self) -> &FastqCounts {
        &self.counts
    }

    /// Write `seq`/`qual` (reference-forward, raw qualities) under `read`'s name.
    ///
    /// # Returns
    /// The stream the record went to
    pub fn write_read(&mut self, read: &AlignedRead, seq: &[u8], qual: &[u8]) -> Result<Mate> {
        self.seq_buf.clear();
        self.seq_buf.extend_from_slice(seq);
        self.qual_buf.clear();
        self.qual_buf.extend(qual.iter().map(|&q| encode_quality(q)));
        if read.is_reverse() {
            reverse_complement_in_place(&mut self.seq_buf);
            self.qual_buf.reverse();
        }

        let mate = read.mate();
        let writer = match mate {
            Mate::Second => &mut self.r2,
            Mate::First | Mate::Unpaired => &mut self.r1,
        };
        write_fastq_record(writer, &read.name, &self.seq_buf, &self.qual_buf)
            .with_context(|| format!("Failed to write FASTQ record {}", read.name_lossy()))?;

        match mate {
            Mate::First => self.counts.r1 += 1,
            Mate::Second => self.counts.r2 += 1,
            Mate::Unpaired => {
                self.counts.r1 += 1;
                self.counts.unpaired += 1;
            }
        }
        Ok(mate)
    }

    /// Flush and hand back both streams
    pub fn into_inner(mut self) -> Result<(W, W)> {
        self.r1.flush().context("Failed to flush R1")?;
        self.r2.flush().context("Failed to flush R2")?;
        Ok((self.r1, self.r2))
    }
}

impl FastqPairWriter<FastqSink> {
    pub fn create<P: AsRef<Path>>(r1: P, r2: P, compress: bool, level: u32) -> Result<Self> {
        let r1 = FastqSink::create(r1, compress, level)?;
        let r2 = FastqSink::create(r2, compress, level)?;
        Ok(Self::new(r1, r2))
    }

    /// Finalize both files, R2 even if R1 fails
    pub fn finish(self) -> Result<FastqCounts> {
        let counts = self.counts;
        let r1 = self.r1.finish().context("Failed to finish R1");
        let r2 = self.r2.finish().context("Failed to finish R2");
        r1?;
        r2?;
        Ok(counts)
    }
}

fn write_fastq_record<W: Write>(writer: &mut W, name: &[u8], seq: &[u8], qual: &[u8]) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(name)?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligned_read::{parse_cigar, FLAG_FIRST_IN_PAIR, FLAG_REVERSE, FLAG_SECOND_IN_PAIR};
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    fn read_with_flags(name: &[u8], flags: u16, seq: &[u8]) -> AlignedRead {
        let qual: Vec<u8> = (0..seq.len() as u8).map(|i| 20 + i).collect();
        AlignedRead::new(name, 0, 0, flags, parse_cigar(&format!("{}M", seq.len())).unwrap(), seq, &qual)
    }

    fn memory_writer() -> FastqPairWriter<Vec<u8>> {
        FastqPairWriter::new(Vec::new(), Vec::new())
    }

    #[test]
    fn test_reverse_complement_is_involution() {
        let original = b"ACGTNacgtnRY".to_vec();
        let mut seq = original.clone();
        reverse_complement_in_place(&mut seq);
        assert_eq!(seq, b"YRnacgtNACGT");
        reverse_complement_in_place(&mut seq);
        assert_eq!(seq, original);
    }

    #[test]
    fn test_encode_quality_clamps() {
        assert_eq!(encode_quality(0), b'!');
        assert_eq!(encode_quality(30), b'?');
        assert_eq!(encode_quality(93), b'~');
        assert_eq!(encode_quality(255), b'~');
    }

    #[test]
    fn test_forward_read_to_r1() {
        let mut w = memory_writer();
        let read = read_with_flags(b"q1#AAA", FLAG_FIRST_IN_PAIR, b"ACGG");
        assert_eq!(w.write_read(&read, &read.seq, &read.qual).unwrap(), Mate::First);

        let (r1, r2) = w.into_inner().unwrap();
        assert_eq!(r1, b"@q1#AAA\nACGG\n+\n5678\n");
        assert!(r2.is_empty());
    }

    #[test]
    fn test_reverse_read_to_r2() {
        let mut w = memory_writer();
        let read = read_with_flags(b"q2", FLAG_SECOND_IN_PAIR | FLAG_REVERSE, b"AACG");
        assert_eq!(w.write_read(&read, &read.seq, &read.qual).unwrap(), Mate::Second);

        let (r1, r2) = w.into_inner().unwrap();
        assert!(r1.is_empty());
        // Reverse complement, qualities reversed
        assert_eq!(r2, b"@q2\nCGTT\n+\n8765\n");
    }

    #[test]
    fn test_unpaired_read_goes_to_r1() {
        let mut w = memory_writer();
        let read = read_with_flags(b"solo", 0, b"A");
        assert_eq!(w.write_read(&read, b"T", &[40]).unwrap(), Mate::Unpaired);
        assert_eq!(w.counts().unpaired, 1);
        assert_eq!(w.counts().r1, 1);

        let (r1, _) = w.into_inner().unwrap();
        assert_eq!(r1, b"@solo\nT\n+\nI\n");
    }

    #[test]
    fn test_gzip_files_round_trip() {
        let dir = tempdir().unwrap();
        let r1_path = dir.path().join("out_R1.fastq.gz");
        let r2_path = dir.path().join("out_R2.fastq.gz");

        let mut w = FastqPairWriter::create(&r1_path, &r2_path, true, 1).unwrap();
        let first = read_with_flags(b"p", FLAG_FIRST_IN_PAIR, b"ACGT");
        let second = read_with_flags(b"p", FLAG_SECOND_IN_PAIR | FLAG_REVERSE, b"GGCA");
        w.write_read(&first, &first.seq, &first.qual).unwrap();
        w.write_read(&second, &second.seq, &second.qual).unwrap();
        let counts = w.finish().unwrap();
        assert_eq!(counts.r1, 1);
        assert_eq!(counts.r2, 1);

        let mut text = String::new();
        MultiGzDecoder::new(File::open(&r2_path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "@p\nTGCC\n+\n8765\n");
    }

    #[test]
    fn test_plain_output() {
        let dir = tempdir().unwrap();
        let r1_path = dir.path().join("r1.fastq");
        let r2_path = dir.path().join("r2.fastq");

        let mut w = FastqPairWriter::create(&r1_path, &r2_path, false, 1).unwrap();
        let read = read_with_flags(b"x", FLAG_FIRST_IN_PAIR, b"NN");
        w.write_read(&read, &read.seq, &read.qual).unwrap();
        w.finish().unwrap();

        assert_eq!(std::fs::read(&r1_path).unwrap(), b"@x\nNN\n+\n56\n");
        assert!(std::fs::read(&r2_path).unwrap().is_empty());
    }
}
