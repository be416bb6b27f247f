//! Aligned reads - owned read records decoded from the alignment stream
//!
//! The driver keeps one [`AlignedRead`] alive for the whole run and refills it
//! for every record, so the name/CIGAR/sequence/quality buffers are cleared
//! and reused instead of reallocated.
//!
//! # Flags
//! - 0x4   unmapped: passed through untouched
//! - 0x10  reverse strand: reverse-complemented at emission
//! - 0x40 / 0x80 first / second of pair: selects R1 or R2
//! - 0x900 secondary | supplementary: filtered before the core

use anyhow::{Context, Result};
use rust_htslib::bam::ext::BamRecordExtensions;
use rust_htslib::bam::record::Cigar;
use rust_htslib::{bam, bam::Read as BamRead};
use std::collections::VecDeque;
use std::path::Path;

use crate::variant::GenomicPos;

pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_FIRST_IN_PAIR: u16 = 0x40;
pub const FLAG_SECOND_IN_PAIR: u16 = 0x80;
pub const FLAG_SECONDARY_OR_SUPPLEMENTARY: u16 = 0x900;

/// BAM nibble code to IUPAC base
const BASE_CODES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

// ============================================================================
// Alignment Operations
// ============================================================================

/// CIGAR operation kind (all nine SAM operations)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarKind {
    Match,
    Ins,
    Del,
    RefSkip,
    SoftClip,
    HardClip,
    Pad,
    Equal,
    Diff,
}

impl CigarKind {
    /// SAM character for this operation
    pub fn as_char(self) -> char {
        match self {
            CigarKind::Match => 'M',
            CigarKind::Ins => 'I',
            CigarKind::Del => 'D',
            CigarKind::RefSkip => 'N',
            CigarKind::SoftClip => 'S',
            CigarKind::HardClip => 'H',
            CigarKind::Pad => 'P',
            CigarKind::Equal => '=',
            CigarKind::Diff => 'X',
        }
    }

    /// Whether the operation advances the reference coordinate
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarKind::Match | CigarKind::Equal | CigarKind::Diff | CigarKind::Del | CigarKind::RefSkip
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    pub kind: CigarKind,
    pub len: u32,
}

impl CigarOp {
    pub fn new(kind: CigarKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl From<&Cigar> for CigarOp {
    fn from(op: &Cigar) -> Self {
        let (kind, len) = match *op {
            Cigar::Match(len) => (CigarKind::Match, len),
            Cigar::Ins(len) => (CigarKind::Ins, len),
            Cigar::Del(len) => (CigarKind::Del, len),
            Cigar::RefSkip(len) => (CigarKind::RefSkip, len),
            Cigar::SoftClip(len) => (CigarKind::SoftClip, len),
            Cigar::HardClip(len) => (CigarKind::HardClip, len),
            Cigar::Pad(len) => (CigarKind::Pad, len),
            Cigar::Equal(len) => (CigarKind::Equal, len),
            Cigar::Diff(len) => (CigarKind::Diff, len),
        };
        CigarOp { kind, len }
    }
}

/// Number of reference bases spanned by a CIGAR
pub fn reference_span(cigar: &[CigarOp]) -> i64 {
    cigar
        .iter()
        .filter(|op| op.kind.consumes_reference())
        .map(|op| op.len as i64)
        .sum()
}

/// Parse a CIGAR string such as `5S20M2I10M` (used by tests and tooling)
pub fn parse_cigar(text: &str) -> Result<Vec<CigarOp>> {
    let mut ops = Vec::new();
    let mut len: u32 = 0;
    let mut have_digits = false;
    for c in text.chars() {
        if let Some(d) = c.to_digit(10) {
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add(d))
                .with_context(|| format!("CIGAR length overflow in '{}'", text))?;
            have_digits = true;
            continue;
        }
        if !have_digits {
            anyhow::bail!("CIGAR operation '{}' without length in '{}'", c, text);
        }
        let kind = match c {
            'M' => CigarKind::Match,
            'I' => CigarKind::Ins,
            'D' => CigarKind::Del,
            'N' => CigarKind::RefSkip,
            'S' => CigarKind::SoftClip,
            'H' => CigarKind::HardClip,
            'P' => CigarKind::Pad,
            '=' => CigarKind::Equal,
            'X' => CigarKind::Diff,
            other => anyhow::bail!("unknown CIGAR operation '{}' in '{}'", other, text),
        };
        ops.push(CigarOp::new(kind, len));
        len = 0;
        have_digits = false;
    }
    if have_digits {
        anyhow::bail!("trailing length without operation in '{}'", text);
    }
    Ok(ops)
}

// ============================================================================
// Read Record
// ============================================================================

/// Which FASTQ stream a read belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mate {
    First,
    Second,
    Unpaired,
}

impl Mate {
    /// First-of-pair wins when both bits are set, as does an unflagged read
    pub fn from_flags(flags: u16) -> Self {
        if flags & FLAG_FIRST_IN_PAIR != 0 {
            Mate::First
        } else if flags & FLAG_SECOND_IN_PAIR != 0 {
            Mate::Second
        } else {
            Mate::Unpaired
        }
    }
}

/// One alignment record, owned by the driver for a single iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedRead {
    /// Query name
    pub name: Vec<u8>,
    /// Contig index
    pub tid: i32,
    /// 0-based alignment start
    pub pos: i64,
    /// 0-based exclusive alignment end
    pub end_pos: i64,
    /// SAM flags
    pub flags: u16,
    pub cigar: Vec<CigarOp>,
    /// Bases in stored (reference-forward) orientation
    pub seq: Vec<u8>,
    /// Raw Phred qualities, no offset
    pub qual: Vec<u8>,
}

impl AlignedRead {
    /// Build a read from parts; the end position is derived from the CIGAR
    pub fn new(
        name: &[u8],
        tid: i32,
        pos: i64,
        flags: u16,
        cigar: Vec<CigarOp>,
        seq: &[u8],
        qual: &[u8],
    ) -> Self {
        let end_pos = pos + reference_span(&cigar);
        Self {
            name: name.to_vec(),
            tid,
            pos,
            end_pos,
            flags,
            cigar,
            seq: seq.to_vec(),
            qual: qual.to_vec(),
        }
    }

    /// Refill this read from a BAM record, reusing every buffer
    pub fn load_from_record(&mut self, record: &bam::Record) {
        self.name.clear();
        self.name.extend_from_slice(record.qname());
        self.tid = record.tid();
        self.pos = record.pos();
        self.end_pos = record.reference_end();
        self.flags = record.flags();

        self.cigar.clear();
        self.cigar
            .extend(record.cigar().iter().map(CigarOp::from));

        unpack_bases(record, &mut self.seq);
        self.qual.clear();
        self.qual.extend_from_slice(record.qual());
    }

    pub fn start(&self) -> GenomicPos {
        GenomicPos::new(self.tid, self.pos)
    }

    pub fn end(&self) -> GenomicPos {
        GenomicPos::new(self.tid, self.end_pos)
    }

    pub fn is_reverse(&self) -> bool {
        self.flags & FLAG_REVERSE != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags & FLAG_UNMAPPED != 0
    }

    pub fn is_secondary_or_supplementary(&self) -> bool {
        self.flags & FLAG_SECONDARY_OR_SUPPLEMENTARY != 0
    }

    pub fn mate(&self) -> Mate {
        Mate::from_flags(self.flags)
    }

    /// Name for log messages
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Unpack `record`'s 4-bit bases into `out` (cleared first, capacity kept)
fn unpack_bases(record: &bam::Record, out: &mut Vec<u8>) {
    let seq = record.seq();
    out.clear();
    out.extend(
        seq.encoded
            .iter()
            .flat_map(|&pair| [pair >> 4, pair & 0x0F])
            .take(seq.len())
            .map(|code| BASE_CODES[code as usize]),
    );
}

// ============================================================================
// Alignment Sources
// ============================================================================

/// Sequential, coordinate-sorted supplier of reads
pub trait AlignmentSource {
    /// Refill `read` with the next record. Returns `false` at end of stream.
    fn read_into(&mut self, read: &mut AlignedRead) -> Result<bool>;
}

/// SAM/BAM/CRAM file read front to back with rust-htslib
pub struct BamReadSource {
    reader: bam::Reader,
    record: bam::Record,
}

impl BamReadSource {
    pub fn from_path<P: AsRef<Path>>(path: P, threads: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = bam::Reader::from_path(path)
            .with_context(|| format!("Failed to open alignment file {}", path.display()))?;
        if threads > 0 {
            reader
                .set_threads(threads)
                .context("Failed to start BAM decompression threads")?;
        }
        Ok(Self {
            reader,
            record: bam::Record::new(),
        })
    }
}

impl AlignmentSource for BamReadSource {
    fn read_into(&mut self, read: &mut AlignedRead) -> Result<bool> {
        // read() reuses one Record; the iterator API is slower
        match self.reader.read(&mut self.record) {
            Some(Ok(())) => {
                read.load_from_record(&self.record);
                Ok(true)
            }
            Some(Err(e)) => Err(e).context("Failed to read alignment record"),
            None => Ok(false),
        }
    }
}

impl AlignmentSource for VecDeque<AlignedRead> {
    fn read_into(&mut self, read: &mut AlignedRead) -> Result<bool> {
        match self.pop_front() {
            Some(next) => {
                *read = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::CigarString;

    fn make_record(cigar: Vec<Cigar>, seq: &[u8], qual: &[u8], flags: u16) -> bam::Record {
        let cigar = CigarString(cigar);
        let mut rec = bam::Record::new();
        rec.set(b"UMI1#q1", Some(&cigar), seq, qual);
        rec.set_tid(2);
        rec.set_pos(100);
        rec.set_flags(flags);
        rec
    }

    #[test]
    fn test_unpack_bases_odd_and_even_lengths() {
        let rec = make_record(vec![Cigar::Match(10)], b"ACGTNACGTN", &[10u8; 10], 0);
        let mut buf = Vec::new();
        unpack_bases(&rec, &mut buf);
        assert_eq!(buf, rec.seq().as_bytes());

        let rec2 = make_record(vec![Cigar::Match(3)], b"NGA", &[1, 2, 3], 0);
        unpack_bases(&rec2, &mut buf);
        assert_eq!(buf, b"NGA");
    }

    #[test]
    fn test_load_from_record() {
        let rec = make_record(
            vec![Cigar::SoftClip(2), Cigar::Match(5), Cigar::Del(3), Cigar::Match(3)],
            b"TTACGTAGGC",
            &[5, 6, 30, 31, 32, 33, 34, 35, 36, 37],
            FLAG_REVERSE | FLAG_SECOND_IN_PAIR,
        );

        let mut read = AlignedRead::default();
        read.load_from_record(&rec);

        assert_eq!(read.name, b"UMI1#q1");
        assert_eq!(read.start(), GenomicPos::new(2, 100));
        assert_eq!(read.end(), GenomicPos::new(2, 111));
        assert_eq!(read.seq, b"TTACGTAGGC");
        assert_eq!(read.qual, vec![5, 6, 30, 31, 32, 33, 34, 35, 36, 37]);
        assert_eq!(
            read.cigar,
            vec![
                CigarOp::new(CigarKind::SoftClip, 2),
                CigarOp::new(CigarKind::Match, 5),
                CigarOp::new(CigarKind::Del, 3),
                CigarOp::new(CigarKind::Match, 3),
            ]
        );
        assert!(read.is_reverse());
        assert_eq!(read.mate(), Mate::Second);
    }

    #[test]
    fn test_new_derives_end_from_cigar() {
        let cigar = parse_cigar("3S4M2I3M2D1M5H").unwrap();
        let read = AlignedRead::new(b"r", 0, 1000, 0, cigar, b"AAACCCCGGTTTA", &[30; 13]);
        // 4M + 3M + 2D + 1M
        assert_eq!(read.end_pos, 1010);
    }

    #[test]
    fn test_mate_from_flags() {
        assert_eq!(Mate::from_flags(0x1 | 0x40), Mate::First);
        assert_eq!(Mate::from_flags(0x1 | 0x80), Mate::Second);
        assert_eq!(Mate::from_flags(0x0), Mate::Unpaired);
        assert_eq!(Mate::from_flags(0x40 | 0x80), Mate::First);
    }

    #[test]
    fn test_parse_cigar() {
        assert_eq!(
            parse_cigar("10M1I5=2X").unwrap(),
            vec![
                CigarOp::new(CigarKind::Match, 10),
                CigarOp::new(CigarKind::Ins, 1),
                CigarOp::new(CigarKind::Equal, 5),
                CigarOp::new(CigarKind::Diff, 2),
            ]
        );
        assert!(parse_cigar("M").is_err());
        assert!(parse_cigar("10").is_err());
        assert!(parse_cigar("4Q").is_err());
        assert!(parse_cigar("").unwrap().is_empty());
    }

    #[test]
    fn test_flag_helpers() {
        let read = AlignedRead::new(b"r", 0, 0, 0x100, vec![], b"", b"");
        assert!(read.is_secondary_or_supplementary());
        let read = AlignedRead::new(b"r", 0, 0, 0x800, vec![], b"", b"");
        assert!(read.is_secondary_or_supplementary());
        let read = AlignedRead::new(b"r", -1, -1, FLAG_UNMAPPED, vec![], b"", b"");
        assert!(read.is_unmapped());
        assert!(!read.is_secondary_or_supplementary());
    }
}
