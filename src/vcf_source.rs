//! Variant source - sequential VCF/BCF reader feeding the variant window
//!
//! Uses rust-htslib's `bcf::Reader`, which handles plain VCF, bgzipped VCF
//! and BCF alike. Each record is copied into an owned [`Variant`] before the
//! reader's record buffer is reused for the next line.
//!
//! # Allele fraction
//! The per-record fraction comes from FORMAT/FA. Values are read through a
//! FORMAT buffer owned by the reader and reused across records; at most
//! [`MAX_FRACTION_VALUES`] values are inspected and the last non-missing one
//! wins.

use anyhow::{Context, Result};
use log::{debug, warn};
use rust_htslib::bcf::{self, record::Buffer, record::Numeric, Read as BcfRead};
use rust_htslib::errors::Error as HtsError;
use std::collections::VecDeque;
use std::path::Path;

use crate::variant::{GenomicPos, Variant};

/// FORMAT tag holding the simulated allele fraction
pub const FRACTION_TAG: &[u8] = b"FA";

/// Upper bound on FA values inspected per record
pub const MAX_FRACTION_VALUES: usize = 256;

// ============================================================================
// Variant Source Trait
// ============================================================================

/// Sequential, coordinate-sorted supplier of single-ALT variants
pub trait VariantSource {
    /// Next variant, or `None` once the stream is exhausted
    fn next_variant(&mut self) -> Result<Option<Variant>>;
}

impl VariantSource for VecDeque<Variant> {
    fn next_variant(&mut self) -> Result<Option<Variant>> {
        Ok(self.pop_front())
    }
}

// ============================================================================
// Allele Fraction Buffer
// ============================================================================

/// Padding value htslib uses after the last entry of a short int32 vector
const INT32_VECTOR_END: i32 = i32::MIN + 1;

/// Bounded scratch space for FORMAT/FA lookups
///
/// Owns the htslib buffer that `bcf_get_format_values` writes into, so no
/// allocation happens per record once it has grown to the largest FA vector.
pub struct FractionBuffer {
    raw: Buffer,
    values: Vec<f64>,
    integer_warned: bool,
}

impl Default for FractionBuffer {
    fn default() -> Self {
        Self {
            raw: Buffer::new(),
            values: Vec::with_capacity(MAX_FRACTION_VALUES),
            integer_warned: false,
        }
    }
}

impl FractionBuffer {
    /// Read FA from `record`, returning the last non-missing value.
    ///
    /// A header without FA, or a record without a value, yields `None`.
    /// FA declared as Integer is read through the int32 accessor.
    pub fn read_fraction(&mut self, record: &bcf::Record) -> Result<Option<f64>> {
        self.values.clear();
        let mut declared_integer = false;
        {
            let format = record.format_shared_buffer(FRACTION_TAG, &mut self.raw);
            match format.float() {
                Ok(per_sample) => {
                    let present = per_sample
                        .iter()
                        .flat_map(|sample| sample.iter())
                        .filter(|v| !v.is_missing() && !v.is_nan())
                        .take(MAX_FRACTION_VALUES)
                        .map(|&v| v as f64);
                    self.values.extend(present);
                }
                Err(HtsError::BcfUndefinedTag { .. }) | Err(HtsError::BcfMissingTag { .. }) => {
                    return Ok(None);
                }
                Err(HtsError::BcfUnexpectedType { .. }) => declared_integer = true,
                Err(e) => return Err(e).context("Failed to read FORMAT/FA"),
            }
        }
        if declared_integer {
            self.read_integer_fraction(record)?;
        }
        Ok(self.values.last().copied())
    }

    fn read_integer_fraction(&mut self, record: &bcf::Record) -> Result<()> {
        if !self.integer_warned {
            warn!("FORMAT/FA is not declared as Float, reading it as Integer");
            self.integer_warned = true;
        }
        let format = record.format_shared_buffer(FRACTION_TAG, &mut self.raw);
        match format.integer() {
            Ok(per_sample) => {
                let present = per_sample
                    .iter()
                    .flat_map(|sample| sample.iter())
                    .filter(|&&v| !v.is_missing() && v != INT32_VECTOR_END)
                    .take(MAX_FRACTION_VALUES)
                    .map(|&v| v as f64);
                self.values.extend(present);
                Ok(())
            }
            Err(HtsError::BcfMissingTag { .. }) | Err(HtsError::BcfUnexpectedType { .. }) => Ok(()),
            Err(e) => Err(e).context("Failed to read FORMAT/FA as Integer"),
        }
    }
}

// ============================================================================
// VCF/BCF Reader
// ============================================================================

/// Counters kept while reading the variant file
#[derive(Debug, Default, Clone)]
pub struct VcfReadStats {
    /// Records read from the file
    pub records: usize,
    /// Records dropped because they have no ALT allele
    pub no_alt: usize,
    /// Records carrying more than one ALT (only the first is used)
    pub multiallelic: usize,
}

pub struct VcfVariantReader {
    reader: bcf::Reader,
    record: bcf::Record,
    fractions: FractionBuffer,
    stats: VcfReadStats,
}

impl VcfVariantReader {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = bcf::Reader::from_path(path)
            .with_context(|| format!("Failed to open variant file {}", path.display()))?;
        let record = reader.empty_record();
        Ok(Self {
            reader,
            record,
            fractions: FractionBuffer::default(),
            stats: VcfReadStats::default(),
        })
    }

    pub fn stats(&self) -> &VcfReadStats {
        &self.stats
    }

    /// Copy the current record into an owned variant, if it has an ALT
    fn duplicate_current(&mut self) -> Result<Option<Variant>> {
        let rid = self
            .record
            .rid()
            .context("Variant record without a contig")?;
        let pos = GenomicPos::new(rid as i32, self.record.pos());

        let alleles = self.record.alleles();
        if alleles.len() < 2 {
            self.stats.no_alt += 1;
            warn!("Variant at {} has no ALT allele, skipping", pos);
            return Ok(None);
        }
        if alleles.len() > 2 {
            self.stats.multiallelic += 1;
            warn!(
                "Variant at {} has {} ALT alleles, only the first is simulated",
                pos,
                alleles.len() - 1
            );
        }
        let mut variant = Variant::new(pos, alleles[0], alleles[1]);
        variant.allele_fraction = self.fractions.read_fraction(&self.record)?;
        Ok(Some(variant))
    }
}

impl VariantSource for VcfVariantReader {
    fn next_variant(&mut self) -> Result<Option<Variant>> {
        loop {
            match self.reader.read(&mut self.record) {
                Some(Ok(())) => {
                    self.stats.records += 1;
                    if let Some(variant) = self.duplicate_current()? {
                        debug!("Read variant {}", variant);
                        return Ok(Some(variant));
                    }
                }
                Some(Err(e)) => return Err(e).context("Failed to read variant record"),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vcf_file() -> NamedTempFile {
        tempfile::Builder::new().suffix(".vcf").tempfile().unwrap()
    }

    fn write_vcf(body: &str) -> NamedTempFile {
        let mut vcf = vcf_file();
        writeln!(vcf, "##fileformat=VCFv4.2").unwrap();
        writeln!(vcf, "##contig=<ID=chr1,length=10000>").unwrap();
        writeln!(vcf, "##contig=<ID=chr2,length=10000>").unwrap();
        writeln!(
            vcf,
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
        )
        .unwrap();
        writeln!(
            vcf,
            "##FORMAT=<ID=FA,Number=A,Type=Float,Description=\"Allele fraction\">"
        )
        .unwrap();
        writeln!(
            vcf,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tTUMOR"
        )
        .unwrap();
        write!(vcf, "{}", body).unwrap();
        vcf.flush().unwrap();
        vcf
    }

    #[test]
    fn test_reads_variants_with_and_without_fraction() {
        let vcf = write_vcf(
            "chr1\t101\t.\tA\tT\t.\tPASS\t.\tFA\t0.25\n\
             chr1\t205\t.\tACG\tA\t.\tPASS\t.\tGT:FA\t0/1:.\n\
             chr2\t11\t.\tC\tCTT\t.\tPASS\t.\tGT\t0/1\n",
        );
        let mut reader = VcfVariantReader::from_path(vcf.path()).unwrap();

        let v1 = reader.next_variant().unwrap().unwrap();
        assert_eq!(v1.pos, GenomicPos::new(0, 100));
        assert_eq!(v1.ref_allele, b"A");
        assert_eq!(v1.alt_allele, b"T");
        assert!((v1.allele_fraction.unwrap() - 0.25).abs() < 1e-6);

        let v2 = reader.next_variant().unwrap().unwrap();
        assert_eq!(v2.pos, GenomicPos::new(0, 204));
        assert_eq!(v2.ref_allele, b"ACG");
        assert_eq!(v2.allele_fraction, None);

        let v3 = reader.next_variant().unwrap().unwrap();
        assert_eq!(v3.pos, GenomicPos::new(1, 10));
        assert_eq!(v3.alt_allele, b"CTT");
        assert_eq!(v3.allele_fraction, None);

        assert!(reader.next_variant().unwrap().is_none());
        assert_eq!(reader.stats().records, 3);
    }

    #[test]
    fn test_multiallelic_uses_first_alt() {
        let vcf = write_vcf("chr1\t50\t.\tG\tA,C\t.\tPASS\t.\tFA\t0.1,0.3\n");
        let mut reader = VcfVariantReader::from_path(vcf.path()).unwrap();

        let v = reader.next_variant().unwrap().unwrap();
        assert_eq!(v.alt_allele, b"A");
        // Last value wins
        assert!((v.allele_fraction.unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(reader.stats().multiallelic, 1);
    }

    #[test]
    fn test_missing_alt_is_skipped() {
        let vcf = write_vcf(
            "chr1\t50\t.\tG\t.\t.\tPASS\t.\tGT\t0/0\n\
             chr1\t60\t.\tG\tT\t.\tPASS\t.\tGT\t0/1\n",
        );
        let mut reader = VcfVariantReader::from_path(vcf.path()).unwrap();

        let v = reader.next_variant().unwrap().unwrap();
        assert_eq!(v.pos.pos, 59);
        assert_eq!(reader.stats().no_alt, 1);
    }

    #[test]
    fn test_header_without_fa() {
        let mut vcf = vcf_file();
        writeln!(vcf, "##fileformat=VCFv4.2").unwrap();
        writeln!(vcf, "##contig=<ID=chr1,length=10000>").unwrap();
        writeln!(vcf, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap();
        writeln!(vcf, "chr1\t5\t.\tA\tG\t.\tPASS\t.").unwrap();
        vcf.flush().unwrap();

        let mut reader = VcfVariantReader::from_path(vcf.path()).unwrap();
        let v = reader.next_variant().unwrap().unwrap();
        assert_eq!(v.allele_fraction, None);
    }

    #[test]
    fn test_integer_fraction_tag() {
        let mut vcf = vcf_file();
        writeln!(vcf, "##fileformat=VCFv4.2").unwrap();
        writeln!(vcf, "##contig=<ID=chr1,length=10000>").unwrap();
        writeln!(
            vcf,
            "##FORMAT=<ID=FA,Number=1,Type=Integer,Description=\"Allele fraction\">"
        )
        .unwrap();
        writeln!(
            vcf,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tTUMOR"
        )
        .unwrap();
        writeln!(vcf, "chr1\t5\t.\tA\tG\t.\tPASS\t.\tFA\t1").unwrap();
        writeln!(vcf, "chr1\t9\t.\tC\tT\t.\tPASS\t.\tFA\t.").unwrap();
        vcf.flush().unwrap();

        // Does not abort the run
        let mut reader = VcfVariantReader::from_path(vcf.path()).unwrap();
        let v = reader.next_variant().unwrap().unwrap();
        assert_eq!(v.allele_fraction, Some(1.0));
        let v = reader.next_variant().unwrap().unwrap();
        assert_eq!(v.allele_fraction, None);
        assert!(reader.next_variant().unwrap().is_none());
    }

    #[test]
    fn test_memory_source() {
        let mut source: VecDeque<Variant> = VecDeque::new();
        source.push_back(Variant::new(GenomicPos::new(0, 1), b"A", b"C"));
        assert!(source.next_variant().unwrap().is_some());
        assert!(source.next_variant().unwrap().is_none());
    }
}
