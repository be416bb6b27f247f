//! Variant records and genomic coordinates shared by the window and the engine

use std::fmt;

// ============================================================================
// Genomic Position
// ============================================================================

/// Zero-based genomic coordinate
///
/// Ordered by contig index first, then offset. Contig indices are the
/// alignment header `tid` / variant header `rid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenomicPos {
    pub tid: i32,
    pub pos: i64,
}

impl GenomicPos {
    pub fn new(tid: i32, pos: i64) -> Self {
        Self { tid, pos }
    }
}

impl fmt::Display for GenomicPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {} pos {}", self.tid, self.pos)
    }
}

// ============================================================================
// Variant Record
// ============================================================================

/// A single-ALT variant owned by the variant window
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Anchor position (first base of REF)
    pub pos: GenomicPos,
    /// Reference allele
    pub ref_allele: Vec<u8>,
    /// Alternate allele
    pub alt_allele: Vec<u8>,
    /// Per-record allele fraction (FORMAT/FA), if present
    pub allele_fraction: Option<f64>,
}

impl Variant {
    pub fn new(pos: GenomicPos, ref_allele: &[u8], alt_allele: &[u8]) -> Self {
        Self {
            pos,
            ref_allele: ref_allele.to_vec(),
            alt_allele: alt_allele.to_vec(),
            allele_fraction: None,
        }
    }

    /// Attach an explicit allele fraction
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.allele_fraction = Some(fraction);
        self
    }

    /// Explicit fraction, or `default` when the record carries none
    pub fn fraction_or(&self, default: f64) -> f64 {
        self.allele_fraction.unwrap_or(default)
    }

    pub fn shape(&self) -> VariantShape {
        classify_variant(&self.ref_allele, &self.alt_allele)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}>{}",
            self.pos,
            String::from_utf8_lossy(&self.ref_allele),
            String::from_utf8_lossy(&self.alt_allele)
        )
    }
}

// ============================================================================
// Variant Shape
// ============================================================================

/// How a REF/ALT pair is applied to a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantShape {
    /// 1 base -> 1 base
    Snv,
    /// N bases -> N bases (N > 1); only the leading substitution is simulated
    Mnv,
    /// 1 base -> N bases (N > 1)
    Insertion,
    /// N bases -> 1 base (N > 1); `deleted` = N - 1
    Deletion { deleted: usize },
    /// Any other combination (complex indel, empty allele)
    Unsupported,
}

/// Classify a REF/ALT pair by allele lengths
pub fn classify_variant(ref_allele: &[u8], alt_allele: &[u8]) -> VariantShape {
    match (ref_allele.len(), alt_allele.len()) {
        (1, 1) => VariantShape::Snv,
        (r, a) if r == a && r > 1 => VariantShape::Mnv,
        (1, a) if a > 1 => VariantShape::Insertion,
        (r, 1) if r > 1 => VariantShape::Deletion { deleted: r - 1 },
        _ => VariantShape::Unsupported,
    }
}
