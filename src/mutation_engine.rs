//! Read mutation engine - CIGAR walk with per-base allele substitution
//!
//! Walks one read's alignment operations, keeping a query cursor (index into
//! sequence/quality) and a reference cursor (genomic offset). At every aligned
//! base the variants anchored at the reference cursor are tested in window
//! order against the read's shared roll; the first one whose allele fraction
//! is at least the roll is applied and the rest of the run is ignored.
//!
//! ## CIGAR Operations
//! - M/=/X: consume both cursors, variant lookup at each base
//! - I: copied verbatim, no lookup
//! - S: dropped from the output
//! - D: reference cursor only
//! - H: nothing
//! - N/P: fatal, the read cannot be reasoned about
//!
//! ## Applying a variant
//! - SNV: emit ALT base with the original quality
//! - MNV: emit only the first ALT base (leading substitution)
//! - Insertion: emit every ALT base; the first keeps the original quality,
//!   the rest get the inserted-base quality
//! - Unsupported REF/ALT lengths: the original base is kept and the run ends
//! - Deletion: emit the anchor, then consume `len(REF) - 1` bases without
//!   emitting them, provided the current block holds them all; otherwise the
//!   original base is kept

use anyhow::Result;
use log::{debug, info, warn};

use crate::aligned_read::{AlignedRead, CigarKind};
use crate::error::SpikeError;
use crate::umi_hash::select_fraction;
use crate::variant::{GenomicPos, Variant, VariantShape};
use crate::variant_window::{VariantWindow, WindowCursor};

/// Raw quality given to inserted bases after the first
pub const DEFAULT_INSERTED_BASE_QUALITY: u8 = 30;

// ============================================================================
// Counters and Outcomes
// ============================================================================

/// Running totals across every read passed through the engine
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MutationCounters {
    /// SNVs spiked in
    pub kept_snv: u64,
    /// MNVs spiked in (leading base only)
    pub kept_mnv: u64,
    /// Insertions spiked in
    pub kept_insertion: u64,
    /// Deletions spiked in
    pub kept_deletion: u64,
    /// Aligned bases with an anchored variant that was not applied
    pub skipped_with_variant: u64,
    /// Aligned bases without any anchored variant
    pub skipped_no_variant: u64,
    /// Deletions that would have crossed the end of their match block
    pub deletion_boundary_fallbacks: u64,
    /// Variants whose REF/ALT lengths cannot be simulated
    pub unsupported_variants: u64,
    /// Reads carrying at least one spiked variant
    pub reads_mutated: u64,
}

impl MutationCounters {
    /// Total variants applied, across all four categories
    pub fn variants_applied(&self) -> u64 {
        self.kept_snv + self.kept_mnv + self.kept_insertion + self.kept_deletion
    }
}

/// What happened at one aligned base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseOutcome {
    /// No variant anchored here
    NoVariant,
    /// Variants anchored here, none applied
    VariantNotApplied,
    /// Deletion would cross the block end; original base kept
    DeletionFallback,
    Snv,
    Mnv,
    Insertion,
    /// Deletion applied; `deleted` further bases were consumed
    Deletion { deleted: usize },
}

impl BaseOutcome {
    pub fn is_applied(self) -> bool {
        matches!(
            self,
            BaseOutcome::Snv | BaseOutcome::Mnv | BaseOutcome::Insertion | BaseOutcome::Deletion { .. }
        )
    }
}

/// Borrowed view of one mutated read
#[derive(Debug)]
pub struct MutatedRead<'a> {
    pub seq: &'a [u8],
    pub qual: &'a [u8],
    /// One entry per aligned (M/=/X) base visited
    pub outcomes: &'a [BaseOutcome],
    /// Mutation roll used for every variant in this read
    pub roll: f64,
    /// Variants applied to this read
    pub applied: usize,
}

// ============================================================================
// Engine
// ============================================================================

/// Owns the per-read output buffers (cleared, not reallocated, between reads)
/// and the process-wide counters.
pub struct MutationEngine {
    default_fraction: f64,
    inserted_quality: u8,
    seq: Vec<u8>,
    qual: Vec<u8>,
    outcomes: Vec<BaseOutcome>,
    counters: MutationCounters,
}

impl MutationEngine {
    /// # Arguments
    /// * `default_fraction` - Allele fraction for variants without FA, in [0, 1]
    /// * `inserted_quality` - Raw quality for inserted bases after the first
    pub fn new(default_fraction: f64, inserted_quality: u8) -> Result<Self> {
        if !(0.0..=1.0).contains(&default_fraction) {
            return Err(SpikeError::InvalidAlleleFraction(default_fraction).into());
        }
        Ok(Self {
            default_fraction,
            inserted_quality,
            seq: Vec::with_capacity(512),
            qual: Vec::with_capacity(512),
            outcomes: Vec::with_capacity(512),
            counters: MutationCounters::default(),
        })
    }

    pub fn counters(&self) -> &MutationCounters {
        &self.counters
    }

    /// Rewrite `read` against the variants in `window`
    ///
    /// # Errors
    /// - [`SpikeError::MalformedCigar`] for N/P operations
    /// - [`SpikeError::QueryOutOfBounds`] when the CIGAR outruns the sequence
    pub fn mutate(&mut self, read: &AlignedRead, window: &VariantWindow) -> Result<MutatedRead<'_>> {
        self.seq.clear();
        self.qual.clear();
        self.outcomes.clear();

        let roll = select_fraction(&read.name).fraction;
        let mut cursor = WindowCursor::new();
        let mut query_pos: usize = 0;
        let mut ref_pos = read.pos;
        let mut applied = 0usize;

        for op in &read.cigar {
            let len = op.len as usize;
            match op.kind {
                CigarKind::Match | CigarKind::Equal | CigarKind::Diff => {
                    let mut j = 0;
                    while j < len {
                        check_query(read, query_pos)?;
                        let here = GenomicPos::new(read.tid, ref_pos);
                        let outcome = self.apply_at(
                            read,
                            cursor.run_at(window, here),
                            query_pos,
                            len - j - 1,
                            roll,
                        );
                        self.outcomes.push(outcome);

                        let consumed = match outcome {
                            BaseOutcome::Deletion { deleted } => {
                                check_query(read, query_pos + deleted)?;
                                1 + deleted
                            }
                            _ => 1,
                        };
                        if outcome.is_applied() {
                            applied += 1;
                        }
                        j += consumed;
                        query_pos += consumed;
                        ref_pos += consumed as i64;
                    }
                }
                CigarKind::Ins => {
                    if len > 0 {
                        check_query(read, query_pos + len - 1)?;
                    }
                    self.seq
                        .extend_from_slice(&read.seq[query_pos..query_pos + len]);
                    self.qual
                        .extend_from_slice(&read.qual[query_pos..query_pos + len]);
                    query_pos += len;
                }
                CigarKind::SoftClip => {
                    query_pos += len;
                }
                CigarKind::Del => {
                    ref_pos += len as i64;
                }
                CigarKind::HardClip => {}
                CigarKind::RefSkip | CigarKind::Pad => {
                    return Err(SpikeError::MalformedCigar {
                        read: read.name_lossy().into_owned(),
                        op: op.kind.as_char(),
                        tid: read.tid,
                        pos: read.pos,
                    }
                    .into());
                }
            }
        }

        if applied > 0 {
            self.counters.reads_mutated += 1;
        }

        Ok(MutatedRead {
            seq: &self.seq,
            qual: &self.qual,
            outcomes: &self.outcomes,
            roll,
            applied,
        })
    }

    /// Emit output for the aligned base at `query_pos` given the run of
    /// variants anchored at its reference position.
    ///
    /// `remaining` is the number of bases left in the current block after
    /// this one.
    fn apply_at<'w>(
        &mut self,
        read: &AlignedRead,
        run: impl Iterator<Item = &'w Variant>,
        query_pos: usize,
        remaining: usize,
        roll: f64,
    ) -> BaseOutcome {
        let base = read.seq[query_pos];
        let quality = read.qual[query_pos];
        let mut anchored = false;

        for variant in run {
            anchored = true;
            if roll > variant.fraction_or(self.default_fraction) {
                continue;
            }

            let alt = &variant.alt_allele;
            match variant.shape() {
                VariantShape::Snv => {
                    self.push(alt[0], quality);
                    self.counters.kept_snv += 1;
                    log_sampled(self.counters.kept_snv, "snv", read, variant);
                    return BaseOutcome::Snv;
                }
                VariantShape::Mnv => {
                    debug!(
                        "MNV {} decomposed, only the first substitution is simulated in read {}",
                        variant,
                        read.name_lossy()
                    );
                    self.push(alt[0], quality);
                    self.counters.kept_mnv += 1;
                    log_sampled(self.counters.kept_mnv, "mnv", read, variant);
                    return BaseOutcome::Mnv;
                }
                VariantShape::Insertion => {
                    self.push(alt[0], quality);
                    for &b in &alt[1..] {
                        self.push(b, self.inserted_quality);
                    }
                    self.counters.kept_insertion += 1;
                    log_sampled(self.counters.kept_insertion, "insertion", read, variant);
                    return BaseOutcome::Insertion;
                }
                VariantShape::Deletion { deleted } => {
                    if deleted <= remaining {
                        self.push(alt[0], quality);
                        self.counters.kept_deletion += 1;
                        log_sampled(self.counters.kept_deletion, "deletion", read, variant);
                        return BaseOutcome::Deletion { deleted };
                    }
                    debug!(
                        "Deletion {} crosses the end of an aligned block in read {}, keeping the original base",
                        variant,
                        read.name_lossy()
                    );
                    self.push(base, quality);
                    self.counters.deletion_boundary_fallbacks += 1;
                    self.counters.skipped_with_variant += 1;
                    return BaseOutcome::DeletionFallback;
                }
                VariantShape::Unsupported => {
                    warn!(
                        "Variant {} failed to be processed for read {}: unsupported allele lengths",
                        variant,
                        read.name_lossy()
                    );
                    self.counters.unsupported_variants += 1;
                    // Qualifying variant ends the run even when it cannot be applied
                    self.push(base, quality);
                    self.counters.skipped_with_variant += 1;
                    return BaseOutcome::VariantNotApplied;
                }
            }
        }

        self.push(base, quality);
        if anchored {
            self.counters.skipped_with_variant += 1;
            BaseOutcome::VariantNotApplied
        } else {
            self.counters.skipped_no_variant += 1;
            BaseOutcome::NoVariant
        }
    }

    #[inline]
    fn push(&mut self, base: u8, quality: u8) {
        self.seq.push(base);
        self.qual.push(quality);
    }
}

fn check_query(read: &AlignedRead, query_pos: usize) -> Result<()> {
    if query_pos >= read.seq.len() || query_pos >= read.qual.len() {
        return Err(SpikeError::QueryOutOfBounds {
            read: read.name_lossy().into_owned(),
            query_pos,
            len: read.seq.len().min(read.qual.len()),
        }
        .into());
    }
    Ok(())
}

/// Log a spiked read whenever its category count hits a power of two
fn log_sampled(count: u64, category: &str, read: &AlignedRead, variant: &Variant) {
    if count.is_power_of_two() {
        info!(
            "Read {} is spiked with the {} variant {} ({} so far)",
            read.name_lossy(),
            category,
            variant,
            count
        );
    }
}
