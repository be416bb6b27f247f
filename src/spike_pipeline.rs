//! Spike-in pipeline - drives reads through the window, engine and writer
//!
//! One read at a time, fully sequential:
//! 1. Pull the next alignment record
//! 2. Drop secondary/supplementary records
//! 3. Move the variant window to the read's span
//! 4. Mutate the read (or pass it through when nothing overlaps)
//! 5. Write it to R1/R2
//!
//! The FASTQ writers are finished on every exit path so gzip output always
//! gets its trailer.

use anyhow::{Context, Result};
use log::info;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use crate::aligned_read::{AlignedRead, AlignmentSource, BamReadSource};
use crate::error::SpikeError;
use crate::fastq_writer::FastqPairWriter;
use crate::mutation_engine::{MutationCounters, MutationEngine, DEFAULT_INSERTED_BASE_QUALITY};
use crate::variant_window::StreamSynchronizer;
use crate::vcf_source::{VariantSource, VcfVariantReader};

// ============================================================================
// Configuration and Statistics
// ============================================================================

/// Configuration for a spike-in run
#[derive(Debug, Clone)]
pub struct SpikeConfig {
    /// Allele fraction for variants without FA
    pub default_allele_fraction: f64,
    /// Raw quality for inserted bases after the first
    pub inserted_base_quality: u8,
    /// Gzip FASTQ output (set to false for named pipe streaming)
    pub compress_output: bool,
    /// gzip level 0-9
    pub compression_level: u32,
    /// htslib decompression threads for the BAM reader (0 = none)
    pub read_threads: usize,
    /// Reads between progress lines (0 = silent)
    pub progress_interval: u64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            default_allele_fraction: 0.1,
            inserted_base_quality: DEFAULT_INSERTED_BASE_QUALITY,
            compress_output: true,
            compression_level: 1,
            read_threads: 0,
            progress_interval: 1_000_000,
        }
    }
}

impl SpikeConfig {
    /// Reject values that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        let af = self.default_allele_fraction;
        if !(0.0..=1.0).contains(&af) {
            return Err(SpikeError::InvalidAlleleFraction(af).into());
        }
        if self.compression_level > 9 {
            anyhow::bail!(
                "compression level {} is outside 0-9",
                self.compression_level
            );
        }
        Ok(())
    }
}

/// Statistics returned from a spike-in run
#[derive(Debug, Default, Clone)]
pub struct SpikeStats {
    /// Alignment records read
    pub total_reads: u64,
    /// Secondary/supplementary records dropped
    pub filtered_reads: u64,
    /// Unmapped reads written unchanged
    pub unmapped_reads: u64,
    /// Mapped reads with an empty window, written unchanged
    pub bypassed_reads: u64,
    /// Reads walked by the mutation engine
    pub engine_reads: u64,
    pub r1_written: u64,
    pub r2_written: u64,
    /// Variants dropped because they precede every remaining read
    pub variants_skipped: usize,
    pub variants_fetched: usize,
    pub variants_evicted: usize,
    /// Variant file records and rejects (file-backed runs only)
    pub variant_records: usize,
    pub variants_without_alt: usize,
    pub multiallelic_variants: usize,
    pub mutations: MutationCounters,
    pub elapsed_ms: u64,
}

// ============================================================================
// Driver Loop
// ============================================================================

/// Stream every read from `reads` through the engine into `writer`.
///
/// # Arguments
/// * `reads` - Coordinate-sorted alignment source
/// * `sync` - Synchronizer over a coordinate-sorted variant source
/// * `writer` - R1/R2 output
/// * `config` - Fraction default, inserted quality and progress interval
///
/// # Returns
/// Statistics for this call; writer counts are those of `writer` afterwards
pub fn spike_reads<A, V, W>(
    reads: &mut A,
    sync: &mut StreamSynchronizer<V>,
    writer: &mut FastqPairWriter<W>,
    config: &SpikeConfig,
) -> Result<SpikeStats>
where
    A: AlignmentSource,
    V: VariantSource,
    W: Write,
{
    let t0 = Instant::now();
    let mut stats = SpikeStats::default();
    let mut engine = MutationEngine::new(
        config.default_allele_fraction,
        config.inserted_base_quality,
    )?;
    let mut read = AlignedRead::default();

    while reads.read_into(&mut read)? {
        stats.total_reads += 1;
        if config.progress_interval > 0 && stats.total_reads % config.progress_interval == 0 {
            info!(
                "Processed {} reads ({} spiked variants)",
                stats.total_reads,
                engine.counters().variants_applied()
            );
        }

        if read.is_secondary_or_supplementary() {
            stats.filtered_reads += 1;
            continue;
        }

        if read.is_unmapped() {
            stats.unmapped_reads += 1;
            writer.write_read(&read, &read.seq, &read.qual)?;
            continue;
        }

        let window = sync.advance_to(read.start(), read.end())?;
        if window.is_empty() {
            stats.bypassed_reads += 1;
            writer.write_read(&read, &read.seq, &read.qual)?;
        } else {
            stats.engine_reads += 1;
            let mutated = engine.mutate(&read, window)?;
            writer.write_read(&read, mutated.seq, mutated.qual)?;
        }
    }

    let sync_stats = sync.stats();
    stats.variants_skipped = sync_stats.skipped;
    stats.variants_fetched = sync_stats.fetched;
    stats.variants_evicted = sync_stats.evicted;
    stats.mutations = engine.counters().clone();
    stats.r1_written = writer.counts().r1;
    stats.r2_written = writer.counts().r2;
    stats.elapsed_ms = t0.elapsed().as_millis() as u64;
    Ok(stats)
}

/// Spike the variants of `vcf_path` into the reads of `bam_path`
///
/// # Arguments
/// * `bam_path` - Coordinate-sorted SAM/BAM/CRAM
/// * `vcf_path` - Coordinate-sorted VCF/VCF.gz/BCF, same contig order as the BAM
/// * `r1_path` - Output R1 FASTQ
/// * `r2_path` - Output R2 FASTQ
/// * `config` - Run configuration
///
/// # Returns
/// SpikeStats with processing statistics
pub fn run_spike_in<P: AsRef<Path>>(
    bam_path: P,
    vcf_path: P,
    r1_path: P,
    r2_path: P,
    config: &SpikeConfig,
) -> Result<SpikeStats> {
    config.validate()?;

    // Inputs first, so a bad input path leaves no output behind
    let mut reads = BamReadSource::from_path(bam_path.as_ref(), config.read_threads)?;
    let variants = VcfVariantReader::from_path(vcf_path.as_ref())?;
    let mut sync = StreamSynchronizer::new(variants);

    let mut writer = FastqPairWriter::create(
        r1_path.as_ref(),
        r2_path.as_ref(),
        config.compress_output,
        config.compression_level,
    )?;

    info!(
        "Spiking variants from {} into {}",
        vcf_path.as_ref().display(),
        bam_path.as_ref().display()
    );
    let result = spike_reads(&mut reads, &mut sync, &mut writer, config);
    let finished = writer.finish().context("Failed to close FASTQ output");

    let mut stats = result?;
    finished?;

    let vcf_stats = sync.source().stats();
    stats.variant_records = vcf_stats.records;
    stats.variants_without_alt = vcf_stats.no_alt;
    stats.multiallelic_variants = vcf_stats.multiallelic;

    log_summary(&stats);
    Ok(stats)
}

/// Final summary at `info`
pub fn log_summary(stats: &SpikeStats) {
    let m = &stats.mutations;
    info!("Spike-in complete:");
    info!("  Total reads: {}", stats.total_reads);
    info!("  Filtered (secondary/supplementary): {}", stats.filtered_reads);
    info!("  Unmapped passthrough: {}", stats.unmapped_reads);
    info!("  Bypassed (no overlapping variant): {}", stats.bypassed_reads);
    info!("  Reads mutated: {} of {} walked", m.reads_mutated, stats.engine_reads);
    info!("  Written R1/R2: {}/{}", stats.r1_written, stats.r2_written);
    info!(
        "  Variants: {} records, {} fetched, {} skipped, {} evicted",
        stats.variant_records, stats.variants_fetched, stats.variants_skipped, stats.variants_evicted
    );
    info!(
        "  Kept: {} SNV, {} MNV, {} insertion, {} deletion",
        m.kept_snv, m.kept_mnv, m.kept_insertion, m.kept_deletion
    );
    info!(
        "  Skipped bases: {} with variant, {} without",
        m.skipped_with_variant, m.skipped_no_variant
    );
    if m.deletion_boundary_fallbacks > 0 || m.unsupported_variants > 0 {
        info!(
            "  Deletion boundary fallbacks: {}, unsupported variants: {}",
            m.deletion_boundary_fallbacks, m.unsupported_variants
        );
    }
    if stats.variants_without_alt > 0 || stats.multiallelic_variants > 0 {
        info!(
            "  Variants without ALT: {}, multiallelic: {}",
            stats.variants_without_alt, stats.multiallelic_variants
        );
    }
    info!("  Elapsed: {}ms", stats.elapsed_ms);
}
