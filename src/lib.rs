//! umi-spike - deterministic variant spike-in for UMI-tagged reads
//!
//! Streams a coordinate-sorted alignment file against a coordinate-sorted
//! variant file and writes every read to paired FASTQ, with the ALT allele of
//! overlapping variants spliced in. Whether a read carries a variant depends
//! only on the UMI part of its name and the variant's allele fraction, so all
//! reads of one molecule (and both mates) make the same choice.

// Modules
pub mod aligned_read;
pub mod error;
pub mod fastq_writer;
pub mod mutation_engine;
pub mod spike_pipeline;
pub mod umi_hash;
pub mod variant;
pub mod variant_window;
pub mod vcf_source;

pub use aligned_read::{AlignedRead, AlignmentSource, BamReadSource, CigarKind, CigarOp, Mate};
pub use error::SpikeError;
pub use fastq_writer::{FastqCounts, FastqPairWriter, FastqSink};
pub use mutation_engine::{BaseOutcome, MutationCounters, MutationEngine};
pub use spike_pipeline::{run_spike_in, spike_reads, SpikeConfig, SpikeStats};
pub use umi_hash::{select_fraction, AlleleRoll};
pub use variant::{classify_variant, GenomicPos, Variant, VariantShape};
pub use variant_window::{StreamSynchronizer, VariantWindow};
pub use vcf_source::{VariantSource, VcfVariantReader};
