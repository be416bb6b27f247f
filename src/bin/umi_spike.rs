use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

use umi_spike::{run_spike_in, SpikeConfig};

#[derive(Parser)]
#[command(name = "umi-spike")]
#[command(about = "Spike VCF variants into UMI-tagged reads and write paired FASTQ", long_about = None)]
#[command(version)]
struct Cli {
    /// Coordinate-sorted input alignments (SAM/BAM/CRAM)
    #[arg(short = 'b', long, value_name = "BAM")]
    bam: PathBuf,

    /// Coordinate-sorted variants (VCF/VCF.gz/BCF) with optional FORMAT/FA
    #[arg(short = 'v', long, value_name = "VCF")]
    vcf: PathBuf,

    /// Output FASTQ for first-of-pair and unpaired reads
    #[arg(short = '1', long, value_name = "R1.FQ")]
    r1: PathBuf,

    /// Output FASTQ for second-of-pair reads
    #[arg(short = '2', long, value_name = "R2.FQ")]
    r2: PathBuf,

    /// Allele fraction for variants without FA
    #[arg(short = 'f', long, value_name = "FLOAT", default_value = "0.1")]
    allele_fraction: f64,

    /// Base quality given to inserted bases after the first
    #[arg(long, value_name = "INT", default_value = "30")]
    inserted_quality: u8,

    /// Write plain FASTQ instead of gzip
    #[arg(long)]
    no_compress: bool,

    /// gzip compression level (0-9)
    #[arg(long, value_name = "INT", default_value = "1")]
    compression_level: u32,

    /// BAM decompression threads
    #[arg(long, value_name = "INT", default_value = "0")]
    threads: usize,

    /// Only log warnings and errors
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log window movement and per-variant decisions
    #[arg(long)]
    verbose: bool,
}

fn init_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::from_default_env();
    if cli.quiet {
        builder.filter_level(LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(LevelFilter::Info);
    }
    builder.format_timestamp(None).format_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = SpikeConfig {
        default_allele_fraction: cli.allele_fraction,
        inserted_base_quality: cli.inserted_quality,
        compress_output: !cli.no_compress,
        compression_level: cli.compression_level,
        read_threads: cli.threads,
        ..Default::default()
    };

    if let Err(e) = run_spike_in(&cli.bam, &cli.vcf, &cli.r1, &cli.r2, &config) {
        log::error!("Spike-in failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
