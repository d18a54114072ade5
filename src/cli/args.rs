use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "immunopep")]
#[command(about = "Parallel lookup engine and batch tools for immunopeptidome analysis")]
#[command(version)]
pub struct Cli {
    /// Enable trace-level logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Engine tuning shared by every parallel tool
///
/// The worker count is the last positional argument, after the output path(s).
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Maximum number of parallel workers
    pub workers: usize,

    /// Results a worker buffers before sending a batch
    #[arg(long, default_value = "100")]
    pub flush_threshold: usize,

    /// Rows the collector buffers before writing a block
    #[arg(long, default_value = "1000")]
    pub block_size: usize,

    /// Capacity of each dispatcher-to-worker and worker-to-collector channel
    #[arg(long, default_value = "1024")]
    pub channel_capacity: usize,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Count distinct binding peptides for each subject's HLA genotype
    Genotypes {
        /// Tab-separated genotype list (sample, six alleles joined by '_')
        genotype_list: PathBuf,

        /// SQLite database with hla, peptide and binders tables
        database: PathBuf,

        /// Output TSV path
        output: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Count wild-type and mutant reads at each mutation site
    ReadSupport {
        /// Tab-separated mutation list with a header row
        mutations: PathBuf,

        /// Output TSV path
        output: PathBuf,

        /// samtools-compatible executable
        #[arg(long, default_value = "samtools")]
        samtools: String,

        /// Maximum attempts for a failing external command
        #[arg(long, default_value = "5")]
        max_attempts: u32,

        /// Delay between attempts in seconds
        #[arg(long, default_value = "2")]
        retry_delay_secs: u64,

        /// Double the delay after every failed attempt
        #[arg(long)]
        doubling: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Tally binding predictions and run times of finished cluster jobs
    Tally {
        /// Script reference file (job name in the first column)
        script_reference: PathBuf,

        /// Directory holding one sub-directory per job
        results_dir: PathBuf,

        /// Output path for the per-HLA binder summary
        results_output: PathBuf,

        /// Output path for job timings
        time_output: PathBuf,

        /// Output path for incomplete job names
        incomplete_output: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Build the binder database from NetMHCpan score files (IC50 <= 500 nM)
    CollectBinders {
        /// Species code used in the peptide reference file names
        species_code: String,

        /// Root directory with `*_peptides.txt` files and `*.pMHC.parsed` results
        root_dir: PathBuf,

        /// File with one HLA allele per line
        hla_list: PathBuf,

        /// Database to create (must not exist)
        database: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Extract unique n-mers from FASTA files
    Kmers {
        /// FASTA files to read
        #[arg(long, required = true, num_args = 1..)]
        fasta: Vec<PathBuf>,

        /// Length of n-mer
        #[arg(short = 'n', long = "nmer-length")]
        n: usize,

        /// Output path
        output: PathBuf,
    },

    /// Join unique n-mers with n-1 overlaps into contigs
    Contigs {
        /// File with one unique n-mer per line
        input: PathBuf,

        /// Value of n
        n: usize,

        /// Output path
        output: PathBuf,
    },

    /// Extract IC50 values from NetMHCpan output
    ParseNetmhc {
        /// NetMHCpan output file
        input: PathBuf,

        /// Output path
        output: PathBuf,
    },

    /// Build the binder database from per-allele peptide files
    BuildDb {
        /// Directory of flat files named after their allele
        flat_dir: PathBuf,

        /// Database to create (must not exist)
        database: PathBuf,
    },
}
