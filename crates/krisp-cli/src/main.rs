use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use krisp_lib::{
    open_output, AlignmentWriter, DiagnosticPipeline, IngroupCoverage, ParamRequest, Primer3Designer, PrimerDesigner,
    RenderConfig, RenderMode, Report, RunConfiguration, SoftMaskMode, TsvWriter,
};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "krisp")]
#[command(version)]
#[command(about = "Find diagnostic alignments for a set of genome files", long_about = None)]
struct Cli {
    /// Ingroup genome files (FASTA/FASTQ, optionally compressed)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Outgroup genome files: amplified, but not detected
    #[arg(long, num_args = 0..)]
    outgroup: Vec<PathBuf>,

    /// Length of conserved regions on both ends of the amplicon
    #[arg(short = 'c', long)]
    conserved: Option<usize>,

    /// Length of conserved region on the left of the amplicon
    #[arg(long)]
    conserved_left: Option<usize>,

    /// Length of conserved region on the right of the amplicon
    #[arg(long)]
    conserved_right: Option<usize>,

    /// Diagnostic region length
    #[arg(short = 'd', long)]
    diagnostic: Option<usize>,

    /// Total amplicon length
    #[arg(short = 'a', long)]
    amplicon: Option<usize>,

    /// Drop windows touching soft-masked (lowercase) bases
    #[arg(long)]
    omit_soft: bool,

    /// Total number of cores to use
    #[arg(long, default_value = "1")]
    parallel: usize,

    /// Print alignments with bases matching the first ingroup row as dots
    #[arg(long)]
    dot_alignment: bool,

    /// Write human-readable alignments to a file (.gz compresses)
    #[arg(short = 'o', long = "out-align")]
    out_align: Option<PathBuf>,

    /// Write the TSV report to a file (.gz compresses); default stdout
    #[arg(short = 't', long = "out-tsv")]
    out_tsv: Option<PathBuf>,

    /// Directory in which the temporary run directory is created
    #[arg(short = 'w', long)]
    workdir: Option<PathBuf>,

    /// Design primers for every locus with primer3_core
    #[arg(short = 'p', long, overrides_with = "no_primer3")]
    primer3: bool,

    /// Do not design primers
    #[arg(long, overrides_with = "primer3")]
    no_primer3: bool,

    /// Only report loci present in every ingroup genome
    #[arg(long)]
    require_all_ingroup: bool,

    /// Print runtime information to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: use RUST_LOG if set, otherwise info when verbose
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let start = Instant::now();
    let config = run_configuration(&cli)?;
    let mut report = open_report(&cli)?;

    let summary = DiagnosticPipeline::new(config).run(&mut report).map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!("krisp failed during {}", stage))
    })?;

    for (source, records) in &summary.records {
        debug!("  {}: {} K-mers", source.name, records);
    }
    info!(
        "Found {} alignments in {:.2?} ({} loci examined)",
        summary.accepted,
        start.elapsed(),
        summary.loci_examined
    );

    Ok(())
}

/// Turn the parsed arguments into a validated run configuration
fn run_configuration(cli: &Cli) -> anyhow::Result<RunConfiguration> {
    let params = ParamRequest {
        amplicon: cli.amplicon,
        diagnostic: cli.diagnostic,
        conserved: cli.conserved,
        conserved_left: cli.conserved_left,
        conserved_right: cli.conserved_right,
    }
    .derive()
    .context("could not deduce input parameters")?;

    let mut config = RunConfiguration::new(params, cli.files.clone());
    config.outgroup = cli.outgroup.clone();
    config.parallel = cli.parallel;
    config.soft_mask = if cli.omit_soft {
        SoftMaskMode::Omit
    } else {
        SoftMaskMode::Map
    };
    config.workdir = cli.workdir.clone();
    config.ingroup_coverage = if cli.require_all_ingroup {
        IngroupCoverage::All
    } else {
        IngroupCoverage::Present
    };
    config.verbose = cli.verbose;
    config.validate()?;
    Ok(config)
}

/// Open the alignment and TSV outputs requested on the command line
fn open_report(cli: &Cli) -> anyhow::Result<Report> {
    let render = RenderConfig {
        mode: if cli.dot_alignment { RenderMode::Dot } else { RenderMode::Full },
    };

    let alignment = match &cli.out_align {
        Some(path) => {
            let out = open_output(Some(path.as_path())).with_context(|| format!("cannot create {}", path.display()))?;
            Some(AlignmentWriter::new(out, render))
        }
        None => None,
    };

    let tsv_out = open_output(cli.out_tsv.as_deref()).context("cannot open TSV output")?;
    let tsv = TsvWriter::new(tsv_out, cli.primer3).context("cannot write TSV header")?;

    let designer: Option<Box<dyn PrimerDesigner>> = if cli.primer3 {
        Some(Box::new(Primer3Designer::default()))
    } else {
        None
    };

    Ok(Report::new(alignment, Some(tsv), designer))
}
