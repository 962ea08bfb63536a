use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use affiliator_core::config_file;
use affiliator_core::{AffiliationClassifier, Config, OUTPUT_COLUMNS, RegistryIndex, ThresholdProfile};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};

mod output;

use output::{ColorMode, RunSummary};

/// Affiliation background classifier - label papers by the English-speaking
/// background of their authors' institutions
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// Registry file: TSV triples or a JSON organization list (env: AFFILIATOR_REGISTRY)
    #[arg(short = 'm', long, alias = "mapping")]
    registry: Option<PathBuf>,

    /// Disable fuzzy fallback
    #[arg(long)]
    no_fuzzy: bool,

    /// Fuzzy score threshold, 0-100 (default: 92)
    #[arg(long)]
    fuzzy_threshold: Option<u8>,

    /// Use the strict threshold profile (95)
    #[arg(long, conflicts_with = "fuzzy_threshold")]
    strict: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify every row of a papers CSV and write the annotated copy
    Classify {
        /// Papers CSV with an affiliations column
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV (default: <input stem>_with_English_bg.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Name of the affiliations column
        #[arg(long, alias = "institutions-col", default_value = "affiliations")]
        column: String,

        /// Log throughput every N rows (0 disables)
        #[arg(long, default_value_t = 1000)]
        progress_every: u64,

        /// Do not start the output with a UTF-8 byte order mark
        #[arg(long)]
        no_bom: bool,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// Resolve single affiliation fragments against the registry
    Resolve {
        /// Fragments to resolve
        #[arg(required = true)]
        text: Vec<String>,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// Print registry load statistics
    Inspect {
        /// Registry file (env: AFFILIATOR_REGISTRY)
        #[arg(short = 'm', long, alias = "mapping")]
        registry: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color);
    let file_config = config_file::load_config();

    match cli.command {
        Command::Classify {
            input,
            output,
            column,
            progress_every,
            no_bom,
            matching,
        } => {
            let output = output.unwrap_or_else(|| default_output_path(&input));
            let classifier = build_classifier(&file_config, &matching)?;
            let options = ClassifyOptions {
                column,
                progress_every,
                bom: !no_bom,
            };
            classify(&classifier, &input, &output, &options, color)
        }
        Command::Resolve { text, matching } => {
            let classifier = build_classifier(&file_config, &matching)?;
            let mut stdout = std::io::stdout();
            for fragment in &text {
                output::print_resolution(&mut stdout, fragment, classifier.resolve(fragment).as_ref(), color)?;
            }
            Ok(())
        }
        Command::Inspect { registry } => {
            let path = registry_path(registry, &file_config)?;
            let index = RegistryIndex::open(&path)
                .with_context(|| format!("failed to load registry {}", path.display()))?;
            output::print_registry_stats(&mut std::io::stdout(), &path, &index, color)?;
            Ok(())
        }
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("affiliator_core=debug,affiliator=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `<dir>/<stem>_with_English_bg.csv` next to the input.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}_with_English_bg.csv"))
}

/// Registry path: flag > AFFILIATOR_REGISTRY > config file.
fn registry_path(flag: Option<PathBuf>, file_config: &config_file::ConfigFile) -> anyhow::Result<PathBuf> {
    flag.or_else(|| std::env::var("AFFILIATOR_REGISTRY").ok().map(PathBuf::from))
        .or_else(|| file_config.registry_path())
        .context("no registry given; pass --registry or set AFFILIATOR_REGISTRY")
}

/// Resolve configuration: CLI flags > config files > defaults.
fn resolve_config(file_config: &config_file::ConfigFile, args: &MatchArgs) -> Config {
    let mut config = file_config.apply(Config::default());
    if args.strict {
        config.fuzzy_threshold = ThresholdProfile::Strict.threshold();
    }
    if let Some(threshold) = args.fuzzy_threshold {
        config.fuzzy_threshold = threshold;
    }
    if args.no_fuzzy {
        config.use_fuzzy = false;
    }
    config
}

fn build_classifier(
    file_config: &config_file::ConfigFile,
    args: &MatchArgs,
) -> anyhow::Result<AffiliationClassifier> {
    let path = registry_path(args.registry.clone(), file_config)?;
    let config = resolve_config(file_config, args);

    tracing::info!(path = %path.display(), "loading registry");
    let index = RegistryIndex::open(&path)
        .with_context(|| format!("failed to load registry {}", path.display()))?;
    let classifier = AffiliationClassifier::from_index(config, Arc::new(index))?;

    if classifier.config().use_fuzzy && !classifier.fuzzy_active() {
        tracing::info!("fuzzy backend not compiled in; running without fuzzy fallback");
    }
    Ok(classifier)
}

/// Header of the output file and the position of each appended column.
///
/// Columns that already exist in the input are overwritten in place.
fn output_layout(headers: &csv::StringRecord) -> (csv::StringRecord, [usize; 8]) {
    let mut out = headers.clone();
    let mut positions = [0usize; 8];
    for (slot, name) in positions.iter_mut().zip(OUTPUT_COLUMNS) {
        *slot = match headers.iter().position(|h| h == name) {
            Some(i) => i,
            None => {
                out.push_field(name);
                out.len() - 1
            }
        };
    }
    (out, positions)
}

/// Decode every field, replacing invalid UTF-8. The flag is set when any
/// field needed replacing.
fn decode_record(record: &csv::ByteRecord) -> (Vec<String>, bool) {
    let mut lossy = false;
    let fields = record
        .iter()
        .map(|field| {
            let text = String::from_utf8_lossy(field);
            lossy |= matches!(text, Cow::Owned(_));
            text.into_owned()
        })
        .collect();
    (fields, lossy)
}

/// Place the result values into one output row.
///
/// Fields beyond the header width are kept and follow the result columns.
fn output_row(
    mut fields: Vec<String>,
    header_len: usize,
    out_len: usize,
    positions: &[usize; 8],
    values: [String; 8],
) -> Vec<String> {
    let extra = if fields.len() > header_len {
        fields.split_off(header_len)
    } else {
        Vec::new()
    };
    fields.resize(out_len, String::new());
    for (pos, value) in positions.iter().zip(values) {
        fields[*pos] = value;
    }
    fields.extend(extra);
    fields
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

struct ClassifyOptions {
    column: String,
    progress_every: u64,
    /// Start the output with a UTF-8 BOM so spreadsheet tools pick the right encoding.
    bom: bool,
}

fn classify(
    classifier: &AffiliationClassifier,
    input: &Path,
    output: &Path,
    options: &ClassifyOptions,
    color: ColorMode,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::{Duration, Instant};

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("failed to open input CSV {}", input.display()))?;
    let (header_fields, _) = decode_record(reader.byte_headers()?);
    let headers = csv::StringRecord::from(header_fields);
    let Some(column_idx) = headers.iter().position(|h| h == options.column) else {
        anyhow::bail!("column '{}' not found in {}", options.column, input.display());
    };

    let (out_headers, positions) = output_layout(&headers);
    let mut file = std::fs::File::create(output)
        .with_context(|| format!("failed to create output CSV {}", output.display()))?;
    if options.bom {
        file.write_all(UTF8_BOM)?;
    }
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    writer.write_record(&out_headers)?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} {human_pos} rows ({per_sec})")
            .unwrap(),
    );
    bar.set_message("Classifying");
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut summary = RunSummary::default();
    let started = Instant::now();

    for (i, record) in reader.byte_records().enumerate() {
        let record =
            record.with_context(|| format!("failed to read row {} of {}", i + 1, input.display()))?;
        let (fields, lossy) = decode_record(&record);
        if lossy {
            tracing::debug!(row = i + 1, "replaced invalid UTF-8");
            summary.repaired_rows += 1;
        }
        if fields.len() > headers.len() {
            tracing::debug!(row = i + 1, fields = fields.len(), "row wider than header");
        }

        let row = classifier.classify_cell(fields.get(column_idx).map_or("", String::as_str));
        summary.record(&row);

        let fields = output_row(
            fields,
            headers.len(),
            out_headers.len(),
            &positions,
            row.output_fields(),
        );
        writer.write_record(&fields)?;
        bar.inc(1);

        if options.progress_every > 0 && summary.rows % options.progress_every == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            let stats = classifier.matcher().stats();
            tracing::debug!(
                rows = summary.rows,
                rows_per_sec = summary.rows as f64 / elapsed.max(f64::EPSILON),
                memo_hits = stats.memo_hits,
                fuzzy_hits = stats.fuzzy_hits,
                "progress"
            );
        }
    }

    writer.flush()?;
    bar.finish_and_clear();

    output::print_run_summary(
        &mut std::io::stdout(),
        &summary,
        &classifier.matcher().stats(),
        output,
        started.elapsed(),
        color,
    )?;
    std::io::stdout().flush()?;
    Ok(())
}
