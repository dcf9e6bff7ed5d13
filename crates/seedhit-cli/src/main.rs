use anyhow::Context;
use clap::{Parser, Subcommand};
use seedhit_lib::builder::{ExtractionPolicy, FnSink, IndexBuilder, IndexConfig, SeedEnumerator, SeedHistogram};
use seedhit_lib::constants::DEFAULT_RANGE_COVER;
use seedhit_lib::culling::{cull, CullingOptions, HspOrder, StreamingCuller, TargetHits};
use seedhit_lib::serialization::IndexFileHeader;
use seedhit_lib::{open_hash_index, save_hash_index, Hsp, Interval, Reduction, SeedEncoding, SequenceSet, ShapeSet};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "seedhit")]
#[command(version = "0.1.0")]
#[command(about = "seedhit: seed indexes and hit culling for protein homology search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Seed index parameters shared by `build` and `query`
///
/// An index file does not record them: `query` must be given the values
/// used for `build`.
#[derive(clap::Args)]
struct SeedArgs {
    /// Spaced seed shape, e.g. 111101011101111 (repeatable; default: two 12/15 and 12/18 shapes)
    #[arg(short, long = "shape")]
    shapes: Vec<String>,

    /// Reduced alphabet as space-separated residue groups (default: Murphy 10)
    #[arg(long)]
    reduction: Option<String>,

    /// Seed encoding: spaced_factor, hashed or contiguous
    #[arg(long, default_value = "spaced_factor")]
    encoding: SeedEncoding,

    /// Number of low key bits selecting the partition
    #[arg(short = 'p', long, default_value = "8")]
    partition_bits: u32,

    /// Treat lowercase residues as masked
    #[arg(long, default_value = "false")]
    lowercase_masking: bool,

    /// Discard seeds whose composition entropy is below this value (0 = off)
    #[arg(long, default_value = "0")]
    complexity_cut: f64,

    /// Index only window minimizers over this many seed offsets
    #[arg(long, conflicts_with = "sketch_size")]
    minimizer_window: Option<usize>,

    /// Index at most this many distinct seeds per sequence
    #[arg(long)]
    sketch_size: Option<usize>,

    /// Number of threads (0 = all available cores)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,
}

impl SeedArgs {
    fn to_config(&self) -> anyhow::Result<IndexConfig> {
        let mut config = IndexConfig::default();
        if !self.shapes.is_empty() {
            config.shapes = ShapeSet::from_codes(self.shapes.as_slice())?;
        }
        let reduction = match &self.reduction {
            Some(definition) => Reduction::new(definition)?,
            None => Reduction::murphy10(),
        };
        config.reduction = reduction.with_lowercase_masking(self.lowercase_masking);
        config.encoding = self.encoding;
        config.partition_bits = self.partition_bits;
        config.complexity_cut = self.complexity_cut;
        config.extraction = match (self.minimizer_window, self.sketch_size) {
            (Some(window), _) => ExtractionPolicy::Minimizer { window },
            (None, Some(size)) => ExtractionPolicy::Sketch { size },
            (None, None) => ExtractionPolicy::Exact,
        };
        config.num_threads = self.threads;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a hash-table seed index from a protein FASTA file
    Build {
        /// Input FASTA/FASTQ file
        #[arg(short, long)]
        input: String,

        /// Output file
        #[arg(short, long)]
        output: Option<String>,

        #[command(flatten)]
        seeds: SeedArgs,

        /// Number of sequence chunks used for counting and filling
        #[arg(long, default_value = "64")]
        seq_chunks: usize,

        /// Build the index in this many partition ranges to bound memory
        #[arg(long, default_value = "1")]
        index_chunks: usize,

        /// Hash table slots per key
        #[arg(long, default_value = "1.5")]
        load_factor: f64,

        /// Skip sequences shorter than this
        #[arg(long, default_value = "0")]
        min_seq_len: usize,

        /// Reuse seed counts from this file, or write them there if it does not exist
        #[arg(long)]
        histogram: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Summarize an index file
    Inspect {
        /// Index file
        #[arg(short, long)]
        index: String,
    },

    /// Look up the seeds of query sequences in an index
    Query {
        /// Index file
        #[arg(short, long)]
        index: String,

        /// Query FASTA/FASTQ file
        #[arg(short, long)]
        query: String,

        #[command(flatten)]
        seeds: SeedArgs,
    },

    /// Cull tabular alignment candidates to the reported hits
    Cull {
        /// Tab-separated candidates: query target score bitscore evalue qstart qend tstart tend (1-based, inclusive)
        #[arg(short, long)]
        input: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<String>,

        /// Report at most this many targets per query, plus e-value ties (0 = all)
        #[arg(short = 'k', long, conflicts_with = "top_percent")]
        max_target_seqs: Option<usize>,

        /// Report targets scoring within this percent of the best target
        #[arg(long)]
        top_percent: Option<f64>,

        /// HSPs reported per target (0 = unlimited)
        #[arg(long)]
        max_hsps: Option<usize>,

        /// Maximum e-value
        #[arg(short, long)]
        evalue: Option<f64>,

        /// Minimum bit score; overrides the e-value cutoff
        #[arg(long)]
        min_score: Option<f64>,

        /// Drop an HSP when this percent of its query range is covered by a better HSP
        #[arg(long)]
        overlap: Option<f64>,

        /// Order of HSPs within a target: evalue or score
        #[arg(long)]
        hsp_order: Option<HspOrder>,

        /// Apply the target limits per query region instead of per query
        #[arg(long)]
        range_culling: bool,

        /// Percent of a target's query ranges covered by better targets that drops it under range culling
        #[arg(long, default_value_t = DEFAULT_RANGE_COVER)]
        range_cover: f64,

        /// Feed each query's candidates in this many target chunks
        #[arg(long, default_value = "1")]
        target_chunks: usize,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            seeds,
            seq_chunks,
            index_chunks,
            load_factor,
            min_seq_len,
            histogram,
            verbose,
        } => {
            let mut config = seeds.to_config()?;
            config.seq_chunks = seq_chunks;
            config.index_chunks = index_chunks;
            config.load_factor = load_factor;
            config.min_seq_len = min_seq_len;
            build_command(&input, output, config, histogram, verbose)?;
        }
        Commands::Inspect { index } => {
            inspect_command(&index)?;
        }
        Commands::Query { index, query, seeds } => {
            query_command(&index, &query, seeds.to_config()?)?;
        }
        Commands::Cull {
            input,
            output,
            max_target_seqs,
            top_percent,
            max_hsps,
            evalue,
            min_score,
            overlap,
            hsp_order,
            range_culling,
            range_cover,
            target_chunks,
        } => {
            let options = CullingOptions {
                hsp_order,
                overlap_percent: overlap,
                max_hsps,
                max_target_seqs,
                top_percent,
                max_evalue: evalue,
                min_bit_score: min_score,
                range_cover: range_culling.then_some(range_cover),
            };
            cull_command(&input, output, &options, target_chunks)?;
        }
    }

    Ok(())
}

/// Build a hash-table index from FASTA/FASTQ input
fn build_command(
    input: &str,
    output: Option<String>,
    config: IndexConfig,
    histogram_path: Option<String>,
    verbose: bool,
) -> anyhow::Result<()> {
    info!("Building seedhit index...");
    info!("  Input: {}", input);
    if verbose {
        config.print();
    }

    let (names, sequences) = parse_fasta_file(input, &config.reduction)?;
    info!("  Loaded {} sequences ({} residues)", names.len(), sequences.total_letters());

    let builder = IndexBuilder::new(config)?;
    let histogram = match histogram_path.as_deref().map(Path::new) {
        Some(path) if path.exists() => {
            info!("Loading seed counts from {}...", path.display());
            SeedHistogram::load(path)?
        }
        Some(path) => {
            let histogram = builder.count(&sequences)?;
            histogram.save(path)?;
            histogram
        }
        None => builder.count(&sequences)?,
    };
    let indexes = builder.build_hash_indexes_from(&sequences, &histogram)?;

    let output_path = output.unwrap_or_else(|| {
        let stem = Path::new(input)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("index");
        format!("{}.seedhit", stem)
    });
    save_hash_index(Path::new(&output_path), &indexes)?;

    info!("Index built successfully!");
    Ok(())
}

/// Print a summary of every shape in an index file
fn inspect_command(index: &str) -> anyhow::Result<()> {
    let path = Path::new(index);
    let header = {
        let file = File::open(path).with_context(|| format!("Failed to open index file: {}", path.display()))?;
        IndexFileHeader::read(&mut BufReader::new(file))
            .with_context(|| format!("Failed to read index header of {}", path.display()))?
    };
    let indexes = open_hash_index(path, header.shape_count as usize)?;

    println!("format version = {}", header.version);
    println!("shapes = {}", indexes.len());
    for index in &indexes {
        let largest = index.partitions().iter().map(|p| p.entries().len()).max().unwrap_or(0);
        let load = if index.slot_count() == 0 {
            0.0
        } else {
            index.num_keys() as f64 / index.slot_count() as f64
        };
        println!(
            "shape {}: partitions = {}, keys = {}, entries = {}, slots = {}, load = {:.3}, largest partition = {}",
            index.shape_id(),
            index.partitions().len(),
            index.num_keys(),
            index.len(),
            index.slot_count(),
            load,
            largest
        );
    }
    Ok(())
}

/// Count index hits for every seed of every query sequence
fn query_command(index: &str, query: &str, config: IndexConfig) -> anyhow::Result<()> {
    config.validate()?;
    let indexes = open_hash_index(Path::new(index), config.shapes.len())?;
    for (shape_id, index) in indexes.iter().enumerate() {
        if index.partition_bits() != config.partition_bits {
            anyhow::bail!(
                "shape {} of the index uses {} partition bits, {} were requested",
                shape_id,
                index.partition_bits(),
                config.partition_bits
            );
        }
    }

    let (names, queries) = parse_fasta_file(query, &config.reduction)?;
    info!("Querying {} sequences against {}...", names.len(), index);
    let enumerator = SeedEnumerator::new(&queries, &config)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    writeln!(out, "#query\tseeds\tseeds_found\thits\ttargets")?;
    let mut total_hits = 0u64;
    for (seq_id, name) in names.iter().enumerate() {
        let mut seeds = 0u64;
        let mut found = 0u64;
        let mut hits = 0u64;
        let mut targets = std::collections::BTreeSet::new();
        let mut sink = FnSink::new(|key, _, _, shape_id| {
            seeds += 1;
            let run = indexes[shape_id].get(key);
            if !run.is_empty() {
                found += 1;
                hits += run.len() as u64;
                targets.extend(run.iter().map(|e| e.value.seq_id()));
            }
            true
        });
        enumerator.enumerate(seq_id..seq_id + 1, &mut sink);
        writeln!(out, "{}\t{}\t{}\t{}\t{}", name, seeds, found, hits, targets.len())?;
        total_hits += hits;
    }
    out.flush()?;
    info!("Query complete: {} seed hits", total_hits);
    Ok(())
}

/// Identity of a candidate as the culler sees it
type HspKey = (u32, i32, u64, u64, Interval, Interval);

fn hsp_key(hsp: &Hsp) -> HspKey {
    (
        hsp.target,
        hsp.score,
        hsp.bit_score.to_bits(),
        hsp.evalue.to_bits(),
        hsp.query_range,
        hsp.target_range,
    )
}

/// One query's candidates, with target names interned to ids
#[derive(Debug, Default)]
struct QueryPool {
    targets: Vec<String>,
    ids: HashMap<String, u32>,
    hsps: Vec<Hsp>,
    // coordinates as read, which keep the strand orientation
    coords: HashMap<HspKey, [i32; 4]>,
}

impl QueryPool {
    fn target_id(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.targets.len() as u32;
        self.targets.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    fn push(&mut self, hsp: Hsp, coords: [i32; 4]) {
        self.coords.entry(hsp_key(&hsp)).or_insert(coords);
        self.hsps.push(hsp);
    }

    /// Input coordinates of a candidate
    fn coords_of(&self, hsp: &Hsp) -> [i32; 4] {
        self.coords.get(&hsp_key(hsp)).copied().unwrap_or([
            hsp.query_range.begin() + 1,
            hsp.query_range.end(),
            hsp.target_range.begin() + 1,
            hsp.target_range.end(),
        ])
    }

    /// Write the reported HSPs in the input's tabular layout
    fn write_reported(&self, out: &mut dyn Write, query: &str, reported: &[TargetHits]) -> io::Result<usize> {
        let mut written = 0;
        for target in reported {
            for hsp in &target.hsps {
                let [q_start, q_end, t_start, t_end] = self.coords_of(hsp);
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{:e}\t{}\t{}\t{}\t{}",
                    query,
                    self.targets[target.target as usize],
                    hsp.score,
                    hsp.bit_score,
                    hsp.evalue,
                    q_start,
                    q_end,
                    t_start,
                    t_end
                )?;
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Cull candidate alignments query by query
fn cull_command(input: &str, output: Option<String>, options: &CullingOptions, target_chunks: usize) -> anyhow::Result<()> {
    let config = options.resolve()?;
    config.print();
    if target_chunks == 0 {
        anyhow::bail!("target_chunks must be positive");
    }

    let (queries, pools) = parse_candidates(input)?;
    info!("Loaded candidates for {} queries", queries.len());

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output file: {}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut reported_hsps = 0usize;
    for (query, mut pool) in queries.iter().zip(pools) {
        let hsps = std::mem::take(&mut pool.hsps);
        let reported = if target_chunks == 1 {
            cull(hsps, &config)?
        } else {
            let culler = StreamingCuller::new(config.clone())?;
            let mut chunks: Vec<Vec<Hsp>> = vec![Vec::new(); target_chunks];
            for hsp in hsps {
                chunks[hsp.target as usize % target_chunks].push(hsp);
            }
            for chunk in chunks {
                if !culler.add_chunk(chunk)? {
                    debug!("{}: chunk {} admitted no new targets", query, culler.chunks());
                }
            }
            culler.finish()
        };
        reported_hsps += pool.write_reported(&mut out, query, &reported)?;
    }
    out.flush()?;
    info!("Culling complete: {} HSPs reported", reported_hsps);
    Ok(())
}

/// Half-open range of a 1-based inclusive coordinate pair, in either order
fn one_based_range(a: i32, b: i32) -> Option<Interval> {
    if a < 1 || b < 1 {
        return None;
    }
    Some(Interval::new(a.min(b) - 1, a.max(b)))
}

/// Parse a tab-separated candidate file, grouped by query in input order
fn parse_candidates(path: &str) -> anyhow::Result<(Vec<String>, Vec<QueryPool>)> {
    let file = File::open(path).with_context(|| format!("Failed to open candidate file: {}", path))?;
    read_candidates(BufReader::new(file)).with_context(|| format!("Failed to parse candidates in {}", path))
}

/// Parse tab-separated candidates, grouped by query in input order
///
/// Coordinates are 1-based and inclusive; a start after the end marks the
/// minus strand.
fn read_candidates(reader: impl BufRead) -> anyhow::Result<(Vec<String>, Vec<QueryPool>)> {
    let mut queries: Vec<String> = Vec::new();
    let mut pools: Vec<QueryPool> = Vec::new();
    let mut query_ids: HashMap<String, usize> = HashMap::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            warn!("line {}: expected 9 columns, found {}; skipped", line_no + 1, fields.len());
            continue;
        }
        let parse_err = |column: &str| anyhow::anyhow!("line {}: invalid {} '{}'", line_no + 1, column, line);
        let score: i32 = fields[2].parse().map_err(|_| parse_err("score"))?;
        let bit_score: f64 = fields[3].parse().map_err(|_| parse_err("bit score"))?;
        let evalue: f64 = fields[4].parse().map_err(|_| parse_err("e-value"))?;
        let mut coords = [0i32; 4];
        for (i, coord) in coords.iter_mut().enumerate() {
            *coord = fields[5 + i].parse().map_err(|_| parse_err("coordinate"))?;
        }
        let query_range = one_based_range(coords[0], coords[1]).ok_or_else(|| parse_err("query range"))?;
        let target_range = one_based_range(coords[2], coords[3]).ok_or_else(|| parse_err("target range"))?;

        let q = *query_ids.entry(fields[0].to_string()).or_insert_with(|| {
            queries.push(fields[0].to_string());
            pools.push(QueryPool::default());
            queries.len() - 1
        });
        let pool = &mut pools[q];
        let target = pool.target_id(fields[1]);
        let hsp = Hsp {
            target,
            score,
            bit_score,
            evalue,
            query_range,
            target_range,
        };
        pool.push(hsp, coords);
    }
    Ok((queries, pools))
}

/// Parse a FASTA/FASTQ file into record names and reduced sequences
fn parse_fasta_file(path: &str, reduction: &Reduction) -> anyhow::Result<(Vec<String>, SequenceSet)> {
    use needletail::parse_fastx_file;

    let mut names = Vec::new();
    let mut sequences = SequenceSet::new();
    let mut reader =
        parse_fastx_file(path).with_context(|| format!("Failed to open sequence file: {}", path))?;

    while let Some(record) = reader.next() {
        let record = record.with_context(|| format!("Failed to parse sequence record in {}", path))?;
        let id = String::from_utf8_lossy(record.id());
        let name = id.split_whitespace().next().unwrap_or_default().to_string();
        sequences.push(&record.seq(), reduction)?;
        names.push(name);
    }

    Ok((names, sequences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedhit_lib::CullingConfig;

    const MINUS_STRAND: &str = "q1\tt1\t120\t55.5\t1e-12\t30\t11\t200\t181\n";

    #[test]
    fn test_coordinates_are_one_based_inclusive() {
        let (queries, pools) = read_candidates(MINUS_STRAND.as_bytes()).unwrap();
        assert_eq!(queries, vec!["q1".to_string()]);
        let hsp = pools[0].hsps[0];
        assert_eq!(hsp.query_range, Interval::new(10, 30));
        assert_eq!(hsp.query_range.len(), 20);
        assert_eq!(hsp.target_range, Interval::new(180, 200));
    }

    #[test]
    fn test_minus_strand_orientation_is_written_back() {
        let (queries, mut pools) = read_candidates(MINUS_STRAND.as_bytes()).unwrap();
        let hsps = std::mem::take(&mut pools[0].hsps);
        let reported = cull(hsps, &CullingConfig::default()).unwrap();
        let mut out = Vec::new();
        let written = pools[0].write_reported(&mut out, &queries[0], &reported).unwrap();
        assert_eq!(written, 1);
        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with("\t30\t11\t200\t181\n"), "{}", line);
    }

    #[test]
    fn test_half_overlap_is_enveloped() {
        // residues 51..=100 are half of 51..=150
        let input = "q1\tt1\t200\t90.0\t1e-30\t1\t100\t1\t100\n\
                     q1\tt1\t150\t70.0\t1e-20\t51\t150\t101\t200\n\
                     q1\tt1\t140\t65.0\t1e-19\t52\t151\t201\t300\n";
        let (_, mut pools) = read_candidates(input.as_bytes()).unwrap();
        let hsps = std::mem::take(&mut pools[0].hsps);
        let reported = cull(hsps, &CullingConfig::default()).unwrap();
        let starts: Vec<i32> = reported[0].hsps.iter().map(|h| pools[0].coords_of(h)[0]).collect();
        assert_eq!(starts, vec![1, 52]);
    }

    #[test]
    fn test_rejects_zero_coordinate() {
        let input = "q1\tt1\t120\t55.5\t1e-12\t0\t11\t200\t181\n";
        let err = read_candidates(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("query range"), "{}", err);
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let input = "# comment\nq1\tt1\t120\n\n";
        let (queries, pools) = read_candidates(input.as_bytes()).unwrap();
        assert!(queries.is_empty());
        assert!(pools.is_empty());
    }
}
