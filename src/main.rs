use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowagg::aggbag::{FieldSelection, RowFilter};
use flowagg::config::Config;
use flowagg::field::{lookup, lookup_in, parse_value, FieldType, NoSiteNames, Role};
use flowagg::ipset::{algebra, V6Policy};
use flowagg::text::{
    parse_columns, read_ipset_lines, write_aggbag, write_bag, write_ipset, write_ipset_ranges,
    write_ipset_statistics, write_network_structure, AggBagBuilder, BadLines, LineReader,
    NetStructure, TextLayout,
};
use flowagg::{AggBag, Bag, IpSet, Persist};

#[derive(Parser)]
#[command(name = "flowagg")]
#[command(about = "Build, inspect and combine aggregate bags and IP sets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an aggregate bag from delimited text
    AggbagBuild {
        /// Comma-separated field per input column; "ignore" skips a column
        #[arg(long)]
        fields: String,
        /// FIELD=VALUE applied to every line
        #[arg(long = "constant")]
        constants: Vec<String>,
        /// Text input, or "-" for stdin
        #[arg(long, default_value = "-")]
        input: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print an aggregate bag as text
    AggbagCat {
        input: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Combine, reshape or convert aggregate bags
    AggbagTool {
        #[command(subcommand)]
        op: AggBagOp,
    },
    /// Build an IP set from addresses, CIDR blocks or ranges
    SetBuild {
        /// Text input, or "-" for stdin
        #[arg(long, default_value = "-")]
        input: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print an IP set
    SetCat {
        input: PathBuf,
        /// Print maximal CIDR blocks instead of single addresses
        #[arg(long)]
        cidr: bool,
        /// ignore, asv4, mix, force or only
        #[arg(long, default_value = "mix", value_parser = parse_policy)]
        ip_format: V6Policy,
        /// Print the number of addresses
        #[arg(long)]
        count: bool,
        /// Print the minimum and maximum address and occupied block counts
        #[arg(long)]
        print_statistics: bool,
        /// Print host counts per CIDR block, e.g. "TS/8,16,24,27" or "v6:TS/48,64"
        #[arg(long, value_name = "STRUCTURE", require_equals = true)]
        network_structure: Option<Option<String>>,
        /// Print runs of contiguous addresses as count|low|high
        #[arg(long)]
        ip_ranges: bool,
        /// Also print the addresses when a count or summary is requested
        #[arg(long)]
        print_ips: bool,
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// List the IP set files that contain an address
    SetMember {
        ip: IpAddr,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print only the number of matching files
        #[arg(long)]
        count: bool,
    },
    /// Combine, mask or sample IP sets
    SetTool {
        #[command(subcommand)]
        op: SetOp,
    },
    /// Print a bag as text
    BagCat {
        input: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
    },
}

#[derive(Args)]
struct LayoutArgs {
    #[arg(long)]
    no_titles: bool,
    #[arg(long)]
    no_columns: bool,
    #[arg(long)]
    no_final_delimiter: bool,
}

#[derive(Subcommand)]
enum AggBagOp {
    /// Sum every input into the first
    Add {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Subtract every later input from the first
    Subtract {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Keep or drop fields and insert constant fields
    Project {
        input: PathBuf,
        /// Comma-separated fields to keep
        #[arg(long, conflicts_with = "remove")]
        select: Option<String>,
        /// Comma-separated fields to drop
        #[arg(long)]
        remove: Option<String>,
        /// FIELD=VALUE to add to every row
        #[arg(long = "insert")]
        inserts: Vec<String>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Zero the counters of rows outside the given limits
    Filter {
        input: PathBuf,
        /// FIELD=VALUE lower bound
        #[arg(long)]
        min: Vec<String>,
        /// FIELD=VALUE upper bound
        #[arg(long)]
        max: Vec<String>,
        /// FIELD=IPSET_PATH; rows whose address is outside the set are zeroed
        #[arg(long)]
        set_intersect: Vec<String>,
        /// FIELD=IPSET_PATH; rows whose address is inside the set are zeroed
        #[arg(long)]
        set_complement: Vec<String>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Collapse onto one key and one counter field
    ToBag {
        input: PathBuf,
        #[arg(long)]
        key: String,
        #[arg(long)]
        counter: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Collect the first key field of every non-zero row
    ToIpset {
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum SetOp {
    Union {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    Intersect {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    Difference {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    SymmetricDifference {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Reduce each block of the given prefix to its base address
    Mask {
        input: PathBuf,
        #[arg(long)]
        prefix: u8,
        /// Insert the whole block instead of its base address
        #[arg(long)]
        fill: bool,
        #[arg(long)]
        output: PathBuf,
    },
    /// Randomly sample addresses
    Sample {
        input: PathBuf,
        #[arg(long, conflicts_with = "size", required_unless_present = "size")]
        ratio: Option<f64>,
        #[arg(long)]
        size: Option<u128>,
        /// Overrides FLOWAGG_SAMPLE_SEED
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::AggbagBuild {
            fields,
            constants,
            input,
            output,
        } => {
            let columns = parse_columns(&fields).context("Invalid --fields")?;
            let constants = constants
                .iter()
                .map(|c| split_assignment(c).and_then(|(name, value)| Ok((lookup(name)?, value))))
                .collect::<Result<Vec<_>>>()?;
            let mut builder = AggBagBuilder::new(&columns, &constants, &NoSiteNames)?
                .with_delimiter(config.text.delimiter);
            let mut bad = bad_lines(&config, &input);
            let lines = LineReader::from_config(open_text(&input)?, &config.text);
            let added = builder
                .read_lines(lines, &mut bad)
                .with_context(|| format!("Failed to read {input}"))?;
            let store = builder.into_store();
            info!("Built {} rows from {} lines ({} rejected)", store.len(), added, bad.count());
            save(&store, &output)?;
        }
        Commands::AggbagCat { input, layout } => {
            let store = load::<AggBag>(&input)?;
            with_stdout(|out| write_aggbag(out, &store, &NoSiteNames, &layout.resolve(&config)))?;
        }
        Commands::AggbagTool { op } => run_aggbag_op(op)?,
        Commands::SetBuild { input, output } => {
            let mut set = IpSet::new_v4();
            set.set_auto_convert(config.ipset.auto_convert);
            let mut bad = bad_lines(&config, &input);
            let lines = LineReader::from_config(open_text(&input)?, &config.text);
            let added = read_ipset_lines(&mut set, lines, &mut bad)
                .with_context(|| format!("Failed to read {input}"))?;
            info!("Inserted {} entries ({} rejected)", added, bad.count());
            save(&set, &output)?;
        }
        Commands::SetCat {
            input,
            cidr,
            ip_format,
            count,
            print_statistics,
            network_structure,
            ip_ranges,
            print_ips,
            layout,
        } => {
            let set = load::<IpSet>(&input)?;
            let structure = match network_structure {
                None => None,
                Some(None) => Some(NetStructure::default_for(set.is_v6())),
                Some(Some(text)) => {
                    Some(text.parse::<NetStructure>().context("Invalid --network-structure")?)
                }
            };
            let layout = layout.resolve(&config);
            let summary_only = (count || print_statistics || structure.is_some()) && !print_ips;
            with_stdout(|out| {
                if count {
                    writeln!(out, "{}", set.count())?;
                }
                if print_statistics {
                    write_ipset_statistics(out, &set)?;
                }
                if let Some(structure) = &structure {
                    write_network_structure(out, &set, structure, &layout)?;
                }
                if ip_ranges {
                    write_ipset_ranges(out, &set, &layout)?;
                } else if !summary_only {
                    write_ipset(out, &set, cidr, ip_format)?;
                }
                Ok(())
            })?;
        }
        Commands::SetMember { ip, files, count } => {
            let mut matches: Vec<&PathBuf> = Vec::new();
            for path in &files {
                if load::<IpSet>(path)?.contains(ip) {
                    matches.push(path);
                }
            }
            info!("{} of {} sets contain {}", matches.len(), files.len(), ip);
            with_stdout(|out| {
                if count {
                    writeln!(out, "{}", matches.len())?;
                } else {
                    for path in &matches {
                        writeln!(out, "{}", path.display())?;
                    }
                }
                Ok(())
            })?;
        }
        Commands::SetTool { op } => run_set_op(op, &config)?,
        Commands::BagCat { input, layout } => {
            let bag = load::<Bag>(&input)?;
            with_stdout(|out| write_bag(out, &bag, &NoSiteNames, &layout.resolve(&config)))?;
        }
    }

    Ok(())
}

fn run_aggbag_op(op: AggBagOp) -> Result<()> {
    match op {
        AggBagOp::Add { inputs, output } => {
            save(&fold_bags(&inputs, AggBag::add_bag)?, &output)?;
        }
        AggBagOp::Subtract { inputs, output } => {
            save(&fold_bags(&inputs, AggBag::subtract_bag)?, &output)?;
        }
        AggBagOp::Project {
            input,
            select,
            remove,
            inserts,
            output,
        } => {
            let selection = match (select, remove) {
                (Some(list), _) => FieldSelection::Select(field_names(&list)?),
                (None, Some(list)) => FieldSelection::Remove(field_names(&list)?),
                (None, None) => FieldSelection::All,
            };
            let inserts = inserts
                .iter()
                .map(|text| {
                    let (name, value) = split_assignment(text)?;
                    let field = lookup(name)?;
                    Ok((field, parse_value(field, value, &NoSiteNames)?))
                })
                .collect::<Result<Vec<_>>>()?;
            let store = load::<AggBag>(&input)?;
            let projected = store.project(&selection, &inserts)?;
            save(&projected, &output)?;
        }
        AggBagOp::Filter {
            input,
            min,
            max,
            set_intersect,
            set_complement,
            output,
        } => {
            let mut filters = Vec::new();
            for (bounds, is_min) in [(&min, true), (&max, false)] {
                for text in bounds {
                    let (name, value) = split_assignment(text)?;
                    let field = lookup(name)?;
                    let bound = parse_value(field, value, &NoSiteNames)?
                        .as_unsigned()
                        .with_context(|| format!("{field} does not take a numeric limit"))?;
                    filters.push(if is_min {
                        RowFilter::min(field, bound)
                    } else {
                        RowFilter::max(field, bound)
                    });
                }
            }
            for (masks, complement) in [(&set_intersect, false), (&set_complement, true)] {
                for text in masks {
                    let (name, path) = split_assignment(text)?;
                    let set = Arc::new(load::<IpSet>(Path::new(path))?);
                    filters.push(RowFilter::in_set(lookup(name)?, set, complement));
                }
            }
            let mut store = load::<AggBag>(&input)?;
            let zeroed = store.apply_filters(&filters)?;
            info!("Zeroed {} of {} rows", zeroed, store.len());
            save(&store, &output)?;
        }
        AggBagOp::ToBag {
            input,
            key,
            counter,
            output,
        } => {
            let key = lookup_in(&key, Role::Key)?;
            let counter = lookup_in(&counter, Role::Counter)?;
            let bag = load::<AggBag>(&input)?.to_bag(key, counter)?;
            save(&bag, &output)?;
        }
        AggBagOp::ToIpset { input, output } => {
            let set = load::<AggBag>(&input)?.to_ipset()?;
            save(&set, &output)?;
        }
    }
    Ok(())
}

fn run_set_op(op: SetOp, config: &Config) -> Result<()> {
    match op {
        SetOp::Union { inputs, output } => save(&fold_sets(&inputs, algebra::union)?, &output)?,
        SetOp::Intersect { inputs, output } => {
            save(&fold_sets(&inputs, algebra::intersect)?, &output)?
        }
        SetOp::Difference { inputs, output } => {
            save(&fold_sets(&inputs, algebra::difference)?, &output)?
        }
        SetOp::SymmetricDifference { inputs, output } => {
            save(&fold_sets(&inputs, algebra::symmetric_difference)?, &output)?
        }
        SetOp::Mask {
            input,
            prefix,
            fill,
            output,
        } => {
            let mut set = load::<IpSet>(&input)?;
            if fill {
                set.mask_and_fill(prefix)?;
            } else {
                set.mask(prefix)?;
            }
            save(&set, &output)?;
        }
        SetOp::Sample {
            input,
            ratio,
            size,
            seed,
            output,
        } => {
            let set = load::<IpSet>(&input)?;
            let seed = seed.or(config.sampling.seed).unwrap_or_else(rand::random);
            let mut rng = StdRng::seed_from_u64(seed);
            let sample = match (ratio, size) {
                (Some(ratio), _) => set.sample_ratio(ratio, &mut rng)?,
                (None, Some(size)) => set.sample_size(size, &mut rng)?,
                (None, None) => bail!("One of --ratio or --size is required"),
            };
            info!("Sampled {} of {} addresses (seed {})", sample.count(), set.count(), seed);
            save(&sample, &output)?;
        }
    }
    Ok(())
}

impl LayoutArgs {
    fn resolve(&self, config: &Config) -> TextLayout {
        TextLayout {
            delimiter: config.text.delimiter,
            titles: !self.no_titles,
            aligned: !self.no_columns,
            final_delimiter: !self.no_final_delimiter,
        }
    }
}

fn fold_bags(
    inputs: &[PathBuf],
    op: fn(&mut AggBag, &AggBag) -> flowagg::EngineResult<()>,
) -> Result<AggBag> {
    let (first, rest) = inputs.split_first().context("No input bags given")?;
    let mut total = load::<AggBag>(first)?;
    for path in rest {
        let other = load::<AggBag>(path)?;
        op(&mut total, &other).with_context(|| format!("Cannot combine {}", path.display()))?;
    }
    Ok(total)
}

fn fold_sets(inputs: &[PathBuf], op: fn(&IpSet, &IpSet) -> IpSet) -> Result<IpSet> {
    let (first, rest) = inputs.split_first().context("No input sets given")?;
    let mut result = load::<IpSet>(first)?;
    for path in rest {
        result = op(&result, &load::<IpSet>(path)?);
    }
    Ok(result)
}

fn load<T: Persist>(path: &Path) -> Result<T> {
    T::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn save<T: Persist>(value: &T, path: &Path) -> Result<()> {
    value
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn open_text(input: &str) -> Result<Box<dyn BufRead>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(input).with_context(|| format!("Failed to open {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}

fn bad_lines(config: &Config, source: &str) -> BadLines {
    let bad = BadLines::new(config.text.bad_lines).with_source(source);
    if config.text.echo_bad_lines {
        bad.with_echo(Box::new(io::stderr()))
    } else {
        bad
    }
}

fn with_stdout(render: impl FnOnce(&mut dyn Write) -> flowagg::EngineResult<()>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    render(&mut out)?;
    out.flush()?;
    Ok(())
}

fn split_assignment(text: &str) -> Result<(&str, &str)> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("Expected FIELD=VALUE, got '{text}'"),
    }
}

fn field_names(list: &str) -> Result<Vec<FieldType>> {
    list.split(',')
        .map(|name| lookup(name).with_context(|| format!("Unknown field '{name}'")))
        .collect()
}

fn parse_policy(text: &str) -> std::result::Result<V6Policy, String> {
    match text.to_lowercase().as_str() {
        "ignore" => Ok(V6Policy::Ignore),
        "asv4" => Ok(V6Policy::AsV4),
        "mix" => Ok(V6Policy::Mix),
        "force" => Ok(V6Policy::Force),
        "only" => Ok(V6Policy::Only),
        other => Err(format!(
            "unknown policy '{other}'; expected ignore, asv4, mix, force or only"
        )),
    }
}
