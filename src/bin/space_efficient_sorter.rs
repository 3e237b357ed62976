//! A space-efficient distributed string sorter over MPI.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mpi::traits::{Communicator, CommunicatorCollectives};

use dss::bloomfilter::{FilterStrategy, GolombMode};
use dss::exchange::{AlltoallRoutine, ExchangeConfig};
use dss::generate;
use dss::grid::Grid;
use dss::measure::MeasuringTool;
use dss::merge_sort::MergeSortConfig;
use dss::partition::{SamplePolicy, SampleParams};
use dss::space_efficient::{count_duplicate_ranks, PermutationKind};
use dss::verify;
use dss::{Result, SpaceEfficientSort, StringContainer};

/// Command-line arguments.
#[derive(Parser)]
#[command(
    name = "space-efficient-sorter",
    about = "a space efficient distributed string sorter"
)]
struct Args {
    /// Combined char/string generator (0=none, 1=dn-ratio)
    #[arg(short = 'b', long, default_value_t = 0)]
    combined_generator: u8,

    /// String generator over the shared text
    /// (0=suffix, 1=window, 2=difference-cover)
    #[arg(short = 'w', long, default_value_t = 0)]
    string_generator: u8,

    /// Number of strings for the combined generator
    #[arg(short = 'n', long, default_value_t = 10_000)]
    num_strings: usize,

    /// Length of generated strings
    #[arg(short = 'm', long, default_value_t = 500)]
    len_strings: usize,

    /// Number of characters of the shared text
    #[arg(short = 'N', long, default_value_t = 100_000)]
    num_chars: usize,

    /// D/N ratio of generated strings
    #[arg(short = 'r', long, default_value_t = 0.5)]
    dn_ratio: f64,

    /// Number of sorting iterations to run
    #[arg(short = 'i', long, default_value_t = 1)]
    num_iterations: usize,

    /// Characters to skip between strings
    #[arg(short = 'T', long, default_value_t = 1)]
    step: usize,

    /// Size of the difference cover
    #[arg(short = 'D', long, default_value_t = 3)]
    difference_cover: usize,

    /// Strategy for splitter sampling
    /// (0=strings, 1=chars, 2=indexed strings, 3=indexed chars)
    #[arg(short = 's', long, default_value_t = 2)]
    sample_policy: u8,

    /// Oversampling factor for splitter sampling
    #[arg(long, default_value_t = 2)]
    sampling_factor: u64,

    /// Separate sampling strategy for the quantile boundaries
    #[arg(long)]
    quantile_policy: Option<u8>,

    /// Oversampling factor for the quantile boundaries
    #[arg(long)]
    quantile_factor: Option<u64>,

    /// All-to-all routine to use during the string exchange
    /// (0=small, 1=direct, 2=combined)
    #[arg(short = 'a', long, default_value_t = 2)]
    alltoall_routine: u8,

    /// Compress LCP values during the string exchange
    #[arg(short = 'l', long)]
    lcp_compression: bool,

    /// Send only distinguishing suffixes during the string exchange
    #[arg(short = 'p', long)]
    prefix_compression: bool,

    /// Use prefix doubling within each quantile
    #[arg(short = 'd', long)]
    prefix_doubling: bool,

    /// Hash-value compression during prefix doubling
    /// (0=none, 1=sequential, 2=pipelined)
    #[arg(short = 'g', long, default_value_t = 0)]
    golomb: u8,

    /// Run the duplicate filter over all grid levels
    #[arg(long)]
    grid_bloomfilter: bool,

    /// Type of output permutation (0=simple, 1=multi-level, 2=non-unique)
    #[arg(short = 'o', long, default_value_t = 1)]
    permutation: u8,

    /// Work on quantiles of the given size in bytes
    #[arg(short = 'q', long, default_value_t = 100 * 1024 * 1024)]
    quantile_size: usize,

    /// Shuffle the generated strings
    #[arg(long)]
    shuffle: bool,

    /// Check that the output permutation is sorted
    #[arg(short = 'c', long)]
    check_sorted: bool,

    /// Check that the output permutation is complete
    #[arg(short = 'C', long)]
    check_complete: bool,

    /// Seed for the input generators
    #[arg(long)]
    seed: Option<u64>,

    /// Path to an input file
    #[arg(short = 'y', long)]
    path: Option<PathBuf>,

    /// Size of groups for multi-level merge sort, strictly decreasing
    group_size: Vec<usize>,
}

impl Args {
    fn merge_config(&self) -> MergeSortConfig {
        MergeSortConfig {
            sample: SampleParams {
                policy: SamplePolicy::from_index(self.sample_policy),
                factor: self.sampling_factor.max(1),
            },
            exchange: ExchangeConfig {
                routine: AlltoallRoutine::from_index(self.alltoall_routine),
                lcp_compression: self.lcp_compression,
                prefix_compression: self.prefix_compression,
            },
            prefix_doubling: self.prefix_doubling,
            filter_strategy: if self.grid_bloomfilter {
                FilterStrategy::MultiLevel
            } else {
                FilterStrategy::SingleLevel
            },
            golomb: GolombMode::from_index(self.golomb),
        }
    }

    fn result_prefix<C: Communicator>(&self, iteration: usize, comm: &C) -> String {
        format!(
            "num_procs={} num_strings={} len_strings={} num_chars={} dn_ratio={} \
             step={} difference_cover={} num_levels={} quantile_size={} iteration={iteration}",
            comm.size(),
            self.num_strings,
            self.len_strings,
            self.num_chars,
            self.dn_ratio,
            self.step,
            self.difference_cover,
            self.group_size.len(),
            self.quantile_size,
        )
    }
}

fn generate_input<C: Communicator>(args: &Args, seed: u64, comm: &C) -> Result<StringContainer> {
    if args.combined_generator == 1 {
        return Ok(generate::dn_ratio_strings(
            args.num_strings,
            args.len_strings,
            args.dn_ratio,
            seed,
            comm,
        ));
    }

    let text = match &args.path {
        Some(path) => generate::file_strings(path, comm)?.raw_bytes().to_vec(),
        None => generate::random_text(args.num_chars, seed),
    };
    let cont = match args.string_generator {
        0 => generate::suffix_strings(&text, args.step, seed, comm),
        1 => generate::window_strings(&text, args.len_strings, args.step, comm),
        2 => generate::difference_cover_strings(&text, args.difference_cover, comm),
        other => {
            return Err(dss::Error::ConfigInvalid(format!(
                "unknown string generator {other}"
            )))
        }
    };
    Ok(cont)
}

fn run_iteration<C: Communicator>(args: &Args, iteration: usize, comm: &C) -> Result<()> {
    let mut tool = MeasuringTool::new();
    tool.set_prefix(args.result_prefix(iteration, comm));

    comm.barrier();
    tool.start("generate_strings");
    let seed = generate::shared_seed(args.seed.map(|s| s + iteration as u64), comm);
    let mut input = generate_input(args, seed, comm)?;
    if args.shuffle {
        generate::shuffle(&mut input, seed ^ (comm.rank() as u64 + 1));
    }
    tool.stop("generate_strings");
    tool.add(input.len() as u64, "input_strings");
    tool.add(input.char_size() as u64, "input_chars");

    tool.start("create_communicators");
    let grid = Grid::new(comm, &args.group_size)?;
    tool.stop("create_communicators");

    let kind = PermutationKind::from_index(args.permutation);
    let merge_config = args.merge_config();
    let quantile_sample = SampleParams {
        policy: SamplePolicy::from_index(args.quantile_policy.unwrap_or(args.sample_policy)),
        factor: args.quantile_factor.unwrap_or(args.sampling_factor).max(1),
    };
    let sorter = SpaceEfficientSort::new(args.quantile_size, kind, merge_config)
        .with_quantile_sampler(quantile_sample);

    comm.barrier();
    tool.set_phase("sorting");
    tool.start("sorting_overall");
    let global_ranks = sorter.sort(&input, &grid, &mut tool)?;
    tool.stop("sorting_overall");

    count_duplicate_ranks(&global_ranks, comm, &mut tool);

    if args.check_sorted
        && !verify::is_sorted_global_ranks(&global_ranks, &input, kind.is_unique(), comm)
    {
        return Err(dss::Error::CheckFailed(
            "output permutation is not sorted".into(),
        ));
    }
    if args.check_complete
        && !verify::is_complete_global_ranks(&global_ranks, input.len(), kind.is_unique(), comm)
    {
        return Err(dss::Error::CheckFailed(
            "output permutation is not complete".into(),
        ));
    }

    tool.write_on_root(comm);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    // reject bad level configurations before any collective
    if args.group_size.windows(2).any(|w| w[0] <= w[1]) {
        eprintln!("invalid configuration: the given group sizes must be decreasing");
        return ExitCode::FAILURE;
    }
    if args.quantile_size == 0 {
        eprintln!("invalid configuration: the quantile size must be positive");
        return ExitCode::FAILURE;
    }

    let universe = mpi::initialize().expect("failed to initialize MPI");
    let world = universe.world();

    for iteration in 0..args.num_iterations {
        if let Err(err) = run_iteration(&args, iteration, &world) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
