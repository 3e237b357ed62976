//! A distributed string sorter over MPI.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mpi::traits::{Communicator, CommunicatorCollectives};

use dss::bloomfilter::{FilterStrategy, GolombMode};
use dss::exchange::{AlltoallRoutine, ExchangeConfig};
use dss::generate;
use dss::grid::Grid;
use dss::measure::MeasuringTool;
use dss::merge_sort::{input_origins, MergeSortConfig};
use dss::partition::{SamplePolicy, SampleParams};
use dss::verify;
use dss::{DistributedMergeSort, InputPermutation, Result, StringContainer};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "distributed-merge-sort", about = "a distributed string sorter")]
struct Args {
    /// Name to identify the experiment being run
    #[arg(short = 'e', long)]
    experiment: Option<String>,

    /// Number of strings per rank (use -x for a global count)
    #[arg(short = 'n', long, default_value_t = 100_000)]
    num_strings: usize,

    /// Length of generated strings
    #[arg(short = 'm', long, default_value_t = 50)]
    len_strings: usize,

    /// D/N ratio of generated strings
    #[arg(short = 'r', long, default_value_t = 0.5)]
    dn_ratio: f64,

    /// Number of sorting iterations to run
    #[arg(short = 'i', long, default_value_t = 5)]
    num_iterations: usize,

    /// String generator (0=dn-ratio, 1=suffix, 2=random, 3=file)
    #[arg(short = 'k', long, default_value_t = 0)]
    generator: u8,

    /// Strategy for splitter sampling
    /// (0=strings, 1=chars, 2=indexed strings, 3=indexed chars)
    #[arg(short = 's', long, default_value_t = 0)]
    sample_policy: u8,

    /// Oversampling factor for splitter sampling
    #[arg(long, default_value_t = 2)]
    sampling_factor: u64,

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

    /// Use prefix-doubling merge sort; the output is a permutation
    #[arg(short = 'd', long)]
    prefix_doubling: bool,

    /// Hash-value compression during prefix doubling
    /// (0=none, 1=sequential, 2=pipelined)
    #[arg(short = 'g', long, default_value_t = 0)]
    golomb: u8,

    /// Run the duplicate filter over all grid levels
    #[arg(long)]
    grid_bloomfilter: bool,

    /// Check that the result is sorted and no strings were lost
    #[arg(short = 'c', long)]
    check: bool,

    /// Check that the output exactly matches the input
    #[arg(short = 'C', long)]
    check_exhaustive: bool,

    /// Interpret num-strings as a global count
    #[arg(short = 'x', long)]
    strong_scaling: bool,

    /// Seed for the input generators
    #[arg(long)]
    seed: Option<u64>,

    /// Path to an input file for the file generator
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
        let experiment = self
            .experiment
            .as_deref()
            .map(|name| format!("experiment={name} "))
            .unwrap_or_default();
        format!(
            "{experiment}num_procs={} num_strings={} len_strings={} num_levels={} iteration={iteration}",
            comm.size(),
            self.num_strings,
            self.len_strings,
            self.group_size.len(),
        )
    }
}

fn generate_input<C: Communicator>(args: &Args, seed: u64, comm: &C) -> Result<StringContainer> {
    let num_strings = if args.strong_scaling {
        args.num_strings
    } else {
        args.num_strings * comm.size() as usize
    };

    match args.generator {
        0 => Ok(generate::dn_ratio_strings(
            num_strings,
            args.len_strings,
            args.dn_ratio,
            seed,
            comm,
        )),
        1 => {
            let text = match &args.path {
                Some(path) => {
                    let cont = generate::file_strings(path, comm)?;
                    cont.raw_bytes().to_vec()
                }
                None => generate::random_text(num_strings, seed),
            };
            Ok(generate::suffix_strings(&text, 1, seed, comm))
        }
        2 => Ok(generate::random_strings(
            num_strings / comm.size() as usize,
            args.len_strings,
            args.len_strings + 10,
            seed ^ (comm.rank() as u64 + 1),
        )),
        3 => {
            let path = args.path.as_deref().ok_or_else(|| {
                dss::Error::ConfigInvalid("the file generator needs --path".into())
            })?;
            generate::file_strings(path, comm)
        }
        other => Err(dss::Error::ConfigInvalid(format!(
            "unknown generator {other}"
        ))),
    }
}

fn print_config<C: Communicator>(args: &Args, prefix: &str, comm: &C) {
    if comm.rank() != 0 {
        return;
    }
    println!("{prefix} key=sampler value={}", args.sample_policy);
    println!("{prefix} key=alltoall_routine value={}", args.alltoall_routine);
    println!("{prefix} key=golomb_encoding value={}", args.golomb);
    println!("{prefix} key=prefix_compression value={}", args.prefix_compression);
    println!("{prefix} key=lcp_compression value={}", args.lcp_compression);
    println!("{prefix} key=prefix_doubling value={}", args.prefix_doubling);
    println!("{prefix} key=strong_scaling value={}", args.strong_scaling);
}

fn run_iteration<C: Communicator>(args: &Args, iteration: usize, comm: &C) -> Result<()> {
    let mut tool = MeasuringTool::new();
    let prefix = args.result_prefix(iteration, comm);
    tool.set_prefix(prefix.as_str());
    if iteration == 0 {
        print_config(args, &format!("RESULT {prefix}"), comm);
    }

    comm.barrier();
    tool.start("generate_strings");
    let seed = generate::shared_seed(args.seed.map(|s| s + iteration as u64), comm);
    let mut input = generate_input(args, seed, comm)?;
    tool.stop("generate_strings");

    let input_bytes = (args.check || args.check_exhaustive).then(|| input.raw_bytes().to_vec());
    let num_chars = input.sum_len();
    let num_strings = input.len();
    tool.add(num_chars as u64, "input_chars");
    tool.add(num_strings as u64, "input_strings");

    tool.start("create_communicators");
    let grid = Grid::new(comm, &args.group_size)?;
    tool.stop("create_communicators");

    let sorter = DistributedMergeSort::new(args.merge_config());
    comm.barrier();
    tool.set_phase("sorting");
    tool.start("sorting_overall");

    if args.prefix_doubling {
        input
            .set_origins(input_origins(comm.rank() as u64, 0, num_strings))
            .expect("origin count matches");
        let original = (args.check || args.check_exhaustive).then(|| input.clone());
        let (_, permutation): (_, InputPermutation) =
            sorter.sort_to_permutation(input, &grid, &mut tool)?;
        tool.stop("sorting_overall");

        if let Some(ref original) = original {
            if !verify::is_sorted_permutation(&permutation, original, comm) {
                return Err(dss::Error::CheckFailed(
                    "output permutation is not sorted".into(),
                ));
            }
        }
        if args.check_exhaustive
            && !verify::is_complete_permutation(&permutation, num_strings, true, comm)
        {
            return Err(dss::Error::CheckFailed(
                "output permutation is not complete".into(),
            ));
        }
    } else {
        let sorted = sorter.sort(input, &grid, &mut tool)?;
        tool.stop("sorting_overall");

        if (args.check || args.check_exhaustive)
            && !verify::is_complete_and_sorted(&sorted, num_chars, num_strings, comm)
        {
            return Err(dss::Error::CheckFailed("output is not sorted".into()));
        }
        if args.check_exhaustive
            && !verify::exhaustive_check(&input_bytes.unwrap_or_default(), &sorted, comm)
        {
            return Err(dss::Error::CheckFailed(
                "output is not a permutation of the input".into(),
            ));
        }
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
