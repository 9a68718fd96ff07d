//! Implementation of the `simulate` subcommand of the dropletgrid CLI.
//!
//! Every rank of the simulation runs on its own thread and communicates with the other ranks
//! through a [`ThreadCommWorld`]. Superdroplets move with a constant velocity, are exchanged
//! between the ranks after every step and the global superdroplet count is verified at the end.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use dropletgrid_lib::boundary::{BoundaryKind, NullBoundaryConditions, PeriodicTopBoundary};
use dropletgrid_lib::io::json_format::grid_description_from_json;
use dropletgrid_lib::motion::{ConstantVelocity, MotionKind};
use dropletgrid_lib::nalgebra::Vector3;
use dropletgrid_lib::{
    Aabb3d, BoundaryMode, CellMap, Communicator, DistributedDomain, GridDescription, GridboxMap, Real,
    Superdroplet, SuperdropletAttributes, SuperdropletId, ThreadComm, ThreadCommWorld, profile,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::cli::Switch;
use crate::decompose::grid_shape_from_args;
use crate::logging;

// Help headings
static ARGS_GRID: &str = "Grid";
static ARGS_DROPS: &str = "Superdroplets";
static ARGS_RUN: &str = "Run";
static ARGS_ADV: &str = "Advanced parameters";

/// Edge length of the gridboxes if neither domain bounds nor a grid file are given
const DEFAULT_GRIDBOX_SIZE: f64 = 100.0;

/// Command line arguments for the `simulate` subcommand
#[derive(Clone, Debug, clap::Parser)]
#[command(next_help_heading = ARGS_ADV)]
pub(crate) struct SimulateSubcommandArgs {
    /// Number of gridboxes along the vertical and the two horizontal axes
    #[arg(
        help_heading = ARGS_GRID,
        long,
        number_of_values = 3,
        value_names = ["NZ", "NX", "NY"],
        required = true
    )]
    pub ndims: Vec<usize>,
    /// Number of resolved axes, unresolved axes must have exactly one gridbox
    #[arg(help_heading = ARGS_GRID, long, default_value = "3", value_parser = clap::value_parser!(u8).range(0..=3))]
    pub spatial_dims: u8,
    /// Boundary modes of the z, x and y axes (default: finite,periodic,periodic)
    #[arg(help_heading = ARGS_GRID, long, value_delimiter = ',', value_name = "Z,X,Y")]
    pub boundaries: Option<Vec<BoundaryArg>>,
    /// Lower corner (z, x, y) of the domain with evenly spaced gridboxes (requires domain-max to be specified)
    #[arg(
        help_heading = ARGS_GRID,
        long,
        number_of_values = 3,
        value_names = ["Z_MIN", "X_MIN", "Y_MIN"],
        allow_negative_numbers = true,
        requires = "domain_max",
        conflicts_with = "grid_file",
    )]
    pub domain_min: Option<Vec<f64>>,
    /// Upper corner (z, x, y) of the domain with evenly spaced gridboxes (requires domain-min to be specified)
    #[arg(
        help_heading = ARGS_GRID,
        long,
        number_of_values = 3,
        value_names = ["Z_MAX", "X_MAX", "Y_MAX"],
        allow_negative_numbers = true,
        requires = "domain_min",
        conflicts_with = "grid_file",
    )]
    pub domain_max: Option<Vec<f64>>,
    /// JSON file with the bounds of all gridboxes, e.g. '[[0, [0.0, 0.0, 0.0], [50.0, 100.0, 100.0]], ...]'
    #[arg(help_heading = ARGS_GRID, long, value_parser = clap::value_parser!(PathBuf))]
    pub grid_file: Option<PathBuf>,

    /// Number of initial superdroplets per gridbox
    #[arg(help_heading = ARGS_DROPS, long, default_value = "8")]
    pub drops_per_gridbox: usize,
    /// Capacity of the superdroplet buffer of every rank relative to the average number of superdroplets per rank
    #[arg(help_heading = ARGS_DROPS, long, default_value = "2.0")]
    pub capacity_factor: f64,
    /// Constant velocity (w, u, v) of all superdroplets in m/s (default: -1.0 2.0 1.0)
    #[arg(
        help_heading = ARGS_DROPS,
        long,
        number_of_values = 3,
        value_names = ["W", "U", "V"],
        allow_negative_numbers = true
    )]
    pub velocity: Option<Vec<f64>>,
    /// Re-insert superdroplets falling through the bottom of the domain at its top
    #[arg(
        help_heading = ARGS_DROPS,
        long,
        default_value = "off",
        value_name = "off|on",
        ignore_case = true,
        require_equals = true
    )]
    pub periodic_top: Switch,
    /// Seed of the random initial superdroplet population
    #[arg(help_heading = ARGS_DROPS, long, default_value = "42")]
    pub seed: u64,

    /// Number of processes (ranks), every rank runs on its own thread
    #[arg(help_heading = ARGS_RUN, long, short = 'p', default_value = "4")]
    pub processes: usize,
    /// Number of time steps
    #[arg(help_heading = ARGS_RUN, long, default_value = "100")]
    pub steps: usize,
    /// Length of a time step in seconds
    #[arg(help_heading = ARGS_RUN, long, default_value = "1.0")]
    pub dt: f64,
    /// Log the global superdroplet totals every n steps (0 disables the output)
    #[arg(help_heading = ARGS_RUN, long, default_value = "10")]
    pub log_interval: usize,

    /// Enable the use of double precision for all computations
    #[arg(
        short = 'd',
        long,
        default_value = "off",
        value_name = "off|on",
        ignore_case = true,
        require_equals = true
    )]
    pub double_precision: Switch,
    /// Set the number of threads for the worker thread pool used by all ranks
    #[arg(long, short = 'n')]
    pub num_threads: Option<usize>,
    /// Seconds a rank waits for a message of another rank before the run is aborted
    #[arg(long, default_value = "60")]
    pub comm_timeout: u64,
}

/// Boundary mode of an axis as given on the command line
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum BoundaryArg {
    Finite,
    Periodic,
}

impl From<BoundaryArg> for BoundaryMode {
    fn from(arg: BoundaryArg) -> Self {
        match arg {
            BoundaryArg::Finite => BoundaryMode::Finite,
            BoundaryArg::Periodic => BoundaryMode::Periodic,
        }
    }
}

impl SimulateSubcommandArgs {
    /// Returns the boundary modes of the z, x and y axes
    pub(crate) fn boundary_modes(&self) -> Result<[BoundaryMode; 3], anyhow::Error> {
        match &self.boundaries {
            None => Ok(dropletgrid_lib::GridShape::DEFAULT_BOUNDARIES),
            Some(boundaries) => match boundaries.as_slice() {
                &[z, x, y] => Ok([z.into(), x.into(), y.into()]),
                _ => Err(anyhow!(
                    "Expected three boundary modes (z,x,y), got {}",
                    boundaries.len()
                )),
            },
        }
    }
}

/// Parameters of a simulation run
#[derive(Clone, Debug)]
pub struct SimulationParameters<R: Real> {
    /// Number of ranks
    pub process_count: usize,
    /// Number of initial superdroplets per gridbox
    pub drops_per_gridbox: usize,
    /// Capacity of every rank's buffer relative to the average number of superdroplets per rank
    pub capacity_factor: f64,
    pub steps: usize,
    pub dt: R,
    /// Constant velocity `(w, u, v)` of all superdroplets
    pub velocity: Vector3<R>,
    /// Re-insert superdroplets falling through the bottom at the top of the domain
    pub periodic_top: bool,
    pub seed: u64,
    pub log_interval: usize,
    /// Time a rank waits for a message before giving up
    pub comm_timeout: Duration,
}

impl<R: Real> TryFrom<&SimulateSubcommandArgs> for SimulationParameters<R> {
    type Error = anyhow::Error;

    fn try_from(args: &SimulateSubcommandArgs) -> Result<Self, Self::Error> {
        if args.processes == 0 {
            return Err(anyhow!("At least one process is required"));
        }
        if args.capacity_factor.is_nan() || args.capacity_factor < 1.0 {
            return Err(anyhow!(
                "The capacity factor has to be at least 1.0, got {}",
                args.capacity_factor
            ));
        }

        let velocity = match args.velocity.as_deref() {
            Some(&[w, u, v]) => Vector3::new(w, u, v),
            Some(values) => {
                return Err(anyhow!("Expected three velocity components, got {}", values.len()));
            }
            None => Vector3::new(-1.0, 2.0, 1.0),
        };

        Ok(Self {
            process_count: args.processes,
            drops_per_gridbox: args.drops_per_gridbox,
            capacity_factor: args.capacity_factor,
            steps: args.steps,
            dt: args
                .dt
                .try_convert()
                .ok_or_else(|| anyhow!("Failed to convert the time step to the target float type"))?,
            velocity: R::try_convert_vec_from(&velocity)
                .ok_or_else(|| anyhow!("Failed to convert the velocity to the target float type"))?,
            periodic_top: args.periodic_top.into_bool(),
            seed: args.seed,
            log_interval: args.log_interval,
            comm_timeout: Duration::from_secs(args.comm_timeout),
        })
    }
}

/// Global statistics of a finished simulation run
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub initial_superdroplets: u64,
    pub initial_multiplicity: u64,
    pub final_superdroplets: u64,
    pub final_multiplicity: u64,
    /// Superdroplets sent between ranks, summed over all steps and ranks
    pub sent: usize,
    /// Superdroplets dropped because they left the domain
    pub out_of_domain: usize,
    /// Superdroplets re-inserted at the top of the domain
    pub reinserted: usize,
}

impl SimulationResult {
    /// Checks that no superdroplet was lost or duplicated by the transport between the ranks
    pub fn verify_conservation(&self) -> Result<(), anyhow::Error> {
        let expected = self
            .initial_superdroplets
            .checked_sub(self.out_of_domain as u64);
        if expected != Some(self.final_superdroplets) {
            return Err(anyhow!(
                "Superdroplets are not conserved: started with {}, {} left the domain, but {} remain",
                self.initial_superdroplets,
                self.out_of_domain,
                self.final_superdroplets
            ));
        }
        if self.out_of_domain == 0 && self.final_multiplicity != self.initial_multiplicity {
            return Err(anyhow!(
                "Total multiplicity is not conserved: {} before, {} after the run",
                self.initial_multiplicity,
                self.final_multiplicity
            ));
        }
        Ok(())
    }
}

/// Executes the `simulate` subcommand
pub(crate) fn simulate_subcommand(cmd_args: &SimulateSubcommandArgs) -> Result<(), anyhow::Error> {
    profile!("simulate cli");

    if let Some(num_threads) = cmd_args.num_threads {
        dropletgrid_lib::initialize_thread_pool(num_threads)?;
    }

    if cmd_args.double_precision.into_bool() {
        run_simulation::<f64>(cmd_args)
    } else {
        run_simulation::<f32>(cmd_args)
    }
}

fn run_simulation<R: Real>(cmd_args: &SimulateSubcommandArgs) -> Result<(), anyhow::Error> {
    let description = grid_description_from_args::<R>(cmd_args)?;
    let parameters = SimulationParameters::<R>::try_from(cmd_args)
        .context("Failed processing parameters from command line")?;

    let result = simulation_pipeline(&description, &parameters)?;
    info!(
        "Superdroplets: {} initially, {} finally ({} left the domain, {} re-inserted, {} transfers between ranks)",
        result.initial_superdroplets,
        result.final_superdroplets,
        result.out_of_domain,
        result.reinserted,
        result.sent
    );
    result.verify_conservation()?;
    info!("Superdroplet conservation verified.");
    Ok(())
}

/// Builds the grid description either from a grid file or from the domain bounds
fn grid_description_from_args<R: Real>(
    args: &SimulateSubcommandArgs,
) -> Result<GridDescription<R>, anyhow::Error> {
    let shape = grid_shape_from_args(&args.ndims, args.spatial_dims)?
        .with_boundaries(args.boundary_modes()?);

    if let Some(grid_file) = &args.grid_file {
        info!("Loading grid description from \"{}\"", grid_file.display());
        return grid_description_from_json(grid_file, shape);
    }

    let to_vec = |v: &[f64]| -> Result<Vector3<f64>, anyhow::Error> {
        match v {
            &[z, x, y] => Ok(Vector3::new(z, x, y)),
            _ => Err(anyhow!("Expected three domain coordinates, got {}", v.len())),
        }
    };
    let domain = match (&args.domain_min, &args.domain_max) {
        (Some(min), Some(max)) => Aabb3d::new(to_vec(min)?, to_vec(max)?),
        _ => {
            let [nz, nx, ny] = shape.ndims();
            Aabb3d::new(
                Vector3::zeros(),
                Vector3::new(nz as f64, nx as f64, ny as f64) * DEFAULT_GRIDBOX_SIZE,
            )
        }
    };
    info!("Domain: {:?}", domain);

    let domain = domain
        .try_convert()
        .ok_or_else(|| anyhow!("Failed to convert the domain to the target float type"))?;
    GridDescription::uniform(shape, &domain).context("Invalid domain")
}

/// Statistics of one rank
#[derive(Copy, Clone, Debug, Default)]
struct RankResult {
    totals_before: (u64, u64),
    totals_after: (u64, u64),
    sent: usize,
    out_of_domain: usize,
    reinserted: usize,
}

/// Random superdroplets of a single gridbox
///
/// Every gridbox uses its own random number generator, so the population does not depend on
/// the number of ranks.
fn gridbox_population<R: Real>(
    global_index: usize,
    description: &GridDescription<R>,
    parameters: &SimulationParameters<R>,
) -> Result<Vec<Superdroplet<R>>, anyhow::Error> {
    let convert = |v: f64| -> Result<R, anyhow::Error> {
        v.try_convert()
            .ok_or_else(|| anyhow!("Failed to convert {} to the target float type", v))
    };

    let gridbox = description
        .gridbox(global_index)
        .ok_or_else(|| anyhow!("Gridbox {} is missing in the grid description", global_index))?;
    let mut rng = StdRng::seed_from_u64(
        parameters
            .seed
            .wrapping_add((global_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
    );

    (0..parameters.drops_per_gridbox)
        .map(|n| -> Result<Superdroplet<R>, anyhow::Error> {
            let mut coords = Vector3::zeros();
            for d in 0..3 {
                let t = convert(rng.r#gen::<f64>())?;
                coords[d] = gridbox.lower[d] + (gridbox.upper[d] - gridbox.lower[d]) * t;
            }
            let attributes = SuperdropletAttributes {
                multiplicity: rng.gen_range(1_000..1_000_000),
                radius: convert(10f64.powf(rng.gen_range(-7.0..-4.0)))?,
                solute_mass: convert(rng.gen_range(1e-19..1e-16))?,
            };
            let id = SuperdropletId((global_index * parameters.drops_per_gridbox + n) as u64);
            Ok(Superdroplet::new(id, coords, attributes))
        })
        .collect()
}

/// Random initial superdroplets of all local gridboxes of a rank, generated in parallel
fn initial_population<R: Real>(
    map: &CellMap<R>,
    description: &GridDescription<R>,
    parameters: &SimulationParameters<R>,
) -> Result<Vec<Superdroplet<R>>, anyhow::Error> {
    let per_gridbox = (0..map.num_local_cells())
        .into_par_iter()
        .map(|index| gridbox_population(map.global_index(index), description, parameters))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(per_gridbox.into_iter().flatten().collect())
}

fn run_rank<R: Real>(
    comm: ThreadComm,
    description: &GridDescription<R>,
    parameters: &SimulationParameters<R>,
) -> Result<RankResult, anyhow::Error> {
    let rank = comm.rank();
    let domain = DistributedDomain::new(comm, description)
        .with_context(|| format!("Failed to set up the domain of rank {}", rank))?;
    domain.log_info();

    let map = domain.map();
    let population = initial_population(map, description, parameters)?;

    let average = description.shape().num_cells() * parameters.drops_per_gridbox
        / parameters.process_count;
    let capacity = ((average.max(1) as f64) * parameters.capacity_factor).ceil() as usize;
    let mut buffer = domain
        .populate(capacity.max(population.len()), population)
        .with_context(|| format!("Failed to initialize the superdroplets of rank {}", rank))?;

    let motion = MotionKind::ConstantVelocity(ConstantVelocity {
        velocity: parameters.velocity,
    });
    let boundary = if parameters.periodic_top {
        BoundaryKind::PeriodicTop(PeriodicTopBoundary)
    } else {
        BoundaryKind::Null(NullBoundaryConditions)
    };

    let mut result = RankResult {
        totals_before: domain.global_totals(&buffer)?,
        ..Default::default()
    };

    for step in 0..parameters.steps {
        let summary = domain
            .step(&motion, &boundary, &mut buffer, parameters.dt)
            .with_context(|| format!("Step {} failed on rank {}", step, rank))?;
        result.sent += summary.transport.sent;
        result.out_of_domain += summary.transport.out_of_domain;
        result.reinserted += summary.reinserted;
        debug!(
            "Step {}: {} resident, {} sent, {} received",
            step, summary.transport.resident, summary.transport.sent, summary.transport.received
        );

        if parameters.log_interval > 0 && (step + 1) % parameters.log_interval == 0 {
            let (count, multiplicity) = domain.global_totals(&buffer)?;
            if rank == 0 {
                info!(
                    "Step {}/{}: {} superdroplets, total multiplicity {}",
                    step + 1,
                    parameters.steps,
                    count,
                    multiplicity
                );
            }
        }

        if rank == 0 {
            if let Some(pb) = logging::get_progress_bar() {
                pb.inc(1)
            }
        }
    }

    result.totals_after = domain.global_totals(&buffer)?;
    Ok(result)
}

/// Runs the simulation with one thread per rank and sums up the statistics of all ranks
pub fn simulation_pipeline<R: Real>(
    description: &GridDescription<R>,
    parameters: &SimulationParameters<R>,
) -> Result<SimulationResult, anyhow::Error> {
    profile!("simulation_pipeline");

    info!(
        "Starting simulation of {} steps on {} ranks with {} superdroplets per gridbox",
        parameters.steps, parameters.process_count, parameters.drops_per_gridbox
    );

    let pb = ProgressBar::new(parameters.steps as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40}] {pos}/{len} steps ({percent}%) - remaining: [{eta_precise}]",
        )?
        .progress_chars("=> "),
    );
    logging::set_progress_bar(Some(pb.downgrade()));

    let comms = ThreadCommWorld::new(parameters.process_count)
        .with_timeout(parameters.comm_timeout)
        .into_comms();

    let results = std::thread::scope(|s| -> Result<Vec<RankResult>, anyhow::Error> {
        let handles = comms
            .into_iter()
            .map(|comm| {
                std::thread::Builder::new()
                    .name(format!("rank-{}", comm.rank()))
                    .spawn_scoped(s, move || run_rank(comm, description, parameters))
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to spawn rank threads")?;

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| anyhow!("Rank {} panicked", rank))
                    .and_then(|result| result)
            })
            .collect()
    });

    pb.finish();
    logging::set_progress_bar(None);
    let results = results?;

    let first = results.first().copied().unwrap_or_default();
    let result = SimulationResult {
        initial_superdroplets: first.totals_before.0,
        initial_multiplicity: first.totals_before.1,
        final_superdroplets: first.totals_after.0,
        final_multiplicity: first.totals_after.1,
        sent: results.iter().map(|r| r.sent).sum(),
        out_of_domain: results.iter().map(|r| r.out_of_domain).sum(),
        reinserted: results.iter().map(|r| r.reinserted).sum(),
    };
    Ok(result)
}
