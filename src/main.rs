use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use csv::WriterBuilder;
use gmrf::config::{FieldConfig, generate_field, generate_replicates};
use gmrf::grid::Grid;
use gmrf::linalg::utils::{default_rank_tolerance, max_asymmetry, numerical_rank};
use gmrf::nullspace::{NullspacePenalty, penalize_nullspace};
use gmrf::precision::build_precision;
use gmrf::surface::Surface;
use gmrf::types::Coefficients;
use ndarray::Array1;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gmrf")]
#[command(about = "Gaussian Markov random field sampler", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Draw field coefficients and optionally evaluate the spline surface.
    Sample(SampleArgs),
    /// Build the precision matrix and report its spectrum.
    Precision(PrecisionArgs),
}

#[derive(Args, Debug)]
struct SampleArgs {
    #[arg(long = "config")]
    config: PathBuf,
    /// Overrides the seed in the config file.
    #[arg(long = "seed")]
    seed: Option<u64>,
    /// Coefficient CSV (`index,x,y,z`); stdout when omitted.
    #[arg(long = "out")]
    out: Option<PathBuf>,
    /// Surface CSV (`x,y,value`) on a resolution × resolution lattice.
    #[arg(long = "surface-out")]
    surface_out: Option<PathBuf>,
    #[arg(long = "resolution", default_value_t = 100)]
    resolution: usize,
    /// Independent draws; more than one adds a `replicate` column.
    #[arg(long = "replicates", default_value_t = 1)]
    replicates: usize,
}

#[derive(Args, Debug)]
struct PrecisionArgs {
    #[arg(long = "config")]
    config: PathBuf,
    /// Number of smallest eigenvalues to list.
    #[arg(long = "show-eigenvalues", default_value_t = 6)]
    show_eigenvalues: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Sample(args) => run_sample(args),
        Command::Precision(args) => run_precision(args),
    }
}

fn load_config(path: &Path) -> Result<FieldConfig, String> {
    FieldConfig::from_path(path).map_err(|e| e.to_string())
}

fn run_sample(args: SampleArgs) -> Result<(), String> {
    let mut config = load_config(&args.config)?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.replicates == 0 {
        return Err("--replicates must be at least 1".to_string());
    }

    if args.replicates > 1 {
        if args.surface_out.is_some() {
            return Err("--surface-out is only supported for a single replicate".to_string());
        }
        let (grid, draws, seed) =
            generate_replicates(&config, args.replicates).map_err(|e| e.to_string())?;
        log::info!("drew {} replicates (seed {seed})", draws.len());
        return write_coefficients_csv(args.out.as_deref(), &grid, &draws);
    }

    let field = generate_field(&config).map_err(|e| e.to_string())?;
    write_coefficients_csv(
        args.out.as_deref(),
        &field.grid,
        std::slice::from_ref(&field.coefficients),
    )?;

    if let Some(path) = args.surface_out.as_deref() {
        if args.resolution < 2 {
            return Err("--resolution must be at least 2".to_string());
        }
        write_surface_csv(path, &field.surface, &field.grid, args.resolution)?;
        log::info!(
            "wrote {r}x{r} surface lattice to {}",
            path.display(),
            r = args.resolution
        );
    }
    Ok(())
}

fn write_coefficients_csv(
    path: Option<&Path>,
    grid: &Grid,
    draws: &[Coefficients],
) -> Result<(), String> {
    let sink: Box<dyn Write> = match path {
        Some(p) => Box::new(
            std::fs::File::create(p)
                .map_err(|e| format!("failed to create output csv '{}': {e}", p.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(sink);

    let with_replicate = draws.len() > 1;
    let header: &[&str] = if with_replicate {
        &["replicate", "index", "x", "y", "z"]
    } else {
        &["index", "x", "y", "z"]
    };
    wtr.write_record(header)
        .map_err(|e| format!("failed writing csv header: {e}"))?;

    let points = grid.points();
    for (r, z) in draws.iter().enumerate() {
        for k in 0..z.len() {
            let mut record = Vec::with_capacity(5);
            if with_replicate {
                record.push(r.to_string());
            }
            record.push(k.to_string());
            record.push(format!("{:.12}", points[[k, 0]]));
            record.push(format!("{:.12}", points[[k, 1]]));
            record.push(format!("{:.12}", z[k]));
            wtr.write_record(&record)
                .map_err(|e| format!("failed writing csv row {k}: {e}"))?;
        }
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush csv writer: {e}"))?;
    Ok(())
}

fn write_surface_csv(
    path: &Path,
    surface: &Surface,
    grid: &Grid,
    resolution: usize,
) -> Result<(), String> {
    let ((x0, x1), (y0, y1)) = grid.domain();
    let xs = Array1::linspace(x0, x1, resolution);
    let ys = Array1::linspace(y0, y1, resolution);
    let values = surface.evaluate_lattice(xs.view(), ys.view());

    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to create output csv '{}': {e}", path.display()))?;
    wtr.write_record(["x", "y", "value"])
        .map_err(|e| format!("failed writing csv header: {e}"))?;
    for (i, x) in xs.iter().enumerate() {
        for (j, y) in ys.iter().enumerate() {
            wtr.write_record([
                format!("{x:.12}"),
                format!("{y:.12}"),
                format!("{:.12}", values[[i, j]]),
            ])
            .map_err(|e| format!("failed writing csv row {i},{j}: {e}"))?;
        }
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush csv writer: {e}"))?;
    Ok(())
}

fn run_precision(args: PrecisionArgs) -> Result<(), String> {
    let config = load_config(&args.config)?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| "config has no precision model to report on".to_string())?;
    let grid = Grid::new(config.x_grid, config.y_grid).map_err(|e| e.to_string())?;
    let precision = build_precision(&grid, model).map_err(|e| e.to_string())?;
    let eigenvalues = precision.eigenvalues().map_err(|e| e.to_string())?;

    let rank_tol = default_rank_tolerance(&eigenvalues);
    let rank = numerical_rank(&eigenvalues, rank_tol);
    let penalty = config.nullspace.unwrap_or_default();
    let below_threshold = eigenvalues
        .iter()
        .filter(|&&v| v < penalty.threshold)
        .count();
    let (nx, ny) = grid.shape();
    let dim = precision.dim();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Quantity", "Value"]);
    let mut add = |name: &str, value: String| {
        table.add_row(Row::from(vec![Cell::new(name), Cell::new(value)]));
    };
    add("model", model.name().to_string());
    add("grid", format!("{nx} x {ny}"));
    add("shape", format!("{dim} x {dim}"));
    add(
        "max |Q - Q^T|",
        format!("{:.3e}", max_asymmetry(precision.matrix().view())),
    );
    add("numerical rank", format!("{rank} (tol {rank_tol:.2e})"));
    add(
        "nullspace dimension",
        format!("{below_threshold} (eigenvalues < {:e})", penalty.threshold),
    );
    let shown = eigenvalues
        .iter()
        .take(args.show_eigenvalues)
        .map(|v| format!("{v:.4e}"))
        .collect::<Vec<_>>()
        .join(", ");
    add("smallest eigenvalues", shown);

    if config.nullspace.is_some() {
        let outcome = penalize_nullspace(precision.matrix(), &penalty);
        add("penalized Q", penalized_summary(outcome, &penalty));
    }

    println!("{table}");
    Ok(())
}

fn penalized_summary(
    outcome: Result<gmrf::nullspace::PenalizedPrecision, gmrf::FieldError>,
    penalty: &NullspacePenalty,
) -> String {
    match outcome {
        Ok(pen) => format!(
            "invertible (sig_q={}, sig_q0={}, penalized {} directions)",
            penalty.sig_q, penalty.sig_q0, pen.nullspace_dim
        ),
        Err(e) => format!("not invertible: {e}"),
    }
}
