use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use island_terrain::export::{save_png, tile_image, DrawMode};
use island_terrain::heightmap::TileOffset;
use island_terrain::shadow::{ComputeProgram, TracingMode};
use island_terrain::{TerrainError, TerrainPipeline, TerrainSettings};

#[derive(Parser, Debug)]
#[command(name = "island_terrain")]
#[command(about = "Generate island heightmaps with ray-traced sun shadows")]
struct Args {
    /// JSON settings file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Noise seed (overrides the settings file; random if neither sets one)
    #[arg(short, long)]
    seed: Option<u32>,

    /// Shadow tracing: basic, cpu or gpu
    #[arg(short, long)]
    mode: Option<TracingMode>,

    /// Sun angle around the map, in radians
    #[arg(long)]
    sun_angle: Option<f32>,

    /// Tile edge length in cells
    #[arg(long)]
    size: Option<usize>,

    /// World X of the tile centre
    #[arg(long, default_value = "0")]
    center_x: i64,

    /// World Y of the tile centre
    #[arg(long, default_value = "0")]
    center_y: i64,

    /// What to draw: noise, colour or falloff
    #[arg(short, long, default_value = "colour")]
    draw_mode: DrawMode,

    /// WGSL compute shader for gpu mode (built-in shader if not specified)
    #[arg(long)]
    shader: Option<PathBuf>,

    /// Entry point of the compute shader
    #[arg(long, default_value = "main")]
    entry_point: String,

    /// Disable the island falloff mask
    #[arg(long)]
    no_falloff: bool,

    /// Output PNG path
    #[arg(short, long, default_value = "terrain.png")]
    output: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wgpu=warn,naga=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(args: Args) -> Result<(), TerrainError> {
    let mut settings = match &args.config {
        Some(path) => TerrainSettings::load(path)?,
        None => TerrainSettings::default(),
    };

    if let Some(seed) = args.seed {
        settings.noise.seed = Some(seed);
    }
    let seed = settings.noise.resolve_seed(rand::random);
    if let Some(mode) = args.mode {
        settings.shadow.mode = mode.to_string();
    }
    if let Some(angle) = args.sun_angle {
        settings.shadow.sun_angle = angle;
    }
    if let Some(size) = args.size {
        settings.map_size = size;
    }
    if args.no_falloff {
        settings.falloff.enabled = false;
    }

    tracing::info!(seed, size = settings.map_size, "generating terrain");

    let config = settings.into_config()?;
    let program = match config.mode() {
        TracingMode::Accelerated => Some(match &args.shader {
            Some(path) => ComputeProgram::from_file(path, args.entry_point.as_str())?,
            None => ComputeProgram::builtin(),
        }),
        _ => None,
    };

    let half = (config.map_size() / 2) as i64;
    let offset = TileOffset::new(args.center_x - half, args.center_y - half);

    let pipeline = TerrainPipeline::new(config, program)?;
    let tile = pipeline.generate(offset)?;

    if let Some(shadowed) = tile.shadowed {
        let total = tile.heights.len();
        tracing::info!(
            shadowed,
            percent = %format!("{:.1}", 100.0 * shadowed as f64 / total as f64),
            tracer = pipeline.tracer_name().unwrap_or("none"),
            "shadows traced"
        );
    }

    let image = tile_image(&tile, args.draw_mode, pipeline.falloff_mask());
    save_png(&image, &args.output)?;
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            if e.is_config() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
