use anyhow::{bail, Context, Result};
use clap::Parser;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use tile_mixer::logging::init_logging;
use tile_mixer::{
    Collaborators, SetupParams, SourceConfig, Tile, TileCoords, TileError, TilePool, TileRequest,
};

/// Build render buffers for map tiles from a style and a GeoJSON file
#[derive(Parser, Debug)]
#[command(name = "tile-mixer", version)]
struct Cli {
    /// Setup JSON: style layers, source and pool options
    #[arg(short, long)]
    setup: PathBuf,

    /// GeoJSON file to serve instead of the setup's source
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Tiles to build, as z/x/y
    #[arg(short, long = "tile", value_parser = parse_coords, required = true)]
    tiles: Vec<TileCoords>,

    /// Worker threads (overrides the setup)
    #[arg(long)]
    threads: Option<usize>,

    /// Host-side time slice per poll, in milliseconds
    #[arg(long, default_value_t = 8)]
    budget_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Print finished tiles as JSON on stdout
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_coords(s: &str) -> Result<TileCoords, String> {
    let parts: Vec<&str> = s.split('/').collect();
    let [z, x, y] = parts[..] else {
        return Err(format!("expected z/x/y, got '{s}'"));
    };
    let z: u8 = z.parse().map_err(|_| format!("bad zoom '{z}'"))?;
    let x: u32 = x.parse().map_err(|_| format!("bad column '{x}'"))?;
    let y: u32 = y.parse().map_err(|_| format!("bad row '{y}'"))?;
    let tiles = 1u64 << z.min(32);
    if u64::from(x) >= tiles || u64::from(y) >= tiles {
        return Err(format!("tile {z}/{x}/{y} is outside the zoom {z} grid"));
    }
    Ok(TileCoords { z, x, y })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let mut bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    simd_json::serde::from_slice(&mut bytes).with_context(|| format!("parsing {}", path.display()))
}

fn summarize(coords: &TileCoords, tile: &Tile) {
    for (id, layer) in &tile.layers {
        let vertices: usize = layer
            .compressed
            .iter()
            .map(|g| g.buffers.vertex_count())
            .sum();
        info!(
            tile = %coords,
            layer = %id,
            kind = layer.layer_type.as_str(),
            groups = layer.compressed.len(),
            vertices,
            features = layer.features.as_ref().map_or(0, Vec::len),
            "layer built"
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut params: SetupParams = read_json(&cli.setup)?;
    if let Some(path) = &cli.data {
        params.source = Some(SourceConfig::Geojson {
            data: read_json(path)?,
        });
    }
    if let Some(threads) = cli.threads {
        params.threads = threads;
    }

    let pool = TilePool::new(params, Collaborators::default()).context("setting up tile pool")?;

    let finished: Rc<RefCell<Vec<(TileCoords, Result<Tile, TileError>)>>> = Rc::default();
    for coords in &cli.tiles {
        let coords = *coords;
        let finished = Rc::clone(&finished);
        // Lower zoom levels first
        let priority = -f64::from(coords.z);
        pool.request(
            TileRequest::new(coords.z, coords.x, coords.y).with_priority(move || priority),
            move |result| finished.borrow_mut().push((coords, result)),
        );
    }

    let start = Instant::now();
    let deadline = Duration::from_secs(cli.timeout);
    let budget = Duration::from_millis(cli.budget_ms);
    while pool.poll_wait(budget, budget) {
        if start.elapsed() > deadline {
            let outstanding = pool.active_tasks();
            pool.terminate();
            bail!("gave up after {}s with {outstanding} tiles outstanding", cli.timeout);
        }
    }
    info!(tiles = cli.tiles.len(), elapsed = ?start.elapsed(), "all tiles done");

    let mut failed = 0;
    let mut output = serde_json::Map::new();
    for (coords, result) in finished.borrow().iter() {
        match result {
            Ok(tile) => {
                summarize(coords, tile);
                if cli.json {
                    output.insert(coords.to_string(), serde_json::to_value(tile)?);
                }
            }
            Err(e) => {
                warn!(tile = %coords, error = %e, "tile failed");
                failed += 1;
            }
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string(&output)?);
    }
    if failed > 0 {
        bail!("{failed} of {} tiles failed", cli.tiles.len());
    }
    Ok(())
}
