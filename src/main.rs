use std::path::Path;

use anyhow::{Context, Result};
use env_logger::Builder;
use log::{LevelFilter, info, warn};

use fieldnet_simulator::common::config::SimulatorConfig;
use fieldnet_simulator::common::scene::load_scene;
use fieldnet_simulator::simulation::Simulator;

const USAGE: &str = "usage: fieldnet-simulator <scene.json> [config.toml]";

fn load_config(scene_path: &str, explicit: Option<&String>) -> Result<SimulatorConfig> {
    if let Some(path) = explicit {
        return SimulatorConfig::load(Path::new(path)).with_context(|| format!("Failed to load config {}", path));
    }
    let beside_scene = SimulatorConfig::config_path_from_scene(scene_path);
    if beside_scene.exists() {
        return SimulatorConfig::load(&beside_scene).with_context(|| format!("Failed to load config {}", beside_scene.display()));
    }
    Ok(SimulatorConfig::default())
}

fn init_logging(config: &SimulatorConfig) {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info).filter(Some("fieldnet_simulator"), LevelFilter::Debug);
    if let Some(filters) = &config.log_level {
        builder.parse_filters(filters);
    }
    builder.parse_default_env().init();
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let scene_path = args.get(1).context(USAGE)?;
    let config = load_config(scene_path, args.get(2))?;
    init_logging(&config);

    let scene = load_scene(scene_path).with_context(|| format!("Failed to load scene {}", scene_path))?;
    let mut simulator = Simulator::from_scene(&scene, &config).context("Failed to set up simulation")?;
    simulator.run(config.steps).context("Simulation failed")?;

    for (device, value) in simulator.values() {
        match value {
            Some(value) => info!("{}: {:?}", device, value),
            None => warn!("{}: never executed", device),
        }
    }
    Ok(())
}
