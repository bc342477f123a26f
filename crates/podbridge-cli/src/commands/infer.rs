//! Infer command - run a model package on JSON inputs.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::{debug, info};

use podbridge_core::{Bridge, Handle};

use super::tensors::{self, JsonTensor};
use super::{bridge_error, open_bridge};

/// Arguments for the infer command.
#[derive(Args)]
pub struct InferArgs {
    /// Model package path
    #[arg(required = true)]
    path: String,

    /// JSON file mapping input names to {dtype, shape, data}
    #[arg(short, long)]
    inputs: PathBuf,

    /// Output to return (repeatable; default: all outputs)
    #[arg(long = "output", value_name = "NAME")]
    outputs: Vec<String>,

    /// Prepare the inputs once and run inference this many times
    #[arg(long)]
    repeat: Option<u32>,

    /// Write results to a file instead of stdout
    #[arg(short = 'o', long = "save")]
    save: Option<PathBuf>,
}

pub fn run(args: InferArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.inputs)
        .with_context(|| format!("Failed to read inputs from {}", args.inputs.display()))?;
    let inputs = tensors::parse_inputs(&text)?;

    let bridge = open_bridge(config_path)?;
    let model = bridge.new_model(&args.path, Handle::NONE).map_err(bridge_error)?;
    bridge.load_model(model).map_err(bridge_error)?;
    let name = bridge.get_name(model).map_err(bridge_error)?;
    let platform = bridge.get_platform(model).map_err(bridge_error)?;
    info!(%name, %platform, "model loaded");

    let allocator = bridge.get_allocator(model).map_err(bridge_error)?;
    let mut handles = Vec::with_capacity(inputs.len());
    for (name, tensor) in &inputs {
        handles.push((name.clone(), tensors::allocate(&bridge, allocator, name, tensor)?));
    }

    let outputs = match args.repeat {
        Some(repeat) => run_prepared(&bridge, model, &handles, &args.outputs, repeat.max(1))?,
        None => {
            let requested = (!args.outputs.is_empty()).then_some(args.outputs.as_slice());
            bridge.infer(&handles, requested, model).map_err(bridge_error)?
        }
    };

    let mut results: BTreeMap<String, JsonTensor> = BTreeMap::new();
    for (name, handle) in outputs {
        results.insert(name, tensors::read(&bridge, handle)?);
        bridge.delete_tensor(handle).map_err(bridge_error)?;
    }
    for (_, handle) in handles {
        bridge.delete_tensor(handle).map_err(bridge_error)?;
    }
    bridge.delete_allocator(allocator).map_err(bridge_error)?;
    bridge.delete_model(model).map_err(bridge_error)?;
    debug!(live = ?bridge.live_handles(), "handles after inference");

    let json = serde_json::to_string_pretty(&results)?;
    match args.save {
        Some(path) => {
            fs::write(&path, json)?;
            eprintln!("{} Results written to {}", style("✓").green(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Run a prepared bundle `repeat` times, keeping the last outputs.
fn run_prepared(
    bridge: &Bridge,
    model: Handle,
    inputs: &[(String, Handle)],
    requested: &[String],
    repeat: u32,
) -> anyhow::Result<BTreeMap<String, Handle>> {
    let declared = bridge.get_outputs(model).map_err(bridge_error)?;
    for name in requested {
        if !declared.iter().any(|s| &s.name == name) {
            anyhow::bail!("NameError: model has no output {name:?}");
        }
    }

    let prepared = bridge.prepare(inputs).map_err(bridge_error)?;
    let start = Instant::now();
    let mut outputs = BTreeMap::new();
    for i in 0..repeat {
        for (_, handle) in std::mem::take(&mut outputs) {
            bridge.delete_tensor(handle).map_err(bridge_error)?;
        }
        outputs = bridge.infer_prepared(prepared, model).map_err(bridge_error)?;
        debug!(iteration = i, "prepared inference finished");
    }
    let elapsed = start.elapsed();
    bridge.delete_prepared(prepared).map_err(bridge_error)?;

    eprintln!(
        "{} {} runs, {:.3} ms mean",
        style("⏱").cyan(),
        repeat,
        elapsed.as_secs_f64() * 1000.0 / f64::from(repeat)
    );

    if !requested.is_empty() {
        let (keep, drop): (BTreeMap<_, _>, BTreeMap<_, _>) =
            outputs.into_iter().partition(|(name, _)| requested.contains(name));
        for handle in drop.into_values() {
            bridge.delete_tensor(handle).map_err(bridge_error)?;
        }
        outputs = keep;
    }
    Ok(outputs)
}
