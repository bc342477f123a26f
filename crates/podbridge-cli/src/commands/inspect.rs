//! Inspect command - show a model package's metadata.

use clap::Args;
use console::style;
use serde::Serialize;

use podbridge_core::engine::TensorSpec;
use podbridge_core::Handle;

use super::{bridge_error, open_bridge};

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Model package path
    #[arg(required = true)]
    path: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

#[derive(Serialize)]
struct Summary {
    name: String,
    platform: String,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

pub fn run(args: InspectArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let bridge = open_bridge(config_path)?;
    let model = bridge.new_model(&args.path, Handle::NONE).map_err(bridge_error)?;

    let summary = Summary {
        name: bridge.get_name(model).map_err(bridge_error)?,
        platform: bridge.get_platform(model).map_err(bridge_error)?,
        inputs: bridge.get_inputs(model).map_err(bridge_error)?,
        outputs: bridge.get_outputs(model).map_err(bridge_error)?,
    };
    bridge.delete_model(model).map_err(bridge_error)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_text(&summary),
    }
    Ok(())
}

fn print_text(summary: &Summary) {
    println!("{} {}", style("Model:").bold(), summary.name);
    println!("{} {}", style("Platform:").bold(), summary.platform);
    for (title, specs) in [("Inputs:", &summary.inputs), ("Outputs:", &summary.outputs)] {
        println!("{}", style(title).bold());
        if specs.is_empty() {
            println!("  (none)");
        }
        for spec in specs {
            println!("  {spec}");
        }
    }
}
