use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::path::PathBuf;

use fers::config::Config;
use fers::discovery::discover_images;
use fers::export::{export_predictions, write_json, ImagePrediction};
use fers::{logging, preprocess_file, runtime, EmotionModel};

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    bucket: Option<String>,
    output: Option<PathBuf>,
    json: bool,
    verbose: bool,
    inputs: Vec<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("fers {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => cli.config_path = Some(PathBuf::from(require_value(&args, &mut i))),
            "--model" | "-m" => cli.model_path = Some(PathBuf::from(require_value(&args, &mut i))),
            "--bucket" | "-b" => cli.bucket = Some(require_value(&args, &mut i)),
            "--output" | "-o" => cli.output = Some(PathBuf::from(require_value(&args, &mut i))),
            "--json" => cli.json = true,
            "--verbose" | "-v" => cli.verbose = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            path => cli.inputs.push(PathBuf::from(path)),
        }
        i += 1;
    }

    cli
}

fn require_value(args: &[String], i: &mut usize) -> String {
    if *i + 1 < args.len() {
        *i += 1;
        args[*i].clone()
    } else {
        eprintln!("Error: {} requires a value", args[*i]);
        std::process::exit(1);
    }
}

fn print_help() {
    println!(
        r#"fers - facial emotion recognition

USAGE:
    fers [OPTIONS] IMAGE_OR_DIR...

OPTIONS:
    --config, -c PATH   Path to config file
    --model, -m PATH    Local model path (overrides config)
    --bucket, -b NAME   Fetch the newest model from this bucket first
    --output, -o PATH   Write predictions to PATH (.csv or .json)
    --json              Print predictions as JSON
    --verbose, -v       Log to stderr
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FERS_CONFIG                 Path to config file (overrides default location)
    FERS_LOG                    Log level (trace, debug, info, warn, error)
    ORT_DYLIB_PATH              Path to the ONNX Runtime shared library
    GOOGLE_OAUTH_ACCESS_TOKEN   Bearer token for bucket access

Config file location: $XDG_CONFIG_HOME/fers/config.toml
Log files (without journald): $XDG_DATA_HOME/fers/logs"#
    );
}

fn main() -> Result<()> {
    let cli = parse_args();

    let logged = if cli.verbose {
        logging::init_stderr()
    } else {
        logging::init(&logging::default_log_dir())
    };
    if let Err(e) = logged {
        eprintln!("Logging disabled: {:#}", e);
    }

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    if cli.inputs.is_empty() {
        print_help();
        bail!("No input images given");
    }

    let _runtime = runtime::init(config.inference.dylib_path.as_deref())
        .context("Failed to load ONNX Runtime")?;

    let model_path = cli.model_path.clone().unwrap_or_else(|| config.model_path.clone());
    let bucket = cli.bucket.as_deref().or(config.bucket());

    let model = EmotionModel::new(model_path, &config, bucket).context("Invalid label mapping")?;
    if let Some(reason) = model.load_error() {
        match bucket {
            Some(bucket) => eprintln!("No model found in bucket {}: {}", bucket, reason),
            None => eprintln!("No model loaded: {}", reason),
        }
        std::process::exit(1);
    }

    let images = discover_images(&cli.inputs, &config.image_extensions);
    if images.is_empty() {
        bail!("No images found");
    }
    tracing::info!(count = images.len(), "Classifying images");

    let tensors: Vec<_> = images
        .par_iter()
        .map(|path| (path, preprocess_file(path)))
        .collect();

    let predictions: Vec<ImagePrediction> = tensors
        .into_iter()
        .map(|(path, tensor)| {
            let result = tensor
                .map_err(anyhow::Error::from)
                .and_then(|t| model.predict(&t).map_err(anyhow::Error::from));
            match result {
                Ok(probs) => ImagePrediction::from_probs(path, model.labels(), &probs.to_vec()),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to classify image");
                    ImagePrediction::failed(path, e)
                }
            }
        })
        .collect();

    if cli.json {
        write_json(&predictions, std::io::stdout().lock())?;
    } else {
        for prediction in &predictions {
            match (&prediction.top_label, prediction.top_probability, &prediction.error) {
                (Some(label), Some(p), _) => {
                    println!("{}: {} ({:.1}%)", prediction.path, label, p * 100.0)
                }
                (_, _, Some(error)) => println!("{}: error: {}", prediction.path, error),
                _ => println!("{}: no prediction", prediction.path),
            }
        }
    }

    if let Some(output) = &cli.output {
        let count = export_predictions(&predictions, model.labels(), output)
            .with_context(|| format!("Failed to write {:?}", output))?;
        tracing::info!(count, path = ?output, "Predictions exported");
    }

    Ok(())
}
