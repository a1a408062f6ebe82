// ============================================================================
// MagicPen CLI: batch request processing and a JSON-lines server
// ============================================================================
//
// Usage examples:
//   magicpen merge -i request.json -o response.json --save-mask
//   magicpen merge -i "requests/*.json" --output-dir out/
//   magicpen single -i crop.json
//   magicpen --verbose serve < requests.jsonl > responses.jsonl
//
// Request files hold exactly the JSON body the drawing client would send.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::{decode_mask, write_mask_png};
use crate::service::{MagicPenService, Route, ServiceError, ServiceResponse};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// MagicPen crop-mask merger.
#[derive(Parser, Debug)]
#[command(
    name = "magicpen",
    about = "Merge brushed crop predictions into one canvas mask",
    long_about = "Runs the magic pen merge pipeline on JSON request files, or serves\n\
                  requests as JSON lines on stdin/stdout.\n\n\
                  Example:\n  \
                  magicpen merge -i request.json -o response.json --save-mask\n  \
                  magicpen serve < requests.jsonl"
)]
pub struct CliArgs {
    /// Mirror every log record to stderr and enable debug records.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log file path. Defaults to the OS data directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run `predict_crops` on each request file.
    Merge(RunArgs),
    /// Run `predict_single_crop` on each request file.
    Single(RunArgs),
    /// Answer JSON-lines requests from stdin on stdout.
    Serve,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Request file(s). Glob patterns accepted (e.g. "requests/*.json").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Response file path. Only valid for a single input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Also write the resulting mask as a PNG next to each response.
    #[arg(long)]
    pub save_mask: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the selected command and return an OS exit code.
/// `0` = every request answered 200, `1` = anything else.
pub fn run(args: CliArgs, service: &MagicPenService) -> ExitCode {
    match args.command {
        Command::Merge(run_args) => run_files(&run_args, Route::PredictCrops, service, args.verbose),
        Command::Single(run_args) => {
            run_files(&run_args, Route::PredictSingleCrop, service, args.verbose)
        }
        Command::Serve => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            match serve(service, stdin.lock(), stdout.lock()) {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => ExitCode::FAILURE,
                Err(e) => {
                    log::error!("serve loop stopped: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

// ============================================================================
// File mode
// ============================================================================

fn run_files(args: &RunArgs, route: Route, service: &MagicPenService, verbose: bool) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            any_failure = true;
            continue;
        };

        match run_one(service, route, input_path, &output_path, args.save_mask) {
            Ok(response) if response.is_success() => {
                if verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Ok(response) => {
                eprintln!(
                    "  error {}: {}",
                    response.status,
                    response.message().unwrap_or("request failed")
                );
                any_failure = true;
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

/// Handle one request file. The response is written even when it is an
/// error response; `Err` means the files themselves could not be handled.
fn run_one(
    service: &MagicPenService,
    route: Route,
    input: &Path,
    output: &Path,
    save_mask: bool,
) -> Result<ServiceResponse, String> {
    let body = std::fs::read_to_string(input).map_err(|e| format!("read failed: {}", e))?;
    let response = service.handle(route, &body);

    let json = serde_json::to_string_pretty(&response.body)
        .map_err(|e| format!("serialize failed: {}", e))?;
    std::fs::write(output, json).map_err(|e| format!("write failed: {}", e))?;

    if save_mask && response.is_success() {
        let key = match route {
            Route::PredictCrops => "merged_mask_base64",
            Route::PredictSingleCrop => "prediction_base64",
        };
        if let Some(data) = response.body.get(key).and_then(Value::as_str) {
            let mask = decode_mask(data).map_err(|e| format!("mask decode failed: {}", e))?;
            let mask_path = output.with_extension("png");
            write_mask_png(&mask, &mask_path)
                .map_err(|e| format!("mask save failed: {}", e))?;
        }
    }

    Ok(response)
}

// ============================================================================
// Serve mode
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    route: Route,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Serialize)]
struct EnvelopeReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<Route>,
    status: u16,
    body: Value,
}

/// Answer one JSON line per request line until `input` runs dry. Blank
/// lines are skipped. Returns whether every request answered 200.
pub fn serve<R: BufRead, W: Write>(
    service: &MagicPenService,
    input: R,
    mut output: W,
) -> std::io::Result<bool> {
    log::info!("serve: waiting for requests on stdin");
    let mut all_ok = true;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                let response = service.handle_value(envelope.route, envelope.body);
                EnvelopeReply {
                    route: Some(envelope.route),
                    status: response.status,
                    body: response.body,
                }
            }
            Err(e) => {
                log::warn!("serve: malformed envelope: {}", e);
                let response =
                    ServiceError::BadRequest(format!("Malformed request envelope: {}", e))
                        .into_response();
                EnvelopeReply {
                    route: None,
                    status: response.status,
                    body: response.body,
                }
            }
        };

        all_ok &= reply.status == 200;
        let json = serde_json::to_string(&reply).map_err(std::io::Error::other)?;
        writeln!(output, "{}", json)?;
        output.flush()?;
    }

    Ok(all_ok)
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the response path for a single request file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: next to the input as `<stem>_response.json`
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let file_name = format!("{}_response.json", stem);

    if let Some(dir) = output_dir {
        return Some(dir.join(file_name));
    }

    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    Some(parent.join(file_name))
}
