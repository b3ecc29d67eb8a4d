use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use exhume_collect::output::DirectorySink;
use exhume_collect::search::{ConfirmedFile, TargetConfig, compile_targets};
use exhume_collect::volume::ImageVolume;
use exhume_collect::{Collector, ScanConfig};
use log::{debug, error};
use prettytable::{Table, row};
use serde_json::json;
use std::fs::File;
use std::process::exit;

fn main() {
    let matches = Command::new("exhume_collect")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Collect forensic artefacts from an NTFS volume by walking its Master File Table.")
        .arg(
            Arg::new("image")
                .short('i')
                .long("image")
                .value_parser(value_parser!(String))
                .help("Raw image or device (e.g. \\\\.\\C:). Defaults to the --volume device."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The NTFS partition starts at this byte address (decimal or hex)."),
        )
        .arg(
            Arg::new("volume")
                .short('v')
                .long("volume")
                .value_parser(value_parser!(String))
                .default_value("C")
                .help("Drive letter the volume's paths are rooted at."),
        )
        .arg(
            Arg::new("targets")
                .short('t')
                .long("targets")
                .value_parser(value_parser!(String))
                .help("JSON file listing the targets. Defaults to a built-in triage set."),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(value_parser!(String))
                .help("Directory the collected files are written to."),
        )
        .arg(
            Arg::new("os_first")
                .long("os-first")
                .action(ArgAction::SetTrue)
                .help(
                    "Read confirmed files through the host OS first, falling back to raw extents.",
                ),
        )
        .arg(
            Arg::new("channel_capacity")
                .long("channel-capacity")
                .value_parser(value_parser!(usize))
                .default_value("64")
                .help("MFT records buffered between the scan and the $MFT writer."),
        )
        .arg(
            Arg::new("pbs")
                .long("pbs")
                .action(ArgAction::SetTrue)
                .help("Display the volume geometry read from the boot sector."),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the confirmed files without extracting them."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the geometry, confirmed files and report in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let log_level_str = matches
        .get_one::<String>("log_level")
        .map(String::as_str)
        .unwrap_or("info");
    let level_filter = match log_level_str {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let volume = matches
        .get_one::<String>("volume")
        .cloned()
        .unwrap_or_else(|| "C".to_string());
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let json_output = matches.get_flag("json");
    let list_only = matches.get_flag("list");
    let output = matches.get_one::<String>("output");

    // 1) Targets, validated before anything touches the volume.
    let targets = match matches.get_one::<String>("targets") {
        Some(path) => {
            let loaded = File::open(path)
                .map_err(|e| e.to_string())
                .and_then(|f| TargetConfig::load_json(f).map_err(|e| e.to_string()));
            match loaded {
                Ok(t) => t,
                Err(e) => {
                    error!("Cannot load targets from '{}': {}", path, e);
                    exit(1);
                }
            }
        }
        None => TargetConfig::defaults(&volume),
    };
    debug!("{} targets configured", targets.len());
    let terms = match compile_targets(&targets) {
        Ok(t) => t,
        Err(e) => {
            error!("Invalid target configuration: {}", e);
            exit(1);
        }
    };

    let mut config = ScanConfig::new(&volume, terms);
    config.prefer_os_reads = matches.get_flag("os_first");
    if let Some(capacity) = matches.get_one::<usize>("channel_capacity") {
        config.mft_channel_capacity = *capacity;
    }

    // 2) The volume itself.
    let provider = match matches.get_one::<String>("image") {
        Some(path) => ImageVolume::new(path, offset),
        None => match volume.chars().next() {
            Some(letter) => ImageVolume::device(letter),
            None => {
                error!("No image given and no drive letter to open.");
                exit(1);
            }
        },
    };

    let collector = match Collector::new(provider, config) {
        Ok(c) => c,
        Err(e) => {
            error!("Couldn't open NTFS volume: {}", e);
            exit(1);
        }
    };

    if matches.get_flag("pbs") {
        if json_output {
            match serde_json::to_string_pretty(collector.geometry()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing geometry to JSON: {}", e),
            }
        } else {
            println!("{}", collector.geometry());
        }
    }

    // 3) Scan, and extract unless only a listing was asked for.
    let outcome = match (output, list_only) {
        (Some(dir), false) => {
            let mut sink = match DirectorySink::new(dir) {
                Ok(s) => s,
                Err(e) => {
                    error!("Cannot prepare output directory '{}': {}", dir, e);
                    exit(1);
                }
            };
            collector.collect(&mut sink)
        }
        _ => collector.locate(),
    };
    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            error!("Scan failed: {}", e);
            exit(1);
        }
    };

    if json_output {
        let doc = json!({ "confirmed": outcome.confirmed, "report": outcome.report });
        match serde_json::to_string_pretty(&doc) {
            Ok(s) => println!("{}", s),
            Err(e) => error!("Error serializing results to JSON: {}", e),
        }
    } else {
        println!("{}", confirmed_table(&outcome.confirmed));
        println!("{}", outcome.report);
    }
}

fn confirmed_table(files: &[ConfirmedFile]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Record", "Path", "Size", "Extents"]);
    for file in files {
        let extents = if file.resident.is_some() {
            "resident".to_string()
        } else {
            file.runs.len().to_string()
        };
        table.add_row(row![file.record_number, file.full_path, file.size, extents]);
    }
    table
}
