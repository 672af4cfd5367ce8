//! Formula Forge CLI - Run scheduled or on-demand analysis jobs.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use chrono::Utc;

use formula_forge::{
    compute::evolution::RunArchive,
    orchestrator::{
        DirectoryProvider, EXIT_SUCCESS, EXIT_USAGE, FsResultSink, Orchestrator, Scheduler,
    },
    schema::{ArtifactMode, EngineConfig},
};

enum Command {
    Run(ArtifactMode),
    OnDemand(String),
    Schedule,
    Example,
}

struct Args {
    command: Command,
    config: Option<PathBuf>,
    data: PathBuf,
    out: PathBuf,
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <command> [options]", program);
    eprintln!();
    eprintln!("Evolve and validate label scoring formulas across domains.");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  daily                 Run the daily validation job once");
    eprintln!("  weekly                Run the weekly job (adds invariants and encodings)");
    eprintln!("  on-demand --domain ID Run a single domain");
    eprintln!("  schedule              Fire daily and weekly jobs until stdin says 'stop'");
    eprintln!("  --example             Print the default configuration");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config PATH  Engine configuration (default: built-in defaults)");
    eprintln!("  --data DIR     Dataset directory, one <domain>.json each (default: data)");
    eprintln!("  --out DIR      Artifact and history directory (default: out)");
    eprintln!();
    eprintln!("Exit codes: 0 success, 1 usage, 2 partial success, 3 not published.");
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut command = None;
    let mut domain = None;
    let mut config = None;
    let mut data = PathBuf::from("data");
    let mut out = PathBuf::from("out");

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{name} needs a value"))
        };
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--data" => data = PathBuf::from(value("--data")?),
            "--out" => out = PathBuf::from(value("--out")?),
            "--domain" => domain = Some(value("--domain")?),
            "--example" => command = Some(Command::Example),
            "daily" => command = Some(Command::Run(ArtifactMode::Daily)),
            "weekly" => command = Some(Command::Run(ArtifactMode::Weekly)),
            "on-demand" => command = Some(Command::OnDemand(String::new())),
            "schedule" => command = Some(Command::Schedule),
            other => return Err(format!("Unknown argument: {other}")),
        }
    }

    let command = match command {
        Some(Command::OnDemand(_)) => match domain {
            Some(domain) => Command::OnDemand(domain),
            None => return Err("on-demand needs --domain".to_string()),
        },
        Some(command) => command,
        None => return Err("No command given".to_string()),
    };

    Ok(Args {
        command,
        config,
        data,
        out,
    })
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let parsed = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage(&args[0]);
        process::exit(EXIT_USAGE);
    });

    if let Command::Example = parsed.command {
        print_example_config();
        return;
    }

    // Load configuration
    let config = match &parsed.config {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error loading config {}: {}", path.display(), e);
            process::exit(EXIT_USAGE);
        }),
        None => EngineConfig::default(),
    };

    let archive = RunArchive::load_from_dir(&parsed.out, config.invariants.max_history_runs)
        .unwrap_or_else(|e| {
            eprintln!("Error loading run history: {}", e);
            process::exit(EXIT_USAGE);
        });
    let sink = FsResultSink::new(&parsed.out).unwrap_or_else(|e| {
        eprintln!("Error opening output directory: {}", e);
        process::exit(EXIT_USAGE);
    });
    let provider = DirectoryProvider::new(&parsed.data);

    let orchestrator = Orchestrator::new(config, Arc::new(provider), Arc::new(sink))
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(EXIT_USAGE);
        })
        .with_archive(archive);

    println!("Formula Forge");
    println!("=============");
    println!("Data: {}", parsed.data.display());
    println!("Output: {}", parsed.out.display());
    println!(
        "Families: {}",
        orchestrator
            .config()
            .families
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    let start = Instant::now();
    let report = match parsed.command {
        Command::Run(mode) => orchestrator.run(mode),
        Command::OnDemand(domain) => orchestrator.run_on_demand(&domain),
        Command::Schedule => {
            let scheduler = Scheduler::new(Arc::new(orchestrator));
            watch_stdin(scheduler.stop_handle());
            println!("Scheduling; enter 'stop' to finish.");
            scheduler.run_until_stopped(Utc::now);
            println!("Scheduler stopped after in-flight runs finished.");
            process::exit(EXIT_SUCCESS);
        }
        Command::Example => return,
    };

    print!("{}", report.status_table());
    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
    process::exit(report.exit_code());
}

/// Set `stop` once stdin reads a "stop" line. Closed or detached stdin
/// leaves the scheduler running.
fn watch_stdin(stop: Arc<AtomicBool>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { return };
            if line.trim() == "stop" {
                stop.store(true, Ordering::Relaxed);
                return;
            }
        }
    });
}

fn print_example_config() {
    let config = EngineConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
