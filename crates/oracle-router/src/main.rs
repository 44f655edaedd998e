//! Price Oracle command-line front-end
//!
//! ```text
//! oracle predict '{"prices": [100, 101, 103, 105, 108]}'
//! oracle predict            # one JSON request per stdin line
//! oracle features '{"prices": [...]}'
//! oracle probe
//! ```
//!
//! Responses go to stdout as JSON, logs go to stderr.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use oracle_core::{normalize, parse_request, round_display, to_display_json, WeightStore};
use oracle_router::{AppConfig, InvocationRouter, RemoteStrategy, RouterError, VmStrategy};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for requests that violate an input constraint
const EXIT_INVALID_INPUT: u8 = 2;

enum Command {
    Predict(Option<String>),
    Features(String),
    Probe,
}

fn parse_args() -> Option<Command> {
    let mut args = std::env::args().skip(1);
    let command = match args.next()?.as_str() {
        "predict" => Command::Predict(args.next()),
        "features" => Command::Features(args.next()?),
        "probe" => Command::Probe,
        _ => return None,
    };
    Some(command)
}

fn main() -> ExitCode {
    // Logs on stderr; stdout carries responses
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("oracle_router=info,oracle=info")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(command) = parse_args() else {
        eprintln!("usage: oracle <predict [JSON] | features JSON | probe>");
        return ExitCode::from(EXIT_INVALID_INPUT);
    };

    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let input_error = e
                .downcast_ref::<RouterError>()
                .is_some_and(RouterError::is_input_error)
                || e.downcast_ref::<oracle_core::OracleError>()
                    .is_some_and(oracle_core::OracleError::is_input_error);
            if input_error {
                ExitCode::from(EXIT_INVALID_INPUT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    tracing::debug!(
        weights = %config.weights.path.display(),
        mode = ?config.router.mode,
        vm_program = %config.vm.program,
        "Configuration loaded"
    );

    match command {
        Command::Features(request) => {
            let features = normalize(&parse_request(&request)?);
            let rounded: Vec<f64> = features.values().iter().map(|v| round_display(*v)).collect();
            println!("{}", json!({ "features": rounded }));
            Ok(())
        }
        Command::Probe => {
            let rt = Runtime::new()?;
            let _guard = rt.enter();
            let vm = VmStrategy::new(&config.vm)?;
            let available = rt.block_on(vm.probe());
            println!(
                "{}",
                json!({ "onchain_available": available, "program": config.vm.program })
            );
            Ok(())
        }
        Command::Predict(request) => {
            // Weights are loaded once and shared by every request
            let store = WeightStore::load(&config.weights.path)?;
            let bundle = store.bundle()?;
            tracing::info!(
                path = %config.weights.path.display(),
                hidden_width = bundle.hidden_width(),
                version = bundle.metadata().version.as_deref().unwrap_or("unversioned"),
                "Weights loaded"
            );

            let rt = Runtime::new()?;
            let _guard = rt.enter();
            let vm = VmStrategy::new(&config.vm)?;
            let router = InvocationRouter::from_store(&store, Some(vm), config.router.mode)?;

            match request {
                Some(text) => predict_one(&rt, &router, &text),
                None => predict_stream(&rt, &router),
            }
        }
    }
}

fn predict_one(
    rt: &Runtime,
    router: &InvocationRouter<VmStrategy>,
    text: &str,
) -> anyhow::Result<()> {
    let prices = parse_request(text)?;
    let record = rt.block_on(router.predict_prices(prices.values()))?;
    println!("{}", to_display_json(&record));
    Ok(())
}

/// Answer one request per stdin line; bad requests get an error line
fn predict_stream(rt: &Runtime, router: &InvocationRouter<VmStrategy>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "Error reading stdin");
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(prices) => match rt.block_on(router.predict_prices(prices.values())) {
                Ok(record) => to_display_json(&record),
                Err(e) if e.is_configuration_error() => return Err(e.into()),
                Err(e) => json!({ "error": e.to_string() }),
            },
            Err(e) => json!({ "error": e.to_string() }),
        };

        writeln!(stdout, "{}", response)?;
        stdout.flush()?;
    }

    Ok(())
}
