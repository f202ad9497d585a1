#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use divergent::cli::{self, Mode};
use divergent::config::EngineConfiguration;
use divergent::dispatch::{Dispatcher, HttpEndpointClient};
use divergent::logging::{init_logging, level_for};
use divergent::output;
use divergent::output::progress::{ConsoleProgress, ProgressReporter};
use divergent::scan::{self, RequestTemplate};

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether every unit compared equal
fn run() -> Result<bool> {
    let cli = cli::parse_args()?;
    init_logging(level_for(cli.quiet_mode, cli.verbose))?;

    let mut config = EngineConfiguration::load(cli.config_path.as_deref())
        .context("Failed to load configuration")?;
    config.apply_overrides(&cli.overrides)?;

    // Set up interrupt handling
    let interrupted = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&interrupted));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let progress = if cli.quiet_mode {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new(ConsoleProgress::new(false).into_callback())
    };
    let service = config.build_service()?;

    let report = match cli.mode {
        Mode::Files { dir_a, dir_b } => {
            let discovery = scan::discover_file_pairs(&dir_a, &dir_b, &cli.include, &interrupted)?;
            debug!(
                "Discovered {} pairs and {} unmatched files",
                discovery.pairs.len(),
                discovery.orphans.len()
            );
            runtime.block_on(service.run_file_batch(discovery, Arc::clone(&interrupted), &progress))
        }
        Mode::Requests {
            dir,
            endpoint_a,
            endpoint_b,
            headers_a,
            headers_b,
            content_type,
        } => {
            let endpoint_a = endpoint_a
                .or_else(|| config.dispatch.endpoint_a.clone())
                .ok_or_else(|| anyhow!("No endpoint A: pass --endpoint-a or set dispatch.endpoint_a"))?;
            let endpoint_b = endpoint_b
                .or_else(|| config.dispatch.endpoint_b.clone())
                .ok_or_else(|| anyhow!("No endpoint B: pass --endpoint-b or set dispatch.endpoint_b"))?;

            let template = RequestTemplate {
                content_type: content_type.unwrap_or_else(|| config.dispatch.content_type.clone()),
                headers_a,
                headers_b,
            };
            let units = scan::discover_requests(&dir, &cli.include, &template, &interrupted)?;
            debug!("Discovered {} requests", units.len());

            let client = HttpEndpointClient::new(endpoint_a, endpoint_b, config.request_timeout())?
                .with_body_limits(config.dispatch.max_response_bytes, config.dispatch.max_raw_body_bytes);
            let dispatcher = Dispatcher::new(client, config.dispatch.max_in_flight);
            runtime.block_on(service.run_request_batch(
                units,
                &dispatcher,
                Arc::clone(&interrupted),
                &progress,
            ))
        }
    };

    output::write_report(&report, cli.json_output, cli.output.as_deref())?;
    debug!("Cache stats: {}", serde_json::to_string(&service.stats())?);

    Ok(report.is_clean())
}
