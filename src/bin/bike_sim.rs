use bike_sim::simulation::config::{resolve_path, write_config, CommandLineArgs, Config};
use bike_sim::simulation::controller::{write_summary, ControllerBuilder};
use bike_sim::simulation::logging::{init_logging, init_std_out_logging_thread_local};
use bike_sim::simulation::observer::{CountingObserver, ObserverSet, TracingObserver};
use clap::Parser;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    let startup_guard = init_std_out_logging_thread_local();

    let args = CommandLineArgs::parse();
    info!("Started with args: {:?}", args);

    let config = Config::from_args(&args).unwrap_or_else(|e| {
        error!("{e}");
        exit(1);
    });

    // replace the startup logger by the configured one
    drop(startup_guard);
    let _guards = init_logging(&config).unwrap_or_else(|e| {
        eprintln!("Failed to initialize logging: {e}");
        exit(1);
    });

    let output_path = resolve_path(config.context(), &config.output.output_dir);
    if let Err(e) = write_config(&config, &output_path) {
        error!("{e}");
        exit(1);
    }

    let counter = Arc::new(CountingObserver::new());
    let observers = ObserverSet::new()
        .with(Arc::new(TracingObserver))
        .with(counter.clone());

    let controller = ControllerBuilder::default()
        .config(Arc::new(config))
        .observers(observers)
        .build()
        .unwrap_or_else(|e| {
            error!("{e}");
            exit(1);
        });

    let summary = controller.run().unwrap_or_else(|e| {
        error!("{e}");
        exit(1);
    });
    info!(
        "{} rides, {} van trips.",
        summary.rides,
        counter.travel_count()
    );

    match write_summary(&summary, &output_path) {
        Ok(path) => info!("Wrote summary to {path:?}"),
        Err(e) => error!("{e}"),
    }

    if !summary.is_conserved() {
        exit(2);
    }
}
