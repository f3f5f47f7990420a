//! Entry point: parse arguments, load configuration, stand up logging,
//! then hand off to the daemon.

mod config;
mod daemon;
mod driver;
mod signals;
mod worker;

use clap::Parser;
use config::{Cli, Config};
use flexi_logger::{opt_format, Duplicate, FileSpec, Logger};

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dbproxyd: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("dbproxyd: failed to initialize logging: {e}");
        std::process::exit(1);
    }

    log::info!("dbproxyd starting as {}", config.server_name);

    let daemon = match daemon::Daemon::new(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            log::error!("failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    match daemon.run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("fatal error: {e}");
            std::process::exit(1);
        }
    }
}

/// `--nolog` always wins and logs to the console only. Otherwise a
/// `--logfile` override, or the configured `log_config` path, sends
/// output to a file; with neither, logging stays on the console. `--debug`
/// raises the level regardless of which destination was chosen.
fn init_logging(config: &Config) -> Result<(), flexi_logger::FlexiLoggerError> {
    let level = if config.debug { "debug" } else { "info" };
    let mut logger = Logger::try_with_str(level)?.format(opt_format);

    if config.nolog {
        return logger.start().map(drop);
    }

    if let Some(logfile) = &config.logfile {
        let spec = FileSpec::try_from(logfile.clone())?;
        logger = logger.log_to_file(spec).duplicate_to_stderr(Duplicate::Warn);
    } else if let Some(log_config) = &config.log_config {
        let spec = FileSpec::try_from(log_config.clone())?;
        logger = logger.log_to_file(spec).duplicate_to_stderr(Duplicate::Warn);
    }

    logger.start().map(drop)
}
