mod check;
mod cli;
mod logging;
mod output;
mod shutdown;

use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::mpsc;

use clap::Parser;

use truerng::config::{self, Config};
use truerng::Error;

use cli::{Cli, Command, SourceArgs, StreamArgs};
use logging::LogLevel;
use output::Values;

/// Build a Config by layering: defaults → TOML file → CLI overrides.
fn build_config(config_file: Option<&Path>, source_args: &SourceArgs) -> Config {
    let mut cfg = match config::load_config(config_file) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("{}", e);
            Config::default()
        }
    };

    if let Some(v) = source_args.source {
        cfg.source.kind = v;
    }
    if let Some(ref v) = source_args.device {
        cfg.source.device = v.clone();
    }
    if let Some(v) = source_args.read_timeout_ms {
        cfg.source.read_timeout_ms = v;
    }
    if let Some(v) = source_args.debias {
        cfg.debias.method = v;
    }
    if let Some(v) = source_args.max_consecutive_discards {
        cfg.debias.max_consecutive_discards = v;
    }
    if let Some(v) = source_args.workers {
        cfg.dispatch.workers = v;
    }

    cfg.validate();
    cfg
}

fn setup(config_file: Option<&Path>, source_args: &SourceArgs) {
    let cfg = build_config(config_file, source_args);
    if !truerng::init(&cfg) {
        log::debug!("generator already initialised");
    }
}

/// Issues `count` requests through the worker pool and collects the results
/// in submission order.
fn generate_async<T, F>(count: usize, submit: F) -> Result<Vec<T>, Error>
where
    T: Send + 'static,
    F: Fn(Box<dyn FnOnce(Result<T, Error>) + Send>),
{
    let (tx, rx) = mpsc::channel();
    for i in 0..count {
        let tx = tx.clone();
        submit(Box::new(move |result| {
            let _ = tx.send((i, result));
        }));
    }
    drop(tx);

    let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
    for (i, result) in rx {
        slots[i] = Some(result?);
    }
    slots
        .into_iter()
        .map(|v| v.ok_or(Error::Abandoned))
        .collect()
}

fn generate(cli: &Cli) -> Result<Values, Error> {
    let n = cli.count;
    let values = match (cli.lower, cli.upper) {
        (Some(lower), Some(upper)) if cli.use_async => Values::Signed(generate_async(n, |cb| {
            truerng::get_random_range_async(lower, upper, cb)
        })?),
        (Some(lower), Some(upper)) => Values::Signed(
            (0..n)
                .map(|_| truerng::get_random_range(lower, upper))
                .collect::<Result<_, _>>()?,
        ),
        _ if cli.use_async => {
            Values::Unsigned(generate_async(n, |cb| truerng::get_random_async(cb))?)
        }
        _ => Values::Unsigned(
            (0..n)
                .map(|_| truerng::get_random())
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(values)
}

fn run_generate(cli: &Cli) {
    if cli.count == 0 {
        log::error!("{}", Error::InvalidArgs("count must be greater than 0".into()));
        process::exit(1);
    }

    match generate(cli) {
        Ok(values) => {
            log::info!(
                "source: {}, corrections: {}",
                truerng::global().diagnostics().source,
                truerng::get_corrections()
            );
            if let Err(e) = output::write_values(&values, cli.format, cli.output_file.as_deref()) {
                log::error!("error writing output: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    }
}

fn run_stream(args: &StreamArgs) -> Result<(), Error> {
    if !truerng::is_available() {
        return Err(Error::DeviceUnavailable(format!(
            "{} is not available",
            truerng::global().diagnostics().source
        )));
    }

    shutdown::install_signal_handlers();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut written = 0u64;

    while !shutdown::requested() && args.limit.map_or(true, |limit| written < limit) {
        let value = truerng::get_random()?;
        match out.write_all(&value.to_le_bytes()) {
            Ok(()) => written += 1,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e.into()),
        }
    }

    match out.flush() {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
        _ => {}
    }

    log::info!(
        "streamed {} values, corrections: {}",
        written,
        truerng::get_corrections()
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Stream(args)) => {
            logging::init(&args.log, LogLevel::Warn);
            setup(args.config_file.as_deref(), &args.source);
            if let Err(e) = run_stream(args) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
        Some(Command::Info(args)) => {
            logging::init(&args.log, LogLevel::Warn);
            setup(args.config_file.as_deref(), &args.source);
            println!("{}", truerng::global().diagnostics());
        }
        Some(Command::Check(args)) => {
            logging::init(&args.log, LogLevel::Info);
            setup(args.config_file.as_deref(), &args.source);
            if let Err(e) = check::run(args) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
        None => {
            logging::init(&cli.log, LogLevel::Warn);
            setup(cli.config_file.as_deref(), &cli.source);
            run_generate(&cli);
        }
    }
}
