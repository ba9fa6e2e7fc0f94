use std::io::Write;
use std::time::{Duration, Instant};

use truerng::error::Error;
use truerng::stats::{self, FIPS_SAMPLE_BYTES};

use crate::cli::CheckArgs;
use crate::shutdown;

/// Range draws per iteration for the uniformity test.
const RANGE_DRAWS: usize = 256;

#[derive(Default)]
struct CheckStats {
    samples: u64,
    bytes: u64,
    sample_time: Duration,
    fips_monobit_pass: u64,
    fips_poker_pass: u64,
    fips_runs_pass: u64,
    fips_long_runs_pass: u64,
    fips_all_pass: u64,
    shannon_sum: f64,
    min_entropy_sum: f64,
    chi_square_sum: f64,
    serial_corr_sum: f64,
    bucket_counts: Vec<u64>,
    errors: u64,
}

impl CheckStats {
    fn new(buckets: u32) -> Self {
        Self {
            bucket_counts: vec![0; buckets as usize],
            ..Self::default()
        }
    }

    fn pct(&self, pass_count: u64) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        100.0 * pass_count as f64 / self.samples as f64
    }

    fn avg(&self, sum: f64) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        sum / self.samples as f64
    }

    fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.sample_time.as_secs_f64();
        if secs < f64::EPSILON {
            return 0.0;
        }
        self.bytes as f64 / secs
    }

    fn range_draws(&self) -> u64 {
        self.bucket_counts.iter().sum()
    }

    fn record_fips(&mut self, data: &[u8; FIPS_SAMPLE_BYTES]) {
        let fips = stats::fips_suite(data);
        self.fips_monobit_pass += fips.monobit.passed as u64;
        self.fips_poker_pass += fips.poker.passed as u64;
        self.fips_runs_pass += fips.runs.passed as u64;
        self.fips_long_runs_pass += fips.long_runs.passed as u64;
        self.fips_all_pass += fips.all_passed() as u64;
        if !fips.all_passed() {
            for t in fips.tests().iter().filter(|t| !t.passed) {
                log::debug!("fips {} failed: {}", t.name, t.detail);
            }
        }
    }

    fn record_estimates(&mut self, data: &[u8]) {
        let est = stats::entropy_estimates(data);
        self.shannon_sum += est.shannon;
        self.min_entropy_sum += est.min_entropy;
        self.chi_square_sum += est.chi_square;
        self.serial_corr_sum += est.serial_correlation;
    }
}

/// Parses `30s`, `5m`, `1h`, `2d`; a bare number is seconds.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgs("empty duration".into()));
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400)
    } else {
        (s, 1)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("invalid duration: {}", s)))?;

    if num == 0 {
        return Err(Error::InvalidArgs("duration must be > 0".into()));
    }

    num.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidArgs(format!("duration too large: {}", s)))
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let (m, s) = (secs / 60, secs % 60);
        if s == 0 {
            format!("{}m", m)
        } else {
            format!("{}m {}s", m, s)
        }
    } else {
        let (h, m) = (secs / 3600, (secs % 3600) / 60);
        if m == 0 {
            format!("{}h", h)
        } else {
            format!("{}h {}m", h, m)
        }
    }
}

fn format_throughput(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= 1_000_000.0 {
        format!("{:.2} MB/s", bytes_per_sec / 1_000_000.0)
    } else if bytes_per_sec >= 1_000.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1_000.0)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.2} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}

fn print_progress(stat: &CheckStats, elapsed: Duration, total: Duration, corrections: u64) {
    let pct = 100.0 * elapsed.as_secs_f64() / total.as_secs_f64();
    let mut stderr = std::io::stderr().lock();

    writeln!(
        stderr,
        "--- Progress ({} / {}, {:.1}%) ---",
        format_duration(elapsed),
        format_duration(total),
        pct.min(100.0)
    )
    .ok();
    writeln!(
        stderr,
        "  samples {}  fips pass {:.1}%  shannon {:.3}  {}  corrections {}  errors {}",
        stat.samples,
        stat.pct(stat.fips_all_pass),
        stat.avg(stat.shannon_sum),
        format_throughput(stat.throughput_bytes_per_sec()),
        corrections,
        stat.errors
    )
    .ok();
    writeln!(stderr).ok();
}

fn print_final_report(stat: &CheckStats, do_fips: bool, lower: i32, upper: i32) {
    let diag = truerng::global().diagnostics();
    println!("--- {} ({}) ---", diag.source, diag.debias.label());
    println!(
        "  Samples: {} | Bytes: {} | Throughput: {} | Errors: {}",
        stat.samples,
        format_bytes(stat.bytes),
        format_throughput(stat.throughput_bytes_per_sec()),
        stat.errors
    );

    if do_fips && stat.samples > 0 {
        println!(
            "  FIPS 140-2:  Monobit {:.1}%  Poker {:.1}%  Runs {:.1}%  Long Runs {:.1}%",
            stat.pct(stat.fips_monobit_pass),
            stat.pct(stat.fips_poker_pass),
            stat.pct(stat.fips_runs_pass),
            stat.pct(stat.fips_long_runs_pass)
        );
    }

    if stat.samples > 0 {
        let chi = stat.avg(stat.chi_square_sum);
        println!(
            "  Entropy:     Shannon {:.3}   Min-ent {:.3}  Chi-sq {:.1} (p={:.2})",
            stat.avg(stat.shannon_sum),
            stat.avg(stat.min_entropy_sum),
            chi,
            stats::chi_square_p_value(chi, 255.0)
        );
        println!("               SerCorr {:.3}", stat.avg(stat.serial_corr_sum));
    }

    let draws = stat.range_draws();
    if draws > 0 {
        let chi = stats::chi_square_counts(&stat.bucket_counts);
        let df = (stat.bucket_counts.len() - 1) as f64;
        println!(
            "  Range [{}, {}]: {} draws  Chi-sq {:.1} (df={}, p={:.2})",
            lower,
            upper,
            draws,
            chi,
            df,
            stats::chi_square_p_value(chi, df)
        );
    }

    println!(
        "  Corrections: {} (debias {}, range {})",
        diag.corrections, diag.debias_corrections, diag.range_corrections
    );
}

pub fn run(args: &CheckArgs) -> Result<(), Error> {
    let duration = parse_duration(&args.duration)?;
    let do_fips = args.sample_size >= FIPS_SAMPLE_BYTES;
    if args.sample_size == 0 {
        return Err(Error::InvalidArgs("sample size must be greater than 0".into()));
    }

    if !do_fips {
        log::warn!(
            "sample_size {} < {} bytes, FIPS 140-2 tests will be skipped",
            args.sample_size,
            FIPS_SAMPLE_BYTES
        );
    }

    let generator = truerng::global();
    if !generator.is_available() {
        return Err(Error::DeviceUnavailable(format!(
            "{} is not available",
            generator.diagnostics().source
        )));
    }

    shutdown::install_signal_handlers();

    let lower = 0i32;
    let upper = (args.buckets - 1) as i32;

    eprintln!(
        "Statistical check: source={}, duration={}, sample_size={} bytes, buckets={}",
        generator.diagnostics().source,
        format_duration(duration),
        args.sample_size,
        args.buckets
    );
    eprintln!();

    let mut stat = CheckStats::new(args.buckets);
    let mut data = vec![0u8; args.sample_size];
    let corrections_at_start = generator.corrections();

    let start = Instant::now();
    let deadline = start + duration;
    let mut last_report = start;

    while !shutdown::requested() && Instant::now() < deadline {
        let sample_start = Instant::now();
        match generator.fill_bytes(&mut data) {
            Ok(()) => {
                stat.sample_time += sample_start.elapsed();
                stat.samples += 1;
                stat.bytes += data.len() as u64;
                if let Some(fips_data) = data.first_chunk::<FIPS_SAMPLE_BYTES>() {
                    stat.record_fips(fips_data);
                }
                stat.record_estimates(&data);
            }
            Err(e) => {
                log::warn!("sample failed: {}", e);
                stat.errors += 1;
            }
        }

        for _ in 0..RANGE_DRAWS {
            match generator.random_range(lower, upper) {
                Ok(v) => stat.bucket_counts[v as usize] += 1,
                Err(e) => {
                    log::warn!("range draw failed: {}", e);
                    stat.errors += 1;
                    break;
                }
            }
        }

        if last_report.elapsed().as_secs() >= args.report_interval {
            print_progress(
                &stat,
                start.elapsed(),
                duration,
                generator.corrections() - corrections_at_start,
            );
            last_report = Instant::now();
        }
    }

    let total_elapsed = start.elapsed();
    if shutdown::requested() {
        eprintln!(
            "\nInterrupted after {}, printing partial results\n",
            format_duration(total_elapsed)
        );
    } else {
        eprintln!("\nCompleted {} check\n", format_duration(total_elapsed));
    }

    print_final_report(&stat, do_fips, lower, upper);
    log::info!(
        "check spent {} corrections",
        generator.corrections() - corrections_at_start
    );

    Ok(())
}
