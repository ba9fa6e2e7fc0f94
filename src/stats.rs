//! Statistical checks used by the `check` command and by the test suite.

/// Number of bytes in a FIPS 140-2 sample (20,000 bits).
pub const FIPS_SAMPLE_BYTES: usize = 2500;

/// Result of a single statistical test.
pub struct TestResult {
    pub name: &'static str,
    pub passed: bool,
    pub value: f64,
    pub detail: String,
}

/// Result of the FIPS 140-2 power-up test suite.
pub struct FipsResult {
    pub monobit: TestResult,
    pub poker: TestResult,
    pub runs: TestResult,
    pub long_runs: TestResult,
}

impl FipsResult {
    pub fn all_passed(&self) -> bool {
        self.tests().iter().all(|t| t.passed)
    }

    pub fn tests(&self) -> [&TestResult; 4] {
        [&self.monobit, &self.poker, &self.runs, &self.long_runs]
    }
}

/// Byte-level entropy estimates.
pub struct EntropyEstimates {
    pub shannon: f64,
    pub min_entropy: f64,
    pub chi_square: f64,
    pub serial_correlation: f64,
}

/// Lengths of maximal runs of equal bits, MSB first, as (bit, length).
fn bit_runs(data: &[u8]) -> Vec<(u8, u32)> {
    let mut runs = Vec::new();
    let mut current: Option<(u8, u32)> = None;
    for &byte in data {
        for pos in (0..8).rev() {
            let bit = (byte >> pos) & 1;
            current = match current {
                Some((b, len)) if b == bit => Some((b, len + 1)),
                Some(run) => {
                    runs.push(run);
                    Some((bit, 1))
                }
                None => Some((bit, 1)),
            };
        }
    }
    runs.extend(current);
    runs
}

/// Monobit: the number of ones must lie in (9725, 10275).
pub fn fips_monobit(data: &[u8; FIPS_SAMPLE_BYTES]) -> TestResult {
    let ones: u32 = data.iter().map(|b| b.count_ones()).sum();
    TestResult {
        name: "Monobit",
        passed: ones > 9725 && ones < 10275,
        value: f64::from(ones),
        detail: format!("{} ones", ones),
    }
}

/// Poker: chi-square over the 5000 nibbles must lie in (2.16, 46.17).
pub fn fips_poker(data: &[u8; FIPS_SAMPLE_BYTES]) -> TestResult {
    let mut counts = [0u64; 16];
    for &byte in data.iter() {
        counts[usize::from(byte >> 4)] += 1;
        counts[usize::from(byte & 0x0F)] += 1;
    }
    let sum_sq: u64 = counts.iter().map(|&c| c * c).sum();
    let x = (16.0 / 5000.0) * sum_sq as f64 - 5000.0;
    TestResult {
        name: "Poker",
        passed: x > 2.16 && x < 46.17,
        value: x,
        detail: format!("X = {:.2}", x),
    }
}

/// Runs: counts of runs of length 1..5 and 6+ for each bit value must fall
/// inside the FIPS intervals.
pub fn fips_runs(data: &[u8; FIPS_SAMPLE_BYTES]) -> TestResult {
    const BOUNDS: [(u32, u32); 6] = [
        (2315, 2685),
        (1114, 1386),
        (527, 723),
        (240, 384),
        (103, 209),
        (103, 209),
    ];

    let mut counts = [[0u32; 6]; 2];
    for (bit, len) in bit_runs(data) {
        let bucket = (len as usize).clamp(1, 6) - 1;
        counts[usize::from(bit)][bucket] += 1;
    }

    let mut failures = Vec::new();
    for (bit, per_len) in counts.iter().enumerate() {
        for (i, (&count, &(lo, hi))) in per_len.iter().zip(BOUNDS.iter()).enumerate() {
            if count < lo || count > hi {
                let len = if i < 5 { (i + 1).to_string() } else { "6+".into() };
                failures.push(format!("{}-runs len {}: {}", bit, len, count));
            }
        }
    }

    TestResult {
        name: "Runs",
        passed: failures.is_empty(),
        value: (12 - failures.len()) as f64,
        detail: if failures.is_empty() {
            "all run lengths within bounds".into()
        } else {
            failures.join("; ")
        },
    }
}

/// Long runs: no run of 26 or more equal bits.
pub fn fips_long_runs(data: &[u8; FIPS_SAMPLE_BYTES]) -> TestResult {
    let longest = bit_runs(data).iter().map(|&(_, len)| len).max().unwrap_or(0);
    TestResult {
        name: "Long Runs",
        passed: longest <= 25,
        value: f64::from(longest),
        detail: format!("longest run {} bits", longest),
    }
}

pub fn fips_suite(data: &[u8; FIPS_SAMPLE_BYTES]) -> FipsResult {
    FipsResult {
        monobit: fips_monobit(data),
        poker: fips_poker(data),
        runs: fips_runs(data),
        long_runs: fips_long_runs(data),
    }
}

fn byte_frequencies(data: &[u8]) -> [u64; 256] {
    let mut freq = [0u64; 256];
    for &b in data {
        freq[usize::from(b)] += 1;
    }
    freq
}

/// Pearson chi-square statistic of observed counts against a uniform
/// expectation over the same number of buckets.
pub fn chi_square_counts(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if counts.is_empty() || total == 0 {
        return 0.0;
    }
    let expected = total as f64 / counts.len() as f64;
    counts
        .iter()
        .map(|&obs| {
            let diff = obs as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

/// Shannon entropy in bits per byte (max 8.0).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    byte_frequencies(data)
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Min-entropy in bits per byte: -log2(max p(x)).
pub fn min_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let max_count = byte_frequencies(data).into_iter().max().unwrap_or(0);
    -(max_count as f64 / data.len() as f64).log2()
}

/// Lag-1 autocorrelation of byte values (expected ~0.0).
pub fn serial_correlation(data: &[u8]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mean = data.iter().map(|&b| f64::from(b)).sum::<f64>() / data.len() as f64;
    let numerator: f64 = data
        .windows(2)
        .map(|w| (f64::from(w[0]) - mean) * (f64::from(w[1]) - mean))
        .sum();
    let denominator: f64 = data
        .iter()
        .map(|&b| (f64::from(b) - mean).powi(2))
        .sum();
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    numerator / denominator
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17).
pub fn normal_cdf(x: f64) -> f64 {
    if x < 0.0 {
        return 1.0 - normal_cdf(-x);
    }
    const B: [f64; 5] = [0.319381530, -0.356563782, 1.781477937, -1.821255978, 1.330274429];
    let t = 1.0 / (1.0 + 0.2316419 * x);
    let phi = (-x * x / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt();
    let poly = B.iter().rev().fold(0.0, |acc, &b| (acc + b) * t);
    1.0 - phi * poly
}

/// Upper-tail p-value of a chi-square statistic (Wilson-Hilferty).
pub fn chi_square_p_value(chi_sq: f64, df: f64) -> f64 {
    if df <= 0.0 || chi_sq < 0.0 {
        return 0.0;
    }
    let k = 2.0 / (9.0 * df);
    let z = ((chi_sq / df).cbrt() - (1.0 - k)) / k.sqrt();
    1.0 - normal_cdf(z)
}

pub fn entropy_estimates(data: &[u8]) -> EntropyEstimates {
    EntropyEstimates {
        shannon: shannon_entropy(data),
        min_entropy: min_entropy(data),
        chi_square: chi_square_counts(&byte_frequencies(data)),
        serial_correlation: serial_correlation(data),
    }
}
