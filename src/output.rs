use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::cli::OutputFormat;

/// Generated values, kept signed when they came from a range request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Values {
    Unsigned(Vec<u32>),
    Signed(Vec<i32>),
}

impl Values {
    /// Bit patterns of the values, for the binary-oriented formats.
    fn words(&self) -> Vec<u32> {
        match self {
            Values::Unsigned(v) => v.clone(),
            Values::Signed(v) => v.iter().map(|&x| x as u32).collect(),
        }
    }

    fn le_bytes(&self) -> Vec<u8> {
        self.words().iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Writes the values to stdout or a file in the specified format.
pub fn write_values(
    values: &Values,
    format: OutputFormat,
    output_file: Option<&Path>,
) -> io::Result<()> {
    match output_file {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            format_values(values, format, &mut out)?;
            out.flush()
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            format_values(values, format, &mut out)?;
            out.flush()
        }
    }
}

fn format_values(values: &Values, format: OutputFormat, out: &mut dyn Write) -> io::Result<()> {
    match format {
        OutputFormat::Decimal => match values {
            Values::Unsigned(v) => v.iter().try_for_each(|x| writeln!(out, "{}", x))?,
            Values::Signed(v) => v.iter().try_for_each(|x| writeln!(out, "{}", x))?,
        },
        OutputFormat::Hex => {
            for w in values.words() {
                writeln!(out, "{:08x}", w)?;
            }
        }
        OutputFormat::Binary => {
            for w in values.words() {
                writeln!(out, "{:032b}", w)?;
            }
        }
        OutputFormat::Raw => out.write_all(&values.le_bytes())?,
        OutputFormat::Base64 => writeln!(out, "{}", STANDARD.encode(values.le_bytes()))?,
    }
    Ok(())
}
