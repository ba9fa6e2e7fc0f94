use crate::debias::Engine;
use crate::error::Error;

const WORD_SPACE: u64 = 1 << 32;

/// How a validated `[lower, upper]` request maps onto 32-bit draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// `lower == upper`: no entropy needed.
    Single,
    /// The whole `i32` range: every draw is usable.
    Full,
    /// Draws at or above `limit` are rejected; the rest are reduced mod `span`.
    Bounded { span: u64, limit: u64 },
}

impl Span {
    /// Validates the bounds before anything touches the device.
    pub fn new(lower: i32, upper: i32) -> Result<Self, Error> {
        if lower > upper {
            return Err(Error::InvalidRange { lower, upper });
        }
        let span = (i64::from(upper) - i64::from(lower) + 1) as u64;
        Ok(match span {
            1 => Span::Single,
            WORD_SPACE => Span::Full,
            _ => Span::Bounded {
                span,
                limit: WORD_SPACE - WORD_SPACE % span,
            },
        })
    }
}

/// Draws an integer uniformly from the inclusive range `[lower, upper]`.
///
/// Every rejected draw is added to the range share of the correction counter.
pub fn sample_range(engine: &mut Engine, lower: i32, upper: i32) -> Result<i32, Error> {
    let offset = match Span::new(lower, upper)? {
        Span::Single => return Ok(lower),
        Span::Full => u64::from(engine.next_u32()?),
        Span::Bounded { span, limit } => loop {
            let value = u64::from(engine.next_u32()?);
            if value < limit {
                break value % span;
            }
            engine.corrections().add_range(1);
            log::trace!("rejected {} for span {}", value, span);
        },
    };
    Ok((i64::from(lower) + offset as i64) as i32)
}
