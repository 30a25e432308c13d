use std::fmt;

/// Formats an error on a single line, dropping the `Debug`-style source
/// chain most `std::error::Error` impls pull in, so it can sit inline in a
/// `tracing` field without breaking the log line into a paragraph.
pub trait FmtCompact {
    fn fmt_compact(&self) -> CompactErrorDisplay<'_>;
}

impl<E> FmtCompact for E
where
    E: std::error::Error,
{
    fn fmt_compact(&self) -> CompactErrorDisplay<'_> {
        CompactErrorDisplay(self)
    }
}

pub struct CompactErrorDisplay<'a>(&'a dyn std::error::Error);

impl fmt::Display for CompactErrorDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

pub type WhateverResult<T> = std::result::Result<T, snafu::Whatever>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, snafu::Snafu)]
    #[snafu(display("outer"))]
    struct Outer {
        source: Inner,
    }

    #[derive(Debug, snafu::Snafu)]
    #[snafu(display("inner"))]
    struct Inner;

    #[test]
    fn chains_sources_on_one_line() {
        let err = Outer { source: Inner };
        assert_eq!(err.fmt_compact().to_string(), "outer: inner");
    }
}
