use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::{CountSink, Source, forward};

// integers may be written in scientific notation, so "1e3" is accepted
// wherever "1000" is
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d+(?:\.\d+)?(?:[eE]\+?\d+)?)(?:-(-?\d+(?:\.\d+)?(?:[eE]\+?\d+)?))?$")
        .unwrap()
});

fn parse_int(s: &str) -> Result<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }

    let f: f64 = s
        .parse()
        .with_context(|| format!("invalid number {:?}", s))?;

    if f.fract() != 0.0 || f < i64::MIN as f64 || f > i64::MAX as f64 {
        bail!("number {:?} is not an integer", s);
    }

    Ok(f as i64)
}

// one inclusive integer range, descending when first > last
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Range {
    pub first: i64,
    pub last: i64,
}

impl Range {
    pub fn count(&self) -> u64 {
        self.first.abs_diff(self.last) + 1
    }

    fn parse(s: &str) -> Result<Self> {
        let caps = RANGE_RE
            .captures(s)
            .ok_or_else(|| anyhow::Error::msg(format!("invalid range {:?}", s)))?;

        let first = parse_int(&caps[1])?;
        let last = match caps.get(2) {
            Some(m) => parse_int(m.as_str())?,
            None => first,
        };

        Ok(Range { first, last })
    }
}

// emit the integers of one or more ranges through a printf-style format
#[derive(Clone, Debug)]
pub struct RangeSource {
    ranges: Vec<Range>,
    format: String,
}

impl RangeSource {
    pub fn new(ranges: Vec<Range>, format: &str) -> Result<Self> {
        if ranges.is_empty() {
            bail!("range source has no ranges");
        }

        // surface bad formats before the run starts
        format_int(format, 0)?;

        Ok(RangeSource {
            ranges,
            format: format.to_string(),
        })
    }

    // spec syntax: A-B[,C-D]*[:format], single integers meaning N-N
    pub fn parse(spec: &str) -> Result<Self> {
        let (ranges, format) = match spec.split_once(':') {
            Some((r, f)) => (r, f),
            None => (spec, "%d"),
        };

        let ranges = ranges
            .split(',')
            .map(Range::parse)
            .collect::<Result<Vec<_>>>()?;

        RangeSource::new(ranges, format)
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn format(&self) -> &str {
        &self.format
    }
}

#[async_trait]
impl Source for RangeSource {
    async fn produce(
        &self,
        cancel: &CancellationToken,
        values: mpsc::Sender<String>,
        count: CountSink,
    ) -> Result<()> {
        count.send(self.ranges.iter().map(Range::count).sum());

        for range in &self.ranges {
            if range.first <= range.last {
                for v in range.first..=range.last {
                    if !forward(cancel, &values, format_int(&self.format, v)?).await {
                        return Ok(());
                    }
                }
            } else {
                for v in (range.last..=range.first).rev() {
                    if !forward(cancel, &values, format_int(&self.format, v)?).await {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

// minimal printf for integer values: literal text, %%, and %[0][-][width]
// with the d/x/X/o/b verbs
fn format_int(format: &str, value: i64) -> Result<String> {
    let mut out = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut zero = false;
        let mut left = false;

        while let Some(&f) = chars.peek() {
            match f {
                '0' => zero = true,
                '-' => left = true,
                _ => break,
            }
            chars.next();
        }

        let mut width = 0usize;
        while let Some(&d) = chars.peek() {
            match d.to_digit(10) {
                Some(d) => {
                    width = width * 10 + d as usize;
                    chars.next();
                }
                None => break,
            }
        }

        let pad = if zero { width } else { 0 };

        let repr = match chars.next() {
            Some('d') => format!("{:01$}", value, pad),
            Some('x') => format!("{:01$x}", value, pad),
            Some('X') => format!("{:01$X}", value, pad),
            Some('o') => format!("{:01$o}", value, pad),
            Some('b') => format!("{:01$b}", value, pad),
            Some(v) => bail!("unsupported format verb %{}", v),
            None => bail!("format string ends inside a verb"),
        };

        if repr.len() < width {
            if left {
                out.push_str(&repr);
                out.extend(std::iter::repeat_n(' ', width - repr.len()));
            } else {
                out.extend(std::iter::repeat_n(' ', width - repr.len()));
                out.push_str(&repr);
            }
        } else {
            out.push_str(&repr);
        }
    }

    Ok(out)
}
