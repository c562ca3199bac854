use anyhow::{Context, Result, bail};
use regex::bytes::Regex;

use crate::response::Response;

// one element of a filter specification: N, N-M, -M, or N-
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FilterRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl FilterRange {
    pub fn parse(spec: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<i64> {
            s.parse::<i64>()
                .with_context(|| format!("invalid number {:?} in filter range", s))
        };

        let range = if let Some(to) = spec.strip_prefix('-') {
            FilterRange {
                from: None,
                to: Some(parse(to)?),
            }
        } else if let Some(from) = spec.strip_suffix('-') {
            FilterRange {
                from: Some(parse(from)?),
                to: None,
            }
        } else if let Some((from, to)) = spec.split_once('-') {
            FilterRange {
                from: Some(parse(from)?),
                to: Some(parse(to)?),
            }
        } else {
            let n = parse(spec)?;
            FilterRange {
                from: Some(n),
                to: Some(n),
            }
        };

        if let (Some(from), Some(to)) = (range.from, range.to) {
            if from > to {
                bail!("filter range {:?} is inverted", spec);
            }
        }

        Ok(range)
    }

    pub fn contains(&self, value: i64) -> bool {
        self.from.is_none_or(|from| value >= from) && self.to.is_none_or(|to| value <= to)
    }
}

// parse a comma-separated list of filter ranges
pub fn parse_range_list(spec: &str) -> Result<Vec<FilterRange>> {
    if spec.is_empty() {
        bail!("empty filter range list");
    }

    spec.split(',').map(FilterRange::parse).collect()
}

fn any_contains(ranges: &[FilterRange], value: i64) -> bool {
    ranges.iter().any(|r| r.contains(value))
}

// the hide/show verdict for response records
//
// evaluated in a fixed order with the first match deciding: status code
// (reject dominates accept), header/body size, hide patterns, then show
// patterns.  the verdict only marks the record; it keeps flowing.
#[derive(Debug, Default)]
pub struct ResponseFilters {
    pub reject_status: Vec<FilterRange>,
    pub accept_status: Vec<FilterRange>,
    pub hide_header_size: Vec<FilterRange>,
    pub hide_body_size: Vec<FilterRange>,
    pub hide_pattern: Vec<Regex>,
    pub show_pattern: Vec<Regex>,
}

impl ResponseFilters {
    pub fn hidden(&self, response: &Response) -> bool {
        // failed requests carry their error instead of a verdict
        if response.error.is_some() {
            return false;
        }

        if let Some(status) = response.status {
            let code = i64::from(status.as_u16());

            if any_contains(&self.reject_status, code) {
                return true;
            }

            if !self.accept_status.is_empty() && !any_contains(&self.accept_status, code) {
                return true;
            }
        }

        if any_contains(&self.hide_header_size, response.header.bytes as i64)
            || any_contains(&self.hide_body_size, response.body.bytes as i64)
        {
            return true;
        }

        if self
            .hide_pattern
            .iter()
            .any(|re| re.is_match(&response.raw_header) || re.is_match(&response.raw_body))
        {
            return true;
        }

        if !self.show_pattern.is_empty()
            && !self
                .show_pattern
                .iter()
                .any(|re| re.is_match(&response.raw_header) || re.is_match(&response.raw_body))
        {
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::response::TextStats;

    fn response(status: u16, header: &[u8], body: &[u8]) -> Response {
        let mut r = Response::new(vec!["x".to_string()]);
        r.status = Some(StatusCode::from_u16(status).unwrap());
        r.raw_header = header.to_vec();
        r.raw_body = body.to_vec();
        r.header = TextStats::of(header);
        r.body = TextStats::of(body);
        r
    }

    #[test]
    fn range_syntax() {
        assert_eq!(
            FilterRange::parse("404").unwrap(),
            FilterRange {
                from: Some(404),
                to: Some(404)
            }
        );
        assert_eq!(
            FilterRange::parse("400-499").unwrap(),
            FilterRange {
                from: Some(400),
                to: Some(499)
            }
        );
        assert_eq!(
            FilterRange::parse("-299").unwrap(),
            FilterRange {
                from: None,
                to: Some(299)
            }
        );
        assert_eq!(
            FilterRange::parse("500-").unwrap(),
            FilterRange {
                from: Some(500),
                to: None
            }
        );

        assert!(FilterRange::parse("").is_err());
        assert!(FilterRange::parse("x").is_err());
        assert!(FilterRange::parse("500-200").is_err());
    }

    #[test]
    fn range_list() {
        let ranges = parse_range_list("200,301-302,500-").unwrap();
        assert_eq!(ranges.len(), 3);
        assert!(any_contains(&ranges, 301));
        assert!(any_contains(&ranges, 503));
        assert!(!any_contains(&ranges, 404));

        assert!(parse_range_list("").is_err());
    }

    #[test]
    fn open_ended_bounds() {
        let le = FilterRange::parse("-100").unwrap();
        assert!(le.contains(0));
        assert!(le.contains(100));
        assert!(!le.contains(101));

        let ge = FilterRange::parse("100-").unwrap();
        assert!(ge.contains(100));
        assert!(ge.contains(i64::MAX));
        assert!(!ge.contains(99));
    }

    #[test]
    fn accept_hides_everything_else() {
        let filters = ResponseFilters {
            accept_status: parse_range_list("200").unwrap(),
            ..ResponseFilters::default()
        };

        assert!(!filters.hidden(&response(200, b"", b"")));
        assert!(filters.hidden(&response(404, b"", b"")));
        assert!(filters.hidden(&response(500, b"", b"")));
    }

    #[test]
    fn reject_dominates_accept() {
        let filters = ResponseFilters {
            accept_status: parse_range_list("200").unwrap(),
            reject_status: parse_range_list("200").unwrap(),
            ..ResponseFilters::default()
        };

        assert!(filters.hidden(&response(200, b"", b"")));
        assert!(filters.hidden(&response(404, b"", b"")));
    }

    #[test]
    fn size_filters_hide_on_either_list() {
        let filters = ResponseFilters {
            hide_body_size: parse_range_list("0,1000-").unwrap(),
            ..ResponseFilters::default()
        };

        assert!(filters.hidden(&response(200, b"HTTP/1.1 200 OK\r\n\r\n", b"")));
        assert!(!filters.hidden(&response(200, b"", b"some body")));

        let filters = ResponseFilters {
            hide_header_size: parse_range_list("19").unwrap(),
            ..ResponseFilters::default()
        };

        assert!(filters.hidden(&response(200, b"HTTP/1.1 200 OK\r\n\r\n", b"x")));
    }

    #[test]
    fn hide_pattern_checks_header_and_body() {
        let filters = ResponseFilters {
            hide_pattern: vec![Regex::new("(?i)not found").unwrap()],
            ..ResponseFilters::default()
        };

        assert!(filters.hidden(&response(200, b"", b"Not Found")));
        assert!(filters.hidden(&response(200, b"X-Msg: not found\r\n", b"")));
        assert!(!filters.hidden(&response(200, b"", b"welcome")));
    }

    #[test]
    fn show_pattern_hides_non_matches() {
        let filters = ResponseFilters {
            show_pattern: vec![Regex::new("flag\\{").unwrap()],
            ..ResponseFilters::default()
        };

        assert!(!filters.hidden(&response(200, b"", b"the flag{x} is here")));
        assert!(filters.hidden(&response(200, b"", b"nothing to see")));
    }

    #[test]
    fn errors_are_never_hidden() {
        let filters = ResponseFilters {
            reject_status: parse_range_list("0-999").unwrap(),
            ..ResponseFilters::default()
        };

        let mut r = Response::new(vec!["x".to_string()]);
        r.error = Some(crate::response::RequestError::Cancelled);
        assert!(!filters.hidden(&r));
    }
}
