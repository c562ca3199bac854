use anyhow::{Context, Result, bail};

// an http/1.1 request skeleton read from a template file, split into its
// parts with header order and spelling preserved
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

// rewrite a bare HTTP/2 version on the request line to HTTP/2.0 so the
// parser accepts it; only the first line is touched and an original CR is
// kept in place
pub(crate) fn rewrite_http2(raw: &[u8]) -> Vec<u8> {
    let eol = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    let (line, rest) = raw.split_at(eol);

    let (line, cr): (&[u8], &[u8]) = match line.strip_suffix(b"\r") {
        Some(line) => (line, b"\r"),
        None => (line, b""),
    };

    match line.strip_suffix(b"HTTP/2") {
        Some(head) => {
            let mut out = Vec::with_capacity(raw.len() + 2);
            out.extend_from_slice(head);
            out.extend_from_slice(b"HTTP/2.0");
            out.extend_from_slice(cr);
            out.extend_from_slice(rest);
            out
        }
        None => raw.to_vec(),
    }
}

// parse a request template, accepting both CRLF and bare LF line endings;
// everything after the blank line is kept verbatim as the body
pub(crate) fn parse(raw: &[u8]) -> Result<ParsedRequest> {
    let mut lines: Vec<&[u8]> = Vec::new();
    let mut pos = 0;
    let mut body_start = raw.len();

    while pos < raw.len() {
        let (line_end, next) = match raw[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => (pos + i, pos + i + 1),
            None => (raw.len(), raw.len()),
        };

        let mut line = &raw[pos..line_end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        pos = next;

        if line.is_empty() {
            body_start = pos;
            break;
        }

        lines.push(line);
    }

    let Some((request_line, header_lines)) = lines.split_first() else {
        bail!("request template is empty");
    };

    let request_line =
        std::str::from_utf8(request_line).context("request line is not valid utf-8")?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow::Error::msg("request line has no method"))?;
    let target = parts
        .next()
        .ok_or_else(|| anyhow::Error::msg(format!("request line {:?} has no path", request_line)))?;
    let version = parts.next().unwrap_or("HTTP/1.1");

    if !version.starts_with("HTTP/") {
        bail!("invalid protocol version {:?}", version);
    }

    let mut headers = Vec::with_capacity(header_lines.len());
    for line in header_lines {
        let line = std::str::from_utf8(line).context("header line is not valid utf-8")?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow::Error::msg(format!("invalid header line {:?}", line)))?;

        headers.push((name.trim_end().to_string(), value.trim().to_string()));
    }

    Ok(ParsedRequest {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body: raw[body_start..].to_vec(),
    })
}
