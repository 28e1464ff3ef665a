// SPDX-License-Identifier: GPL-3.0-only

/// Splits a multipart body on `boundary`, discarding the preamble and
/// epilogue. Each returned part still contains its own header block and
/// body, unparsed.
pub fn split_multipart(body: &str, boundary: &str) -> Vec<String> {
    if boundary.is_empty() {
        return Vec::new();
    }

    let boundary_line = format!("--{boundary}");
    let end_boundary_line = format!("{boundary_line}--");

    let mut parts = Vec::new();

    let Some(first) = body.find(&boundary_line) else {
        return parts;
    };
    let mut pos = skip_boundary_crlf(body, first + boundary_line.len());

    loop {
        let end_pos = body[pos..].find(&end_boundary_line).map(|p| p + pos);
        let next_pos = body[pos..].find(&boundary_line).map(|p| p + pos);

        let effective = match (end_pos, next_pos) {
            (Some(e), Some(n)) => Some(e.min(n)),
            (Some(e), None) => Some(e),
            (None, Some(n)) => Some(n),
            (None, None) => None,
        };

        let Some(effective) = effective else {
            break;
        };

        let part = body[pos..effective].trim_end_matches(['\r', '\n']);
        parts.push(part.to_owned());

        if Some(effective) == end_pos {
            break;
        }

        pos = skip_boundary_crlf(body, effective + boundary_line.len());
    }

    parts
}

fn skip_boundary_crlf(body: &str, mut pos: usize) -> usize {
    let bytes = body.as_bytes();
    if bytes.get(pos) == Some(&b'\r') {
        pos += 1;
    }
    if bytes.get(pos) == Some(&b'\n') {
        pos += 1;
    }
    pos
}
