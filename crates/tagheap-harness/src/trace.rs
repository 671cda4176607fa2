//! Allocation trace files.
//!
//! Text format, one item per line, `#` starts a comment:
//!
//! ```text
//! 20000        # suggested heap size (informational)
//! 2            # number of distinct block ids
//! 5            # number of ops
//! 1            # weight
//! a 0 512      # allocate id 0, 512 bytes
//! a 1 128
//! r 0 640      # resize id 0 to 640 bytes
//! f 1          # release id 1
//! f 0
//! ```

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::Digest;
use thiserror::Error;

const HEADER_FIELDS: [&str; 4] = ["suggested_heap_size", "num_ids", "num_ops", "weight"];

/// One trace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    Alloc { id: usize, size: usize },
    Realloc { id: usize, size: usize },
    Free { id: usize },
}

impl TraceOp {
    #[must_use]
    pub const fn id(self) -> usize {
        match self {
            Self::Alloc { id, .. } | Self::Realloc { id, .. } | Self::Free { id } => id,
        }
    }
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace ends before header field `{field}`")]
    MissingHeader { field: &'static str },
    #[error("line {line}: expected an unsigned integer, found `{token}`")]
    BadNumber { line: usize, token: String },
    #[error("line {line}: unknown op `{token}`")]
    UnknownOp { line: usize, token: String },
    #[error("line {line}: op `{op}` takes {expected} operands, found {found}")]
    Arity {
        line: usize,
        op: char,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: id {id} outside 0..{num_ids}")]
    IdOutOfRange {
        line: usize,
        id: usize,
        num_ids: usize,
    },
    #[error("header declares {declared} ops, body has {found}")]
    CountMismatch { declared: usize, found: usize },
}

/// A parsed trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub suggested_heap_size: usize,
    pub num_ids: usize,
    pub weight: usize,
    pub ops: Vec<TraceOp>,
}

impl Trace {
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut header = Vec::with_capacity(HEADER_FIELDS.len());
        let mut body = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }
            if header.len() < HEADER_FIELDS.len() {
                for token in content.split_whitespace() {
                    if header.len() == HEADER_FIELDS.len() {
                        return Err(TraceError::UnknownOp {
                            line,
                            token: token.to_string(),
                        });
                    }
                    header.push(parse_number(line, token)?);
                }
                continue;
            }
            body.push((line, content));
        }

        if header.len() < HEADER_FIELDS.len() {
            return Err(TraceError::MissingHeader {
                field: HEADER_FIELDS[header.len()],
            });
        }
        let (suggested_heap_size, num_ids, num_ops, weight) =
            (header[0], header[1], header[2], header[3]);

        let ops = body
            .into_iter()
            .map(|(line, content)| parse_op(line, content, num_ids))
            .collect::<Result<Vec<_>, _>>()?;
        if ops.len() != num_ops {
            return Err(TraceError::CountMismatch {
                declared: num_ops,
                found: ops.len(),
            });
        }

        Ok(Self {
            suggested_heap_size,
            num_ids,
            weight,
            ops,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Canonical text form; [`Trace::parse`] reads it back unchanged.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(16 * (self.ops.len() + 4));
        for value in [
            self.suggested_heap_size,
            self.num_ids,
            self.ops.len(),
            self.weight,
        ] {
            let _ = writeln!(out, "{value}");
        }
        for op in &self.ops {
            let _ = match *op {
                TraceOp::Alloc { id, size } => writeln!(out, "a {id} {size}"),
                TraceOp::Realloc { id, size } => writeln!(out, "r {id} {size}"),
                TraceOp::Free { id } => writeln!(out, "f {id}"),
            };
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<(), TraceError> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    /// SHA-256 of the canonical text, lowercase hex.
    #[must_use]
    pub fn sha256(&self) -> String {
        hex_lower(&sha2::Sha256::digest(self.to_text().as_bytes()))
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

fn parse_number(line: usize, token: &str) -> Result<usize, TraceError> {
    token.parse().map_err(|_| TraceError::BadNumber {
        line,
        token: token.to_string(),
    })
}

fn parse_op(line: usize, content: &str, num_ids: usize) -> Result<TraceOp, TraceError> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let Some((&op, operands)) = tokens.split_first() else {
        return Err(TraceError::UnknownOp {
            line,
            token: String::new(),
        });
    };
    let (kind, expected) = match op {
        "a" => ('a', 2),
        "r" => ('r', 2),
        "f" => ('f', 1),
        other => {
            return Err(TraceError::UnknownOp {
                line,
                token: other.to_string(),
            });
        }
    };
    if operands.len() != expected {
        return Err(TraceError::Arity {
            line,
            op: kind,
            expected,
            found: operands.len(),
        });
    }

    let id = parse_number(line, operands[0])?;
    if id >= num_ids {
        return Err(TraceError::IdOutOfRange { line, id, num_ids });
    }
    Ok(match kind {
        'a' => TraceOp::Alloc {
            id,
            size: parse_number(line, operands[1])?,
        },
        'r' => TraceOp::Realloc {
            id,
            size: parse_number(line, operands[1])?,
        },
        _ => TraceOp::Free { id },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# two blocks
20000
2
5
1
a 0 512
a 1 128   # trailing comment
r 0 640

f 1
f 0
";

    #[test]
    fn parses_header_and_ops() {
        let trace = Trace::parse(SAMPLE).unwrap();
        assert_eq!(trace.suggested_heap_size, 20000);
        assert_eq!(trace.num_ids, 2);
        assert_eq!(trace.weight, 1);
        assert_eq!(
            trace.ops,
            vec![
                TraceOp::Alloc { id: 0, size: 512 },
                TraceOp::Alloc { id: 1, size: 128 },
                TraceOp::Realloc { id: 0, size: 640 },
                TraceOp::Free { id: 1 },
                TraceOp::Free { id: 0 },
            ]
        );
    }

    #[test]
    fn header_may_share_a_line() {
        let trace = Trace::parse("0 1 1 1\na 0 8\n").unwrap();
        assert_eq!(trace.ops, vec![TraceOp::Alloc { id: 0, size: 8 }]);
    }

    #[test]
    fn text_form_reparses() {
        let trace = Trace::parse(SAMPLE).unwrap();
        assert_eq!(Trace::parse(&trace.to_text()).unwrap(), trace);
        assert_eq!(trace.sha256().len(), 64);
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let err = Trace::parse("0\n1\n3\n1\na 0 8\nf 0\n").unwrap_err();
        assert!(matches!(
            err,
            TraceError::CountMismatch {
                declared: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn malformed_lines_name_the_line() {
        let err = Trace::parse("0\n1\n1\n1\nx 0 8\n").unwrap_err();
        assert!(matches!(err, TraceError::UnknownOp { line: 5, .. }));

        let err = Trace::parse("0\n1\n1\n1\na 0\n").unwrap_err();
        assert!(matches!(
            err,
            TraceError::Arity {
                line: 5,
                op: 'a',
                expected: 2,
                found: 1
            }
        ));

        let err = Trace::parse("0\n1\n1\n1\na 3 8\n").unwrap_err();
        assert!(matches!(err, TraceError::IdOutOfRange { id: 3, .. }));

        let err = Trace::parse("0\n1\n1\n1\na 0 big\n").unwrap_err();
        assert!(matches!(err, TraceError::BadNumber { line: 5, .. }));
    }

    #[test]
    fn short_header_is_reported() {
        let err = Trace::parse("100\n4\n").unwrap_err();
        assert!(matches!(
            err,
            TraceError::MissingHeader { field: "num_ops" }
        ));
        assert_eq!(err.to_string(), "trace ends before header field `num_ops`");
    }
}
