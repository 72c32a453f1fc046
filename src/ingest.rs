//! Mutation batch line parsing.
//!
//! One line is one JSON array: `[oid, data]` describes a vertex, `[src,
//! dst, data]` an edge. Oids are JSON integers or strings; `data` is any
//! JSON value. A malformed line is a recoverable parse error: the batch
//! entry points log and skip it rather than failing the batch.

use crate::error::{FragmaError, Result};
use crate::model::{Oid, Value};

/// One parsed mutation line.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationRecord {
    /// A vertex with its payload.
    Vertex {
        /// Original vertex id.
        oid: Oid,
        /// Vertex payload.
        data: Value,
    },
    /// An edge with its payload.
    Edge {
        /// Source original id.
        src: Oid,
        /// Destination original id.
        dst: Oid,
        /// Edge payload.
        data: Value,
    },
}

/// Parses one mutation line.
pub fn parse_line(line: &str) -> Result<MutationRecord> {
    let items: Vec<serde_json::Value> = serde_json::from_str(line.trim())
        .map_err(|err| FragmaError::Parse(format!("{err}: {line:?}")))?;
    match items.len() {
        2 => {
            let mut items = items.into_iter();
            let oid = parse_oid(items.next().expect("arity checked"))?;
            let data = Value::from(items.next().expect("arity checked"));
            Ok(MutationRecord::Vertex { oid, data })
        }
        3 => {
            let mut items = items.into_iter();
            let src = parse_oid(items.next().expect("arity checked"))?;
            let dst = parse_oid(items.next().expect("arity checked"))?;
            let data = Value::from(items.next().expect("arity checked"));
            Ok(MutationRecord::Edge { src, dst, data })
        }
        n => Err(FragmaError::Parse(format!(
            "expected 2 (vertex) or 3 (edge) elements, found {n}"
        ))),
    }
}

fn parse_oid(raw: serde_json::Value) -> Result<Oid> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Oid::Int)
            .ok_or_else(|| FragmaError::Parse(format!("oid {n} is not a 64-bit integer"))),
        serde_json::Value::String(s) => Ok(Oid::Str(s)),
        other => Err(FragmaError::Parse(format!(
            "oid must be an integer or string, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vertex_line() -> Result<()> {
        let record = parse_line(r#"[5, {"label": "person"}]"#)?;
        match record {
            MutationRecord::Vertex { oid, data } => {
                assert_eq!(oid, Oid::Int(5));
                assert!(matches!(data, Value::Map(_)));
            }
            other => panic!("expected vertex, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn parses_edge_line_with_string_oids() -> Result<()> {
        let record = parse_line(r#"["a", "b", 2.5]"#)?;
        assert_eq!(
            record,
            MutationRecord::Edge {
                src: Oid::Str("a".into()),
                dst: Oid::Str("b".into()),
                data: Value::Float(2.5),
            }
        );
        Ok(())
    }

    #[test]
    fn null_payload_is_allowed() -> Result<()> {
        let record = parse_line("[1, null]")?;
        assert_eq!(
            record,
            MutationRecord::Vertex {
                oid: Oid::Int(1),
                data: Value::Null,
            }
        );
        Ok(())
    }

    #[test]
    fn malformed_lines_are_parse_errors() {
        for line in ["", "not json", "[1]", "[1, 2, 3, 4]", r#"[true, null]"#, "{}"] {
            let err = parse_line(line).unwrap_err();
            assert!(matches!(err, FragmaError::Parse(_)), "line {line:?}");
        }
    }
}
