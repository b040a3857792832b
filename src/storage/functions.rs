//! SQL scalar functions registered on every pooled connection
//!
//! - `json_contains(document, filter)`: structural containment of a JSON filter
//!   in a JSON document. A NULL filter matches everything.
//! - `vec_cosine_distance(embedding, query)`: cosine distance between two
//!   little-endian `f32` blobs of equal length.
//!
//! Both functions cache their constant second argument through SQLite
//! auxiliary data, so the filter and the query vector are decoded once per
//! statement rather than once per row.

use crate::retrieval::metadata_contains;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Error};
use serde_json::Value;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Register all scalar functions on a connection
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("json_contains", 2, flags, json_contains)?;
    conn.create_scalar_function("vec_cosine_distance", 2, flags, vec_cosine_distance)?;
    Ok(())
}

fn json_contains(ctx: &Context<'_>) -> rusqlite::Result<bool> {
    let filter = ctx.get_or_create_aux(1, |arg| -> Result<Option<Value>, BoxError> {
        match arg {
            ValueRef::Null => Ok(None),
            other => Ok(Some(serde_json::from_str(other.as_str()?)?)),
        }
    })?;

    let Some(filter) = &*filter else {
        return Ok(true);
    };

    let document: Value = match ctx.get_raw(0) {
        ValueRef::Text(raw) => match serde_json::from_slice(raw) {
            Ok(doc) => doc,
            Err(_) => return Ok(false),
        },
        _ => return Ok(false),
    };

    Ok(metadata_contains(&document, filter))
}

/// Decoded query vector with its precomputed norm
struct QueryVector {
    values: Vec<f64>,
    norm: f64,
}

fn vec_cosine_distance(ctx: &Context<'_>) -> rusqlite::Result<Option<f64>> {
    let query = ctx.get_or_create_aux(1, |arg| -> Result<QueryVector, BoxError> {
        let values: Vec<f64> = arg
            .as_blob()?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        Ok(QueryVector { values, norm })
    })?;

    let row = match ctx.get_raw(0) {
        ValueRef::Blob(blob) => blob,
        ValueRef::Null => return Ok(None),
        _ => {
            return Err(Error::UserFunctionError(
                "vec_cosine_distance expects a blob".into(),
            ))
        }
    };

    if row.len() != query.values.len() * 4 {
        return Err(Error::UserFunctionError(
            format!(
                "vec_cosine_distance length mismatch: {} vs {} values",
                row.len() / 4,
                query.values.len()
            )
            .into(),
        ));
    }

    let mut dot = 0.0f64;
    let mut row_norm = 0.0f64;
    for (b, q) in row.chunks_exact(4).zip(query.values.iter()) {
        let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64;
        dot += v * q;
        row_norm += v * v;
    }

    Ok(Some(distance_from_parts(dot, row_norm.sqrt(), query.norm)))
}

fn distance_from_parts(dot: f64, norm_a: f64, norm_b: f64) -> f64 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - cosine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::encode_vector;
    use rusqlite::params;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        conn
    }

    /// Cosine distance between two vectors, computed in `f64`.
    ///
    /// A zero-norm operand has distance 1.0.
    fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
        let mut dot = 0.0f64;
        let mut na = 0.0f64;
        let mut nb = 0.0f64;
        for (x, y) in a.iter().zip(b.iter()) {
            let (x, y) = (*x as f64, *y as f64);
            dot += x * y;
            na += x * x;
            nb += y * y;
        }
        distance_from_parts(dot, na.sqrt(), nb.sqrt())
    }

    #[test]
    fn test_cosine_distance() {
        assert!((cosine_distance(&[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_sql_cosine_distance_matches_rust() {
        let conn = conn();
        let a = vec![0.3f32, 0.4, 0.5];
        let b = vec![0.9f32, -0.1, 0.2];

        let d: f64 = conn
            .query_row(
                "SELECT vec_cosine_distance(?1, ?2)",
                params![encode_vector(&a), encode_vector(&b)],
                |row| row.get(0),
            )
            .unwrap();

        assert!((d - cosine_distance(&a, &b)).abs() < 1e-9);
    }

    #[test]
    fn test_sql_cosine_distance_rejects_mismatch() {
        let conn = conn();
        let result: rusqlite::Result<f64> = conn.query_row(
            "SELECT vec_cosine_distance(?1, ?2)",
            params![encode_vector(&[1.0, 2.0]), encode_vector(&[1.0, 2.0, 3.0])],
            |row| row.get(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sql_json_contains() {
        let conn = conn();
        let check = |doc: &str, filter: Option<&str>| -> bool {
            conn.query_row("SELECT json_contains(?1, ?2)", params![doc, filter], |row| {
                row.get(0)
            })
            .unwrap()
        };

        assert!(check(r#"{"lang":"rust","tags":["a","b"]}"#, Some(r#"{"lang":"rust"}"#)));
        assert!(check(r#"{"lang":"rust"}"#, Some("{}")));
        assert!(check(r#"{"lang":"rust"}"#, None));
        assert!(!check(r#"{"lang":"go"}"#, Some(r#"{"lang":"rust"}"#)));
        assert!(!check("not json", Some(r#"{"lang":"rust"}"#)));
    }
}
