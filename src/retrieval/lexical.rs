//! Lexical search over the FTS5 indexes
//!
//! The primary path ranks by BM25 over the stemmed token index. The trigram
//! path pulls candidates from the trigram index and scores them by trigram
//! word similarity.

use crate::corpus::CorpusKind;
use crate::error::Result;
use crate::retrieval::fusion::Candidate;
use crate::retrieval::trigram;
use crate::retrieval::ScopeFilter;
use rusqlite::{params, Connection};

/// Common English function words dropped from queries
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

/// Pool of trigram candidates scored per result slot
const TRIGRAM_CANDIDATES_PER_RESULT: usize = 20;

const CHUNKS_FTS_SQL: &str = "\
SELECT c.id, -bm25(chunks_fts) AS score
FROM chunks_fts
JOIN chunks c ON c.id = chunks_fts.rowid
WHERE chunks_fts MATCH ?1
  AND (?2 IS NULL OR c.source_id = ?2)
  AND json_contains(c.metadata, ?3)
ORDER BY score DESC, c.id ASC
LIMIT ?4";

const CODE_EXAMPLES_FTS_SQL: &str = "\
SELECT c.id, -bm25(code_examples_fts) AS score
FROM code_examples_fts
JOIN code_examples c ON c.id = code_examples_fts.rowid
WHERE code_examples_fts MATCH ?1
  AND (?2 IS NULL OR c.source_id = ?2)
  AND json_contains(c.metadata, ?3)
ORDER BY score DESC, c.id ASC
LIMIT ?4";

const CHUNKS_TRIGRAM_SQL: &str = "\
SELECT c.id, c.content
FROM chunks_trigram
JOIN chunks c ON c.id = chunks_trigram.rowid
WHERE chunks_trigram MATCH ?1
  AND (?2 IS NULL OR c.source_id = ?2)
  AND json_contains(c.metadata, ?3)
ORDER BY bm25(chunks_trigram), c.id
LIMIT ?4";

const CODE_EXAMPLES_TRIGRAM_SQL: &str = "\
SELECT c.id, c.content || char(10) || c.summary
FROM code_examples_trigram
JOIN code_examples c ON c.id = code_examples_trigram.rowid
WHERE code_examples_trigram MATCH ?1
  AND (?2 IS NULL OR c.source_id = ?2)
  AND json_contains(c.metadata, ?3)
ORDER BY bm25(code_examples_trigram), c.id
LIMIT ?4";

/// Reduce raw query text to searchable terms.
///
/// Lowercases, splits on anything that is not alphanumeric, and drops
/// stopwords and single-character tokens. Duplicates are removed.
pub fn analyze_query(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in trigram::words(text) {
        if word.chars().count() < 2 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Build an FTS5 MATCH expression requiring every term.
///
/// Terms are quoted so that FTS5 operators in user text are matched as
/// plain words.
pub fn match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// BM25-ranked search over the token index, best first
pub fn token_search(
    conn: &Connection,
    kind: CorpusKind,
    text: &str,
    scope: &ScopeFilter,
    budget: usize,
) -> Result<Vec<Candidate>> {
    let Some(expr) = match_expression(&analyze_query(text)) else {
        tracing::debug!("No searchable terms in query; lexical stream empty");
        return Ok(Vec::new());
    };

    let sql = match kind {
        CorpusKind::Chunks => CHUNKS_FTS_SQL,
        CorpusKind::CodeExamples => CODE_EXAMPLES_FTS_SQL,
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(
        params![
            expr,
            scope.source_param(),
            scope.metadata_param(),
            budget as i64
        ],
        |row| {
            Ok(Candidate {
                id: row.get(0)?,
                score: row.get(1)?,
            })
        },
    )?;

    let candidates = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

/// Trigram word-similarity search, best first.
///
/// Only candidates whose similarity reaches `threshold` are kept.
pub fn trigram_search(
    conn: &Connection,
    kind: CorpusKind,
    text: &str,
    scope: &ScopeFilter,
    budget: usize,
    threshold: f64,
) -> Result<Vec<Candidate>> {
    let inner = trigram::inner_trigrams(text);
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    let expr = inner
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ");

    let sql = match kind {
        CorpusKind::Chunks => CHUNKS_TRIGRAM_SQL,
        CorpusKind::CodeExamples => CODE_EXAMPLES_TRIGRAM_SQL,
    };

    let pool = budget.saturating_mul(TRIGRAM_CANDIDATES_PER_RESULT).max(budget);
    let query_trigrams = trigram::trigrams(text);

    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(
        params![
            expr,
            scope.source_param(),
            scope.metadata_param(),
            pool as i64
        ],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )?;

    let mut candidates = Vec::new();
    for row in rows {
        let (id, body) = row?;
        let score = trigram::similarity_of(&query_trigrams, &trigram::trigrams(&body));
        if score >= threshold {
            candidates.push(Candidate { id, score });
        }
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    candidates.truncate(budget);
    Ok(candidates)
}
