//! Query engine - compiles raw input into an FTS5 match expression / 查询引擎
//!
//! A query is matched two ways at once: as a prefix phrase (`"rep"*`) and, when every word
//! is a plain bareword, as a conjunction of prefix terms (`rep*`). Results come back in FTS5
//! rank order, ties broken by catalog id so identical input yields identical order.

use sqlx::SqlitePool;

use super::schema::SearchHit;
use crate::error::Result;

/// Default result cap / 默认结果上限
pub const DEFAULT_LIMIT: usize = 100;

pub struct QueryEngine {
    db: SqlitePool,
    limit: usize,
}

impl QueryEngine {
    pub fn new(db: SqlitePool, limit: usize) -> Self {
        Self {
            db,
            limit: if limit == 0 { DEFAULT_LIMIT } else { limit },
        }
    }

    /// Search, degrading every fault to an empty list / 搜索（出错时返回空列表）
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        match self.try_search(query).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Search failed for {:?}: {}", query, e);
                Vec::new()
            }
        }
    }

    pub async fn try_search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let Some(expression) = compile_match_expression(query) else {
            return Ok(Vec::new());
        };

        let hits = sqlx::query_as::<_, SearchHit>(
            r#"
            SELECT f.path AS path,
                   f.name AS name,
                   COALESCE(f.extension, '') AS extension,
                   COALESCE(f.size, 0) AS size,
                   COALESCE(f.mtime, 0) AS mtime,
                   COALESCE(f.parent_path, '') AS parent_path,
                   files_fts.rank AS rank
            FROM files_fts
            JOIN files f ON f.id = files_fts.rowid
            WHERE files_fts MATCH ?
            ORDER BY files_fts.rank, f.id
            LIMIT ?
            "#,
        )
        .bind(&expression)
        .bind(self.limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(hits)
    }
}

/// Build the FTS5 expression, None for blank input / 构建FTS5匹配表达式
pub fn compile_match_expression(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let phrase = format!("\"{}\"*", trimmed.replace('"', "\"\""));

    let words: Vec<String> = trimmed.split_whitespace().map(str::to_lowercase).collect();
    if !words.iter().all(|w| is_bareword(w)) {
        return Some(phrase);
    }

    let prefix = words
        .iter()
        .map(|w| format!("{}*", w))
        .collect::<Vec<_>>()
        .join(" ");

    if words.len() == 1 {
        Some(format!("{} OR {}", phrase, prefix))
    } else {
        Some(format!("{} OR ({})", phrase, prefix))
    }
}

/// FTS5 bareword: ASCII alphanumerics, underscore, or any non-ASCII character
fn is_bareword(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || !c.is_ascii())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_single_word() {
        assert_eq!(compile_match_expression("rep").unwrap(), "\"rep\"* OR rep*");
        assert_eq!(compile_match_expression("  Report ").unwrap(), "\"Report\"* OR report*");
    }

    #[test]
    fn test_compile_multiple_words() {
        assert_eq!(
            compile_match_expression("annual rep").unwrap(),
            "\"annual rep\"* OR (annual* rep*)"
        );
    }

    #[test]
    fn test_keywords_are_lowered_into_barewords() {
        assert_eq!(compile_match_expression("OR").unwrap(), "\"OR\"* OR or*");
    }

    #[test]
    fn test_punctuation_keeps_only_phrase() {
        assert_eq!(compile_match_expression("c++").unwrap(), "\"c++\"*");
        assert_eq!(compile_match_expression("say \"hi\"").unwrap(), "\"say \"\"hi\"\"\"*");
    }

    #[test]
    fn test_blank_query_compiles_to_nothing() {
        assert!(compile_match_expression("").is_none());
        assert!(compile_match_expression("   ").is_none());
    }

    #[test]
    fn test_non_ascii_is_bareword() {
        assert_eq!(compile_match_expression("报告").unwrap(), "\"报告\"* OR 报告*");
    }
}
