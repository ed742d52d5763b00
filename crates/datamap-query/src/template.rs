//! Immutable base queries.

use datamap_core::{Error, Result};

/// The fixed part of a query: select list, FROM clause and any conditions the
/// query started with. A template never changes after construction; every
/// render starts from it.
#[derive(Debug, Clone)]
pub struct SqlTemplate {
    select_list: String,
    from: String,
    where_clause: Option<String>,
    group_by: Option<String>,
    order_by: Option<String>,
}

impl SqlTemplate {
    /// Build a template structurally from a select list and a FROM clause.
    pub fn new(select_list: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            select_list: select_list.into(),
            from: from.into(),
            where_clause: None,
            group_by: None,
            order_by: None,
        }
    }

    pub fn with_where(mut self, condition: impl Into<String>) -> Self {
        self.where_clause = Some(condition.into());
        self
    }

    pub fn with_group_by(mut self, expr: impl Into<String>) -> Self {
        self.group_by = Some(expr.into());
        self
    }

    pub fn with_order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by = Some(expr.into());
        self
    }

    /// Parse a raw SELECT statement into a template, once.
    ///
    /// The statement is split at its top-level SELECT / FROM / WHERE /
    /// GROUP BY / ORDER BY keywords; parenthesized subexpressions are left
    /// intact. All later manipulation is structural, no further string
    /// surgery happens on the parsed parts.
    pub fn parse(sql: &str) -> Result<Self> {
        let sql = sql.trim().trim_end_matches(';').trim();

        let rest = strip_prefix_keyword(sql, "SELECT").ok_or_else(|| {
            Error::InvalidArgument(format!("expected a SELECT statement, got '{}'", sql))
        })?;

        let (from_start, from_body) = find_keyword_span(rest, "FROM").ok_or_else(|| {
            Error::InvalidArgument("SELECT statement has no FROM clause".to_string())
        })?;
        let select_list = rest[..from_start].trim().to_string();
        let after_from = &rest[from_body..];

        let where_span = find_keyword_span(after_from, "WHERE");
        let group_span = find_keyword_span(after_from, "GROUP BY");
        let order_span = find_keyword_span(after_from, "ORDER BY");

        if find_keyword_span(after_from, "LIMIT").is_some() {
            return Err(Error::InvalidArgument(
                "raw templates must not carry LIMIT; set it on the query".to_string(),
            ));
        }

        let clause_starts = [where_span, group_span, order_span];
        let from_end = clause_starts
            .into_iter()
            .flatten()
            .map(|(start, _)| start)
            .min()
            .unwrap_or(after_from.len());
        let from = after_from[..from_end].trim().to_string();

        let section = |span: Option<(usize, usize)>| -> Option<String> {
            let (start, body_start) = span?;
            let end = clause_starts
                .into_iter()
                .flatten()
                .map(|(other, _)| other)
                .filter(|&p| p > start)
                .min()
                .unwrap_or(after_from.len());
            Some(after_from[body_start..end].trim().to_string())
        };

        if select_list.is_empty() || from.is_empty() {
            return Err(Error::InvalidArgument(
                "SELECT statement has an empty select list or FROM clause".to_string(),
            ));
        }

        Ok(Self {
            select_list,
            from,
            where_clause: section(where_span),
            group_by: section(group_span),
            order_by: section(order_span),
        })
    }

    pub fn select_list(&self) -> &str {
        &self.select_list
    }

    pub fn from_clause(&self) -> &str {
        &self.from
    }

    pub fn where_clause(&self) -> Option<&str> {
        self.where_clause.as_deref()
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group_by.as_deref()
    }

    pub fn order_by(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    /// Whether the FROM clause itself already joins other tables.
    pub fn has_join(&self) -> bool {
        find_keyword(&self.from, "JOIN").is_some()
    }
}

/// Strip a leading keyword (case-insensitive) followed by whitespace.
fn strip_prefix_keyword<'a>(s: &'a str, kw: &str) -> Option<&'a str> {
    if s.len() >= kw.len() && s[..kw.len()].eq_ignore_ascii_case(kw) {
        let rest = &s[kw.len()..];
        if rest.starts_with(char::is_whitespace) {
            return Some(rest.trim_start());
        }
    }
    None
}

/// Find a top-level SQL keyword, skipping parenthesized subexpressions and
/// single-quoted literals. Returns the byte offset of the match.
fn find_keyword(s: &str, kw: &str) -> Option<usize> {
    find_keyword_span(s, kw).map(|(start, _)| start)
}

/// Like `find_keyword`, but returns both the start of the match and the
/// offset just past it. Multi-word keywords match across any run of
/// whitespace, so the end offset is the only safe place to slice a clause
/// body from.
fn find_keyword_span(s: &str, kw: &str) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    let words: Vec<&str> = kw.split_whitespace().collect();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_quote {
            if c == '\'' {
                in_quote = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0 && is_word_boundary(bytes, i) {
                    if let Some(end) = match_words(s, i, &words) {
                        return Some((i, end));
                    }
                }
            }
        }
        i += 1;
    }
    None
}

fn is_word_boundary(bytes: &[u8], i: usize) -> bool {
    i == 0 || !(bytes[i - 1] as char).is_ascii_alphanumeric() && bytes[i - 1] != b'_'
}

/// Try to match a keyword word sequence at offset `i`; returns the end offset.
fn match_words(s: &str, mut i: usize, words: &[&str]) -> Option<usize> {
    let bytes = s.as_bytes();
    for (n, word) in words.iter().enumerate() {
        if n > 0 {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_whitespace() {
                i += 1;
            }
            if i == start {
                return None;
            }
        }
        if i + word.len() > s.len() || !s[i..i + word.len()].eq_ignore_ascii_case(word) {
            return None;
        }
        i += word.len();
    }
    // keyword must end at a word boundary
    if i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
        return None;
    }
    Some(i)
}
