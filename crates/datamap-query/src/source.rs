//! Clause accumulation and deterministic rendering.

use crate::template::SqlTemplate;
use datamap_core::{Error, Result};

/// How a predicate attaches to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    fn keyword(self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct JoinClause {
    kind: JoinKind,
    table: String,
    alias: String,
    condition: String,
}

#[derive(Debug, Clone)]
struct Predicate {
    condition: String,
    connective: Connective,
}

/// A query under construction: an immutable template plus accumulated
/// clauses.
///
/// Rendering is a pure function of the accumulated state, so a source can be
/// rendered any number of times with identical output. Freezing pins the
/// rendered SQL; structural mutation after that point is recorded and
/// surfaced as `BuilderMisuse` when the query is next rendered through
/// `checked_sql`.
#[derive(Debug, Clone)]
pub struct SqlSource {
    template: SqlTemplate,
    joins: Vec<JoinClause>,
    predicates: Vec<Predicate>,
    extra_select: Vec<String>,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    cached: bool,
    cache_tags: Vec<String>,
    with: Vec<String>,
    frozen_sql: Option<String>,
    misuse: Option<String>,
}

impl SqlSource {
    pub fn new(template: SqlTemplate) -> Self {
        Self {
            template,
            joins: Vec::new(),
            predicates: Vec::new(),
            extra_select: Vec::new(),
            group_by: None,
            order_by: None,
            limit: None,
            offset: None,
            cached: false,
            cache_tags: Vec::new(),
            with: Vec::new(),
            frozen_sql: None,
            misuse: None,
        }
    }

    /// Append an inner join, rendered in call order between FROM and WHERE.
    pub fn join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) {
        self.push_join(JoinKind::Inner, table.into(), alias.into(), condition.into());
    }

    /// Append a left outer join, rendered in call order between FROM and WHERE.
    pub fn left_join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
    ) {
        self.push_join(JoinKind::Left, table.into(), alias.into(), condition.into());
    }

    fn push_join(&mut self, kind: JoinKind, table: String, alias: String, condition: String) {
        if self.reject_if_frozen("join") {
            return;
        }
        self.joins.push(JoinClause {
            kind,
            table,
            alias,
            condition,
        });
    }

    /// Append a WHERE predicate attached with the given connective.
    pub fn predicate(&mut self, condition: impl Into<String>, connective: Connective) {
        if self.reject_if_frozen("predicate") {
            return;
        }
        self.predicates.push(Predicate {
            condition: condition.into(),
            connective,
        });
    }

    /// Append an extra select expression after the template select list.
    pub fn select_also(&mut self, expr: impl Into<String>) {
        if self.reject_if_frozen("select_also") {
            return;
        }
        self.extra_select.push(expr.into());
    }

    /// Set the GROUP BY expression. At most one per query, template included.
    pub fn group_by(&mut self, expr: impl Into<String>) -> Result<()> {
        if self.reject_if_frozen("group_by") {
            return Ok(());
        }
        if self.template.group_by().is_some() || self.group_by.is_some() {
            return Err(Error::InvalidState(
                "query already has a GROUP BY clause".to_string(),
            ));
        }
        self.group_by = Some(expr.into());
        Ok(())
    }

    /// Set the ORDER BY expression. At most one per query, template included.
    pub fn order_by(&mut self, expr: impl Into<String>) -> Result<()> {
        if self.reject_if_frozen("order_by") {
            return Ok(());
        }
        if self.template.order_by().is_some() || self.order_by.is_some() {
            return Err(Error::InvalidState(
                "query already has an ORDER BY clause".to_string(),
            ));
        }
        self.order_by = Some(expr.into());
        Ok(())
    }

    pub fn limit(&mut self, n: u64) {
        if self.reject_if_frozen("limit") {
            return;
        }
        self.limit = Some(n);
    }

    pub fn offset(&mut self, n: u64) {
        if self.reject_if_frozen("offset") {
            return;
        }
        self.offset = Some(n);
    }

    /// Request result caching for this query.
    pub fn use_cache(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Add an extra invalidation tag beyond the owning entity's.
    pub fn cache_tag(&mut self, tag: impl Into<String>) {
        self.cache_tags.push(tag.into());
    }

    pub fn cache_tags(&self) -> &[String] {
        &self.cache_tags
    }

    /// Request eager loading of a named association.
    pub fn with(&mut self, name: impl Into<String>) {
        if self.reject_if_frozen("with") {
            return;
        }
        self.with.push(name.into());
    }

    pub fn with_names(&self) -> &[String] {
        &self.with
    }

    /// Pin the rendered SQL; later structural mutation becomes misuse.
    pub fn freeze(&mut self) {
        if self.frozen_sql.is_none() {
            self.frozen_sql = Some(self.render());
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_sql.is_some()
    }

    fn reject_if_frozen(&mut self, operation: &str) -> bool {
        if self.frozen_sql.is_some() {
            if self.misuse.is_none() {
                self.misuse = Some(format!(
                    "'{}' called on a query whose SQL is already fixed",
                    operation
                ));
            }
            return true;
        }
        false
    }

    /// Whether select columns are rewritten to `alias_column` output names.
    ///
    /// True as soon as any join is involved, appended or present in the
    /// template's FROM clause.
    pub fn aliased(&self) -> bool {
        !self.joins.is_empty() || self.template.has_join()
    }

    /// Render the SQL, verifying no misuse was recorded.
    pub fn checked_sql(&self) -> Result<String> {
        if let Some(misuse) = &self.misuse {
            return Err(Error::BuilderMisuse(misuse.clone()));
        }
        Ok(self.render())
    }

    /// Render the final SQL. Clause order is fixed: SELECT, FROM, JOINs,
    /// WHERE, GROUP BY, ORDER BY, LIMIT, OFFSET.
    pub fn render(&self) -> String {
        if let Some(frozen) = &self.frozen_sql {
            return frozen.clone();
        }

        let aliased = self.aliased();
        let mut entries: Vec<String> = split_select_list(self.template.select_list());
        entries.extend(self.extra_select.iter().cloned());
        let select_list = if aliased {
            entries
                .iter()
                .map(|e| alias_entry(e))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            entries.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", select_list, self.template.from_clause());

        self.render_joins(&mut sql);
        self.render_where(&mut sql);

        if let Some(group) = self.template.group_by().or(self.group_by.as_deref()) {
            sql.push_str(&format!(" GROUP BY {}", group));
        }
        if let Some(order) = self.template.order_by().or(self.order_by.as_deref()) {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        tracing::trace!(sql = %sql, "rendered query");
        sql
    }

    /// Render the row-count variant: the select list collapses to COUNT(*),
    /// ordering and pagination are dropped, the filters stay.
    pub fn render_count(&self) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.template.from_clause());

        self.render_joins(&mut sql);
        self.render_where(&mut sql);

        if let Some(group) = self.template.group_by().or(self.group_by.as_deref()) {
            sql.push_str(&format!(" GROUP BY {}", group));
        }

        sql
    }

    fn render_joins(&self, sql: &mut String) {
        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} {} ON {}",
                join.kind.keyword(),
                join.table,
                join.alias,
                join.condition
            ));
        }
    }

    fn render_where(&self, sql: &mut String) {
        let mut opened = false;
        if let Some(base) = self.template.where_clause() {
            sql.push_str(&format!(" WHERE {}", base));
            opened = true;
        }
        for predicate in &self.predicates {
            if opened {
                sql.push_str(&format!(
                    " {} {}",
                    predicate.connective.keyword(),
                    predicate.condition
                ));
            } else {
                sql.push_str(&format!(" WHERE {}", predicate.condition));
                opened = true;
            }
        }
    }
}

/// Split a select list on top-level commas.
fn split_select_list(list: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let bytes = list.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                entries.push(list[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = list[start..].trim();
    if !tail.is_empty() {
        entries.push(tail.to_string());
    }
    entries
}

/// Rewrite a simple `alias.column` entry to `alias.column AS alias_column`.
///
/// Entries carrying expressions, explicit aliases or wildcards pass through
/// untouched.
fn alias_entry(entry: &str) -> String {
    let simple = !entry.contains(char::is_whitespace)
        && !entry.contains('(')
        && !entry.contains('*')
        && entry.matches('.').count() == 1;
    if simple {
        let (alias, column) = entry.split_once('.').expect("checked above");
        format!("{} AS {}_{}", entry, alias, column)
    } else {
        entry.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_template() -> SqlTemplate {
        SqlTemplate::new("so.id, so.number, so.customer_id", "sales_order so")
    }

    #[test]
    fn render_bare_template() {
        let source = SqlSource::new(order_template());
        assert_eq!(
            source.render(),
            "SELECT so.id, so.number, so.customer_id FROM sales_order so"
        );
        assert!(!source.aliased());
    }

    #[test]
    fn render_is_idempotent() {
        let mut source = SqlSource::new(order_template());
        source.predicate("so.number = '42'", Connective::And);
        source.limit(10);
        let first = source.render();
        let second = source.render();
        assert_eq!(first, second);
    }

    #[test]
    fn predicates_compose_in_insertion_order() {
        let mut source = SqlSource::new(SqlTemplate::new("t.a, t.b", "t t"));
        source.predicate("a = '1'", Connective::And);
        source.predicate("b IS NULL", Connective::And);
        assert_eq!(
            source.render(),
            "SELECT t.a, t.b FROM t t WHERE a = '1' AND b IS NULL"
        );
    }

    #[test]
    fn or_predicate_uses_or() {
        let mut source = SqlSource::new(SqlTemplate::new("t.a", "t t"));
        source.predicate("a = 1", Connective::And);
        source.predicate("a = 2", Connective::Or);
        assert_eq!(source.render(), "SELECT t.a FROM t t WHERE a = 1 OR a = 2");
    }

    #[test]
    fn template_where_comes_first() {
        let template = SqlTemplate::new("t.a", "t t").with_where("t.deleted = 0");
        let mut source = SqlSource::new(template);
        source.predicate("t.a > 5", Connective::And);
        assert_eq!(
            source.render(),
            "SELECT t.a FROM t t WHERE t.deleted = 0 AND t.a > 5"
        );
    }

    #[test]
    fn join_triggers_column_aliasing() {
        let mut source = SqlSource::new(order_template());
        source.join("customer", "c", "c.id = so.customer_id");
        source.select_also("c.id");
        source.select_also("c.name");
        assert!(source.aliased());
        assert_eq!(
            source.render(),
            "SELECT so.id AS so_id, so.number AS so_number, so.customer_id AS so_customer_id, \
             c.id AS c_id, c.name AS c_name \
             FROM sales_order so JOIN customer c ON c.id = so.customer_id"
        );
    }

    #[test]
    fn aliasing_skips_expressions() {
        let mut source = SqlSource::new(SqlTemplate::new("t.a, COUNT(t.b), t.c AS x", "t t"));
        source.join("u", "u", "u.t_id = t.a");
        let sql = source.render();
        assert!(sql.contains("t.a AS t_a"));
        assert!(sql.contains("COUNT(t.b)"));
        assert!(sql.contains("t.c AS x"));
        assert!(!sql.contains("COUNT(t.b) AS"));
    }

    #[test]
    fn clause_order_is_fixed() {
        let mut source = SqlSource::new(order_template());
        source.offset(20);
        source.limit(10);
        source.order_by("so.id DESC").unwrap();
        source.group_by("so.number").unwrap();
        source.predicate("so.number > '0'", Connective::And);
        assert_eq!(
            source.render(),
            "SELECT so.id, so.number, so.customer_id FROM sales_order so \
             WHERE so.number > '0' GROUP BY so.number ORDER BY so.id DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn order_by_rejected_twice() {
        let mut source = SqlSource::new(order_template());
        source.order_by("so.id").unwrap();
        assert!(matches!(
            source.order_by("so.number"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn order_by_rejected_when_template_orders() {
        let template = order_template().with_order_by("so.id");
        let mut source = SqlSource::new(template);
        assert!(source.order_by("so.number").is_err());
    }

    #[test]
    fn count_render_strips_order_and_limit() {
        let mut source = SqlSource::new(order_template().with_order_by("so.id"));
        source.predicate("so.number = '7'", Connective::And);
        source.limit(10);
        source.offset(5);
        assert_eq!(
            source.render_count(),
            "SELECT COUNT(*) FROM sales_order so WHERE so.number = '7'"
        );
    }

    #[test]
    fn count_render_keeps_joins() {
        let mut source = SqlSource::new(order_template());
        source.join("customer", "c", "c.id = so.customer_id");
        assert_eq!(
            source.render_count(),
            "SELECT COUNT(*) FROM sales_order so JOIN customer c ON c.id = so.customer_id"
        );
    }

    #[test]
    fn frozen_source_records_misuse() {
        let mut source = SqlSource::new(order_template());
        source.freeze();
        let frozen = source.render();

        source.predicate("so.id = 1", Connective::And);
        // the frozen SQL is unchanged
        assert_eq!(source.render(), frozen);
        // but the misuse surfaces on the checked path
        assert!(matches!(
            source.checked_sql(),
            Err(Error::BuilderMisuse(_))
        ));
    }

    #[test]
    fn checked_sql_passes_clean_source() {
        let mut source = SqlSource::new(order_template());
        source.predicate("so.id = 1", Connective::And);
        assert!(source.checked_sql().is_ok());
    }

    #[test]
    fn left_join_renders_keyword() {
        let mut source = SqlSource::new(order_template());
        source.left_join("customer", "c", "c.id = so.customer_id");
        assert!(source
            .render()
            .contains("LEFT JOIN customer c ON c.id = so.customer_id"));
        assert!(source.aliased());
    }

    #[test]
    fn template_from_join_also_aliases() {
        let template = SqlTemplate::parse(
            "SELECT o.id, c.name FROM sales_order o JOIN customer c ON c.id = o.customer_id",
        )
        .unwrap();
        let source = SqlSource::new(template);
        assert!(source.aliased());
        let sql = source.render();
        assert!(sql.contains("o.id AS o_id"));
        assert!(sql.contains("c.name AS c_name"));
    }
}
