// ABOUTME: View definition transpilation and replication
// ABOUTME: Rewrites source-dialect view SQL through an ordered rule list

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::db::{SqlConnection, SqlValue};

/// One textual rewrite step: no SQL parsing, just an ordered substitution.
pub struct ReplacementRule {
    pattern: Regex,
    replacement: &'static str,
}

impl ReplacementRule {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("invalid rewrite pattern"),
            replacement,
        }
    }

    pub fn apply(&self, sql: &str) -> String {
        self.pattern.replace_all(sql, self.replacement).into_owned()
    }
}

/// The canonical rule set, in application order. Later rules depend on the
/// earlier ones having normalized the keyword and stripped qualifiers.
pub fn rewrite_rules() -> &'static [ReplacementRule] {
    static RULES: OnceLock<Vec<ReplacementRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            // Canonical uppercase creation keyword.
            ReplacementRule::new(r"(?i)create\s+view", "CREATE VIEW"),
            // Owner-qualifier prefixes disappear; the target has no dbo.
            ReplacementRule::new(r"(?i)\[?dbo\]?\.", ""),
            // The source dialect's LIKE escape character, removed wherever it
            // appears. Coarse: it cannot tell wildcards from literal percent
            // signs inside string constants.
            ReplacementRule::new("%", ""),
            // Bracket-delimited identifiers become backtick-quoted.
            ReplacementRule::new(r"\[([^\]\[]+)\]", "`$1`"),
        ]
    })
}

/// Rewrite a source-dialect view definition into the target dialect.
/// Pure text transformation; each rule's output feeds the next rule.
pub fn translate_view_definition(sql: &str) -> String {
    rewrite_rules()
        .iter()
        .fold(sql.to_string(), |acc, rule| rule.apply(&acc))
}

/// List the source database's views as name → definition text.
pub async fn list_source_views(
    conn: &mut dyn SqlConnection,
) -> Result<BTreeMap<String, String>> {
    let rs = conn
        .query(
            "SELECT name, object_definition(object_id) AS definition FROM sys.views",
            &[],
        )
        .await
        .context("listing source views")?;

    let mut views = BTreeMap::new();
    for row in &rs.rows {
        let name = match rs.value(row, "name") {
            Some(SqlValue::Text(s)) => s.clone(),
            other => anyhow::bail!("unexpected view name value {other:?}"),
        };
        match rs.value(row, "definition") {
            Some(SqlValue::Text(def)) => {
                views.insert(name, def.clone());
            }
            _ => {
                // Definitions can be unreadable (encrypted views); skip them.
                tracing::warn!(view = %name, "view definition unreadable, skipping");
            }
        }
    }
    Ok(views)
}

/// List the target database's views as name → definition text.
pub async fn list_target_views(
    conn: &mut dyn SqlConnection,
    schema: &str,
) -> Result<BTreeMap<String, String>> {
    let sql = format!(
        "SELECT TABLE_NAME, VIEW_DEFINITION FROM information_schema.views \
         WHERE TABLE_SCHEMA = {}",
        conn.placeholder(1)
    );
    let rs = conn
        .query(&sql, &[SqlValue::Text(schema.to_string())])
        .await
        .with_context(|| format!("listing target views for schema {schema}"))?;

    let mut views = BTreeMap::new();
    for row in &rs.rows {
        if let (Some(SqlValue::Text(name)), Some(SqlValue::Text(def))) = (
            rs.value(row, "TABLE_NAME"),
            rs.value(row, "VIEW_DEFINITION"),
        ) {
            views.insert(name.clone(), def.clone());
        }
    }
    Ok(views)
}

/// Create every source view missing on the target from its transpiled
/// definition. Each view is independent: a failed statement is logged and the
/// remaining views still run.
pub async fn replicate_views(
    source: &mut dyn SqlConnection,
    target: &mut dyn SqlConnection,
    schema: &str,
) -> Result<u64> {
    let source_views = list_source_views(source).await?;
    let target_views = list_target_views(target, schema).await?;

    let mut created = 0u64;
    for (name, definition) in &source_views {
        if target_views.contains_key(name) {
            continue;
        }
        let translated = translate_view_definition(definition);
        match target.execute(&translated, &[]).await {
            Ok(affected) => {
                tracing::info!(schema, view = %name, "created view, {affected} rows affected");
                created += 1;
            }
            Err(e) => {
                tracing::error!(schema, view = %name, "failed to create view: {e:?}");
            }
        }
    }
    Ok(created)
}
