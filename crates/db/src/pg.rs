//! PostgreSQL/JSONB [`DocumentStore`].
//!
//! Documents live in `kb_documents` keyed by `(index_name, id)`. Field
//! queries compile to SQL/JSON path expressions evaluated in lax mode, which
//! flattens arrays the same way [`Query::matches`] does.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use wikigraph_core::types::Version;

use crate::query::{field_segments, Query, SearchRequest, TermBucket};
use crate::store::{AliasAction, DocumentStore, SearchResult, StoreError, StoredDocument};

/// Row shape for `kb_documents` reads.
type DocRow = (String, i64, Value);

fn to_document((id, version, body): DocRow) -> StoredDocument {
    StoredDocument::new(id, u64::try_from(version).unwrap_or_default(), body)
}

fn to_db_version(version: Version) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

/// A [`DocumentStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve an alias or index name to a physical index.
    async fn physical(&self, name: &str) -> Result<String, StoreError> {
        let resolved: Option<String> = sqlx::query_scalar(
            "SELECT COALESCE(
                (SELECT index_name FROM kb_aliases WHERE alias = $1),
                (SELECT name FROM kb_indices WHERE name = $1))",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        resolved.ok_or_else(|| StoreError::IndexNotFound(name.to_string()))
    }

    async fn current_version(&self, index: &str, id: &str) -> Result<Option<i64>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT version FROM kb_documents WHERE index_name = $1 AND id = $2")
                .bind(index)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

// ---------------------------------------------------------------------------
// Query compilation
// ---------------------------------------------------------------------------

/// `$."a"."b"[*]`: every leaf value under a dotted field.
fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field_segments(field) {
        path.push_str(".\"");
        for c in segment.chars() {
            if c == '"' || c == '\\' {
                path.push('\\');
            }
            path.push(c);
        }
        path.push('"');
    }
    path.push_str("[*]");
    path
}

fn like_pattern(word: &str) -> String {
    let mut escaped = String::with_capacity(word.len() + 2);
    escaped.push('%');
    for c in word.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// `jsonb_path_exists(doc, '<path> ? (<filter>)', <vars>)`.
fn push_path_filter(qb: &mut QueryBuilder<'_, Postgres>, field: &str, filter: &str, vars: Value) {
    qb.push("jsonb_path_exists(doc, ");
    qb.push_bind(format!("{} ? ({filter})", json_path(field)));
    qb.push("::jsonpath, ");
    qb.push_bind(vars);
    qb.push("::jsonb)");
}

/// Append `query` as a boolean SQL expression over the `doc` column.
fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    match query {
        Query::All => {
            qb.push("TRUE");
        }
        Query::Term { field, value } => {
            push_path_filter(qb, field, "@ == $v", json!({ "v": value }));
        }
        Query::Terms { field, values } => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            let mut vars = Map::new();
            let mut clauses = Vec::with_capacity(values.len());
            for (i, value) in values.iter().enumerate() {
                clauses.push(format!("@ == $v{i}"));
                vars.insert(format!("v{i}"), value.clone());
            }
            push_path_filter(qb, field, &clauses.join(" || "), Value::Object(vars));
        }
        Query::Range { field, gte, lte } => {
            let mut vars = Map::new();
            let mut clauses = Vec::new();
            if let Some(gte) = gte {
                clauses.push("@ >= $gte");
                vars.insert("gte".into(), gte.clone());
            }
            if let Some(lte) = lte {
                clauses.push("@ <= $lte");
                vars.insert("lte".into(), lte.clone());
            }
            if clauses.is_empty() {
                push_condition(qb, &Query::exists(field.clone()));
                return;
            }
            push_path_filter(qb, field, &clauses.join(" && "), Value::Object(vars));
        }
        Query::Match { field, text } => {
            let words: Vec<&str> = text.split_whitespace().collect();
            if words.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("EXISTS (SELECT 1 FROM jsonb_path_query(doc, ");
            qb.push_bind(json_path(field));
            qb.push("::jsonpath) AS m(value) WHERE jsonb_typeof(m.value) = 'string'");
            for word in words {
                qb.push(" AND m.value #>> '{}' ILIKE ");
                qb.push_bind(like_pattern(word));
            }
            qb.push(")");
        }
        Query::Exists { field } => {
            qb.push("EXISTS (SELECT 1 FROM jsonb_path_query(doc, ");
            qb.push_bind(json_path(field));
            qb.push("::jsonpath) AS e(value) WHERE e.value <> 'null'::jsonb)");
        }
        Query::Bool {
            must,
            should,
            must_not,
        } => {
            qb.push("(TRUE");
            for clause in must {
                qb.push(" AND ");
                push_condition(qb, clause);
            }
            for clause in must_not {
                qb.push(" AND NOT ");
                push_condition(qb, clause);
            }
            if !should.is_empty() {
                qb.push(" AND (FALSE");
                for clause in should {
                    qb.push(" OR ");
                    push_condition(qb, clause);
                }
                qb.push(")");
            }
            qb.push(")");
        }
    }
}

/// `FROM kb_documents WHERE index_name = $ AND <query>`.
fn push_filtered(qb: &mut QueryBuilder<'_, Postgres>, index: String, query: &Query) {
    qb.push(" FROM kb_documents WHERE index_name = ");
    qb.push_bind(index);
    qb.push(" AND ");
    push_condition(qb, query);
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create_index(&self, index: &str) -> Result<(), StoreError> {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM kb_aliases WHERE alias = $1)")
                .bind(index)
                .fetch_one(&self.pool)
                .await?;
        if taken {
            return Err(StoreError::IndexExists(index.to_string()));
        }
        let result = sqlx::query("INSERT INTO kb_indices (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(index)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::IndexExists(index.to_string()));
        }
        tracing::debug!(index, "Created index");
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        // Documents and aliases go with it (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM kb_indices WHERE name = $1")
            .bind(index)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::IndexNotFound(index.to_string()));
        }
        tracing::debug!(index, "Deleted index");
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, StoreError> {
        match self.physical(name).await {
            Ok(_) => Ok(true),
            Err(StoreError::IndexNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        // Committed rows are immediately visible.
        self.physical(index).await.map(|_| ())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for action in actions {
            match action {
                AliasAction::Add { alias, index } => {
                    let exists: bool =
                        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM kb_indices WHERE name = $1)")
                            .bind(index)
                            .fetch_one(&mut *tx)
                            .await?;
                    if !exists {
                        return Err(StoreError::IndexNotFound(index.clone()));
                    }
                    sqlx::query(
                        "INSERT INTO kb_aliases (alias, index_name) VALUES ($1, $2)
                         ON CONFLICT (alias) DO UPDATE
                         SET index_name = EXCLUDED.index_name, updated_at = now()",
                    )
                    .bind(alias)
                    .bind(index)
                    .execute(&mut *tx)
                    .await?;
                }
                AliasAction::Remove { alias, index } => {
                    let result =
                        sqlx::query("DELETE FROM kb_aliases WHERE alias = $1 AND index_name = $2")
                            .bind(alias)
                            .bind(index)
                            .execute(&mut *tx)
                            .await?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::AliasNotFound {
                            alias: alias.clone(),
                            index: index.clone(),
                        });
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT index_name FROM kb_aliases WHERE alias = $1")
                .bind(alias)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let index = self.physical(index).await?;
        let row = sqlx::query_as::<_, DocRow>(
            "SELECT id, version, doc FROM kb_documents WHERE index_name = $1 AND id = $2",
        )
        .bind(&index)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(to_document))
    }

    async fn create(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError> {
        let index = self.physical(index).await?;
        let result = sqlx::query(
            "INSERT INTO kb_documents (index_name, id, version, doc) VALUES ($1, $2, 1, $3)
             ON CONFLICT (index_name, id) DO NOTHING",
        )
        .bind(&index)
        .bind(id)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                index,
                id: id.to_string(),
            });
        }
        Ok(1)
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        body: Value,
        expected: Version,
    ) -> Result<Version, StoreError> {
        let index = self.physical(index).await?;
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE kb_documents SET doc = $3, version = version + 1, updated_at = now()
             WHERE index_name = $1 AND id = $2 AND version = $4
             RETURNING version",
        )
        .bind(&index)
        .bind(id)
        .bind(&body)
        .bind(to_db_version(expected))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(version) = updated {
            return Ok(u64::try_from(version).unwrap_or_default());
        }
        match self.current_version(&index, id).await? {
            None => Err(StoreError::NotFound {
                index,
                id: id.to_string(),
            }),
            Some(actual) => Err(StoreError::VersionConflict {
                index,
                id: id.to_string(),
                expected,
                actual: u64::try_from(actual).unwrap_or_default(),
            }),
        }
    }

    async fn put(&self, index: &str, id: &str, body: Value) -> Result<Version, StoreError> {
        let index = self.physical(index).await?;
        let version: i64 = sqlx::query_scalar(
            "INSERT INTO kb_documents (index_name, id, version, doc) VALUES ($1, $2, 1, $3)
             ON CONFLICT (index_name, id) DO UPDATE
             SET doc = EXCLUDED.doc, version = kb_documents.version + 1, updated_at = now()
             RETURNING version",
        )
        .bind(&index)
        .bind(id)
        .bind(&body)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(version).unwrap_or_default())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        let index = self.physical(index).await?;
        let result = sqlx::query("DELETE FROM kb_documents WHERE index_name = $1 AND id = $2")
            .bind(&index)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bulk_index(&self, index: &str, docs: Vec<StoredDocument>) -> Result<(), StoreError> {
        let index = self.physical(index).await?;
        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(
                "INSERT INTO kb_documents (index_name, id, version, doc) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (index_name, id) DO UPDATE
                 SET doc = EXCLUDED.doc, version = EXCLUDED.version, updated_at = now()",
            )
            .bind(&index)
            .bind(&doc.id)
            .bind(to_db_version(doc.version))
            .bind(&doc.body)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResult, StoreError> {
        let index = self.physical(index).await?;
        let total = self.count(&index, &request.query).await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, version, doc");
        push_filtered(&mut qb, index, &request.query);
        qb.push(" ORDER BY ");
        if let Some(sort) = &request.sort {
            qb.push("doc #> ");
            qb.push_bind(
                field_segments(&sort.field)
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            );
            qb.push(if sort.descending {
                " DESC NULLS LAST, "
            } else {
                " ASC NULLS LAST, "
            });
        }
        qb.push("id COLLATE \"C\" LIMIT ");
        qb.push_bind(i64::try_from(request.size).unwrap_or(i64::MAX));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(request.from).unwrap_or(i64::MAX));

        let rows = qb.build_query_as::<DocRow>().fetch_all(&self.pool).await?;
        Ok(SearchResult {
            total,
            hits: rows.into_iter().map(to_document).collect(),
        })
    }

    async fn count(&self, index: &str, query: &Query) -> Result<u64, StoreError> {
        let index = self.physical(index).await?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        push_filtered(&mut qb, index, query);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn terms_aggregation(
        &self,
        index: &str,
        query: &Query,
        field: &str,
        size: usize,
    ) -> Result<Vec<TermBucket>, StoreError> {
        let index = self.physical(index).await?;
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT t.value #>> '{}' AS key, COUNT(DISTINCT id) AS doc_count \
             FROM kb_documents CROSS JOIN LATERAL jsonb_path_query(doc, ",
        );
        qb.push_bind(json_path(field));
        qb.push("::jsonpath) AS t(value) WHERE index_name = ");
        qb.push_bind(index);
        qb.push(" AND jsonb_typeof(t.value) IN ('string', 'number', 'boolean') AND ");
        push_condition(&mut qb, query);
        qb.push(" GROUP BY key ORDER BY doc_count DESC, key LIMIT ");
        qb.push_bind(i64::try_from(size).unwrap_or(i64::MAX));

        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(key, doc_count)| TermBucket {
                key,
                doc_count: u64::try_from(doc_count).unwrap_or_default(),
            })
            .collect())
    }

    async fn scan_page(
        &self,
        index: &str,
        filter: Option<&Query>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let index = self.physical(index).await?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, version, doc");
        push_filtered(&mut qb, index, filter.unwrap_or(&Query::All));
        if let Some(after) = after {
            qb.push(" AND id COLLATE \"C\" > ");
            qb.push_bind(after.to_string());
        }
        qb.push(" ORDER BY id COLLATE \"C\" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = qb.build_query_as::<DocRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(to_document).collect())
    }
}
