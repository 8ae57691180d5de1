//! SQL statement builders shared by every store.
//!
//! Statements use `?` placeholders, which both CrateDB's HTTP endpoint and
//! DuckDB accept. The PostgreSQL reader substitutes its own `$n` parameters.

use crate::config::TrackingColumns;

/// Quote an identifier, quoting each segment of a schema-qualified name.
///
/// ```
/// use pg_cratedb_sync::sql::quote_ident;
/// assert_eq!(quote_ident("doc.products"), "\"doc\".\"products\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| {
            let mut quoted = String::with_capacity(part.len() + 2);
            quoted.push('"');
            for ch in part.chars() {
                if ch == '"' {
                    quoted.push('"');
                }
                quoted.push(ch);
            }
            quoted.push('"');
            quoted
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a single column name (never split on dots).
fn quote_column(column: &str) -> String {
    format!("\"{}\"", column.replace('"', "\"\""))
}

/// Rows sharing the newest modification timestamp of `table`.
///
/// ```sql
/// SELECT * FROM "products"
/// WHERE "updated_at" = (SELECT MAX("updated_at") FROM "products")
/// ```
pub fn latest_batch_query(table: &str, columns: &TrackingColumns) -> String {
    let table = quote_ident(table);
    let updated_at = quote_column(&columns.updated_at);
    format!(
        "SELECT * FROM {table} WHERE {updated_at} = (SELECT MAX({updated_at}) FROM {table})"
    )
}

/// Rows modified after the watermark bound by `param`, unordered.
pub fn changed_since_query(table: &str, columns: &TrackingColumns, param: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} > {param}",
        quote_ident(table),
        quote_column(&columns.updated_at)
    )
}

/// Rows modified after the watermark bound by `param`, oldest first.
pub fn since_watermark_query(table: &str, columns: &TrackingColumns, param: &str) -> String {
    format!(
        "{} ORDER BY {}",
        changed_since_query(table, columns, param),
        quote_column(&columns.updated_at)
    )
}

/// `ORDER BY` clause on the modification column of an aliased subquery.
pub fn order_by_updated_at(alias: &str, columns: &TrackingColumns) -> String {
    format!(
        "ORDER BY {}.{}",
        quote_column(alias),
        quote_column(&columns.updated_at)
    )
}

/// Delete a single row by identifier.
pub fn delete_statement(table: &str, id_column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(table),
        quote_column(id_column)
    )
}

/// Insert a row, updating every non-identifier column on identifier conflict.
///
/// ```sql
/// INSERT INTO "products" ("id", "name") VALUES (?, ?)
/// ON CONFLICT ("id") DO UPDATE SET "name" = excluded."name"
/// ```
pub fn upsert_statement<S: AsRef<str>>(table: &str, id_column: &str, columns: &[S]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_column(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ");

    let placeholders = vec!["?"; columns.len()].join(", ");

    let updates: Vec<String> = columns
        .iter()
        .map(AsRef::as_ref)
        .filter(|c| *c != id_column)
        .map(|c| {
            let quoted = quote_column(c);
            format!("{quoted} = excluded.{quoted}")
        })
        .collect();

    // Only the identifier present: nothing to update.
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_ident(table),
        column_list,
        placeholders,
        quote_column(id_column),
        conflict_action
    )
}

/// Add a column to an existing table.
pub fn add_column_statement(table: &str, column: &str, column_type: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_column(column),
        column_type
    )
}
