//! SQL text helpers for the MySQL connector.

/// Databases that are never offered as collections.
pub const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

/// MySQL max placeholders per statement.
pub const MAX_PLACEHOLDERS: usize = 65535;

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Qualify a table name with its database.
pub fn qualify_table(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// Turn `SHOW CREATE TABLE` output into a statement that is a no-op when
/// the table already exists.
pub fn create_if_not_exists(ddl: &str) -> String {
    let trimmed = ddl.trim_start();
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("CREATE TABLE IF NOT EXISTS") {
        return trimmed.to_string();
    }
    for prefix in ["CREATE TEMPORARY TABLE", "CREATE TABLE"] {
        if upper.starts_with(prefix) {
            return format!("{} IF NOT EXISTS{}", prefix, &trimmed[prefix.len()..]);
        }
    }
    trimmed.to_string()
}

/// Multi-row `INSERT` of `rows` rows of `columns`.
pub fn insert_statement(qualified_table: &str, columns: &[String], rows: usize) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders_per_row = format!("({})", vec!["?"; columns.len()].join(", "));
    let all_placeholders: Vec<String> = std::iter::repeat_n(placeholders_per_row, rows).collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        col_list.join(", "),
        all_placeholders.join(", ")
    )
}

/// Multi-row upsert for `rows` rows of `columns`.
///
/// Only meaningful for tables with a primary key: a row that collides on
/// it replaces the stored row.
pub fn upsert_statement(qualified_table: &str, columns: &[String], rows: usize) -> String {
    let updates: Vec<String> = columns
        .iter()
        .map(|c| {
            let c = quote_ident(c);
            format!("{c} = VALUES({c})")
        })
        .collect();

    format!(
        "{} ON DUPLICATE KEY UPDATE {}",
        insert_statement(qualified_table, columns, rows),
        updates.join(", ")
    )
}

/// Paged read in a stable order.
///
/// Keyed tables are ordered by primary key. With `after_key` the page
/// starts just past a key bound as the leading parameters (keyset paging);
/// otherwise it binds `LIMIT ? OFFSET ?`. Keyless tables are ordered by
/// every column and always page by offset.
pub fn select_page(
    qualified_table: &str,
    columns: &[String],
    primary_key: &[String],
    after_key: bool,
) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let select = format!("SELECT {} FROM {}", col_list.join(", "), qualified_table);

    if primary_key.is_empty() {
        return format!("{} ORDER BY {} LIMIT ? OFFSET ?", select, col_list.join(", "));
    }

    let keys: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
    let order = keys.join(", ");
    if !after_key {
        return format!("{} ORDER BY {} LIMIT ? OFFSET ?", select, order);
    }

    let condition = if keys.len() == 1 {
        format!("{} > ?", keys[0])
    } else {
        format!("({}) > ({})", order, vec!["?"; keys.len()].join(", "))
    };
    format!("{} WHERE {} ORDER BY {} LIMIT ?", select, condition, order)
}
