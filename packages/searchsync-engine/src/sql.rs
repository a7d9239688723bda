//! SQL composition for requeries and backfill pages
//!
//! Every injected predicate uses `?` placeholders; values are bound by the
//! data source. A small scanner tracks parenthesis depth and string
//! literals so keywords inside sub-selects or quotes are never matched.

/// A keyword occurrence found by `scan_words`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Word<'a> {
    text: &'a str,
    start: usize,
    end: usize,
    depth: usize,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'`' | b'.')
}

fn scan_words(sql: &str) -> Vec<Word<'_>> {
    let bytes = sql.as_bytes();
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                words.push(Word {
                    text: &sql[start..i],
                    start,
                    end: i,
                    depth,
                });
            }
            _ => i += 1,
        }
    }
    words
}

/// Strip backticks from an identifier
pub fn clean_column(name: &str) -> String {
    name.replace('`', "")
}

/// Split off the trailing `GROUP BY` clause.
///
/// Picks the first top-level `GROUP BY` with no top-level `ON` after it, so
/// a query whose join condition follows a grouped clause is left intact.
/// Returns the head and the text after `GROUP BY`.
pub fn split_group_by(sql: &str) -> (&str, Option<&str>) {
    let words: Vec<_> = scan_words(sql).into_iter().filter(|w| w.depth == 0).collect();

    for (i, pair) in words.windows(2).enumerate() {
        if !(pair[0].text.eq_ignore_ascii_case("GROUP") && pair[1].text.eq_ignore_ascii_case("BY")) {
            continue;
        }
        let join_follows = words[i + 2..]
            .iter()
            .any(|w| w.text.eq_ignore_ascii_case("ON"));
        if join_follows {
            continue;
        }
        return (&sql[..pair[0].start], Some(&sql[pair[1].end..]));
    }
    (sql, None)
}

pub fn has_top_level_where(sql: &str) -> bool {
    scan_words(sql)
        .iter()
        .any(|w| w.depth == 0 && w.text.eq_ignore_ascii_case("WHERE"))
}

/// Append `condition` to the query's filter, before any `GROUP BY`.
///
/// Uses `WHERE` when the query has no top-level filter yet, `AND` otherwise.
pub fn inject_condition(sql: &str, condition: &str) -> String {
    let (head, group_by) = split_group_by(sql);
    let head = head.trim_end();
    let joiner = if has_top_level_where(head) { "AND" } else { "WHERE" };

    let mut out = format!("{} {} {}", head, joiner, condition);
    if let Some(tail) = group_by {
        out.push_str(" GROUP BY ");
        out.push_str(tail.trim());
    }
    out
}

/// `a = ? AND b = ?` over qualified or bare column names
pub fn equality_conjunction<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| format!("{} = ?", c.as_ref()))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Wrap the defining query and filter on its output fields
pub fn update_by_query_sql<S: AsRef<str>>(base_sql: &str, fields: &[S]) -> String {
    let filters: Vec<String> = fields
        .iter()
        .map(|f| format!("_v.{}", clean_column(f.as_ref())))
        .collect();
    format!(
        "SELECT * FROM ({}) _v WHERE {}",
        base_sql.trim(),
        equality_conjunction(&filters)
    )
}

/// Re-select a derived table scoped by its join columns
pub fn sub_query_sql<S: AsRef<str>>(sub_sql: &str, alias: &str, columns: &[S]) -> String {
    let filters: Vec<String> = columns
        .iter()
        .map(|c| format!("{}.{}", alias, clean_column(c.as_ref())))
        .collect();
    format!(
        "SELECT * FROM ({}) {} WHERE {}",
        sub_sql.trim(),
        alias,
        equality_conjunction(&filters)
    )
}

/// Rewrite `FROM logical` / `JOIN logical` at the top level to `physical`
pub fn replace_table(sql: &str, logical: &str, physical: &str) -> String {
    let words: Vec<_> = scan_words(sql).into_iter().filter(|w| w.depth == 0).collect();
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;

    for pair in words.windows(2) {
        let keyword = pair[0].text;
        if !(keyword.eq_ignore_ascii_case("FROM") || keyword.eq_ignore_ascii_case("JOIN")) {
            continue;
        }
        let name = clean_column(pair[1].text);
        let bare = name.rsplit('.').next().unwrap_or(&name);
        if bare.eq_ignore_ascii_case(logical) {
            out.push_str(&sql[last..pair[1].start]);
            out.push_str(physical);
            last = pair[1].end;
        }
    }
    out.push_str(&sql[last..]);
    out
}

/// Substitute `{}` placeholders with `?`, returning the count replaced
pub fn bind_placeholders(template: &str) -> (String, usize) {
    let count = template.matches("{}").count();
    (template.replace("{}", "?"), count)
}

/// Drop a leading `WHERE` or `AND` from a configured condition
pub fn strip_leading_joiner(condition: &str) -> &str {
    let trimmed = condition.trim();
    for keyword in ["WHERE", "AND"] {
        let matches_keyword = trimmed
            .get(..keyword.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(keyword));
        if matches_keyword
            && trimmed
                .as_bytes()
                .get(keyword.len())
                .is_some_and(|b| b.is_ascii_whitespace())
        {
            return trimmed[keyword.len()..].trim_start();
        }
    }
    trimmed
}
