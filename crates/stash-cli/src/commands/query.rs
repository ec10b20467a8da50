use serde_json::Value;

use stash_core::Query;

use crate::app::AppContext;
use crate::cli::QueryArgs;
use crate::commands::items::parse_value;
use crate::output::{print_json, query_table};

/// Split `path=value`; the value is parsed like `stash set` values.
pub fn parse_filter(raw: &str) -> anyhow::Result<(String, Value)> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid filter (expected PATH=VALUE): {}", raw))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(anyhow::anyhow!("Invalid filter (empty path): {}", raw));
    }
    Ok((path.to_string(), parse_value(value)))
}

pub fn build_query(args: &QueryArgs) -> anyhow::Result<Query> {
    let mut query = Query::new().offset(args.offset).select(args.select.clone());
    for raw in &args.filters {
        let (path, value) = parse_filter(raw)?;
        query = query.filter(path, value);
    }
    if let Some(order) = &args.order_by {
        query = query.order_by(order.clone());
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

pub fn handle_query(ctx: &AppContext, args: &QueryArgs) -> anyhow::Result<()> {
    let query = build_query(args)?;
    let stash = ctx.open_stash()?;
    let result = stash.query(&query)?;

    if args.json {
        return print_json(&result);
    }
    if result.rows.is_empty() {
        if !ctx.quiet() {
            println!("No matching items");
        }
        return Ok(());
    }
    println!("{}", query_table(&result.rows));
    if !ctx.quiet() {
        println!("{} of {} matching items", result.rows.len(), result.total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("metadata.tags=work").unwrap(),
            ("metadata.tags".to_string(), json!("work"))
        );
        assert_eq!(
            parse_filter("value.n=2").unwrap(),
            ("value.n".to_string(), json!(2))
        );
        assert_eq!(
            parse_filter("value.note=a=b").unwrap(),
            ("value.note".to_string(), json!("a=b"))
        );
        assert!(parse_filter("no-equals").is_err());
        assert!(parse_filter("=1").is_err());
    }

    #[test]
    fn test_build_query() {
        let args = QueryArgs {
            filters: vec!["metadata.tags=a".to_string()],
            order_by: Some("key:desc".to_string()),
            limit: Some(5),
            offset: 2,
            select: vec!["key".to_string()],
            json: false,
        };
        let query = build_query(&args).unwrap();
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters.get("metadata.tags"), Some(&json!("a")));
        assert_eq!(query.order_by.as_deref(), Some("key:desc"));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, 2);
        assert_eq!(query.select, vec!["key".to_string()]);
    }
}
