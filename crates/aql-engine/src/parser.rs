//! Statement parsing.
//!
//! Two statement shapes are understood:
//!
//! ```text
//! CREATE TABLE m(y REAL, x REAL) FROM src [GROUP BY g] [METHOD uniform] [SIZE n]
//! SELECT f(y) FROM m [WHERE x BETWEEN lo AND hi] [GROUP BY g]
//! ```
//!
//! Everything else — nested queries, joins, arbitrary SQL — is rejected
//! outright rather than approximated.

use aql_core::{
    AggregateFn, Error, QueryDescriptor, RangePredicate, Result, SamplingMethod,
};

/// Parse one statement into a descriptor.
pub fn parse(sql: &str) -> Result<QueryDescriptor> {
    let cleaned = sql.trim().trim_end_matches(';').trim();
    if cleaned.is_empty() {
        return Err(Error::UnsupportedQuery("empty statement".to_string()));
    }

    // Space out punctuation so tokens split cleanly.
    let spaced = cleaned
        .replace('(', " ( ")
        .replace(')', " ) ")
        .replace(',', " , ");
    let lower = spaced.to_ascii_lowercase();

    if lower.contains("( select") {
        return Err(Error::UnsupportedQuery("nested queries are not supported".to_string()));
    }
    if lower.split_whitespace().any(|t| t == "join") {
        return Err(Error::UnsupportedQuery("joins are not supported".to_string()));
    }

    let tokens: Vec<&str> = spaced.split_whitespace().collect();
    let mut cursor = Cursor { tokens: &tokens, pos: 0 };

    if cursor.peek_is("create") {
        parse_create(&mut cursor)
    } else if cursor.peek_is("select") {
        parse_select(&mut cursor)
    } else {
        Err(Error::UnsupportedQuery(format!(
            "statement must start with CREATE TABLE or SELECT, got '{}'",
            tokens[0]
        )))
    }
}

struct Cursor<'a> {
    tokens: &'a [&'a str],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Result<&'a str> {
        let token = self.tokens.get(self.pos).copied().ok_or_else(|| {
            Error::UnsupportedQuery("statement ended unexpectedly".to_string())
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, keyword: &str) -> Result<()> {
        let token = self.next()?;
        if token.eq_ignore_ascii_case(keyword) {
            Ok(())
        } else {
            Err(Error::UnsupportedQuery(format!("expected '{keyword}', got '{token}'")))
        }
    }

    fn peek_is(&self, keyword: &str) -> bool {
        self.tokens
            .get(self.pos)
            .is_some_and(|t| t.eq_ignore_ascii_case(keyword))
    }

    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

fn parse_number(token: &str, what: &str) -> Result<f64> {
    token.parse::<f64>().map_err(|_| {
        Error::UnsupportedQuery(format!("expected a number for {what}, got '{token}'"))
    })
}

fn parse_create(cursor: &mut Cursor<'_>) -> Result<QueryDescriptor> {
    cursor.expect("create")?;
    cursor.expect("table")?;
    let name = cursor.next()?.to_string();

    // Column list: (y TYPE, x TYPE)
    cursor.expect("(")?;
    let y_header = cursor.next()?.to_string();
    skip_type_tokens(cursor);
    cursor.expect(",")?;
    let x_header = cursor.next()?.to_string();
    skip_type_tokens(cursor);
    cursor.expect(")")?;

    cursor.expect("from")?;
    let source = cursor.next()?.replace('\'', "");

    let mut group_by = None;
    let mut method = SamplingMethod::Uniform;
    let mut ratio = 1.0;
    while !cursor.done() {
        let token = cursor.next()?;
        if token.eq_ignore_ascii_case("group") {
            cursor.expect("by")?;
            group_by = Some(cursor.next()?.to_string());
        } else if token.eq_ignore_ascii_case("method") {
            method = cursor.next()?.parse()?;
        } else if token.eq_ignore_ascii_case("size") {
            ratio = parse_number(cursor.next()?, "SIZE")?;
        } else {
            return Err(Error::UnsupportedQuery(format!(
                "unexpected token '{token}' in CREATE TABLE"
            )));
        }
    }

    Ok(QueryDescriptor::CreateModel {
        name,
        source,
        x_header,
        y_header,
        ratio,
        method,
        group_by,
    })
}

/// Column types are advisory; accept and ignore whatever sits between the
/// header and the next delimiter.
fn skip_type_tokens(cursor: &mut Cursor<'_>) {
    while !cursor.done() && !cursor.peek_is(",") && !cursor.peek_is(")") {
        let _ = cursor.next();
    }
}

fn parse_select(cursor: &mut Cursor<'_>) -> Result<QueryDescriptor> {
    cursor.expect("select")?;
    let agg: AggregateFn = cursor.next()?.parse()?;
    cursor.expect("(")?;
    let y_header = cursor.next()?.to_string();
    cursor.expect(")")?;

    cursor.expect("from")?;
    let model = cursor.next()?.replace('\'', "");

    let mut range = None;
    let mut group_by = None;
    while !cursor.done() {
        let token = cursor.next()?;
        if token.eq_ignore_ascii_case("where") {
            let column = cursor.next()?.to_string();
            cursor.expect("between")?;
            let lower = parse_number(cursor.next()?, "range lower bound")?;
            cursor.expect("and")?;
            let upper = parse_number(cursor.next()?, "range upper bound")?;
            range = Some(RangePredicate { column, lower, upper });
        } else if token.eq_ignore_ascii_case("group") {
            cursor.expect("by")?;
            group_by = Some(cursor.next()?.to_string());
        } else if token.eq_ignore_ascii_case("and") {
            return Err(Error::UnsupportedQuery(
                "only a single BETWEEN range predicate is supported".to_string(),
            ));
        } else {
            return Err(Error::UnsupportedQuery(format!(
                "unexpected token '{token}' in SELECT"
            )));
        }
    }

    Ok(QueryDescriptor::SelectAggregate { model, agg, y_header, range, group_by })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_minimal() {
        let q = parse("create table m(price real, cost real) from sales.csv method uniform size 0.1").unwrap();
        match q {
            QueryDescriptor::CreateModel { name, source, x_header, y_header, ratio, group_by, .. } => {
                assert_eq!(name, "m");
                assert_eq!(source, "sales.csv");
                assert_eq!(y_header, "price");
                assert_eq!(x_header, "cost");
                assert_eq!(ratio, 0.1);
                assert!(group_by.is_none());
            }
            _ => panic!("expected CreateModel"),
        }
    }

    #[test]
    fn test_create_with_group_by_and_quoted_path() {
        let q = parse(
            "CREATE TABLE sales_by_store(price FLOAT, cost FLOAT) FROM '/data/store_sales.dat' GROUP BY store METHOD uniform SIZE 2000",
        )
        .unwrap();
        match q {
            QueryDescriptor::CreateModel { source, ratio, group_by, .. } => {
                assert_eq!(source, "/data/store_sales.dat");
                assert_eq!(ratio, 2000.0);
                assert_eq!(group_by.as_deref(), Some("store"));
            }
            _ => panic!("expected CreateModel"),
        }
    }

    #[test]
    fn test_select_with_range() {
        let q = parse("select avg(price) from m where cost between 1 and 10").unwrap();
        match q {
            QueryDescriptor::SelectAggregate { model, agg, y_header, range, group_by } => {
                assert_eq!(model, "m");
                assert_eq!(agg, AggregateFn::Avg);
                assert_eq!(y_header, "price");
                let range = range.unwrap();
                assert_eq!(range.column, "cost");
                assert_eq!(range.lower, 1.0);
                assert_eq!(range.upper, 10.0);
                assert!(group_by.is_none());
            }
            _ => panic!("expected SelectAggregate"),
        }
    }

    #[test]
    fn test_select_grouped_without_range() {
        let q = parse("SELECT COUNT(price) FROM m GROUP BY store").unwrap();
        match q {
            QueryDescriptor::SelectAggregate { range, group_by, .. } => {
                assert!(range.is_none());
                assert_eq!(group_by.as_deref(), Some("store"));
            }
            _ => panic!("expected SelectAggregate"),
        }
    }

    #[test]
    fn test_nested_query_rejected() {
        let err = parse("select count(y) from (select * from t) where x between 1 and 2").unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuery(_)));
    }

    #[test]
    fn test_join_rejected() {
        let err = parse("select count(y) from a join b where x between 1 and 2").unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuery(_)));
    }

    #[test]
    fn test_conjunction_rejected() {
        let err =
            parse("select count(y) from m where x between 1 and 2 and y between 3 and 4")
                .unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuery(_)));
    }

    #[test]
    fn test_unknown_statement_rejected() {
        assert!(matches!(parse("drop table m"), Err(Error::UnsupportedQuery(_))));
        assert!(matches!(parse(""), Err(Error::UnsupportedQuery(_))));
    }

    #[test]
    fn test_trailing_semicolon_ok() {
        assert!(parse("select sum(y) from m where x between 0 and 1;").is_ok());
    }
}
