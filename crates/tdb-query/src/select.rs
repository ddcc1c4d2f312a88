use serde_json::Value;

use crate::error::{ident, QueryError};
use crate::filter::Predicate;
use crate::include::Include;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(QueryError::InvalidFilter(format!(
                "unknown sort direction {other:?}"
            ))),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

fn parse_order(spec: &Value) -> Result<Vec<(String, Direction)>, String> {
    let map = spec
        .as_object()
        .ok_or_else(|| format!("orderBy expects an object, got {spec}"))?;
    map.iter()
        .map(|(column, dir)| {
            let dir = dir
                .as_str()
                .ok_or_else(|| format!("sort direction for {column} must be a string"))?;
            let dir = Direction::parse(dir).map_err(|e| match e {
                QueryError::InvalidFilter(msg) => msg,
                other => other.to_string(),
            })?;
            Ok((column.clone(), dir))
        })
        .collect()
}

/// A compiled statement ready for `run`.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Select builder. Inputs are validated when compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) table: String,
    columns: Vec<String>,
    groups: Vec<Value>,
    /// Sort keys in call order.
    order: Vec<(String, Direction)>,
    /// First malformed `order_by` input, reported by `compile`.
    order_error: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    pub(crate) includes: Vec<Include>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            groups: Vec::new(),
            order: Vec::new(),
            order_error: None,
            limit: None,
            offset: None,
            includes: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the filter with a single group.
    pub fn r#where(mut self, filter: Value) -> Self {
        self.groups = vec![filter];
        self
    }

    /// Add an alternative group, OR-combined with the existing ones.
    pub fn or_where(mut self, filter: Value) -> Self {
        self.groups.push(filter);
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    /// `{"column": "asc"|"desc", ...}`; keys sort in the order written.
    pub fn order_by(mut self, spec: Value) -> Self {
        match parse_order(&spec) {
            Ok(terms) => self.order.extend(terms),
            Err(msg) => {
                self.order_error.get_or_insert(msg);
            }
        }
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Attach related rows by naming convention; see [`Include::Auto`].
    pub fn include(mut self, table: impl Into<String>) -> Self {
        self.includes.push(Include::Auto {
            table: table.into(),
        });
        self
    }

    pub fn include_with(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    fn order_terms(&self) -> Result<Vec<String>, QueryError> {
        if let Some(msg) = &self.order_error {
            return Err(QueryError::InvalidFilter(msg.clone()));
        }
        self.order
            .iter()
            .map(|(column, dir)| Ok(format!("{} {}", ident(column)?, dir.sql())))
            .collect()
    }

    pub(crate) fn where_clause(
        groups: &[Value],
        params: &mut Vec<Value>,
    ) -> Result<String, QueryError> {
        Ok(match Predicate::any_of(groups)? {
            Some(p) => format!(" WHERE {}", p.to_sql(params)?),
            None => String::new(),
        })
    }

    pub(crate) fn filter_groups(&self) -> &[Value] {
        &self.groups
    }

    /// `SELECT <cols> FROM <table> WHERE .. ORDER BY .. LIMIT .. OFFSET ..`
    pub fn compile(&self) -> Result<Compiled, QueryError> {
        let table = ident(&self.table)?;
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| ident(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };
        let mut params = Vec::new();
        let mut sql = format!("SELECT {columns} FROM {table}");
        sql.push_str(&Self::where_clause(&self.groups, &mut params)?);
        let order = self.order_terms()?;
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok(Compiled { sql, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn where_order_limit_compiles_in_clause_order() {
        let q = Query::from("t")
            .r#where(json!({"a": {"eq": 1}}))
            .order_by(json!({"b": "desc"}))
            .limit(2);
        let c = q.compile().unwrap();
        assert_eq!(c.sql, "SELECT * FROM t WHERE (a = ?) ORDER BY b DESC LIMIT 2");
        assert_eq!(c.params, vec![json!(1)]);
    }

    #[test]
    fn or_where_groups_are_or_joined() {
        let c = Query::from("t")
            .r#where(json!({"a": 1, "b": 2}))
            .or_where(json!({"c": {"gt": 3}}))
            .compile()
            .unwrap();
        assert_eq!(c.sql, "SELECT * FROM t WHERE (a = ? AND b = ?) OR (c > ?)");
        assert_eq!(c.params, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn projection_and_pagination() {
        let c = Query::from("users")
            .select(["id", "email"])
            .order("id", Direction::Asc)
            .limit(10)
            .offset(20)
            .compile()
            .unwrap();
        assert_eq!(c.sql, "SELECT id, email FROM users ORDER BY id ASC LIMIT 10 OFFSET 20");

        let c = Query::from("users").offset(5).compile().unwrap();
        assert_eq!(c.sql, "SELECT * FROM users LIMIT -1 OFFSET 5");
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(Query::from("t; DROP TABLE x").compile().is_err());
        assert!(Query::from("t").select(["a b"]).compile().is_err());
        assert!(Query::from("t").order_by(json!({"b": "sideways"})).compile().is_err());
        assert!(Query::from("t").order("1b", Direction::Asc).compile().is_err());
        assert!(Query::from("t").order_by(json!(["b"])).compile().is_err());
    }

    #[test]
    fn sort_keys_keep_the_callers_priority() {
        let c = Query::from("t")
            .order_by(json!({"z": "desc", "a": "asc"}))
            .compile()
            .unwrap();
        assert_eq!(c.sql, "SELECT * FROM t ORDER BY z DESC, a ASC");

        let c = Query::from("t")
            .order("z", Direction::Desc)
            .order_by(json!({"a": "asc"}))
            .order("m", Direction::Asc)
            .compile()
            .unwrap();
        assert_eq!(c.sql, "SELECT * FROM t ORDER BY z DESC, a ASC, m ASC");
    }
}
