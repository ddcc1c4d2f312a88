//! Predicate trees compiled to SQL text plus a positional parameter list.
//!
//! A filter group is a JSON object keyed by column. Each value is either an
//! operator object (`{"gt": 3, "lte": 9}`) or a bare value: `null` means
//! `IS NULL`, an array means `IN`, a string holding `%` or `_` means
//! `LIKE`, anything else means `=`. Keys in one group are AND-combined;
//! several groups are OR-combined, each parenthesised.

use serde_json::{Map, Value};

use crate::error::{ident, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
}

impl Op {
    pub fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "like" => Op::Like,
            "in" => Op::In,
            "notIn" => Op::NotIn,
            "isNull" => Op::IsNull,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { column: String, op: Op, value: Value },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Parse one filter group.
    pub fn group(filter: &Value) -> Result<Self, QueryError> {
        let map = filter
            .as_object()
            .ok_or_else(|| QueryError::InvalidFilter(format!("expected an object, got {filter}")))?;
        let mut terms = Vec::new();
        for (column, value) in map {
            ident(column)?;
            match value {
                Value::Object(ops) if !ops.is_empty() => {
                    for (key, operand) in ops {
                        let op = Op::parse(key)
                            .ok_or_else(|| QueryError::UnknownOperator(key.clone()))?;
                        terms.push(compare(column, op, operand.clone()));
                    }
                }
                Value::Object(_) => {
                    return Err(QueryError::InvalidFilter(format!(
                        "empty operator object for {column}"
                    )))
                }
                bare => terms.push(compare(column, bare_op(bare), bare.clone())),
            }
        }
        Ok(Predicate::And(terms))
    }

    /// OR of several groups. Empty groups are dropped.
    pub fn any_of(groups: &[Value]) -> Result<Option<Self>, QueryError> {
        let mut parsed = Vec::new();
        for g in groups {
            let p = Predicate::group(g)?;
            if !p.is_empty() {
                parsed.push(p);
            }
        }
        Ok(match parsed.len() {
            0 => None,
            _ => Some(Predicate::Or(parsed)),
        })
    }

    fn is_empty(&self) -> bool {
        match self {
            Predicate::And(v) | Predicate::Or(v) => v.iter().all(Predicate::is_empty),
            Predicate::Compare { .. } => false,
        }
    }

    pub fn to_sql(&self, params: &mut Vec<Value>) -> Result<String, QueryError> {
        match self {
            Predicate::Compare { column, op, value } => compare_sql(column, *op, value, params),
            Predicate::And(terms) => {
                let parts = terms
                    .iter()
                    .map(|t| t.to_sql(params))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(" AND "))
            }
            Predicate::Or(groups) => {
                let parts = groups
                    .iter()
                    .map(|g| g.to_sql(params).map(|s| format!("({s})")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(" OR "))
            }
        }
    }
}

fn compare(column: &str, op: Op, value: Value) -> Predicate {
    Predicate::Compare {
        column: column.to_string(),
        op,
        value,
    }
}

fn bare_op(value: &Value) -> Op {
    match value {
        Value::Null => Op::IsNull,
        Value::Array(_) => Op::In,
        Value::String(s) if s.contains(['%', '_']) => Op::Like,
        _ => Op::Eq,
    }
}

fn scalar(column: &str, op: Op, value: &Value) -> Result<Value, QueryError> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(QueryError::InvalidFilter(format!(
            "{op:?} on {column} needs a scalar operand"
        ))),
        Value::Null => Err(QueryError::InvalidFilter(format!(
            "{op:?} on {column} cannot compare with null"
        ))),
        v => Ok(v.clone()),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn compare_sql(
    column: &str,
    op: Op,
    value: &Value,
    params: &mut Vec<Value>,
) -> Result<String, QueryError> {
    let sql = match op {
        Op::IsNull => {
            let negate = matches!(value, Value::Bool(false));
            format!("{column} IS {}NULL", if negate { "NOT " } else { "" })
        }
        Op::Eq if value.is_null() => format!("{column} IS NULL"),
        Op::Ne if value.is_null() => format!("{column} IS NOT NULL"),
        Op::In | Op::NotIn => {
            let items = value.as_array().ok_or_else(|| {
                QueryError::InvalidFilter(format!("{op:?} on {column} needs an array"))
            })?;
            match (op, items.is_empty()) {
                (Op::In, true) => "0 = 1".to_string(),
                (_, true) => "1 = 1".to_string(),
                _ => {
                    for item in items {
                        params.push(scalar(column, op, item)?);
                    }
                    let not = if op == Op::NotIn { "NOT " } else { "" };
                    format!("{column} {not}IN ({})", placeholders(items.len()))
                }
            }
        }
        _ => {
            let sym = match op {
                Op::Eq => "=",
                Op::Ne => "!=",
                Op::Gt => ">",
                Op::Gte => ">=",
                Op::Lt => "<",
                Op::Lte => "<=",
                _ => "LIKE",
            };
            params.push(scalar(column, op, value)?);
            format!("{column} {sym} ?")
        }
    };
    Ok(sql)
}

/// Build `col IN (?, ...)` for include lookups.
pub(crate) fn in_list(column: &str, values: Vec<Value>) -> Value {
    let mut ops = Map::new();
    ops.insert("in".into(), Value::Array(values));
    let mut group = Map::new();
    group.insert(column.to_string(), Value::Object(ops));
    Value::Object(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(groups: &[Value]) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = Predicate::any_of(groups)
            .unwrap()
            .map(|p| p.to_sql(&mut params).unwrap())
            .unwrap_or_default();
        (sql, params)
    }

    #[test]
    fn operators_compile_to_placeholders() {
        let (sql, params) = compile(&[json!({
            "age": {"gte": 18, "lt": 65},
            "name": {"like": "a%"},
            "role": {"in": ["a", "b"]},
            "tier": {"notIn": [3]},
            "x": {"ne": 1},
        })]);
        assert_eq!(
            sql,
            "(age >= ? AND age < ? AND name LIKE ? AND role IN (?, ?) AND tier NOT IN (?) AND x != ?)"
        );
        assert_eq!(params, vec![json!(18), json!(65), json!("a%"), json!("a"), json!("b"), json!(3), json!(1)]);
    }

    #[test]
    fn bare_values_pick_equality_like_null_or_in() {
        let (sql, params) = compile(&[json!({"a": 1, "b": "x_y", "c": null, "d": [1, 2]})]);
        assert_eq!(sql, "(a = ? AND b LIKE ? AND c IS NULL AND d IN (?, ?))");
        assert_eq!(params, vec![json!(1), json!("x_y"), json!(1), json!(2)]);

        let (sql, params) = compile(&[json!({"b": {"eq": "x_y"}})]);
        assert_eq!(sql, "(b = ?)");
        assert_eq!(params, vec![json!("x_y")]);
    }

    #[test]
    fn groups_are_parenthesised_and_or_joined() {
        let (sql, params) = compile(&[json!({"a": 1}), json!({}), json!({"b": 2, "c": 3})]);
        assert_eq!(sql, "(a = ?) OR (b = ? AND c = ?)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn empty_lists_and_null_checks() {
        let (sql, params) = compile(&[json!({"a": {"in": []}, "b": {"notIn": []}, "c": {"isNull": false}, "d": {"isNull": true}})]);
        assert_eq!(sql, "(0 = 1 AND 1 = 1 AND c IS NOT NULL AND d IS NULL)");
        assert!(params.is_empty());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            Predicate::group(&json!({"a": {"between": [1, 2]}})),
            Err(QueryError::UnknownOperator(_))
        ));
        assert!(matches!(
            Predicate::group(&json!({"a; DROP TABLE t": 1})),
            Err(QueryError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            Predicate::group(&json!([1])),
            Err(QueryError::InvalidFilter(_))
        ));
        let mut params = Vec::new();
        let gt_null = Predicate::group(&json!({"a": {"gt": null}})).unwrap();
        assert!(gt_null.to_sql(&mut params).is_err());
    }
}
