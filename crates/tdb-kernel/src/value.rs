use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested structures are stored as their JSON text.
        other => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

pub(crate) fn row_object(columns: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let mut obj = Map::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        obj.insert(name.clone(), from_sql(row.get_ref(idx)?));
    }
    Ok(Value::Object(obj))
}

pub(crate) fn row_array(width: usize, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let mut out = Vec::with_capacity(width);
    for idx in 0..width {
        out.push(from_sql(row.get_ref(idx)?));
    }
    Ok(Value::Array(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_scalars_map_to_sqlite_affinities() {
        assert_eq!(to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql(&json!(7)), SqlValue::Integer(7));
        assert_eq!(to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(to_sql(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(to_sql(&json!({"a": 1})), SqlValue::Text("{\"a\":1}".into()));
        assert_eq!(to_sql(&Value::Null), SqlValue::Null);
    }

    #[test]
    fn sqlite_values_map_back_to_json() {
        assert_eq!(from_sql(ValueRef::Integer(3)), json!(3));
        assert_eq!(from_sql(ValueRef::Real(f64::NAN)), Value::Null);
        assert_eq!(from_sql(ValueRef::Text(b"hi")), json!("hi"));
        assert_eq!(from_sql(ValueRef::Blob(&[1, 2])), json!([1, 2]));
    }
}
