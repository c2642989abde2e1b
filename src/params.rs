use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::engine::Statement;
use crate::error::DriverError;
use crate::types::NamedValue;

lazy_static! {
    static ref PARAM_NAME: Regex = Regex::new(r"@(\w+)").expect("placeholder pattern is valid");
}

/// Distinct `@name` placeholders of `query`, in order of first appearance.
#[must_use]
pub fn param_names(query: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PARAM_NAME.captures_iter(query) {
        let name = &caps[1];
        if !names.iter().any(|seen| seen == name) {
            names.push(name.to_owned());
        }
    }
    names
}

/// Bind `args` to the placeholders of `query`.
///
/// Arguments carrying a name that appears in the query bind to that
/// placeholder; every other argument binds to the placeholder at its own
/// position in the first-appearance order.
///
/// # Errors
/// Returns [`DriverError::PlaceholderMismatch`] when the argument count differs
/// from the number of distinct placeholders, and [`DriverError::Parameter`] when
/// two arguments resolve to the same placeholder.
pub fn bind_statement(query: &str, args: &[NamedValue]) -> Result<Statement, DriverError> {
    let names = param_names(query);
    if names.len() != args.len() {
        return Err(DriverError::PlaceholderMismatch {
            placeholders: names.len(),
            arguments: args.len(),
        });
    }

    let mut params = BTreeMap::new();
    for (position, arg) in args.iter().enumerate() {
        let name = match arg.name.as_deref() {
            Some(name) if names.iter().any(|known| known == name) => name,
            _ => names[position].as_str(),
        };
        if params.insert(name.to_owned(), arg.value.clone()).is_some() {
            return Err(DriverError::Parameter(format!(
                "placeholder @{name} is bound more than once"
            )));
        }
    }
    Ok(Statement::with_params(query, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Value, positional_args};

    #[test]
    fn names_are_distinct_in_first_appearance_order() {
        let names = param_names("SELECT * FROM t WHERE a = @b OR c = @a OR d = @b");
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
        assert!(param_names("SELECT 1").is_empty());
    }

    #[test]
    fn positional_arguments_follow_first_appearance() {
        let stmt = bind_statement(
            "INSERT INTO t (id, v) VALUES (@id, @v)",
            &positional_args([Value::from("k1"), Value::from(true)]),
        )
        .unwrap();
        assert_eq!(stmt.params.get("id"), Some(&Value::from("k1")));
        assert_eq!(stmt.params.get("v"), Some(&Value::Bool(true)));
    }

    #[test]
    fn repeated_placeholder_takes_one_argument() {
        let stmt = bind_statement(
            "SELECT * FROM t WHERE a = @x OR b = @x",
            &positional_args([Value::Int(7)]),
        )
        .unwrap();
        assert_eq!(stmt.params.len(), 1);
        assert_eq!(stmt.params.get("x"), Some(&Value::Int(7)));
    }

    #[test]
    fn too_few_or_too_many_arguments_are_rejected() {
        let err = bind_statement("SELECT @a, @b", &positional_args([Value::Int(1)])).unwrap_err();
        assert!(matches!(
            err,
            DriverError::PlaceholderMismatch {
                placeholders: 2,
                arguments: 1
            }
        ));

        let err = bind_statement("SELECT 1", &positional_args([Value::Int(1)])).unwrap_err();
        assert!(matches!(err, DriverError::PlaceholderMismatch { .. }));
    }

    #[test]
    fn named_arguments_override_position() {
        let args = vec![
            NamedValue::named("v", false),
            NamedValue::named("id", "k2"),
        ];
        let stmt = bind_statement("UPDATE t SET v = @v WHERE id = @id", &args).unwrap();
        assert_eq!(stmt.params.get("v"), Some(&Value::Bool(false)));
        assert_eq!(stmt.params.get("id"), Some(&Value::from("k2")));

        let swapped = vec![
            NamedValue::named("id", "k3"),
            NamedValue::named("v", true),
        ];
        let stmt = bind_statement("UPDATE t SET v = @v WHERE id = @id", &swapped).unwrap();
        assert_eq!(stmt.params.get("id"), Some(&Value::from("k3")));
        assert_eq!(stmt.params.get("v"), Some(&Value::Bool(true)));
    }

    #[test]
    fn unknown_names_fall_back_to_position() {
        let args = vec![
            NamedValue::named("nope", "k1"),
            NamedValue::named("other", 3_i64),
        ];
        let stmt = bind_statement("SELECT * FROM t WHERE id = @id AND n = @n", &args).unwrap();
        assert_eq!(stmt.params.get("id"), Some(&Value::from("k1")));
        assert_eq!(stmt.params.get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn fallback_that_leaves_a_placeholder_unbound_is_rejected() {
        let args = vec![NamedValue::named("unknown", 1_i64), NamedValue::named("id", "k1")];
        let stmt = bind_statement("SELECT * FROM t WHERE n = @n AND id = @id", &args).unwrap();
        assert_eq!(stmt.params.get("n"), Some(&Value::Int(1)));

        // @n is claimed twice: once by position, once by name; @id stays unbound.
        let args = vec![NamedValue::positional(1_i64), NamedValue::named("n", 2_i64)];
        let err = bind_statement("SELECT * FROM t WHERE n = @n AND id = @id", &args).unwrap_err();
        assert!(matches!(err, DriverError::Parameter(_)));
    }
}
