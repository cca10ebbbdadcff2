//! Record descriptors: which columns a record type reads and how.
//!
//! A record type lists its fields once through [`Record::describe`]:
//!
//! ```
//! use ephemeral_db::db::{Record, RecordDescriptor};
//!
//! #[derive(Default)]
//! struct User {
//!     id: i64,
//!     display_name: String,
//!     email: Option<String>,
//! }
//!
//! impl Record for User {
//!     fn describe() -> RecordDescriptor<Self> {
//!         RecordDescriptor::new()
//!             .field("id", |u: &mut User, v| u.id = v)
//!             .renamed("display_name", "name", |u: &mut User, v| u.display_name = v)
//!             .field("email", |u: &mut User, v| u.email = v)
//!     }
//! }
//!
//! let descriptor = User::describe();
//! assert_eq!(descriptor.column_for("display_name"), Some("name"));
//! ```

use crate::db::coerce::{CoercionError, FieldKind, FieldValue, Rule};
use crate::db::types::Value;

/// A type that rows can be materialized into.
///
/// Fields without a matching column keep their `Default` value.
pub trait Record: Default + Send + 'static {
    fn describe() -> RecordDescriptor<Self>;
}

type Assign<T> = Box<dyn Fn(&mut T, &Value, Rule) -> Result<(), CoercionError> + Send + Sync>;

/// One declared field of a record.
pub struct FieldDescriptor<T> {
    name: &'static str,
    column: String,
    kind: FieldKind,
    nullable: bool,
    assign: Assign<T>,
}

impl<T> FieldDescriptor<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Column this field reads from.
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Whether the field can represent SQL NULL.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Convert `value` under `rule` and store it. On error the record is untouched.
    pub(crate) fn assign(&self, record: &mut T, value: &Value, rule: Rule) -> Result<(), CoercionError> {
        (self.assign)(record, value, rule)
    }
}

impl<T> std::fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// Ordered field list of a record type.
pub struct RecordDescriptor<T> {
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: 'static> RecordDescriptor<T> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declare a field read from the snake_case form of its name.
    pub fn field<V, F>(self, name: &'static str, setter: F) -> Self
    where
        V: FieldValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.push(name, snake_case(name), setter)
    }

    /// Declare a field read from an explicit column name.
    pub fn renamed<V, F>(self, name: &'static str, column: impl Into<String>, setter: F) -> Self
    where
        V: FieldValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.push(name, column.into(), setter)
    }

    fn push<V, F>(mut self, name: &'static str, column: String, setter: F) -> Self
    where
        V: FieldValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let assign: Assign<T> = Box::new(move |record, value, rule| {
            setter(record, V::coerce(value, rule)?);
            Ok(())
        });
        self.fields.push(FieldDescriptor {
            name,
            column,
            kind: V::KIND,
            nullable: V::NULLABLE,
            assign,
        });
        self
    }

    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    /// Resolved column for the field called `name`.
    pub fn column_for(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.column.as_str())
    }
}

impl<T: 'static> Default for RecordDescriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RecordDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.fields).finish()
    }
}

/// Convert an identifier to snake_case.
///
/// Word boundaries are a lower-to-upper transition, every letter/digit
/// transition (`Address2Line` -> `address_2_line`) and the last capital of an
/// acronym followed by a lowercase letter (`HTTPServer` -> `http_server`).
/// Spaces, dashes and dots become underscores.
pub fn snake_case(identifier: &str) -> String {
    let chars: Vec<char> = identifier.chars().collect();
    let mut out = String::with_capacity(identifier.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, ' ' | '-' | '.') {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        let boundary = match i.checked_sub(1).map(|j| chars[j]) {
            Some(prev) if c.is_ascii_digit() => prev.is_alphabetic(),
            Some(prev) if prev.is_ascii_digit() => c.is_alphabetic(),
            Some(prev) if c.is_uppercase() => {
                prev.is_lowercase()
                    || (prev.is_uppercase()
                        && chars.get(i + 1).is_some_and(|next| next.is_lowercase()))
            }
            _ => false,
        };
        if boundary && !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug)]
    struct Account {
        id: i64,
        owner_name: String,
        balance: Option<f64>,
    }

    impl Record for Account {
        fn describe() -> RecordDescriptor<Self> {
            RecordDescriptor::new()
                .field("id", |a: &mut Account, v| a.id = v)
                .renamed("owner_name", "owner", |a: &mut Account, v| a.owner_name = v)
                .field("balance", |a: &mut Account, v| a.balance = v)
        }
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("id"), "id");
        assert_eq!(snake_case("created_at"), "created_at");
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("UserID"), "user_id");
        assert_eq!(snake_case("HTTPServer"), "http_server");
        assert_eq!(snake_case("first name"), "first_name");
    }

    #[test]
    fn test_snake_case_splits_digits() {
        assert_eq!(snake_case("Line1"), "line_1");
        assert_eq!(snake_case("Address2Line"), "address_2_line");
        assert_eq!(snake_case("V2Beta"), "v_2_beta");
        assert_eq!(snake_case("line_1"), "line_1");
        assert_eq!(snake_case("Sha256"), "sha_256");
    }

    #[test]
    fn test_snake_case_is_idempotent() {
        for ident in ["UserID", "createdAt", "HTTPServer", "Address2Line", "plain"] {
            let once = snake_case(ident);
            assert_eq!(snake_case(&once), once);
        }
    }

    #[test]
    fn test_descriptor_columns_and_nullability() {
        let descriptor = Account::describe();
        let fields = descriptor.fields();
        assert_eq!(fields.len(), 3);

        assert_eq!(fields[0].column(), "id");
        assert_eq!(fields[0].kind(), FieldKind::Int);
        assert!(!fields[0].is_nullable());

        assert_eq!(fields[1].name(), "owner_name");
        assert_eq!(fields[1].column(), "owner");

        assert_eq!(fields[2].kind(), FieldKind::Float);
        assert!(fields[2].is_nullable());
    }

    #[test]
    fn test_override_wins_over_identifier() {
        let descriptor = Account::describe();
        assert_eq!(descriptor.column_for("owner_name"), Some("owner"));
        assert_eq!(descriptor.column_for("missing"), None);
    }

    #[test]
    fn test_assign_leaves_record_untouched_on_error() {
        let descriptor = Account::describe();
        let mut account = Account::default();

        descriptor.fields()[0]
            .assign(&mut account, &Value::Int(9), Rule::Staged)
            .unwrap();
        assert_eq!(account.id, 9);

        let err = descriptor.fields()[0].assign(&mut account, &Value::Text("x".into()), Rule::Staged);
        assert!(err.is_err());
        assert_eq!(account.id, 9);
    }
}
