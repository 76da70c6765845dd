//! Identifier validation, quoting and privilege allow-lists.
//!
//! Catalog lookups bind names as parameters. DDL cannot, so every name that
//! ends up in a statement passes an allow-list here first and is quoted.

use crate::error::ValidationError;
use crate::types::Grant;

/// Longest identifier accepted (the Postgres limit).
pub const MAX_IDENTIFIER_LEN: usize = 63;

fn check<'a>(
    what: &'static str,
    value: &'a str,
    allowed: impl Fn(char) -> bool,
) -> Result<&'a str, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { what });
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            what,
            value: value.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }
    if let Some(ch) = value.chars().find(|c| !allowed(*c)) {
        return Err(ValidationError::DisallowedCharacter {
            what,
            value: value.to_string(),
            ch,
        });
    }
    Ok(value)
}

/// Database, user or owner name: `[A-Za-z_][A-Za-z0-9_-]*`.
pub fn identifier<'a>(what: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = check(what, value, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-')?;
    match value.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => Ok(value),
        _ => Err(ValidationError::InvalidStart {
            what,
            value: value.to_string(),
        }),
    }
}

pub fn encoding(value: &str) -> Result<&str, ValidationError> {
    check("encoding", value, |c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    })
}

/// Collations also carry `.` and `@` (`en_US.UTF-8`, `de_DE@euro`).
pub fn collation(value: &str) -> Result<&str, ValidationError> {
    check("collation", value, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@')
    })
}

pub fn pg_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn mysql_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Standard-conforming Postgres string literal.
pub fn pg_literal(what: &'static str, value: &str) -> Result<String, ValidationError> {
    if value.contains('\0') {
        return Err(ValidationError::NulByte { what });
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// MySQL string literal; backslash is an escape character there.
pub fn mysql_literal(what: &'static str, value: &str) -> Result<String, ValidationError> {
    if value.contains('\0') {
        return Err(ValidationError::NulByte { what });
    }
    Ok(format!(
        "'{}'",
        value.replace('\\', "\\\\").replace('\'', "''")
    ))
}

// =============================================================================
// Grants
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Mysql,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Database,
    Schema,
    Table,
    Sequence,
    Function,
}

impl ObjectType {
    /// Case-insensitive; plural forms are accepted.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DATABASE" | "DATABASES" => Some(ObjectType::Database),
            "SCHEMA" | "SCHEMAS" => Some(ObjectType::Schema),
            "TABLE" | "TABLES" => Some(ObjectType::Table),
            "SEQUENCE" | "SEQUENCES" => Some(ObjectType::Sequence),
            "FUNCTION" | "FUNCTIONS" => Some(ObjectType::Function),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Database => "DATABASE",
            ObjectType::Schema => "SCHEMA",
            ObjectType::Table => "TABLE",
            ObjectType::Sequence => "SEQUENCE",
            ObjectType::Function => "FUNCTION",
        }
    }
}

const PG_DATABASE: &[&str] = &["CREATE", "CONNECT", "TEMPORARY", "TEMP", "ALL PRIVILEGES", "ALL"];
const PG_SCHEMA: &[&str] = &["CREATE", "USAGE", "ALL PRIVILEGES", "ALL"];
const PG_TABLE: &[&str] = &[
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "TRUNCATE",
    "REFERENCES",
    "TRIGGER",
    "ALL PRIVILEGES",
    "ALL",
];
const PG_SEQUENCE: &[&str] = &["USAGE", "SELECT", "UPDATE", "ALL PRIVILEGES", "ALL"];
const PG_FUNCTION: &[&str] = &["EXECUTE", "ALL PRIVILEGES", "ALL"];

const MYSQL_DATABASE: &[&str] = &[
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "CREATE",
    "DROP",
    "ALTER",
    "INDEX",
    "REFERENCES",
    "CREATE VIEW",
    "SHOW VIEW",
    "CREATE TEMPORARY TABLES",
    "LOCK TABLES",
    "EXECUTE",
    "CREATE ROUTINE",
    "ALTER ROUTINE",
    "EVENT",
    "TRIGGER",
    "ALL PRIVILEGES",
    "ALL",
];
const MYSQL_TABLE: &[&str] = &[
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "CREATE",
    "DROP",
    "ALTER",
    "INDEX",
    "REFERENCES",
    "TRIGGER",
    "ALL PRIVILEGES",
    "ALL",
];

fn allowed(dialect: Dialect, object_type: ObjectType) -> Option<&'static [&'static str]> {
    match (dialect, object_type) {
        (Dialect::Postgres, ObjectType::Database) => Some(PG_DATABASE),
        (Dialect::Postgres, ObjectType::Schema) => Some(PG_SCHEMA),
        (Dialect::Postgres, ObjectType::Table) => Some(PG_TABLE),
        (Dialect::Postgres, ObjectType::Sequence) => Some(PG_SEQUENCE),
        (Dialect::Postgres, ObjectType::Function) => Some(PG_FUNCTION),
        (Dialect::Mysql, ObjectType::Database) => Some(MYSQL_DATABASE),
        (Dialect::Mysql, ObjectType::Table) => Some(MYSQL_TABLE),
        (Dialect::Mysql, _) => None,
    }
}

/// A grant whose object type and privileges passed the allow-list,
/// normalized to canonical spelling and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedGrant {
    pub object_type: ObjectType,
    pub privileges: Vec<&'static str>,
}

impl CheckedGrant {
    pub fn privilege_list(&self) -> String {
        self.privileges.join(", ")
    }
}

pub fn check_grant(dialect: Dialect, grant: &Grant) -> Result<CheckedGrant, ValidationError> {
    let (object_type, allow) = ObjectType::parse(&grant.object_type)
        .and_then(|t| allowed(dialect, t).map(|allow| (t, allow)))
        .ok_or_else(|| ValidationError::UnsupportedObjectType {
            object_type: grant.object_type.clone(),
            engine: dialect.name(),
        })?;
    if grant.privileges.is_empty() {
        return Err(ValidationError::EmptyGrant {
            object_type: grant.object_type.clone(),
        });
    }

    let mut privileges = Vec::with_capacity(grant.privileges.len());
    for privilege in &grant.privileges {
        let normalized = privilege
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let canonical = allow
            .iter()
            .copied()
            .find(|p| *p == normalized)
            .ok_or_else(|| ValidationError::UnsupportedPrivilege {
                privilege: privilege.clone(),
                object_type: object_type.as_str(),
            })?;
        if !privileges.contains(&canonical) {
            privileges.push(canonical);
        }
    }
    Ok(CheckedGrant {
        object_type,
        privileges,
    })
}
