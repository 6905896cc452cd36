use serde::{Deserialize, Serialize};

use super::query::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Primary,
    Indexed,
    Unique,
    #[default]
    None,
}

impl KeyKind {
    /// MySQL `COLUMN_KEY` codes: PRI, MUL, UNI.
    pub fn from_mysql_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "PRI" => KeyKind::Primary,
            "MUL" => KeyKind::Indexed,
            "UNI" => KeyKind::Unique,
            _ => KeyKind::None,
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            KeyKind::Primary => Some("PRIMARY KEY"),
            KeyKind::Indexed => Some("INDEXED"),
            KeyKind::Unique => Some("UNIQUE"),
            KeyKind::None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub key: KeyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Introspected description of one table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub row_count: i64,
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub sample_rows: Vec<Row>,
}

/// Embedded description of a table, as stored in the vector index.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    pub id: String,
    pub table_name: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_kind_from_mysql_code() {
        assert_eq!(KeyKind::from_mysql_code("PRI"), KeyKind::Primary);
        assert_eq!(KeyKind::from_mysql_code("mul"), KeyKind::Indexed);
        assert_eq!(KeyKind::from_mysql_code("UNI"), KeyKind::Unique);
        assert_eq!(KeyKind::from_mysql_code(""), KeyKind::None);
        assert_eq!(KeyKind::None.label(), None);
    }
}
