// The fixed statement set, its SQL text, and typed parameters/rows.
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;
use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Statement {
    CreatePagesTable,
    AllPages,
    AllPagesData,
    GetPage,
    GetPageById,
    CreatePage,
    SavePage,
    DeletePage,
}

/// SQL text per statement. Any field may be overridden from the config file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SqlQueries {
    pub create_pages_table: String,
    pub all_pages: String,
    pub all_pages_data: String,
    pub get_page: String,
    pub get_page_by_id: String,
    pub create_page: String,
    pub save_page: String,
    pub delete_page: String,
}

impl Default for SqlQueries {
    fn default() -> Self {
        Self {
            create_pages_table: "CREATE TABLE IF NOT EXISTS Pages (\
                Id INTEGER PRIMARY KEY AUTOINCREMENT, \
                Name VARCHAR(255) NOT NULL, \
                Content TEXT NOT NULL)"
                .to_string(),
            all_pages: "SELECT Name FROM Pages".to_string(),
            all_pages_data: "SELECT Id, Name FROM Pages".to_string(),
            get_page: "SELECT Id, Content FROM Pages WHERE Name = ? ORDER BY Id LIMIT 1"
                .to_string(),
            get_page_by_id: "SELECT Id, Name, Content FROM Pages WHERE Id = ?".to_string(),
            create_page: "INSERT INTO Pages (Name, Content) VALUES (?, ?)".to_string(),
            save_page: "UPDATE Pages SET Content = ? WHERE Id = ?".to_string(),
            delete_page: "DELETE FROM Pages WHERE Id = ?".to_string(),
        }
    }
}

impl SqlQueries {
    pub fn get(&self, statement: Statement) -> &str {
        match statement {
            Statement::CreatePagesTable => &self.create_pages_table,
            Statement::AllPages => &self.all_pages,
            Statement::AllPagesData => &self.all_pages_data,
            Statement::GetPage => &self.get_page,
            Statement::GetPageById => &self.get_page_by_id,
            Statement::CreatePage => &self.create_page,
            Statement::SavePage => &self.save_page,
            Statement::DeletePage => &self.delete_page,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Param::Int(value) => Ok(ToSqlOutput::from(*value)),
            Param::Text(value) => Ok(ToSqlOutput::from(value.as_str())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for Column {
    fn from(value: ValueRef<'_>) -> Self {
        match SqlValue::from(value) {
            SqlValue::Null => Column::Null,
            SqlValue::Integer(value) => Column::Int(value),
            SqlValue::Real(value) => Column::Real(value),
            SqlValue::Text(value) => Column::Text(value),
            SqlValue::Blob(value) => Column::Blob(value),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: Vec<Column>,
}

impl Row {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn int(&self, index: usize) -> Result<i64, Error> {
        match self.columns.get(index) {
            Some(Column::Int(value)) => Ok(*value),
            other => Err(decode_error(index, "integer", other)),
        }
    }

    pub fn text(&self, index: usize) -> Result<&str, Error> {
        match self.columns.get(index) {
            Some(Column::Text(value)) => Ok(value),
            other => Err(decode_error(index, "text", other)),
        }
    }
}

fn decode_error(index: usize, expected: &str, found: Option<&Column>) -> Error {
    let found = match found {
        None => "missing column".to_string(),
        Some(column) => format!("{column:?}"),
    };
    Error::new(ErrorKind::Store).with_message(format!(
        "failed to decode column {index}: expected {expected}, found {found}"
    ))
}
