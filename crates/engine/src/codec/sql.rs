//! SQL text dumps
//!
//! ```text
//! -- fieldcheck dataset dump
//! -- tables: 1
//!
//! CREATE TABLE "tickets" ("id" INTEGER, "status" TEXT);
//! INSERT INTO "tickets" ("id", "status") VALUES (1, 'open');
//! ```
//!
//! Column types are inferred from the records. `JSON` columns hold JSON text
//! for nested or mixed values. Absent keys are written as `NULL`, and `NULL`
//! decodes back to an absent key.

use crate::types::Tables;
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;

pub const DUMP_HEADER: &str = "-- fieldcheck dataset dump";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Json,
}

impl ColumnType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_f64() => Some(Self::Real),
            Value::Number(_) => Some(Self::Integer),
            Value::String(_) => Some(Self::Text),
            Value::Array(_) | Value::Object(_) => Some(Self::Json),
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Real) | (Self::Real, Self::Integer) => Self::Real,
            _ => Self::Json,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Json => "JSON",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "INTEGER" => Some(Self::Integer),
            "REAL" => Some(Self::Real),
            "TEXT" => Some(Self::Text),
            "BOOLEAN" => Some(Self::Boolean),
            "JSON" => Some(Self::Json),
            _ => None,
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn literal(value: Option<&Value>, column: ColumnType) -> Result<String> {
    let value = match value {
        None | Some(Value::Null) => return Ok("NULL".to_string()),
        Some(v) => v,
    };

    Ok(match (column, value) {
        (ColumnType::Json, v) => quote_str(&serde_json::to_string(v)?),
        (_, Value::Bool(true)) => "TRUE".to_string(),
        (_, Value::Bool(false)) => "FALSE".to_string(),
        (_, Value::Number(n)) => n.to_string(),
        (_, Value::String(s)) => quote_str(s),
        (_, v) => quote_str(&serde_json::to_string(v)?),
    })
}

/// Columns of a table in first-seen key order, with inferred types
fn infer_columns(table: &str, records: &[Value]) -> Result<Vec<(String, ColumnType)>> {
    let mut columns: Vec<(String, Option<ColumnType>)> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let object = record.as_object().ok_or_else(|| {
            Error::Codec(format!(
                "table '{}' record {} is not an object and cannot be dumped as SQL",
                table, index
            ))
        })?;

        for (key, value) in object {
            let kind = ColumnType::of(value);
            match columns.iter_mut().find(|(name, _)| name == key) {
                Some((_, existing)) => {
                    *existing = match (*existing, kind) {
                        (Some(a), Some(b)) => Some(a.merge(b)),
                        (a, b) => a.or(b),
                    };
                }
                None => columns.push((key.clone(), kind)),
            }
        }
    }

    Ok(columns
        .into_iter()
        .map(|(name, kind)| (name, kind.unwrap_or(ColumnType::Text)))
        .collect())
}

pub fn encode_sql(tables: &Tables) -> Result<Vec<u8>> {
    let mut out = String::new();
    out.push_str(DUMP_HEADER);
    out.push('\n');
    let _ = writeln!(out, "-- tables: {}", tables.len());

    for (table, records) in tables {
        let columns = infer_columns(table, records)?;
        let column_list = columns
            .iter()
            .map(|(name, _)| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ");
        let column_defs = columns
            .iter()
            .map(|(name, kind)| format!("{} {}", quote_ident(name), kind.keyword()))
            .collect::<Vec<_>>()
            .join(", ");

        out.push('\n');
        let _ = writeln!(out, "CREATE TABLE {} ({});", quote_ident(table), column_defs);

        for record in records {
            let values = columns
                .iter()
                .map(|(name, kind)| literal(record.get(name), *kind))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let _ = writeln!(
                out,
                "INSERT INTO {} ({}) VALUES ({});",
                quote_ident(table),
                column_list,
                values
            );
        }
    }

    Ok(out.into_bytes())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Word(String),
    LParen,
    RParen,
    Comma,
    Semi,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '-' if starts_comment(&chars) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | ')' | ',' | ';' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    _ => Token::Semi,
                });
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => {
                            if chars.peek() == Some(&c) {
                                chars.next();
                                value.push(c);
                            } else {
                                break;
                            }
                        }
                        Some(other) => value.push(other),
                        None => {
                            return Err(Error::Codec("unterminated quoted token".to_string()))
                        }
                    }
                }
                tokens.push(if c == '"' {
                    Token::Ident(value)
                } else {
                    Token::Str(value)
                });
            }
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.') => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w.is_ascii_alphanumeric() || matches!(w, '_' | '-' | '+' | '.') {
                        word.push(w);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(Error::Codec(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

/// True when the iterator is positioned at `--`
fn starts_comment(chars: &std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut lookahead = chars.clone();
    lookahead.next();
    lookahead.peek() == Some(&'-')
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    fn next(&mut self) -> Result<Token> {
        self.tokens
            .next()
            .ok_or_else(|| Error::Codec("unexpected end of dump".to_string()))
    }

    fn keyword(&mut self, expected: &str) -> Result<()> {
        match self.next()? {
            Token::Word(w) if w.eq_ignore_ascii_case(expected) => Ok(()),
            other => Err(Error::Codec(format!("expected {}, found {:?}", expected, other))),
        }
    }

    fn punct(&mut self, expected: Token) -> Result<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(Error::Codec(format!("expected {:?}, found {:?}", expected, token)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(name) => Ok(name),
            other => Err(Error::Codec(format!("expected identifier, found {:?}", other))),
        }
    }

    /// Parse a comma separated, parenthesized list
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self, Token) -> Result<T>) -> Result<Vec<T>> {
        self.punct(Token::LParen)?;
        let mut items = Vec::new();
        loop {
            match self.next()? {
                Token::RParen if items.is_empty() => return Ok(items),
                token => items.push(item(self, token)?),
            }
            match self.next()? {
                Token::Comma => continue,
                Token::RParen => return Ok(items),
                other => {
                    return Err(Error::Codec(format!("expected ',' or ')', found {:?}", other)))
                }
            }
        }
    }
}

fn parse_value(token: Token, column: ColumnType) -> Result<Option<Value>> {
    match token {
        Token::Word(w) if w.eq_ignore_ascii_case("NULL") => Ok(None),
        Token::Word(w) if w.eq_ignore_ascii_case("TRUE") => Ok(Some(Value::Bool(true))),
        Token::Word(w) if w.eq_ignore_ascii_case("FALSE") => Ok(Some(Value::Bool(false))),
        Token::Word(w) => match serde_json::from_str::<Value>(&w) {
            Ok(v @ Value::Number(_)) => Ok(Some(v)),
            _ => Err(Error::Codec(format!("invalid literal '{}'", w))),
        },
        Token::Str(s) if column == ColumnType::Json => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| Error::Codec(format!("invalid JSON column value: {}", e))),
        Token::Str(s) => Ok(Some(Value::String(s))),
        other => Err(Error::Codec(format!("expected literal, found {:?}", other))),
    }
}

pub fn decode_sql(payload: &[u8]) -> Result<Tables> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| Error::Codec(format!("SQL dump is not UTF-8: {}", e)))?;

    let mut parser = Parser {
        tokens: tokenize(text)?.into_iter(),
    };
    let mut tables = Tables::new();
    let mut schemas: HashMap<String, HashMap<String, ColumnType>> = HashMap::new();

    while let Some(token) = parser.tokens.next() {
        match token {
            Token::Word(w) if w.eq_ignore_ascii_case("CREATE") => {
                parser.keyword("TABLE")?;
                let table = parser.ident()?;
                let columns = parser.list(|p, token| {
                    let name = match token {
                        Token::Ident(name) => name,
                        other => {
                            return Err(Error::Codec(format!(
                                "expected column name, found {:?}",
                                other
                            )))
                        }
                    };
                    let kind = match p.next()? {
                        Token::Word(w) => ColumnType::from_keyword(&w)
                            .ok_or_else(|| Error::Codec(format!("unknown column type '{}'", w)))?,
                        other => {
                            return Err(Error::Codec(format!(
                                "expected column type, found {:?}",
                                other
                            )))
                        }
                    };
                    Ok((name, kind))
                })?;
                parser.punct(Token::Semi)?;

                schemas.insert(table.clone(), columns.into_iter().collect());
                tables.entry(table).or_default();
            }
            Token::Word(w) if w.eq_ignore_ascii_case("INSERT") => {
                parser.keyword("INTO")?;
                let table = parser.ident()?;
                let schema = schemas.get(&table).ok_or_else(|| {
                    Error::Codec(format!("INSERT into undeclared table '{}'", table))
                })?;
                let columns = parser.list(|_, token| match token {
                    Token::Ident(name) => Ok(name),
                    other => Err(Error::Codec(format!(
                        "expected column name, found {:?}",
                        other
                    ))),
                })?;
                parser.keyword("VALUES")?;
                let mut index = 0;
                let values = parser.list(|_, token| {
                    let column = columns.get(index).ok_or_else(|| {
                        Error::Codec(format!("too many values for table '{}'", table))
                    })?;
                    index += 1;
                    let kind = schema.get(column).copied().unwrap_or(ColumnType::Text);
                    parse_value(token, kind)
                })?;
                parser.punct(Token::Semi)?;

                if values.len() != columns.len() {
                    return Err(Error::Codec(format!(
                        "table '{}' expects {} values, found {}",
                        table,
                        columns.len(),
                        values.len()
                    )));
                }

                let mut record = Map::new();
                for (column, value) in columns.into_iter().zip(values) {
                    if let Some(value) = value {
                        record.insert(column, value);
                    }
                }
                tables.entry(table).or_default().push(Value::Object(record));
            }
            other => {
                return Err(Error::Codec(format!("unexpected statement start {:?}", other)));
            }
        }
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tickets() -> Tables {
        let mut tables = Tables::new();
        tables.insert(
            "tickets".to_string(),
            vec![
                json!({"id": 1, "status": "open", "notes": "customer's gate code: 4411"}),
                json!({"id": 2, "status": "closed", "weight": 2.5, "urgent": true}),
                json!({"id": 3, "location": {"lat": 51.5, "lng": -0.12}, "labels": ["hvac"]}),
            ],
        );
        tables
    }

    #[test]
    fn test_dump_layout() {
        let text = String::from_utf8(encode_sql(&tickets()).unwrap()).unwrap();

        assert!(text.starts_with(DUMP_HEADER));
        assert!(text.contains("CREATE TABLE \"tickets\" (\"id\" INTEGER"));
        assert!(text.contains("\"location\" JSON"));
        assert!(text.contains("'customer''s gate code: 4411'"));
        assert_eq!(text.matches("INSERT INTO \"tickets\"").count(), 3);
    }

    #[test]
    fn test_decode_restores_records() {
        let tables = tickets();
        let decoded = decode_sql(&encode_sql(&tables).unwrap()).unwrap();
        assert_eq!(decoded, tables);
    }

    #[test]
    fn test_mixed_column_becomes_json() {
        let mut tables = Tables::new();
        tables.insert(
            "readings".to_string(),
            vec![json!({"value": 1}), json!({"value": "n/a"}), json!({"value": 1.5})],
        );

        let text = String::from_utf8(encode_sql(&tables).unwrap()).unwrap();
        assert!(text.contains("\"value\" JSON"));
        assert_eq!(decode_sql(text.as_bytes()).unwrap(), tables);
    }

    #[test]
    fn test_null_decodes_as_absent() {
        let mut tables = Tables::new();
        tables.insert(
            "customers".to_string(),
            vec![json!({"id": 1, "phone": null}), json!({"id": 2, "phone": "555"})],
        );

        let decoded = decode_sql(&encode_sql(&tables).unwrap()).unwrap();
        assert_eq!(decoded["customers"][0], json!({"id": 1}));
        assert_eq!(decoded["customers"][1], json!({"id": 2, "phone": "555"}));
    }

    #[test]
    fn test_empty_table_survives() {
        let mut tables = Tables::new();
        tables.insert("audit_log".to_string(), vec![]);

        let decoded = decode_sql(&encode_sql(&tables).unwrap()).unwrap();
        assert_eq!(decoded, tables);
    }

    #[test]
    fn test_non_object_record_rejected() {
        let mut tables = Tables::new();
        tables.insert("tags".to_string(), vec![json!("plain")]);
        assert!(matches!(encode_sql(&tables), Err(Error::Codec(_))));
    }

    #[test]
    fn test_insert_without_create_rejected() {
        let dump = b"INSERT INTO \"ghost\" (\"id\") VALUES (1);";
        assert!(matches!(decode_sql(dump), Err(Error::Codec(_))));
    }

    #[test]
    fn test_truncated_dump_rejected() {
        let dump = b"CREATE TABLE \"t\" (\"id\" INTEGER);\nINSERT INTO \"t\" (\"id\") VALUES (1";
        assert!(decode_sql(dump).is_err());
    }
}
