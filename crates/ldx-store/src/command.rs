//! Command language.
//!
//! A deliberately small statement set, enough to browse and edit a store
//! from a prompt:
//!
//! ```text
//! SELECT $ | * | COUNT(*) | path[, path...] | literal
//!     [FROM coll] [WHERE path = literal] [LIMIT n]
//! INSERT INTO coll VALUES doc[, doc...]
//! DELETE coll [WHERE path = literal]
//! DROP COLLECTION coll
//! RENAME COLLECTION old TO new
//! ```
//!
//! Keywords are case-insensitive and a trailing `;` is allowed. Paths are
//! dotted field names with an optional `$.` prefix. Literals are canonical
//! text values (JSON with extended markers) or single-quoted strings.

use ldx_types::{text, Document, Value};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::image::StoreImage;

/// Field name wrapping computed select results.
pub const EXPR_FIELD: &str = "expr";

/// A field path such as `address.city`.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Name used for the projected field (the last segment).
    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Resolve the path against a document.
    pub fn resolve<'a>(&self, doc: &'a Document) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut current = doc.get(first)?;
        for segment in rest {
            current = current.as_document()?.get(segment)?;
        }
        Some(current)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// `$` or `*`: the whole document.
    Root,
    /// `COUNT(*)`.
    Count,
    Fields(Vec<FieldPath>),
    Literal(Value),
}

/// `WHERE path = literal`.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub path: FieldPath,
    pub value: Value,
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        self.path
            .resolve(doc)
            .is_some_and(|found| values_equal(found, &self.value))
    }
}

/// A parsed statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select {
        projection: Projection,
        from: Option<String>,
        filter: Option<Filter>,
        limit: Option<usize>,
    },
    Insert {
        collection: String,
        documents: Vec<Document>,
    },
    Delete {
        collection: String,
        filter: Option<Filter>,
    },
    DropCollection(String),
    RenameCollection {
        from: String,
        to: String,
    },
}

impl Statement {
    /// Whether executing the statement can change the store.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Select { .. })
    }
}

/// Result of executing a statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub values: Vec<Value>,
    /// Whether the image changed and needs persisting.
    pub mutated: bool,
}

/// Parse a single statement.
pub fn parse(input: &str) -> StoreResult<Statement> {
    let mut parser = Parser::new(input);
    let statement = parser.statement()?;
    parser.finish()?;
    Ok(statement)
}

/// Parse and run a statement against an image.
///
/// A failing statement leaves the image unchanged.
pub fn execute(image: &mut StoreImage, input: &str) -> StoreResult<Outcome> {
    let statement = parse(input)?;
    debug!(?statement, "executing command");
    run(image, statement)
}

fn run(image: &mut StoreImage, statement: Statement) -> StoreResult<Outcome> {
    match statement {
        Statement::Select {
            projection,
            from,
            filter,
            limit,
        } => select(image, projection, from, filter, limit),
        Statement::Insert {
            collection,
            documents,
        } => {
            let mut staged = image.clone();
            let count = documents.len();
            for doc in documents {
                staged.insert(&collection, doc)?;
            }
            *image = staged;
            Ok(Outcome {
                values: vec![Value::Int32(count as i32)],
                mutated: count > 0,
            })
        }
        Statement::Delete { collection, filter } => {
            let coll = image
                .collection(&collection)
                .ok_or_else(|| StoreError::CollectionNotFound(collection.clone()))?;
            let ids: Vec<Value> = coll
                .documents()
                .filter(|doc| filter.as_ref().map_or(true, |f| f.matches(doc)))
                .filter_map(|doc| doc.id().cloned())
                .collect();
            let deleted = ids
                .iter()
                .filter(|id| image.delete(&collection, id))
                .count();
            Ok(Outcome {
                values: vec![Value::Int32(deleted as i32)],
                mutated: deleted > 0,
            })
        }
        Statement::DropCollection(name) => {
            let dropped = image.drop_collection(&name);
            Ok(Outcome {
                values: vec![Value::Boolean(dropped)],
                mutated: dropped,
            })
        }
        Statement::RenameCollection { from, to } => {
            image.rename_collection(&from, &to)?;
            Ok(Outcome {
                values: vec![Value::Boolean(true)],
                mutated: true,
            })
        }
    }
}

fn select(
    image: &StoreImage,
    projection: Projection,
    from: Option<String>,
    filter: Option<Filter>,
    limit: Option<usize>,
) -> StoreResult<Outcome> {
    let Some(name) = from else {
        // Only literal selects parse without FROM.
        let values = match projection {
            Projection::Literal(value) => vec![wrap_expr(value)],
            _ => Vec::new(),
        };
        return Ok(Outcome {
            values,
            mutated: false,
        });
    };

    let coll = image
        .collection(&name)
        .ok_or(StoreError::CollectionNotFound(name))?;
    let matching = coll
        .documents()
        .filter(|doc| filter.as_ref().map_or(true, |f| f.matches(doc)))
        .take(limit.unwrap_or(usize::MAX));

    let values = match projection {
        Projection::Root => matching.cloned().map(Value::Document).collect(),
        Projection::Count => vec![wrap_expr(Value::Int32(matching.count() as i32))],
        Projection::Fields(paths) => matching
            .map(|doc| {
                let projected: Document = paths
                    .iter()
                    .map(|p| {
                        let value = p.resolve(doc).cloned().unwrap_or(Value::Null);
                        (p.leaf().to_string(), value)
                    })
                    .collect();
                Value::Document(projected)
            })
            .collect(),
        Projection::Literal(value) => matching.map(|_| wrap_expr(value.clone())).collect(),
    };
    Ok(Outcome {
        values,
        mutated: false,
    })
}

fn wrap_expr(value: Value) -> Value {
    let mut doc = Document::new();
    doc.insert(EXPR_FIELD, value);
    Value::Document(doc)
}

/// Equality with numeric widening: `1`, `1L` and `1.0` compare equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int32(n) => Some(f64::from(*n)),
        Value::Int64(n) => Some(*n as f64),
        Value::Double(n) => Some(*n),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> StoreError {
        StoreError::QuerySyntax {
            position: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.rest().is_empty()
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> StoreResult<()> {
        if self.eat(ch) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{ch}'")))
        }
    }

    /// Consume `keyword` if it is the next word.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        let Some(head) = rest.get(..keyword.len()) else {
            return false;
        };
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        if head.eq_ignore_ascii_case(keyword) && boundary {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> StoreResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    fn word(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    fn collection_name(&mut self) -> StoreResult<String> {
        self.word()
            .map(str::to_string)
            .ok_or_else(|| self.error("expected collection name"))
    }

    fn statement(&mut self) -> StoreResult<Statement> {
        if self.eat_keyword("SELECT") {
            self.select()
        } else if self.eat_keyword("INSERT") {
            self.expect_keyword("INTO")?;
            let collection = self.collection_name()?;
            self.expect_keyword("VALUES")?;
            let mut documents = Vec::new();
            loop {
                let start = self.pos;
                let value = self.literal()?;
                let doc = value.into_document().map_err(|_| StoreError::QuerySyntax {
                    position: start,
                    message: "INSERT values must be documents".into(),
                })?;
                documents.push(doc);
                if !self.eat(',') {
                    break;
                }
            }
            Ok(Statement::Insert {
                collection,
                documents,
            })
        } else if self.eat_keyword("DELETE") {
            let collection = self.collection_name()?;
            let filter = self.filter()?;
            Ok(Statement::Delete { collection, filter })
        } else if self.eat_keyword("DROP") {
            self.expect_keyword("COLLECTION")?;
            Ok(Statement::DropCollection(self.collection_name()?))
        } else if self.eat_keyword("RENAME") {
            self.expect_keyword("COLLECTION")?;
            let from = self.collection_name()?;
            self.expect_keyword("TO")?;
            let to = self.collection_name()?;
            Ok(Statement::RenameCollection { from, to })
        } else if self.at_end() {
            Err(self.error("empty command"))
        } else {
            Err(self.error("unknown command"))
        }
    }

    fn select(&mut self) -> StoreResult<Statement> {
        let projection = self.projection()?;
        let from = if self.eat_keyword("FROM") {
            Some(self.collection_name()?)
        } else {
            None
        };
        if from.is_none() && !matches!(projection, Projection::Literal(_)) {
            return Err(self.error("expected FROM"));
        }
        let filter = self.filter()?;
        let limit = if self.eat_keyword("LIMIT") {
            let word = self.word().ok_or_else(|| self.error("expected limit"))?;
            Some(
                word.parse::<usize>()
                    .map_err(|_| self.error(format!("invalid limit: {word}")))?,
            )
        } else {
            None
        };
        Ok(Statement::Select {
            projection,
            from,
            filter,
            limit,
        })
    }

    fn projection(&mut self) -> StoreResult<Projection> {
        if self.eat('*') {
            return Ok(Projection::Root);
        }
        if self.eat_keyword("COUNT") {
            self.expect('(')?;
            self.expect('*')?;
            self.expect(')')?;
            return Ok(Projection::Count);
        }
        self.skip_ws();
        let mut chars = self.rest().chars();
        let bare_root = chars.next() == Some('$')
            && chars.next().map_or(true, |c| !is_word_char(c) && c != '.');
        if bare_root {
            self.pos += 1;
            return Ok(Projection::Root);
        }
        if self.starts_path() {
            let mut paths = vec![self.path()?];
            while self.eat(',') {
                paths.push(self.path()?);
            }
            return Ok(Projection::Fields(paths));
        }
        Ok(Projection::Literal(self.literal()?))
    }

    fn filter(&mut self) -> StoreResult<Option<Filter>> {
        if !self.eat_keyword("WHERE") {
            return Ok(None);
        }
        let path = self.path()?;
        self.expect('=')?;
        let value = self.literal()?;
        Ok(Some(Filter { path, value }))
    }

    fn starts_path(&mut self) -> bool {
        self.skip_ws();
        if self.rest().starts_with("$.") {
            return true;
        }
        let word_start = self
            .rest()
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !word_start {
            return false;
        }
        // Bare literal keywords are values, not paths.
        let save = self.pos;
        let literal = ["true", "false", "null"]
            .iter()
            .any(|kw| self.eat_keyword(kw));
        self.pos = save;
        !literal
    }

    fn path(&mut self) -> StoreResult<FieldPath> {
        self.skip_ws();
        if self.rest().starts_with("$.") {
            self.pos += 2;
        }
        let mut segments = Vec::new();
        loop {
            let segment = self
                .word()
                .ok_or_else(|| self.error("expected field name"))?;
            segments.push(segment.to_string());
            if !self.rest().starts_with('.') {
                break;
            }
            self.pos += 1;
        }
        Ok(FieldPath(segments))
    }

    fn literal(&mut self) -> StoreResult<Value> {
        self.skip_ws();
        let start = self.pos;
        let rest = self.rest();
        match rest.chars().next() {
            None => Err(self.error("expected value")),
            Some('\'') => self.quoted(),
            Some('{' | '[' | '"') => {
                let mut stream =
                    serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();
                let json = match stream.next() {
                    Some(Ok(json)) => json,
                    Some(Err(e)) => return Err(self.error(format!("invalid value: {e}"))),
                    None => return Err(self.error("expected value")),
                };
                self.pos += stream.byte_offset();
                text::from_json(json).map_err(|e| StoreError::QuerySyntax {
                    position: start,
                    message: e.to_string(),
                })
            }
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            Some(_) => {
                if self.eat_keyword("true") {
                    Ok(Value::Boolean(true))
                } else if self.eat_keyword("false") {
                    Ok(Value::Boolean(false))
                } else if self.eat_keyword("null") {
                    Ok(Value::Null)
                } else {
                    Err(self.error("expected value"))
                }
            }
        }
    }

    fn quoted(&mut self) -> StoreResult<Value> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\'' => {
                    self.pos += i + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }
        self.pos = start;
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> StoreResult<Value> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| {
                !(c.is_ascii_digit()
                    || matches!(c, '.' | 'e' | 'E')
                    || (matches!(c, '-' | '+') && (i == 0 || rest[..i].ends_with(['e', 'E']))))
            })
            .map_or(rest.len(), |(i, _)| i);
        let token = &rest[..len];
        let value = if token.contains(['.', 'e', 'E']) {
            token.parse::<f64>().ok().map(Value::Double)
        } else {
            token.parse::<i64>().ok().map(|n| match i32::try_from(n) {
                Ok(small) => Value::Int32(small),
                Err(_) => Value::Int64(n),
            })
        };
        let value = value.ok_or_else(|| self.error(format!("invalid number: {token}")))?;
        self.pos += len;
        Ok(value)
    }

    fn finish(&mut self) -> StoreResult<()> {
        self.eat(';');
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_types::doc;

    fn people() -> StoreImage {
        let mut image = StoreImage::new();
        image
            .insert("people", doc! { "_id" => 1, "name" => "ada", "age" => 36 })
            .unwrap();
        image
            .insert(
                "people",
                doc! { "_id" => 2, "name" => "alan", "address" => doc! { "city" => "london" } },
            )
            .unwrap();
        image
    }

    fn values(image: &mut StoreImage, command: &str) -> Vec<Value> {
        execute(image, command).unwrap().values
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parses_keywords_case_insensitively() {
        let stmt = parse("select $ from people where name = 'ada' limit 1;").unwrap();
        match stmt {
            Statement::Select {
                projection,
                from,
                filter,
                limit,
            } => {
                assert_eq!(projection, Projection::Root);
                assert_eq!(from.as_deref(), Some("people"));
                assert_eq!(filter.unwrap().value, Value::from("ada"));
                assert_eq!(limit, Some(1));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = parse("SELECT $ FROM people WHERE").unwrap_err();
        match err {
            StoreError::QuerySyntax { position, .. } => assert_eq!(position, 26),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(parse(""), Err(StoreError::QuerySyntax { .. })));
        assert!(matches!(parse("FROB x"), Err(StoreError::QuerySyntax { .. })));
        assert!(matches!(
            parse("SELECT $ FROM a b"),
            Err(StoreError::QuerySyntax { .. })
        ));
    }

    #[test]
    fn select_path_requires_from() {
        assert!(matches!(
            parse("SELECT name"),
            Err(StoreError::QuerySyntax { .. })
        ));
    }

    #[test]
    fn numbers_pick_narrowest_type() {
        let mut image = StoreImage::new();
        assert_eq!(
            values(&mut image, "SELECT 5"),
            vec![Value::Document(doc! { "expr" => 5 })]
        );
        assert_eq!(
            values(&mut image, "SELECT 5000000000"),
            vec![Value::Document(doc! { "expr" => 5_000_000_000i64 })]
        );
        assert_eq!(
            values(&mut image, "SELECT -1.5;"),
            vec![Value::Document(doc! { "expr" => -1.5 })]
        );
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    #[test]
    fn select_all_documents() {
        let mut image = people();
        let result = values(&mut image, "SELECT * FROM people");
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(Value::is_document));
    }

    #[test]
    fn select_with_filter_and_numeric_widening() {
        let mut image = people();
        let result = values(&mut image, "SELECT $ FROM people WHERE age = 36.0");
        assert_eq!(result.len(), 1);
        let result = values(&mut image, "SELECT $ FROM people WHERE $.address.city = \"london\"");
        assert_eq!(result[0].as_document().unwrap().get("_id"), Some(&Value::Int32(2)));
    }

    #[test]
    fn select_fields_projects_leaf_names() {
        let mut image = people();
        let result = values(&mut image, "SELECT name, address.city FROM people LIMIT 1");
        assert_eq!(
            result,
            vec![Value::Document(doc! { "name" => "ada", "city" => Value::Null })]
        );
    }

    #[test]
    fn count_is_wrapped() {
        let mut image = people();
        assert_eq!(
            values(&mut image, "SELECT COUNT(*) FROM people"),
            vec![Value::Document(doc! { "expr" => 2 })]
        );
    }

    #[test]
    fn missing_collection() {
        let mut image = people();
        assert!(matches!(
            execute(&mut image, "SELECT $ FROM nobody"),
            Err(StoreError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn insert_is_all_or_nothing() {
        let mut image = people();
        let err = execute(
            &mut image,
            "INSERT INTO people VALUES {\"_id\": 3}, {\"_id\": 1}",
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        assert_eq!(image.collection("people").unwrap().len(), 2);

        let outcome = execute(
            &mut image,
            "INSERT INTO people VALUES {\"_id\": 3}, {\"name\": \"grace\"}",
        )
        .unwrap();
        assert_eq!(outcome.values, vec![Value::Int32(2)]);
        assert!(outcome.mutated);
        assert_eq!(image.collection("people").unwrap().len(), 4);
    }

    #[test]
    fn insert_rejects_non_documents() {
        assert!(matches!(
            parse("INSERT INTO people VALUES 1"),
            Err(StoreError::QuerySyntax { .. })
        ));
    }

    #[test]
    fn delete_counts_matches() {
        let mut image = people();
        let outcome = execute(&mut image, "DELETE people WHERE name = 'alan'").unwrap();
        assert_eq!(outcome.values, vec![Value::Int32(1)]);
        let outcome = execute(&mut image, "DELETE people WHERE name = 'nobody'").unwrap();
        assert_eq!(outcome.values, vec![Value::Int32(0)]);
        assert!(!outcome.mutated);
    }

    #[test]
    fn drop_and_rename() {
        let mut image = people();
        assert_eq!(
            values(&mut image, "RENAME COLLECTION people TO persons"),
            vec![Value::Boolean(true)]
        );
        assert_eq!(image.collection_names(), vec!["persons"]);
        assert_eq!(
            values(&mut image, "DROP COLLECTION persons"),
            vec![Value::Boolean(true)]
        );
        assert_eq!(
            values(&mut image, "DROP COLLECTION persons"),
            vec![Value::Boolean(false)]
        );
    }

    #[test]
    fn select_is_not_a_mutation() {
        let mut image = people();
        assert!(!execute(&mut image, "SELECT $ FROM people").unwrap().mutated);
        assert!(parse("DROP COLLECTION x").unwrap().is_mutation());
    }
}
