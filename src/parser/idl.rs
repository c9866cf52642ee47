//! Avro IDL front end
//!
//! Lowers an `.avdl` protocol to the JSON protocol form, which the JSON
//! parser then handles. Supported: `@namespace`, `protocol`, `record` and
//! `error`, `enum` with a default symbol, `fixed`, primitive and logical
//! types, `array<T>`, `map<T>`, `union { .. }`, the nullable `T?` shorthand,
//! `@aliases`, JSON defaults and `/** doc */` comments. Message
//! declarations are skipped; `import` is rejected.
//!
//! Locations in errors are `line:column` in the IDL source.

use serde_json::{json, Map, Value};

use crate::error::ParseError;

/// Lower IDL source to a JSON protocol document
pub fn lower_to_protocol(src: &str) -> Result<Value, ParseError> {
    let mut cursor = Cursor::new(src);

    let annotations = cursor.annotations()?;
    cursor.take_doc()?;
    cursor.keyword("protocol")?;
    let name = cursor.ident()?;
    let protocol_doc = cursor.take_doc()?;
    cursor.expect('{')?;

    let mut types = Vec::new();
    loop {
        if cursor.eat('}')? {
            break;
        }
        if cursor.at_end()? {
            return Err(cursor.error("unterminated protocol body"));
        }
        if let Some(ty) = declaration(&mut cursor)? {
            types.push(ty);
        }
    }
    if !cursor.at_end()? {
        return Err(cursor.error("unexpected input after protocol body"));
    }

    let mut protocol = Map::new();
    protocol.insert("protocol".into(), Value::String(name));
    if let Some(ns) = annotation(&annotations, "namespace") {
        protocol.insert("namespace".into(), ns.clone());
    }
    if let Some(doc) = protocol_doc {
        protocol.insert("doc".into(), Value::String(doc));
    }
    protocol.insert("types".into(), Value::Array(types));
    Ok(Value::Object(protocol))
}

fn annotation<'a>(annotations: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    annotations.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

/// One protocol member; `None` for skipped message declarations
fn declaration(cursor: &mut Cursor<'_>) -> Result<Option<Value>, ParseError> {
    let doc = cursor.take_doc()?;
    let annotations = cursor.annotations()?;
    let doc = match doc {
        Some(doc) => Some(doc),
        None => cursor.take_doc()?,
    };
    let loc = cursor.location();

    let Some(keyword) = cursor.peek_ident()? else {
        return Err(cursor.error("expected a declaration"));
    };

    let mut decl = match keyword.as_str() {
        "record" | "error" => {
            cursor.ident()?;
            record(cursor, &keyword)?
        }
        "enum" => {
            cursor.ident()?;
            enumeration(cursor)?
        }
        "fixed" => {
            cursor.ident()?;
            fixed(cursor)?
        }
        "import" => {
            return Err(ParseError::malformed(loc, "IDL imports are not supported"));
        }
        _ => {
            cursor.skip_message()?;
            return Ok(None);
        }
    };

    if let Value::Object(obj) = &mut decl {
        if let Some(ns) = annotation(&annotations, "namespace") {
            obj.insert("namespace".into(), ns.clone());
        }
        if let Some(aliases) = annotation(&annotations, "aliases") {
            obj.insert("aliases".into(), aliases.clone());
        }
        if let Some(doc) = doc {
            obj.insert("doc".into(), Value::String(doc));
        }
    }
    Ok(Some(decl))
}

fn record(cursor: &mut Cursor<'_>, keyword: &str) -> Result<Value, ParseError> {
    let name = cursor.ident()?;
    cursor.expect('{')?;

    let mut fields = Vec::new();
    while !cursor.eat('}')? {
        if cursor.at_end()? {
            return Err(cursor.error(format!("unterminated record '{}'", name)));
        }
        let doc = cursor.take_doc()?;
        // annotations before the type apply to every variable of the declaration
        let shared = cursor.annotations()?;
        let doc = match doc {
            Some(doc) => Some(doc),
            None => cursor.take_doc()?,
        };
        let ty = field_type(cursor)?;

        loop {
            let var_annotations = cursor.annotations()?;
            let field_name = cursor.ident()?;
            let default = if cursor.eat('=')? { Some(cursor.json()?) } else { None };

            let schema = match &ty {
                FieldType::Plain(schema) => schema.clone(),
                FieldType::Nullable(inner) => match &default {
                    // the default must match the first branch
                    Some(d) if !d.is_null() => json!([inner, "null"]),
                    _ => json!(["null", inner]),
                },
            };

            let mut field = Map::new();
            field.insert("name".into(), Value::String(field_name));
            field.insert("type".into(), schema);
            if let Some(default) = default {
                field.insert("default".into(), default);
            }
            if let Some(doc) = &doc {
                field.insert("doc".into(), Value::String(doc.clone()));
            }
            let aliases = annotation(&var_annotations, "aliases").or_else(|| annotation(&shared, "aliases"));
            if let Some(aliases) = aliases {
                field.insert("aliases".into(), aliases.clone());
            }
            fields.push(Value::Object(field));

            if cursor.eat(',')? {
                continue;
            }
            cursor.expect(';')?;
            break;
        }
    }

    Ok(json!({ "type": keyword, "name": name, "fields": fields }))
}

fn enumeration(cursor: &mut Cursor<'_>) -> Result<Value, ParseError> {
    let name = cursor.ident()?;
    cursor.expect('{')?;
    let mut symbols = Vec::new();
    if !cursor.eat('}')? {
        loop {
            symbols.push(cursor.ident()?);
            if cursor.eat(',')? {
                continue;
            }
            cursor.expect('}')?;
            break;
        }
    }

    let mut obj = Map::new();
    obj.insert("type".into(), json!("enum"));
    obj.insert("name".into(), Value::String(name));
    obj.insert("symbols".into(), json!(symbols));
    if cursor.eat('=')? {
        obj.insert("default".into(), Value::String(cursor.ident()?));
        cursor.expect(';')?;
    } else {
        // `enum E { A, B };` is accepted too
        cursor.eat(';')?;
    }
    Ok(Value::Object(obj))
}

fn fixed(cursor: &mut Cursor<'_>) -> Result<Value, ParseError> {
    let name = cursor.ident()?;
    cursor.expect('(')?;
    let loc = cursor.location();
    let size = cursor
        .json()?
        .as_u64()
        .ok_or_else(|| ParseError::malformed(loc, "fixed size must be a non-negative integer"))?;
    cursor.expect(')')?;
    cursor.expect(';')?;
    Ok(json!({ "type": "fixed", "name": name, "size": size }))
}

enum FieldType {
    Plain(Value),
    /// `T?`
    Nullable(Value),
}

fn field_type(cursor: &mut Cursor<'_>) -> Result<FieldType, ParseError> {
    let loc = cursor.location();
    let schema = schema_type(cursor)?;
    if cursor.eat('?')? {
        if schema.is_array() {
            return Err(ParseError::malformed(loc, "'?' cannot be applied to a union"));
        }
        return Ok(FieldType::Nullable(schema));
    }
    Ok(FieldType::Plain(schema))
}

fn schema_type(cursor: &mut Cursor<'_>) -> Result<Value, ParseError> {
    cursor.annotations()?;
    let loc = cursor.location();
    let name = cursor.ident()?;
    let schema = match name.as_str() {
        "null" | "boolean" | "int" | "long" | "float" | "double" | "bytes" | "string" => json!(name),
        // logical types are carried as their underlying Avro type
        "date" | "time_ms" => json!("int"),
        "timestamp_ms" | "local_timestamp_ms" | "time_micros" | "timestamp_micros" => json!("long"),
        "uuid" => json!("string"),
        "decimal" => {
            cursor.expect('(')?;
            cursor.json()?;
            if cursor.eat(',')? {
                cursor.json()?;
            }
            cursor.expect(')')?;
            json!("bytes")
        }
        "array" => {
            cursor.expect('<')?;
            let items = schema_type(cursor)?;
            let items = nullable_item(cursor, items)?;
            cursor.expect('>')?;
            json!({ "type": "array", "items": items })
        }
        "map" => {
            cursor.expect('<')?;
            let values = schema_type(cursor)?;
            let values = nullable_item(cursor, values)?;
            cursor.expect('>')?;
            json!({ "type": "map", "values": values })
        }
        "union" => {
            cursor.expect('{')?;
            let mut branches = Vec::new();
            loop {
                branches.push(schema_type(cursor)?);
                if cursor.eat(',')? {
                    continue;
                }
                cursor.expect('}')?;
                break;
            }
            Value::Array(branches)
        }
        "void" => return Err(ParseError::malformed(loc, "'void' is only valid as a message result")),
        _ => json!(name),
    };
    Ok(schema)
}

fn nullable_item(cursor: &mut Cursor<'_>, schema: Value) -> Result<Value, ParseError> {
    if cursor.eat('?')? {
        Ok(json!(["null", schema]))
    } else {
        Ok(schema)
    }
}

// =============================================================================
// Cursor
// =============================================================================

struct Cursor<'s> {
    src: &'s str,
    pos: usize,
    /// Most recent `/** */` comment not yet claimed by a declaration
    doc: Option<String>,
}

impl<'s> Cursor<'s> {
    fn new(src: &'s str) -> Self {
        Self { src, pos: 0, doc: None }
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn location(&self) -> String {
        let before = &self.src[..self.pos];
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
        format!("{}:{}", line, column)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::malformed(self.location(), message)
    }

    fn take_doc(&mut self) -> Result<Option<String>, ParseError> {
        self.skip_trivia()?;
        Ok(self.doc.take())
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                let end = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += end;
            } else if trimmed.starts_with("/*") {
                let Some(end) = trimmed[2..].find("*/") else {
                    return Err(self.error("unterminated comment"));
                };
                let body = &trimmed[2..2 + end];
                if let Some(doc) = body.strip_prefix('*') {
                    if !doc.is_empty() {
                        self.doc = Some(clean_doc(doc));
                    }
                }
                self.pos += end + 4;
            } else {
                return Ok(());
            }
        }
    }

    fn at_end(&mut self) -> Result<bool, ParseError> {
        self.skip_trivia()?;
        Ok(self.rest().is_empty())
    }

    fn peek(&mut self) -> Result<Option<char>, ParseError> {
        self.skip_trivia()?;
        Ok(self.rest().chars().next())
    }

    fn eat(&mut self, c: char) -> Result<bool, ParseError> {
        if self.peek()? == Some(c) {
            self.pos += c.len_utf8();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat(c)? {
            return Ok(());
        }
        let found = self
            .peek()?
            .map(|f| format!("'{}'", f))
            .unwrap_or_else(|| "end of input".to_string());
        Err(self.error(format!("expected '{}', found {}", c, found)))
    }

    /// Identifier, possibly dotted, or a backquoted identifier
    fn ident(&mut self) -> Result<String, ParseError> {
        match self.scan_ident()? {
            Some((ident, len)) => {
                self.pos += len;
                Ok(ident)
            }
            None => Err(self.error("expected an identifier")),
        }
    }

    fn peek_ident(&mut self) -> Result<Option<String>, ParseError> {
        Ok(self.scan_ident()?.map(|(ident, _)| ident))
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        match self.peek_ident()? {
            Some(ident) if ident == keyword => {
                self.ident()?;
                Ok(())
            }
            _ => Err(self.error(format!("expected '{}'", keyword))),
        }
    }

    fn scan_ident(&mut self) -> Result<Option<(String, usize)>, ParseError> {
        self.skip_trivia()?;
        let rest = self.rest();
        if let Some(quoted) = rest.strip_prefix('`') {
            let Some(end) = quoted.find('`') else {
                return Err(self.error("unterminated quoted identifier"));
            };
            return Ok(Some((quoted[..end].to_string(), end + 2)));
        }
        let starts_ident = rest
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !starts_ident {
            return Ok(None);
        }
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        Ok(Some((rest[..len].to_string(), len)))
    }

    /// Zero or more `@name(json)` annotations
    fn annotations(&mut self) -> Result<Vec<(String, Value)>, ParseError> {
        let mut out = Vec::new();
        while self.eat('@')? {
            let rest = self.rest();
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'))
                .unwrap_or(rest.len());
            if len == 0 {
                return Err(self.error("expected an annotation name"));
            }
            let name = rest[..len].to_string();
            self.pos += len;
            self.expect('(')?;
            let value = self.json()?;
            self.expect(')')?;
            out.push((name, value));
        }
        Ok(out)
    }

    /// A JSON literal embedded in the IDL
    fn json(&mut self) -> Result<Value, ParseError> {
        self.skip_trivia()?;
        let loc = self.location();
        let rest = self.rest();
        match rest.chars().next() {
            Some('{') | Some('[') | Some('"') => {
                let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => {
                        self.pos += stream.byte_offset();
                        Ok(value)
                    }
                    Some(Err(e)) => Err(ParseError::malformed(loc, e.to_string())),
                    None => Err(ParseError::malformed(loc, "expected a JSON value")),
                }
            }
            Some(_) => {
                // numbers and bare literals end at the next IDL delimiter
                let len = rest
                    .find(|c: char| c.is_whitespace() || matches!(c, ';' | ',' | ')' | '}' | ']'))
                    .unwrap_or(rest.len());
                let value = serde_json::from_str(&rest[..len])
                    .map_err(|e| ParseError::malformed(loc, format!("invalid JSON literal: {}", e)))?;
                self.pos += len;
                Ok(value)
            }
            None => Err(ParseError::malformed(loc, "expected a JSON value")),
        }
    }

    /// Skip a message declaration through its terminating `;`
    fn skip_message(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            match self.peek()? {
                None => return Err(self.error("unterminated message declaration")),
                Some('"') => {
                    self.json()?;
                }
                Some(c) => {
                    self.pos += c.len_utf8();
                    match c {
                        '(' | '{' | '<' => depth += 1,
                        ')' | '}' | '>' => depth = depth.saturating_sub(1),
                        ';' if depth == 0 => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }
}

fn clean_doc(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let line = line.trim();
            line.strip_prefix('*').map(str::trim_start).unwrap_or(line)
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use crate::parser::{parse_idl, NamespaceContext};

    const SAMPLE: &str = r#"
        // Sample protocol
        @namespace("com.acme")
        protocol Accounts {
            /** Account state */
            enum Status { ACTIVE, CLOSED } = ACTIVE;

            fixed Md5(16);

            /** A user account */
            record Account {
                long id;
                string? nickname = null;
                @aliases(["mail"]) string email;
                array<string> tags = [];
                map<long> counters = {};
                Status status = "ACTIVE";
                union { null, Md5 } digest = null;
                timestamp_ms created;
            }

            error Oops { string reason; }

            Account get(long id) throws Oops;
            void ping() oneway;
        }
    "#;

    #[test]
    fn test_lower_sample() {
        let protocol = lower_to_protocol(SAMPLE).unwrap();
        assert_eq!(protocol["protocol"], "Accounts");
        assert_eq!(protocol["namespace"], "com.acme");

        let types = protocol["types"].as_array().unwrap();
        assert_eq!(types.len(), 4);
        assert_eq!(types[0]["type"], "enum");
        assert_eq!(types[0]["default"], "ACTIVE");
        assert_eq!(types[0]["doc"], "Account state");
        assert_eq!(types[1]["size"], 16);

        let account = &types[2];
        assert_eq!(account["doc"], "A user account");
        let fields = account["fields"].as_array().unwrap();
        assert_eq!(fields[1]["type"], json!(["null", "string"]));
        assert_eq!(fields[2]["aliases"], json!(["mail"]));
        assert_eq!(fields[3]["type"], json!({"type": "array", "items": "string"}));
        assert_eq!(fields[7]["type"], "long");
        assert_eq!(types[3]["type"], "error");
    }

    #[test]
    fn test_nullable_with_non_null_default_puts_type_first() {
        let protocol = lower_to_protocol("protocol P { record R { int? count = 0; } }").unwrap();
        assert_eq!(protocol["types"][0]["fields"][0]["type"], json!(["int", "null"]));
        assert_eq!(protocol["types"][0]["fields"][0]["default"], 0);
    }

    #[test]
    fn test_multiple_variables_share_type() {
        let protocol = lower_to_protocol("protocol P { record R { string a, b = \"x\"; } }").unwrap();
        let fields = protocol["types"][0]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1]["default"], "x");
    }

    #[test]
    fn test_import_rejected() {
        let err = lower_to_protocol("protocol P { import idl \"other.avdl\"; }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
        assert_eq!(err.location, "1:14");
    }

    #[test]
    fn test_unterminated_body() {
        let err = lower_to_protocol("protocol P {\n record R { int a; }\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
    }

    #[test]
    fn test_unterminated_comment() {
        let err = lower_to_protocol("protocol P {\n record R {\n /** open\n int a; }\n}\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
        assert_eq!(err.location, "3:2");
        assert!(err.message.contains("unterminated comment"));
    }

    #[test]
    fn test_parse_idl_end_to_end() {
        let mut ctx = NamespaceContext::new();
        let graphs = parse_idl(SAMPLE, &mut ctx).unwrap();
        let names: Vec<_> = graphs.iter().filter_map(|g| g.full_name()).collect();
        assert_eq!(
            names,
            vec!["com.acme.Status", "com.acme.Md5", "com.acme.Account", "com.acme.Oops"]
        );
        let account = &graphs[2];
        assert!(account.lookup("com.acme.Status").is_some());
        assert!(account.lookup("com.acme.Md5").is_some());
    }
}
