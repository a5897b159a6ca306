//! Frontmatter metadata embedded in conformance test files.
//!
//! Every test carries a `/*--- ... ---*/` comment near the top whose body
//! is a restricted YAML document: scalar keys, literal blocks, flow and
//! block sequences, and one nested mapping (`negative`). Only that subset
//! is accepted here; a full YAML engine would be both overkill and a
//! corpus-compatibility hazard.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const FRONTMATTER_OPEN: &str = "/*---";
const FRONTMATTER_CLOSE: &str = "---*/";

/// Phase in which a negative test expects its error to be raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    /// Rejected during parsing, before any code runs.
    Parse,
    /// Rejected while resolving module imports, before evaluation.
    Resolution,
    /// Thrown at runtime and never caught.
    Runtime,
}

impl ErrorPhase {
    fn from_str(s: &str) -> Result<Self, MetadataError> {
        match s {
            "parse" => Ok(ErrorPhase::Parse),
            "resolution" => Ok(ErrorPhase::Resolution),
            "runtime" => Ok(ErrorPhase::Runtime),
            other => Err(MetadataError::UnknownPhase(other.to_string())),
        }
    }

    /// Whether the error is expected before the test body starts executing.
    pub fn is_pre_execution(self) -> bool {
        matches!(self, ErrorPhase::Parse | ErrorPhase::Resolution)
    }
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPhase::Parse => write!(f, "parse"),
            ErrorPhase::Resolution => write!(f, "resolution"),
            ErrorPhase::Runtime => write!(f, "runtime"),
        }
    }
}

/// Declared expectation that the test must fail with a specific error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeExpectation {
    pub phase: ErrorPhase,
    /// Name of the error constructor, e.g. `SyntaxError` or `Test262Error`.
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Typed view of the `flags:` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFlags {
    pub only_strict: bool,
    pub no_strict: bool,
    pub module: bool,
    pub raw: bool,
    pub is_async: bool,
    pub generated: bool,
    /// `Some(false)` for CanBlockIsFalse, `Some(true)` for CanBlockIsTrue.
    pub can_block: Option<bool>,
    pub non_deterministic: bool,
}

impl TestFlags {
    fn from_names(names: &[String]) -> Result<Self, MetadataError> {
        let mut flags = TestFlags::default();
        for name in names {
            match name.as_str() {
                "onlyStrict" => flags.only_strict = true,
                "noStrict" => flags.no_strict = true,
                "module" => flags.module = true,
                "raw" => flags.raw = true,
                "async" => flags.is_async = true,
                "generated" => flags.generated = true,
                "CanBlockIsFalse" => flags.can_block = Some(false),
                "CanBlockIsTrue" => flags.can_block = Some(true),
                "non-deterministic" => flags.non_deterministic = true,
                other => return Err(MetadataError::UnknownFlag(other.to_string())),
            }
        }
        flags.validate()?;
        Ok(flags)
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if self.only_strict && self.no_strict {
            return Err(MetadataError::FlagConflict("onlyStrict and noStrict"));
        }
        if self.module && (self.only_strict || self.no_strict) {
            return Err(MetadataError::FlagConflict(
                "module fixes the strictness context",
            ));
        }
        if self.raw && (self.only_strict || self.no_strict || self.module) {
            return Err(MetadataError::FlagConflict(
                "raw excludes strictness and module flags",
            ));
        }
        Ok(())
    }
}

/// How a single invocation of the engine treats the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecMode {
    /// Classic sloppy-mode script.
    Sloppy,
    /// Script with `"use strict";` prepended.
    Strict,
    /// Evaluated as an ES module.
    Module,
    /// Source passed through verbatim with no harness injection.
    Raw,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Sloppy => write!(f, "non-strict"),
            ExecMode::Strict => write!(f, "strict"),
            ExecMode::Module => write!(f, "module"),
            ExecMode::Raw => write!(f, "raw"),
        }
    }
}

/// Parsed frontmatter for one test file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestMetadata {
    pub description: String,
    pub esid: Option<String>,
    pub info: Option<String>,
    pub features: Vec<String>,
    pub flags: TestFlags,
    pub includes: Vec<String>,
    pub negative: Option<NegativeExpectation>,
    pub locale: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("frontmatter block is missing its '---*/' terminator")]
    Unterminated,
    #[error("frontmatter line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("unknown flag '{0}'")]
    UnknownFlag(String),
    #[error("flags conflict: {0}")]
    FlagConflict(&'static str),
    #[error("negative expectation must declare both 'phase' and 'type'")]
    IncompleteNegative,
    #[error("unknown negative phase '{0}'")]
    UnknownPhase(String),
}

impl TestMetadata {
    /// Parse the first frontmatter block of `source`. A file without a
    /// block yields default metadata (every field empty) rather than an
    /// error; only a malformed block is rejected.
    pub fn parse(source: &str) -> Result<Self, MetadataError> {
        match extract_frontmatter(source)? {
            Some(block) => parse_block(block),
            None => Ok(TestMetadata::default()),
        }
    }

    /// Execution modes this test must run in, derived from its flags.
    /// Unflagged tests run in both sloppy and strict mode.
    pub fn execution_modes(&self) -> Vec<ExecMode> {
        if self.flags.raw {
            vec![ExecMode::Raw]
        } else if self.flags.module {
            vec![ExecMode::Module]
        } else if self.flags.only_strict {
            vec![ExecMode::Strict]
        } else if self.flags.no_strict {
            vec![ExecMode::Sloppy]
        } else {
            vec![ExecMode::Sloppy, ExecMode::Strict]
        }
    }
}

/// Test source with the frontmatter comment stripped. Raw tests must use
/// the original source instead; everything else runs the remainder so
/// engine diagnostics point at code, not metadata.
pub fn body(source: &str) -> &str {
    match source.find(FRONTMATTER_CLOSE) {
        Some(idx) => &source[idx + FRONTMATTER_CLOSE.len()..],
        None => source,
    }
}

fn extract_frontmatter(source: &str) -> Result<Option<&str>, MetadataError> {
    let Some(start) = source.find(FRONTMATTER_OPEN) else {
        return Ok(None);
    };
    let after = start + FRONTMATTER_OPEN.len();
    let Some(end) = source[after..].find(FRONTMATTER_CLOSE) else {
        return Err(MetadataError::Unterminated);
    };
    Ok(Some(&source[after..after + end]))
}

fn parse_block(block: &str) -> Result<TestMetadata, MetadataError> {
    let lines: Vec<&str> = block.lines().collect();
    let mut meta = TestMetadata::default();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }
        if indent_of(lines[i]) > 0 {
            return Err(syntax(i, "unexpected indentation at top level"));
        }
        let (key, rest) = split_key(lines[i], i)?;
        match key {
            "description" => {
                let (value, next) = scalar_value(&lines, i, rest)?;
                meta.description = value;
                i = next;
            }
            "esid" => {
                let (value, next) = scalar_value(&lines, i, rest)?;
                if !value.is_empty() {
                    meta.esid = Some(value);
                }
                i = next;
            }
            "info" => {
                let (value, next) = scalar_value(&lines, i, rest)?;
                if !value.is_empty() {
                    meta.info = Some(value);
                }
                i = next;
            }
            "features" => {
                let (items, next) = sequence_value(&lines, i, rest)?;
                meta.features = items;
                i = next;
            }
            "includes" => {
                let (items, next) = sequence_value(&lines, i, rest)?;
                meta.includes = items;
                i = next;
            }
            "locale" => {
                let (items, next) = sequence_value(&lines, i, rest)?;
                meta.locale = items;
                i = next;
            }
            "flags" => {
                let (items, next) = sequence_value(&lines, i, rest)?;
                meta.flags = TestFlags::from_names(&items)?;
                i = next;
            }
            "negative" => {
                let (entries, next) = mapping_value(&lines, i, rest)?;
                meta.negative = Some(negative_from_entries(&entries)?);
                i = next;
            }
            // Keys like es5id, es6id, author, and defines are legal in the
            // corpus but carry nothing the harness acts on.
            _ => {
                i = skip_entry(&lines, i);
            }
        }
    }
    if meta.flags.raw && !meta.includes.is_empty() {
        return Err(MetadataError::FlagConflict(
            "raw suppresses harness includes",
        ));
    }
    Ok(meta)
}

/// Consume an entry of any shape without interpreting it: the key line
/// itself plus every following indented or blank line.
fn skip_entry(lines: &[&str], key_idx: usize) -> usize {
    let mut j = key_idx + 1;
    while j < lines.len() && (lines[j].trim().is_empty() || indent_of(lines[j]) > 0) {
        j += 1;
    }
    j
}

fn syntax(line_idx: usize, message: &str) -> MetadataError {
    MetadataError::Syntax {
        line: line_idx + 1,
        message: message.to_string(),
    }
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn split_key<'a>(line: &'a str, idx: usize) -> Result<(&'a str, &'a str), MetadataError> {
    let trimmed = line.trim();
    let Some(colon) = trimmed.find(':') else {
        return Err(syntax(idx, "expected 'key: value'"));
    };
    let key = trimmed[..colon].trim_end();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(syntax(idx, "invalid key name"));
    }
    Ok((key, trimmed[colon + 1..].trim()))
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\'')
        {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Scalar after a key: inline text, a wrapped plain scalar, or a `|`/`>`
/// literal block. Block content is preserved line for line; no folding.
fn scalar_value(
    lines: &[&str],
    key_idx: usize,
    rest: &str,
) -> Result<(String, usize), MetadataError> {
    let mut j = key_idx + 1;
    if is_block_marker(rest) {
        let mut collected: Vec<&str> = Vec::new();
        while j < lines.len() && (lines[j].trim().is_empty() || indent_of(lines[j]) > 0) {
            collected.push(lines[j]);
            j += 1;
        }
        return Ok((dedent(&collected), j));
    }
    let mut value = strip_quotes(rest).to_string();
    // Plain scalars may wrap onto indented continuation lines.
    while j < lines.len() && indent_of(lines[j]) > 0 && !lines[j].trim().is_empty() {
        let cont = lines[j].trim();
        if cont.starts_with("- ") {
            return Err(syntax(j, "unexpected sequence item"));
        }
        if value.is_empty() {
            value = cont.to_string();
        } else {
            value.push(' ');
            value.push_str(cont);
        }
        j += 1;
    }
    Ok((value, j))
}

fn is_block_marker(rest: &str) -> bool {
    matches!(rest, "|" | ">" | "|-" | "|+" | ">-" | ">+")
}

fn dedent(collected: &[&str]) -> String {
    let min_indent = collected
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0);
    let mut out = String::new();
    for (n, line) in collected.iter().enumerate() {
        if n > 0 {
            out.push('\n');
        }
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(&line[min_indent..]);
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Sequence after a key: `[a, b]` flow form (possibly spanning lines) or
/// an indented `- item` block.
fn sequence_value(
    lines: &[&str],
    key_idx: usize,
    rest: &str,
) -> Result<(Vec<String>, usize), MetadataError> {
    let mut j = key_idx + 1;
    if let Some(stripped) = rest.strip_prefix('[') {
        let mut acc = stripped.to_string();
        while !acc.contains(']') {
            if j >= lines.len() {
                return Err(syntax(key_idx, "unterminated flow sequence"));
            }
            acc.push(' ');
            acc.push_str(lines[j].trim());
            j += 1;
        }
        let inner = match acc.find(']') {
            Some(close) => &acc[..close],
            None => acc.as_str(),
        };
        let items = inner
            .split(',')
            .map(|s| strip_quotes(s).to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return Ok((items, j));
    }
    if !rest.is_empty() {
        // Tolerated shorthand: a lone scalar counts as a one-item list.
        return Ok((vec![strip_quotes(rest).to_string()], j));
    }
    let mut items = Vec::new();
    while j < lines.len() {
        if lines[j].trim().is_empty() {
            j += 1;
            continue;
        }
        if indent_of(lines[j]) == 0 {
            break;
        }
        let item = lines[j].trim();
        let Some(value) = item.strip_prefix("- ") else {
            return Err(syntax(j, "expected '- ' sequence item"));
        };
        items.push(strip_quotes(value).to_string());
        j += 1;
    }
    Ok((items, j))
}

/// One-level nested mapping, in block form or `{k: v, k: v}` flow form.
fn mapping_value(
    lines: &[&str],
    key_idx: usize,
    rest: &str,
) -> Result<(Vec<(String, String)>, usize), MetadataError> {
    let mut j = key_idx + 1;
    if let Some(stripped) = rest.strip_prefix('{') {
        let mut acc = stripped.to_string();
        while !acc.contains('}') {
            if j >= lines.len() {
                return Err(syntax(key_idx, "unterminated flow mapping"));
            }
            acc.push(' ');
            acc.push_str(lines[j].trim());
            j += 1;
        }
        let inner = match acc.find('}') {
            Some(close) => &acc[..close],
            None => acc.as_str(),
        };
        let mut entries = Vec::new();
        for pair in inner.split(',') {
            if pair.trim().is_empty() {
                continue;
            }
            let Some(colon) = pair.find(':') else {
                return Err(syntax(key_idx, "expected 'key: value' in flow mapping"));
            };
            entries.push((
                pair[..colon].trim().to_string(),
                strip_quotes(&pair[colon + 1..]).to_string(),
            ));
        }
        return Ok((entries, j));
    }
    if !rest.is_empty() {
        return Err(MetadataError::IncompleteNegative);
    }
    let mut entries = Vec::new();
    while j < lines.len() {
        if lines[j].trim().is_empty() {
            j += 1;
            continue;
        }
        if indent_of(lines[j]) == 0 {
            break;
        }
        let (key, value) = split_key(lines[j], j)?;
        entries.push((key.to_string(), strip_quotes(value).to_string()));
        j += 1;
    }
    Ok((entries, j))
}

fn negative_from_entries(
    entries: &[(String, String)],
) -> Result<NegativeExpectation, MetadataError> {
    let mut phase = None;
    let mut error_type = None;
    for (key, value) in entries {
        match key.as_str() {
            "phase" => phase = Some(ErrorPhase::from_str(value)?),
            "type" => error_type = Some(value.clone()),
            _ => {}
        }
    }
    match (phase, error_type) {
        (Some(phase), Some(error_type)) if !error_type.is_empty() => Ok(NegativeExpectation {
            phase,
            error_type,
        }),
        _ => Err(MetadataError::IncompleteNegative),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_frontmatter() {
        let source = r#"// Copyright (C) 2020 the contributors.
/*---
esid: sec-array.prototype.flat
description: Array.prototype.flat with depth
features: [Array.prototype.flat]
flags: [noStrict]
includes: [compareArray.js]
---*/
var actual = [1, [2]].flat();
"#;
        let meta = TestMetadata::parse(source).unwrap();
        assert_eq!(meta.esid.as_deref(), Some("sec-array.prototype.flat"));
        assert_eq!(meta.description, "Array.prototype.flat with depth");
        assert_eq!(meta.features, vec!["Array.prototype.flat"]);
        assert!(meta.flags.no_strict);
        assert_eq!(meta.includes, vec!["compareArray.js"]);
        assert!(meta.negative.is_none());
    }

    #[test]
    fn missing_frontmatter_yields_defaults() {
        let meta = TestMetadata::parse("var x = 1;").unwrap();
        assert_eq!(meta, TestMetadata::default());
        assert_eq!(
            meta.execution_modes(),
            vec![ExecMode::Sloppy, ExecMode::Strict]
        );
    }

    #[test]
    fn unterminated_frontmatter_is_rejected() {
        let err = TestMetadata::parse("/*---\ndescription: oops\n").unwrap_err();
        assert_eq!(err, MetadataError::Unterminated);
    }

    #[test]
    fn only_first_frontmatter_block_counts() {
        let source = "/*---\nflags: [module]\n---*/\n/*---\nflags: [raw]\n---*/\n";
        let meta = TestMetadata::parse(source).unwrap();
        assert!(meta.flags.module);
        assert!(!meta.flags.raw);
    }

    #[test]
    fn parses_block_sequences_and_literal_blocks() {
        let source = "/*---\ninfo: |\n  First line.\n  Second line.\nfeatures:\n  - Symbol\n  - BigInt\n---*/\n";
        let meta = TestMetadata::parse(source).unwrap();
        assert_eq!(meta.info.as_deref(), Some("First line.\nSecond line."));
        assert_eq!(meta.features, vec!["Symbol", "BigInt"]);
    }

    #[test]
    fn parses_negative_block_mapping() {
        let source = "/*---\nnegative:\n  phase: parse\n  type: SyntaxError\n---*/\n";
        let meta = TestMetadata::parse(source).unwrap();
        let negative = meta.negative.unwrap();
        assert_eq!(negative.phase, ErrorPhase::Parse);
        assert_eq!(negative.error_type, "SyntaxError");
    }

    #[test]
    fn parses_negative_flow_mapping() {
        let source = "/*---\nnegative: { phase: runtime, type: TypeError }\n---*/\n";
        let negative = TestMetadata::parse(source).unwrap().negative.unwrap();
        assert_eq!(negative.phase, ErrorPhase::Runtime);
        assert_eq!(negative.error_type, "TypeError");
    }

    #[test]
    fn negative_without_type_is_rejected() {
        let source = "/*---\nnegative:\n  phase: parse\n---*/\n";
        let err = TestMetadata::parse(source).unwrap_err();
        assert_eq!(err, MetadataError::IncompleteNegative);
    }

    #[test]
    fn unknown_negative_phase_is_rejected() {
        let source = "/*---\nnegative:\n  phase: tokenize\n  type: SyntaxError\n---*/\n";
        let err = TestMetadata::parse(source).unwrap_err();
        assert_eq!(err, MetadataError::UnknownPhase("tokenize".to_string()));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let source = "/*---\nflags: [strictOnly]\n---*/\n";
        let err = TestMetadata::parse(source).unwrap_err();
        assert_eq!(err, MetadataError::UnknownFlag("strictOnly".to_string()));
    }

    #[test]
    fn conflicting_strictness_flags_are_rejected() {
        let source = "/*---\nflags: [onlyStrict, noStrict]\n---*/\n";
        assert!(matches!(
            TestMetadata::parse(source),
            Err(MetadataError::FlagConflict(_))
        ));
    }

    #[test]
    fn raw_with_includes_is_rejected() {
        let source = "/*---\nflags: [raw]\nincludes: [sta.js]\n---*/\n";
        assert!(matches!(
            TestMetadata::parse(source),
            Err(MetadataError::FlagConflict(_))
        ));
    }

    #[test]
    fn parsing_the_same_text_twice_is_structurally_equal() {
        let source = "/*---\ndescription: two runs\nfeatures: [Symbol]\nflags: [async]\nincludes: [compareArray.js]\nnegative:\n  phase: runtime\n  type: TypeError\n---*/\ncode();";
        assert_eq!(
            TestMetadata::parse(source).unwrap(),
            TestMetadata::parse(source).unwrap()
        );
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let source = "/*---\nes5id: 15.4.4\nauthor: somebody\ndescription: ok\n---*/\n";
        let meta = TestMetadata::parse(source).unwrap();
        assert_eq!(meta.description, "ok");
    }

    #[test]
    fn unknown_keys_with_block_values_are_skipped() {
        let source =
            "/*---\ndefines:\n  - assert\n  - compareArray\ndescription: still parsed\n---*/\n";
        let meta = TestMetadata::parse(source).unwrap();
        assert_eq!(meta.description, "still parsed");
    }

    #[test]
    fn execution_modes_follow_flags() {
        let parse = |s: &str| TestMetadata::parse(s).unwrap().execution_modes();
        assert_eq!(parse("/*---\nflags: [onlyStrict]\n---*/"), vec![
            ExecMode::Strict
        ]);
        assert_eq!(parse("/*---\nflags: [noStrict]\n---*/"), vec![
            ExecMode::Sloppy
        ]);
        assert_eq!(parse("/*---\nflags: [module]\n---*/"), vec![ExecMode::Module]);
        assert_eq!(parse("/*---\nflags: [raw]\n---*/"), vec![ExecMode::Raw]);
        assert_eq!(parse("/*---\ndescription: both\n---*/"), vec![
            ExecMode::Sloppy,
            ExecMode::Strict
        ]);
    }

    #[test]
    fn can_block_flags_are_captured() {
        let meta = TestMetadata::parse("/*---\nflags: [CanBlockIsFalse]\n---*/").unwrap();
        assert_eq!(meta.flags.can_block, Some(false));
        let meta = TestMetadata::parse("/*---\nflags: [CanBlockIsTrue]\n---*/").unwrap();
        assert_eq!(meta.flags.can_block, Some(true));
    }

    #[test]
    fn body_strips_frontmatter() {
        let source = "/*---\ndescription: x\n---*/\nvar a = 1;\n";
        assert_eq!(body(source), "\nvar a = 1;\n");
        assert_eq!(body("no frontmatter"), "no frontmatter");
    }

    #[test]
    fn multiline_flow_sequence() {
        let source = "/*---\nfeatures: [Symbol,\n  Symbol.iterator]\n---*/\n";
        let meta = TestMetadata::parse(source).unwrap();
        assert_eq!(meta.features, vec!["Symbol", "Symbol.iterator"]);
    }
}
