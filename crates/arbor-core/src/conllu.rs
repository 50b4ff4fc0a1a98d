//! # CoNLL-U Reading and Writing
//!
//! Sentences are blocks of tab-separated token lines separated by blank
//! lines. Comments, multiword-token ranges (`3-4`) and empty nodes (`5.1`)
//! are kept verbatim so that written output mirrors the input; only plain
//! integer ids become [`TokenRecord`]s.

use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};

/// Number of columns in a token line.
pub const NUM_COLUMNS: usize = 10;

/// Token-level annotation columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Id,
    Form,
    Lemma,
    Upos,
    Xpos,
    Feats,
    Head,
    Deprel,
    Deps,
    Misc,
}

impl Field {
    /// Zero-based column of this field.
    pub fn column(self) -> usize {
        match self {
            Field::Id => 0,
            Field::Form => 1,
            Field::Lemma => 2,
            Field::Upos => 3,
            Field::Xpos => 4,
            Field::Feats => 5,
            Field::Head => 6,
            Field::Deprel => 7,
            Field::Deps => 8,
            Field::Misc => 9,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Form => "form",
            Field::Lemma => "lemma",
            Field::Upos => "upos",
            Field::Xpos => "xpos",
            Field::Feats => "feats",
            Field::Head => "head",
            Field::Deprel => "deprel",
            Field::Deps => "deps",
            Field::Misc => "misc",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One syntactic word with its ten columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    columns: [String; NUM_COLUMNS],
}

impl TokenRecord {
    pub fn new(columns: [String; NUM_COLUMNS]) -> Self {
        Self { columns }
    }

    pub fn get(&self, field: Field) -> &str {
        &self.columns[field.column()]
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.columns[field.column()] = value.into();
    }

    /// Head index (0 = root), `None` when unannotated.
    pub fn head(&self) -> Option<usize> {
        self.get(Field::Head).parse().ok()
    }

    pub fn form(&self) -> &str {
        self.get(Field::Form)
    }

    pub fn deprel(&self) -> &str {
        self.get(Field::Deprel)
    }
}

impl fmt::Display for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.columns.join("\t"))
    }
}

/// A line of a sentence block, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceLine {
    /// `# ...` line, stored without modification.
    Comment(String),
    /// Multiword-token range or empty node, stored without modification.
    Passthrough(String),
    /// Index into [`Sentence::tokens`].
    Token(usize),
}

/// A sentence block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub lines: Vec<SentenceLine>,
    pub tokens: Vec<TokenRecord>,
}

impl Sentence {
    /// Values of `field` for every token, in order.
    pub fn column(&self, field: Field) -> Vec<&str> {
        self.tokens.iter().map(|t| t.get(field)).collect()
    }

    /// Gold heads, with unannotated tokens attached to the root.
    pub fn heads(&self) -> Vec<usize> {
        self.tokens.iter().map(|t| t.head().unwrap_or(0)).collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                SentenceLine::Comment(text) | SentenceLine::Passthrough(text) => {
                    writeln!(f, "{text}")?
                }
                SentenceLine::Token(i) => writeln!(f, "{}", self.tokens[*i])?,
            }
        }
        Ok(())
    }
}

/// Reader for CoNLL-U text with a pre-compiled token id pattern.
#[derive(Debug, Clone)]
pub struct ConlluReader {
    re_id: Regex,
}

impl ConlluReader {
    /// # Errors
    ///
    /// Returns `ArborError::RegexError` if the id pattern fails to compile
    /// (should never happen with the static pattern defined here).
    pub fn new() -> Result<Self> {
        Ok(Self {
            re_id: Regex::new(r"^(\d+)(?:([-.])(\d+))?$")?,
        })
    }

    /// Parse CoNLL-U text; `path` is only used in error messages.
    pub fn parse_str(&self, text: &str, path: &Path) -> Result<Vec<Sentence>> {
        let mut sentences = Vec::new();
        let mut current = Sentence::default();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                // blocks without a token attach their lines to the next sentence
                if !current.tokens.is_empty() {
                    sentences.push(std::mem::take(&mut current));
                }
                continue;
            }
            if line.starts_with('#') {
                current.lines.push(SentenceLine::Comment(line.to_string()));
                continue;
            }

            let malformed = |message: String| ArborError::Malformed {
                path: path.to_path_buf(),
                line: line_no + 1,
                message,
            };
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() != NUM_COLUMNS {
                return Err(malformed(format!(
                    "expected {NUM_COLUMNS} tab-separated columns, found {}",
                    parts.len()
                )));
            }
            let caps = self
                .re_id
                .captures(parts[0])
                .ok_or_else(|| malformed(format!("invalid token id {:?}", parts[0])))?;
            if caps.get(2).is_some() {
                current.lines.push(SentenceLine::Passthrough(line.to_string()));
                continue;
            }

            let expected = current.tokens.len() + 1;
            let id: usize = caps[1]
                .parse()
                .map_err(|_| malformed(format!("invalid token id {:?}", parts[0])))?;
            if id != expected {
                return Err(malformed(format!("expected token id {expected}, found {id}")));
            }
            let columns: [String; NUM_COLUMNS] = std::array::from_fn(|i| parts[i].to_string());
            current.lines.push(SentenceLine::Token(current.tokens.len()));
            current.tokens.push(TokenRecord::new(columns));
        }
        if !current.tokens.is_empty() {
            sentences.push(current);
        }

        Ok(sentences)
    }

    /// Read every sentence of a CoNLL-U file.
    pub fn read_file(&self, path: &Path) -> Result<Vec<Sentence>> {
        let file = fs::File::open(path).map_err(|e| ArborError::io(path, e))?;
        let mut text = String::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| ArborError::io(path, e))?;
            text.push_str(&line);
            text.push('\n');
        }
        self.parse_str(&text, path)
    }
}

/// Write sentences, each followed by a blank line.
pub fn write_sentences<W: Write>(out: &mut W, sentences: &[Sentence]) -> std::io::Result<()> {
    for sentence in sentences {
        write!(out, "{sentence}")?;
        writeln!(out)?;
    }
    Ok(())
}

/// A discovered input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path used to open the file.
    pub path: PathBuf,
    /// Path relative to the root it was discovered under.
    pub relative: PathBuf,
}

/// Expand files and directories into the `.conllu` files they contain.
///
/// A file argument keeps its own name as relative path; a directory is
/// walked recursively and results are sorted for reproducibility.
pub fn discover<P: AsRef<Path>>(roots: &[P]) -> Result<Vec<SourceFile>> {
    let mut found = Vec::new();
    for root in roots {
        let root = root.as_ref();
        let meta = fs::metadata(root).map_err(|e| ArborError::io(root, e))?;
        if meta.is_file() {
            let relative = root
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| root.to_path_buf());
            found.push(SourceFile {
                path: root.to_path_buf(),
                relative,
            });
            continue;
        }

        let mut files = Vec::new();
        walk(root, &mut files)?;
        files.sort();
        for path in files {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            found.push(SourceFile { path, relative });
        }
    }
    Ok(found)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| ArborError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| ArborError::io(dir, e))?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "conllu") {
            out.push(path);
        }
    }
    Ok(())
}
