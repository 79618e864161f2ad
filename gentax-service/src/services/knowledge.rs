//! Local knowledge base and lexical retrieval.
//!
//! Documents are read once at startup from a directory:
//! - `*.md` / `*.txt` are split into paragraph-aligned chunks;
//! - `*.jsonl` holds pre-chunked records `{"source", "chunk_id", "text"}`.
//!
//! Chunks are indexed in an in-RAM tantivy index and ranked with BM25.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tantivy::{
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::{
        Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
    },
    tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer},
    Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument,
};
use thiserror::Error;

/// Upper bound for a chunk built from a text document.
const MAX_CHUNK_CHARS: usize = 1200;

const TOKENIZER: &str = "knowledge";
const WRITER_MEMORY_BYTES: usize = 50_000_000;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "if", "in", "is", "it", "me", "my", "of", "on", "or", "the", "to", "was", "what", "when",
    "which", "who", "why", "will", "with", "you",
];

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record in {path} line {line}: {message}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),
}

/// A retrievable piece of a knowledge-base document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeChunk {
    pub source: String,
    pub chunk_id: String,
    pub text: String,
}

/// A chunk matched by a query, best first.
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub source: String,
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
}

/// Anything that can return the `k` most relevant snippets for a question.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<KnowledgeHit>, KnowledgeError>;
}

#[derive(Clone, Copy)]
struct ChunkFields {
    source: Field,
    chunk_id: Field,
    text: Field,
    ordinal: Field,
}

fn build_schema() -> (Schema, ChunkFields) {
    let mut builder = Schema::builder();

    let text_options = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();

    let fields = ChunkFields {
        source: builder.add_text_field("source", STRING | STORED),
        chunk_id: builder.add_text_field("chunk_id", STRING | STORED),
        text: builder.add_text_field("text", text_options),
        // Load position, for a stable order among equal scores.
        ordinal: builder.add_u64_field("ordinal", STORED),
    };

    (builder.build(), fields)
}

/// Lowercase alphanumeric terms without stopwords.
fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(STOPWORDS.iter().map(|w| w.to_string())))
        .build()
}

struct ChunkIndex {
    reader: IndexReader,
    query_parser: QueryParser,
    fields: ChunkFields,
}

/// BM25-ranked knowledge chunks.
pub struct KnowledgeBase {
    index: Option<ChunkIndex>,
    len: usize,
}

impl KnowledgeBase {
    /// Empty base: every query returns no hits.
    pub fn empty() -> Self {
        Self {
            index: None,
            len: 0,
        }
    }

    /// Index `chunks` in memory. The index is read-only afterwards.
    pub fn from_chunks(chunks: Vec<KnowledgeChunk>) -> Result<Self, KnowledgeError> {
        if chunks.is_empty() {
            return Ok(Self::empty());
        }

        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(TOKENIZER, analyzer());

        // A single indexing thread keeps every chunk in one segment.
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        for (ordinal, chunk) in chunks.iter().enumerate() {
            writer.add_document(doc!(
                fields.source => chunk.source.clone(),
                fields.chunk_id => chunk.chunk_id.clone(),
                fields.text => chunk.text.clone(),
                fields.ordinal => ordinal as u64,
            ))?;
        }
        writer.commit()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let query_parser = QueryParser::for_index(&index, vec![fields.text]);

        Ok(Self {
            index: Some(ChunkIndex {
                reader,
                query_parser,
                fields,
            }),
            len: chunks.len(),
        })
    }

    /// Load every supported document under `dir`, recursively.
    ///
    /// A missing directory yields an empty base. Files that cannot be read
    /// or parsed are skipped with a warning.
    pub fn load(dir: &Path) -> Result<Self, KnowledgeError> {
        if !dir.is_dir() {
            tracing::warn!(
                dir = %dir.display(),
                "Knowledge directory not found; retrieval disabled"
            );
            return Ok(Self::empty());
        }

        let mut files = Vec::new();
        collect_files(dir, &mut files);
        files.sort();

        let mut chunks = Vec::new();
        for path in files {
            let source = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            match load_file(&path, &source) {
                Ok(mut file_chunks) => {
                    tracing::debug!(
                        source = %source,
                        chunks = file_chunks.len(),
                        "Loaded knowledge document"
                    );
                    chunks.append(&mut file_chunks);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping knowledge document"),
            }
        }

        tracing::info!(dir = %dir.display(), chunks = chunks.len(), "Knowledge base loaded");
        Self::from_chunks(chunks)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Top `k` chunks by BM25 score, ties in load order.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };

        let terms = query_terms(query);
        if k == 0 || terms.is_empty() {
            return Ok(Vec::new());
        }

        let (parsed, errors) = index.query_parser.parse_query_lenient(&terms);
        if !errors.is_empty() {
            tracing::debug!(errors = ?errors, "Ignored parts of knowledge query");
        }

        let searcher = index.reader.searcher();
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(k))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let text_of = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let ordinal = doc
                .get_first(index.fields.ordinal)
                .and_then(|v| v.as_u64())
                .unwrap_or(u64::MAX);

            hits.push((
                ordinal,
                KnowledgeHit {
                    source: text_of(index.fields.source),
                    chunk_id: text_of(index.fields.chunk_id),
                    text: text_of(index.fields.text),
                    score: f64::from(score),
                },
            ));
        }

        hits.sort_by(|(a_ord, a), (b_ord, b)| b.score.total_cmp(&a.score).then(a_ord.cmp(b_ord)));
        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }
}

impl Retriever for KnowledgeBase {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        self.search(query, k)
    }
}

/// Reduce a free-form question to plain lowercase words so that quotes,
/// `-`, `:` or `AND`/`OR` typed by a user are not read as query syntax.
fn query_terms(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collect supported files below `dir`. Symlinked directories are not
/// followed; unreadable directories are skipped with a warning.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to list knowledge directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            collect_files(&path, out);
        } else if (file_type.is_file() || path.is_file())
            && matches!(extension(&path).as_deref(), Some("md" | "txt" | "jsonl"))
        {
            out.push(path);
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn load_file(path: &Path, source: &str) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
    let content = fs::read_to_string(path).map_err(|e| KnowledgeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if extension(path).as_deref() == Some("jsonl") {
        parse_jsonl(&content, path, source)
    } else {
        Ok(chunk_text(&content)
            .into_iter()
            .enumerate()
            .map(|(i, text)| KnowledgeChunk {
                source: source.to_string(),
                chunk_id: i.to_string(),
                text,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct JsonlRecord {
    source: Option<String>,
    chunk_id: Option<serde_json::Value>,
    text: String,
}

fn parse_jsonl(
    content: &str,
    path: &Path,
    default_source: &str,
) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
    let mut chunks = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JsonlRecord =
            serde_json::from_str(line).map_err(|e| KnowledgeError::InvalidRecord {
                path: path.to_path_buf(),
                line: line_no + 1,
                message: e.to_string(),
            })?;

        let text = record.text.trim();
        if text.is_empty() {
            continue;
        }

        let chunk_id = match record.chunk_id {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => chunks.len().to_string(),
        };

        chunks.push(KnowledgeChunk {
            source: record.source.unwrap_or_else(|| default_source.to_string()),
            chunk_id,
            text: text.to_string(),
        });
    }
    Ok(chunks)
}

/// Split text on blank lines and pack paragraphs into chunks of at most
/// `MAX_CHUNK_CHARS`; oversized paragraphs are cut on whitespace.
fn chunk_text(content: &str) -> Vec<String> {
    let content = content.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    let mut current = String::new();

    let paragraphs = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty());

    for paragraph in paragraphs {
        for piece in split_long(paragraph) {
            if !current.is_empty() && current.len() + 2 + piece.len() > MAX_CHUNK_CHARS {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str) -> Vec<String> {
    if paragraph.len() <= MAX_CHUNK_CHARS {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > MAX_CHUNK_CHARS {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
