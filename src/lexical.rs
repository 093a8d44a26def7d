//! Keyword (BM25) side of the hybrid index.
//!
//! Each [`LexicalIndex`] owns a private in-RAM Tantivy index built from the
//! caller's records on every build or open; it is never persisted. Records
//! keep their insertion position as a stored field, so hits map straight
//! back to the original [`DocumentRecord`].

use anyhow::Result;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED,
};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::models::DocumentRecord;

const TOKENIZER: &str = "en_stem";
const WRITER_MEMORY_BYTES: usize = 15_000_000;

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    body: Field,
    position: Field,
    docs: Vec<DocumentRecord>,
    k: usize,
}

fn build_schema() -> (Schema, Field, Field) {
    let mut builder = Schema::builder();
    let position = builder.add_u64_field("position", STORED);
    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let body = builder.add_text_field("body", body_opts);
    (builder.build(), body, position)
}

fn register_tokenizer(index: &Index) {
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(TOKENIZER, analyzer);
}

impl LexicalIndex {
    pub fn from_documents(docs: Vec<DocumentRecord>) -> Result<Self> {
        let (schema, body, position) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizer(&index);

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        for (i, record) in docs.iter().enumerate() {
            writer.add_document(doc!(
                position => i as u64,
                body => record.content.as_str(),
            ))?;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            body,
            position,
            docs,
            k: 4,
        })
    }

    /// Result cap for [`search`](Self::search).
    pub fn set_k(&mut self, k: usize) {
        self.k = k;
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Up to `k` matching records, best first. Equal scores keep insertion
    /// order.
    pub fn search(&self, query: &str) -> Result<Vec<(DocumentRecord, f32)>> {
        if query.trim().is_empty() || self.k == 0 || self.docs.is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.body]);
        let (parsed, _errors) = parser.parse_query_lenient(query);
        let top = searcher.search(&parsed, &TopDocs::with_limit(self.k))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let stored: TantivyDocument = searcher.doc(address)?;
            let Some(position) = stored.get_first(self.position).and_then(|v| v.as_u64()) else {
                continue;
            };
            if let Some(record) = self.docs.get(position as usize) {
                hits.push((position, record, score));
            }
        }
        hits.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(hits
            .into_iter()
            .map(|(_, record, score)| (record.clone(), score))
            .collect())
    }
}
