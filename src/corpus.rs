//! Seed corpus reader.
//!
//! Streams a delimited `question;answer[;...]` file in fixed-size chunks of
//! [`NewDocument`]s. The `question` column becomes the document content and
//! every other column is carried as string metadata.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::db::models::{Metadata, NewDocument};

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to open corpus {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed corpus: {0}")]
    Csv(#[from] csv::Error),

    #[error("corpus is missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("corpus delimiter {0:?} is not a single ASCII character")]
    Delimiter(char),
}

/// The byte form of a delimiter. Anything outside ASCII would be truncated.
pub fn delimiter_byte(delimiter: char) -> Result<u8, CorpusError> {
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or(CorpusError::Delimiter(delimiter))
}

pub struct CorpusReader<R: Read> {
    reader: csv::Reader<R>,
    headers: StringRecord,
    question_idx: usize,
    chunk_size: usize,
    done: bool,
}

impl CorpusReader<File> {
    pub fn open(path: &Path, delimiter: u8, chunk_size: usize) -> Result<Self, CorpusError> {
        let file = File::open(path).map_err(|source| CorpusError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file, delimiter, chunk_size)
    }
}

impl<R: Read> CorpusReader<R> {
    pub fn from_reader(rdr: R, delimiter: u8, chunk_size: usize) -> Result<Self, CorpusError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(Trim::All)
            .from_reader(rdr);

        let headers = reader.headers()?.clone();
        // A zero-byte file reads like a header-only one: nothing to seed
        if headers.is_empty() {
            return Ok(Self {
                reader,
                headers,
                question_idx: 0,
                chunk_size: chunk_size.max(1),
                done: true,
            });
        }
        let question_idx = headers
            .iter()
            .position(|h| h == "question")
            .ok_or(CorpusError::MissingColumn("question"))?;
        if !headers.iter().any(|h| h == "answer") {
            return Err(CorpusError::MissingColumn("answer"));
        }

        Ok(Self {
            reader,
            headers,
            question_idx,
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }

    fn to_document(&self, record: &StringRecord) -> Option<NewDocument> {
        let question = record.get(self.question_idx).unwrap_or_default();
        if question.is_empty() {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            warn!("Skipping corpus row {line}: empty question");
            return None;
        }

        let mut metadata = Metadata::new();
        for (idx, (name, value)) in self.headers.iter().zip(record.iter()).enumerate() {
            if idx != self.question_idx {
                metadata.insert(name.to_string(), Value::String(value.to_string()));
            }
        }

        Some(NewDocument {
            content: question.to_string(),
            metadata,
        })
    }
}

impl<R: Read> Iterator for CorpusReader<R> {
    type Item = Result<Vec<NewDocument>, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut record = StringRecord::new();
        while chunk.len() < self.chunk_size {
            match self.reader.read_record(&mut record) {
                Ok(true) => {
                    if let Some(doc) = self.to_document(&record) {
                        chunk.push(doc);
                    }
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }

        if chunk.is_empty() { None } else { Some(Ok(chunk)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(data: &str, chunk_size: usize) -> Vec<Vec<NewDocument>> {
        CorpusReader::from_reader(data.as_bytes(), b';', chunk_size)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_single_row() {
        let chunks = read_all("question;answer\nWhat is X?;X is Y.\n", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0][0].content, "What is X?");
        assert_eq!(chunks[0][0].metadata["answer"], "X is Y.");
        assert!(!chunks[0][0].metadata.contains_key("question"));
    }

    #[test]
    fn test_chunking() {
        let mut data = String::from("question;answer\n");
        for i in 0..7 {
            data.push_str(&format!("q{i};a{i}\n"));
        }
        let sizes: Vec<usize> = read_all(&data, 3).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(read_all("question;answer\n", 10).is_empty());
    }

    #[test]
    fn test_zero_byte_file_is_empty() {
        assert!(read_all("", 10).is_empty());
        assert!(read_all("\n\n", 10).is_empty());
    }

    #[test]
    fn test_delimiter_byte() {
        assert_eq!(delimiter_byte(';').unwrap(), b';');
        assert_eq!(delimiter_byte('\t').unwrap(), b'\t');
        // Truncated, U+013B would read as b';'
        assert!(matches!(
            delimiter_byte('\u{013B}'),
            Err(CorpusError::Delimiter('\u{013B}'))
        ));
        assert!(delimiter_byte('é').is_err());
    }

    #[test]
    fn test_extra_columns_become_metadata() {
        let chunks = read_all("id;question;answer;topic\n7; Why? ;Because.;misc\n", 10);
        let doc = &chunks[0][0];
        assert_eq!(doc.content, "Why?");
        assert_eq!(doc.metadata["id"], "7");
        assert_eq!(doc.metadata["topic"], "misc");
    }

    #[test]
    fn test_blank_questions_skipped() {
        let chunks = read_all("question;answer\n;orphan\nok?;yes\n", 10);
        assert_eq!(chunks[0].len(), 1);
        assert_eq!(chunks[0][0].content, "ok?");
    }

    #[test]
    fn test_missing_columns() {
        let err = CorpusReader::from_reader("q;answer\n".as_bytes(), b';', 10).err();
        assert!(matches!(err, Some(CorpusError::MissingColumn("question"))));
        let err = CorpusReader::from_reader("question;a\n".as_bytes(), b';', 10).err();
        assert!(matches!(err, Some(CorpusError::MissingColumn("answer"))));
    }

    #[test]
    fn test_ragged_row_is_an_error() {
        let mut reader =
            CorpusReader::from_reader("question;answer\na;b;c\n".as_bytes(), b';', 10).unwrap();
        assert!(matches!(reader.next(), Some(Err(CorpusError::Csv(_)))));
        assert!(reader.next().is_none());
    }
}
