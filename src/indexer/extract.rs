use crate::model::SymbolEntry;
use anyhow::Result;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct ExtractedFile {
    pub symbols: Vec<SymbolEntry>,
    pub imports: BTreeSet<String>,
    pub calls: BTreeSet<String>,
}

/// Structural parser for one language. `extract` fails when the source does
/// not parse cleanly; the caller records the file with an empty index.
pub trait LanguageExtractor {
    fn extract(&mut self, rel_path: &str, source: &str) -> Result<ExtractedFile>;
}
