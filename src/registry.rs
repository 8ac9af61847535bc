use crate::extract::ExtractedBlock;
use crate::types::{ChatError, CodeSnippet, Language, Result, SnippetId};
use chrono::Utc;
use serde::Serialize;

/// Ordered store of extracted snippets.
///
/// Positions shift when an entry is deleted, so anything held across a
/// delete should use the [`SnippetId`] instead of the index.
#[derive(Debug, Default, Clone)]
pub struct SnippetRegistry {
    snippets: Vec<CodeSnippet>,
    /// Count of snippets ever added. Never decreases.
    generation: u64,
}

/// Read model handed to the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnippetView {
    pub id: SnippetId,
    pub index: usize,
    pub filename: String,
    pub language: Language,
    pub raw_code: String,
    pub line_count: usize,
    pub multiline: bool,
}

impl SnippetView {
    fn new(index: usize, snippet: &CodeSnippet) -> Self {
        let newlines = snippet.raw_code.matches('\n').count();
        Self {
            id: snippet.id,
            index,
            filename: snippet.filename.clone(),
            language: snippet.language,
            raw_code: snippet.raw_code.clone(),
            line_count: newlines + 1,
            multiline: newlines > 1,
        }
    }
}

impl SnippetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1-based number the next unnamed snippet falls back to.
    pub fn next_fallback_index(&self) -> u64 {
        self.generation + 1
    }

    pub fn add(
        &mut self,
        raw_code: impl Into<String>,
        language: Language,
        filename: impl Into<String>,
    ) -> usize {
        self.generation += 1;
        self.snippets.push(CodeSnippet {
            id: SnippetId::new(),
            raw_code: raw_code.into(),
            language,
            filename: filename.into(),
            created_at: Utc::now(),
        });
        self.snippets.len() - 1
    }

    /// Stores an extracted block under a derived filename.
    pub fn add_block(&mut self, block: ExtractedBlock) -> SnippetId {
        let filename = crate::filename::derive_filename(
            &block.raw_code,
            block.language,
            self.next_fallback_index(),
        );
        tracing::debug!(
            "[REGISTRY] Storing {} snippet as {} ({} chars)",
            block.language,
            filename,
            block.raw_code.len()
        );
        let index = self.add(block.raw_code, block.language, filename);
        self.snippets[index].id
    }

    pub fn update(&mut self, index: usize, new_code: impl Into<String>) -> Result<()> {
        let len = self.snippets.len();
        let snippet = self
            .snippets
            .get_mut(index)
            .ok_or(ChatError::IndexOutOfRange { index, len })?;
        snippet.raw_code = new_code.into();
        Ok(())
    }

    /// Removes the entry at `index`; later entries move down by one.
    pub fn delete(&mut self, index: usize) -> Result<CodeSnippet> {
        let len = self.snippets.len();
        if index >= len {
            return Err(ChatError::IndexOutOfRange { index, len }.into());
        }
        let removed = self.snippets.remove(index);
        tracing::debug!("[REGISTRY] Deleted {} at index {}", removed.filename, index);
        Ok(removed)
    }

    pub fn position_of(&self, id: SnippetId) -> Option<usize> {
        self.snippets.iter().position(|s| s.id == id)
    }

    pub fn update_by_id(&mut self, id: SnippetId, new_code: impl Into<String>) -> Result<()> {
        let index = self.position_of(id).ok_or(ChatError::UnknownSnippet(id))?;
        self.update(index, new_code)
    }

    pub fn remove_by_id(&mut self, id: SnippetId) -> Result<CodeSnippet> {
        let index = self.position_of(id).ok_or(ChatError::UnknownSnippet(id))?;
        self.delete(index)
    }

    pub fn get(&self, index: usize) -> Option<&CodeSnippet> {
        self.snippets.get(index)
    }

    pub fn get_by_id(&self, id: SnippetId) -> Option<&CodeSnippet> {
        self.snippets.iter().find(|s| s.id == id)
    }

    pub fn view(&self, id: SnippetId) -> Option<SnippetView> {
        let index = self.position_of(id)?;
        Some(SnippetView::new(index, &self.snippets[index]))
    }

    pub fn views(&self) -> Vec<SnippetView> {
        self.snippets
            .iter()
            .enumerate()
            .map(|(i, s)| SnippetView::new(i, s))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeSnippet> {
        self.snippets.iter()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}
