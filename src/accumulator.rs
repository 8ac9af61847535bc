use crate::types::DeltaEvent;

/// What a single delta did to the buffer. Every variant carries the full text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<'a> {
    /// Buffer grew; re-render it.
    Live(&'a str),
    /// Nothing changed (malformed frame, or a delta after `Done`).
    Unchanged(&'a str),
    /// `Done` arrived; the buffer is frozen.
    Finished(&'a str),
}

impl<'a> Progress<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Self::Live(t) | Self::Unchanged(t) | Self::Finished(t) => t,
        }
    }
}

/// Folds deltas into the running response text of one request.
#[derive(Debug, Default, Clone)]
pub struct ResponseAccumulator {
    buffer: String,
    deltas: usize,
    frozen: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, delta: DeltaEvent) -> Progress<'_> {
        if self.frozen {
            if delta != DeltaEvent::Done {
                tracing::warn!("[ACCUMULATOR] Delta after [DONE] ignored: {:?}", delta);
            }
            return Progress::Unchanged(&self.buffer);
        }

        match delta {
            DeltaEvent::Data(text) => {
                self.deltas += 1;
                self.buffer.push_str(&text);
                Progress::Live(&self.buffer)
            }
            DeltaEvent::Done => {
                self.frozen = true;
                tracing::debug!(
                    "[ACCUMULATOR] Frozen after {} deltas ({} chars)",
                    self.deltas,
                    self.buffer.len()
                );
                Progress::Finished(&self.buffer)
            }
            DeltaEvent::Malformed => Progress::Unchanged(&self.buffer),
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.frozen
    }

    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    /// Consumes the accumulator and hands back the final text.
    pub fn finalize(self) -> String {
        self.buffer
    }
}
