use std::sync::Arc;

use super::dictionary::Dictionary;

/// Collapses whitespace runs to one space and trims.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    dict: Arc<Dictionary>,
}

impl Matcher {
    pub fn new(dict: Arc<Dictionary>) -> Self {
        Matcher { dict }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// `None` means "leave the text alone": no entry, or nothing would change.
    pub fn translate(&self, raw: &str) -> Option<String> {
        let candidate = match self.dict.get(raw) {
            Some(hit) => hit.to_string(),
            None => {
                let normalized = normalize_whitespace(raw);
                if normalized.is_empty() {
                    return None;
                }
                let hit = self.dict.get(&normalized)?;

                let leading = &raw[..raw.len() - raw.trim_start().len()];
                let trailing = &raw[raw.trim_end().len()..];
                format!("{leading}{hit}{trailing}")
            }
        };

        (candidate != raw).then_some(candidate)
    }
}
