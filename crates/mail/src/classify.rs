//! Label classifier
//!
//! Maps the label names on a remote message to at most one category name.
//! User-created labels always outrank system labels; among user labels the
//! first one in provider order wins. When only system labels are present,
//! the label table's display-name list decides, in table priority order.

use crate::models::LabelTable;

/// Pure label → category-name classifier
#[derive(Debug, Clone, Default)]
pub struct LabelClassifier {
    table: LabelTable,
}

impl LabelClassifier {
    pub fn new(table: LabelTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &LabelTable {
        &self.table
    }

    /// Pick a category name for a message's label names
    pub fn classify<S: AsRef<str>>(&self, labels: &[S]) -> Option<String> {
        if labels.is_empty() {
            return None;
        }

        if let Some(user_label) = labels
            .iter()
            .map(AsRef::as_ref)
            .find(|label| !self.table.is_system(label))
        {
            return Some(user_label.to_string());
        }

        self.table
            .display_names
            .iter()
            .find(|(id, _)| labels.iter().any(|l| l.as_ref() == id))
            .map(|(_, name)| name.clone())
    }
}
