use crate::config::KeywordTable;
use crate::header::{MetaField, RawSlice};

/// Maps series metadata to an acquisition-type label.
///
/// Fields are consulted in [`MetaField::PRIORITY`] order and the first field
/// with any keyword hit decides. Within a field the longest matching keyword
/// wins, so a specific keyword such as "t1c" is never preempted by "t1".
pub struct ModalityClassifier<'a> {
    table: &'a KeywordTable,
}

impl<'a> ModalityClassifier<'a> {
    pub fn new(table: &'a KeywordTable) -> Self {
        Self { table }
    }

    /// Label of the series represented by `slice`, or `None` if unclassified.
    pub fn classify(&self, slice: &RawSlice) -> Option<&'a str> {
        MetaField::PRIORITY
            .iter()
            .filter_map(|&field| slice.field_text(field))
            .find_map(|text| self.classify_text(&text))
    }

    /// Best label for one already lower-cased field text.
    pub fn classify_text(&self, text: &str) -> Option<&'a str> {
        let mut best: Option<(&'a str, usize)> = None;
        for (label, keywords) in self.table.iter() {
            for keyword in keywords {
                let longer = best.is_none_or(|(_, len)| keyword.len() > len);
                if longer && text.contains(keyword.as_str()) {
                    best = Some((label, keyword.len()));
                }
            }
        }
        best.map(|(label, _)| label)
    }
}
