//! Per-archive schema union
//!
//! The union of every field name seen while extracting one archive, in
//! first-seen order. It only ever grows. With a projection list the union is
//! fixed up front and merges are ignored.

use indexmap::IndexSet;

use super::record::RawRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaUnion {
    fields: IndexSet<String>,
    fixed: bool,
}

impl SchemaUnion {
    pub fn new() -> Self {
        Self::default()
    }

    /// A schema pinned to exactly `fields`
    pub fn fixed<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect(), fixed: true }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Merge field names, returning how many were new
    pub fn merge<'a, I>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.fixed {
            return 0;
        }
        let before = self.fields.len();
        for name in names {
            if !self.fields.contains(name) {
                self.fields.insert(name.to_string());
            }
        }
        self.fields.len() - before
    }

    pub fn merge_record(&mut self, record: &RawRecord) -> usize {
        self.merge(record.field_names())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn fields(&self) -> &IndexSet<String> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.fields.iter().cloned().collect()
    }
}
