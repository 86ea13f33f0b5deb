//! Ordered `KEY=VALUE` field collection decoded from a radio line.

/// A single decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
    bare: bool,
}

/// Fields of a frame, keyed by lower-cased name, in wire order.
///
/// Bare tokens (no `=`) are stored under synthetic `unknown1`, `unknown2`, ...
/// keys so that legacy frames survive decoding without data loss.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<Entry>,
}

impl Fields {
    /// Creates an empty field set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Decodes raw `KEY=VALUE` / bare elements.
    ///
    /// Empty elements (e.g. the one after a trailing `;`) are skipped.
    pub fn decompose<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields = Self::new();
        let mut unknown = 0usize;
        for element in elements {
            let element = element.as_ref();
            if element.is_empty() {
                continue;
            }
            if let Some((key, value)) = element.split_once('=') {
                fields.insert(key, value);
            } else {
                unknown += 1;
                fields.entries.push(Entry {
                    key: format!("unknown{unknown}"),
                    value: element.to_owned(),
                    bare: true,
                });
            }
        }
        fields
    }

    /// Inserts a field, replacing the value of an existing key in place.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref().to_lowercase();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.value = value;
            entry.bare = false;
        } else {
            self.entries.push(Entry {
                key,
                value,
                bare: false,
            });
        }
    }

    /// Looks up a field by name (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over `(key, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-encodes the fields as wire elements (keys lower-cased).
    #[must_use]
    pub fn to_elements(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                if e.bare {
                    e.value.clone()
                } else {
                    format!("{}={}", e.key, e.value)
                }
            })
            .collect()
    }
}
