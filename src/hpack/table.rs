//! HPACK index table
//!
//! This module implements the address space shared by both endpoints of a
//! header-compression context (RFC 7541 Section 2.3): a fixed static table
//! of 61 well-known header fields followed by a bounded dynamic table of
//! recently inserted fields.

use std::collections::VecDeque;

use super::error::{Error, Result};
use super::HeaderField;

/// The static table of RFC 7541 Appendix A, addressed by indices 1..=61.
const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Combined static + dynamic index table.
///
/// The dynamic table stores its newest entry at the front of the deque, so
/// dynamic index 62 is `dynamic[0]` and eviction pops from the back. Three
/// sizes are tracked: `allowed_size` is the cap imposed by the HTTP/2 layer
/// (SETTINGS_HEADER_TABLE_SIZE), `max_size` is the current maximum chosen
/// by the peer through dynamic-table-size updates (never above
/// `allowed_size`), and `size` is the sum of stored entry sizes.
#[derive(Debug)]
pub struct IndexTable {
    allowed_size: usize,
    max_size: usize,
    size: usize,
    dynamic: VecDeque<HeaderField>,
}

impl IndexTable {
    /// Create an index table with the given protocol-imposed size cap.
    pub fn new(allowed_size: usize) -> Self {
        IndexTable {
            allowed_size,
            max_size: allowed_size,
            size: 0,
            dynamic: VecDeque::new(),
        }
    }

    /// Resolve an index to a header field.
    ///
    /// Index 0 is never a valid table reference; 1..=61 address the static
    /// table and anything above addresses the dynamic table from newest to
    /// oldest.
    pub fn get(&self, index: u64) -> Result<HeaderField> {
        if index == 0 {
            return Err(Error::IndexOutOfRange(index));
        }

        let index = usize::try_from(index).map_err(|_| Error::IndexOutOfRange(index))?;

        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok(HeaderField::new(name, value));
        }

        self.dynamic
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or(Error::IndexOutOfRange(index as u64))
    }

    /// Insert a field at the newest position of the dynamic table, evicting
    /// from the oldest end until the size invariant holds again.
    pub fn add(&mut self, field: HeaderField) {
        self.size += field.size();
        self.dynamic.push_front(field);
        self.evict();
    }

    /// Apply a new protocol-imposed cap (SETTINGS_HEADER_TABLE_SIZE).
    ///
    /// Lowering the cap may clamp the current maximum and force eviction.
    pub fn update_allowed_size(&mut self, size: usize) {
        self.allowed_size = size;
        if self.max_size > self.allowed_size {
            self.max_size = self.allowed_size;
        }
        self.evict();
    }

    /// Apply a dynamic-table-size update from the header block.
    ///
    /// The requested maximum must not exceed the protocol-imposed cap.
    pub fn update_max_size(&mut self, size: usize) -> Result<()> {
        if size > self.allowed_size {
            return Err(Error::TableSizeExceeded {
                requested: size,
                allowed: self.allowed_size,
            });
        }

        self.max_size = size;
        self.evict();
        Ok(())
    }

    /// Current sum of dynamic entry sizes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current maximum size as set by size updates.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of dynamic entries.
    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            // The invariant can only be violated while entries remain.
            let oldest = self
                .dynamic
                .pop_back()
                .expect("table size positive implies a stored entry");
            self.size -= oldest.size();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: &str) -> HeaderField {
        HeaderField::new(name, value)
    }

    #[test]
    fn test_static_lookup() {
        let table = IndexTable::new(4096);

        let hf = table.get(2).unwrap();
        assert_eq!((hf.name(), hf.value()), (":method", "GET"));

        let hf = table.get(61).unwrap();
        assert_eq!(hf.name(), "www-authenticate");
    }

    #[test]
    fn test_index_zero_and_out_of_range() {
        let table = IndexTable::new(4096);
        assert!(matches!(table.get(0), Err(Error::IndexOutOfRange(0))));
        assert!(matches!(table.get(62), Err(Error::IndexOutOfRange(_))));
    }

    #[test]
    fn test_dynamic_newest_has_lowest_index() {
        let mut table = IndexTable::new(4096);
        table.add(field("x-first", "1"));
        table.add(field("x-second", "2"));

        // The most recent insertion sits right behind the static table.
        assert_eq!(table.get(62).unwrap().name(), "x-second");
        assert_eq!(table.get(63).unwrap().name(), "x-first");
    }

    #[test]
    fn test_eviction_drops_oldest() {
        // Each field below costs 1 + 1 + 32 = 34 bytes; cap at two entries.
        let mut table = IndexTable::new(68);
        table.add(field("a", "1"));
        table.add(field("b", "2"));
        table.add(field("c", "3"));

        assert_eq!(table.dynamic_len(), 2);
        assert_eq!(table.get(62).unwrap().name(), "c");
        assert_eq!(table.get(63).unwrap().name(), "b");
        assert!(table.get(64).is_err());
    }

    #[test]
    fn test_size_invariant() {
        let mut table = IndexTable::new(200);
        for i in 0..32 {
            table.add(field("name", &format!("value-{}", i)));
            assert!(table.size() <= table.max_size());
        }
    }

    #[test]
    fn test_oversized_entry_empties_table() {
        let mut table = IndexTable::new(40);
        table.add(field("a", "1"));
        assert_eq!(table.dynamic_len(), 1);

        // An entry larger than the whole table evicts everything,
        // including itself.
        table.add(field("very-long-header-name", "very-long-header-value"));
        assert_eq!(table.dynamic_len(), 0);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_max_size_update_bounded_by_allowed() {
        let mut table = IndexTable::new(4096);
        assert!(table.update_max_size(1024).is_ok());
        assert_eq!(table.max_size(), 1024);

        assert!(matches!(
            table.update_max_size(8192),
            Err(Error::TableSizeExceeded { .. })
        ));
    }

    #[test]
    fn test_lowering_allowed_size_forces_eviction() {
        let mut table = IndexTable::new(4096);
        table.add(field("a", "1"));
        table.add(field("b", "2"));
        assert_eq!(table.dynamic_len(), 2);

        table.update_allowed_size(0);
        assert_eq!(table.dynamic_len(), 0);
        assert_eq!(table.max_size(), 0);

        // Raising the cap back does not resurrect evicted entries.
        table.update_allowed_size(4096);
        assert_eq!(table.dynamic_len(), 0);
    }
}
