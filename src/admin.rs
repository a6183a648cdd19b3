//! Record management operations for manual edits of the cache.
//!
//! These are the calls an administrative front end (such as an HTTP CRUD
//! service) makes; codec errors map to client errors and a `false` result
//! to "not found".

use crate::cache::{CacheKey, RecordCache};
use crate::dns::fqdn;
use crate::error::CodecError;
use crate::record::{RecordRequest, RecordType};

/// Flattened view of one cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub host: String,
    pub ttl: u32,
    pub record_type: String,
    pub data: String,
}

impl RecordCache {
    /// Add the record described by `req`.
    pub fn create_record(&self, req: &RecordRequest) -> Result<(), CodecError> {
        let record = req.build()?;
        self.set(CacheKey::for_record(&record), record, None);
        Ok(())
    }

    /// Every cached record, ordered by host and type.
    pub fn list_records(&self) -> Vec<RecordView> {
        let mut views: Vec<RecordView> = self
            .snapshot()
            .into_values()
            .flat_map(|entry| entry.resources)
            .map(|rr| RecordView {
                host: rr.name.clone(),
                ttl: rr.ttl,
                record_type: rr.record_type().to_string(),
                data: rr.data.to_string(),
            })
            .collect();
        views.sort_by(|a, b| {
            (&a.host, &a.record_type, &a.data).cmp(&(&b.host, &b.record_type, &b.data))
        });
        views
    }

    /// Replace the record built from the `old_*` fields with the new one.
    ///
    /// Returns `Ok(false)` if no stored record matches the old one.
    pub fn update_record(&self, req: &RecordRequest) -> Result<bool, CodecError> {
        let record = req.build()?;
        let old = req.build_old()?;
        Ok(self.set(CacheKey::for_record(&record), record, Some(&old)))
    }

    /// Remove every record stored for `host` and `record_type`.
    pub fn delete_record(&self, host: &str, record_type: &str) -> Result<bool, CodecError> {
        let name = fqdn(host).ok_or_else(|| CodecError::InvalidName(host.to_string()))?;
        let rtype: RecordType = record_type.parse()?;
        Ok(self.remove(&CacheKey::new(&name, rtype.into()), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MxFields, ResourceRecord};

    fn request(host: &str, kind: &str, data: &str) -> RecordRequest {
        RecordRequest {
            host: host.to_string(),
            ttl: 300,
            record_type: kind.to_string(),
            data: data.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn create_then_list() {
        let cache = RecordCache::new();
        cache
            .create_record(&request("www.example.com", "A", "10.0.0.2"))
            .unwrap();
        cache
            .create_record(&RecordRequest {
                mx: MxFields {
                    pref: 10,
                    mx: "mail.example.com".to_string(),
                },
                ..request("example.com", "MX", "")
            })
            .unwrap();

        assert_eq!(
            cache.list_records(),
            vec![
                RecordView {
                    host: "example.com.".to_string(),
                    ttl: 300,
                    record_type: "MX".to_string(),
                    data: "10 mail.example.com.".to_string(),
                },
                RecordView {
                    host: "www.example.com.".to_string(),
                    ttl: 300,
                    record_type: "A".to_string(),
                    data: "10.0.0.2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn create_rejects_txt_without_mutation() {
        let cache = RecordCache::new();

        assert_eq!(
            cache.create_record(&request("example.com", "TXT", "hello")),
            Err(CodecError::UnsupportedType("TXT".to_string()))
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn update_replaces_matching_record() {
        let cache = RecordCache::new();
        cache
            .create_record(&request("example.com", "A", "124.108.115.87"))
            .unwrap();

        let update = RecordRequest {
            old_data: "124.108.115.87".to_string(),
            ..request("example.com", "A", "127.0.0.1")
        };
        assert_eq!(cache.update_record(&update), Ok(true));
        assert_eq!(cache.update_record(&update), Ok(false));

        let stored: Vec<ResourceRecord> = cache.get(&CacheKey::new("example.com.", 1)).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].data.to_string(), "127.0.0.1");
    }

    #[test]
    fn update_with_bad_old_address_is_codec_error() {
        let cache = RecordCache::new();
        let update = RecordRequest {
            old_data: "nope".to_string(),
            ..request("example.com", "A", "127.0.0.1")
        };

        assert!(matches!(
            cache.update_record(&update),
            Err(CodecError::InvalidAddress(_))
        ));
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let cache = RecordCache::new();
        cache
            .create_record(&request("example.com", "A", "10.0.0.1"))
            .unwrap();

        assert_eq!(cache.delete_record("example.com", "AAAA"), Ok(false));
        assert_eq!(cache.delete_record("Example.com.", "a"), Ok(true));
        assert_eq!(cache.delete_record("example.com", "A"), Ok(false));
        assert!(cache.delete_record("example.com", "BOGUS").is_err());
    }
}
