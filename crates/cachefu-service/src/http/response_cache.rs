use bytes::Bytes;

use crate::caching::{Cache, CacheCodec, CacheContents, CacheError};

/// An HTTP response as stored in the response cache: the status code and the
/// raw body. Headers are not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Codec for response records.
///
/// The on-disk record is the status code as two big-endian bytes, followed
/// by the body verbatim. Records shorter than the status code, or carrying a
/// status outside `100..=599`, fail to decode and are discarded by the cache
/// as misses.
pub struct ResponseCodec;

impl CacheCodec for ResponseCodec {
    type Item = CachedResponse;

    fn serialize(item: &Self::Item) -> CacheContents<Vec<u8>> {
        let mut record = Vec::with_capacity(2 + item.body.len());
        record.extend_from_slice(&item.status.to_be_bytes());
        record.extend_from_slice(&item.body);
        Ok(record)
    }

    fn deserialize(bytes: &[u8]) -> CacheContents<Self::Item> {
        let Some((status, body)) = bytes.split_first_chunk::<2>() else {
            return Err(CacheError::Malformed(
                "response record shorter than its status code".into(),
            ));
        };
        let status = u16::from_be_bytes(*status);
        if !(100..=599).contains(&status) {
            return Err(CacheError::Malformed(format!(
                "implausible cached status code {status}"
            )));
        }
        Ok(CachedResponse {
            status,
            body: Bytes::copy_from_slice(body),
        })
    }
}

/// A two-level cache of HTTP responses keyed by request URL.
pub type ResponseCache = Cache<ResponseCodec>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let response = CachedResponse {
            status: 200,
            body: Bytes::from_static(b"hello"),
        };
        let record = ResponseCodec::serialize(&response).unwrap();
        assert_eq!(record, b"\x00\xc8hello");
        assert_eq!(ResponseCodec::deserialize(&record).unwrap(), response);
    }

    #[test]
    fn test_record_too_short() {
        assert!(matches!(
            ResponseCodec::deserialize(b""),
            Err(CacheError::Malformed(_))
        ));
        assert!(matches!(
            ResponseCodec::deserialize(b"\x01"),
            Err(CacheError::Malformed(_))
        ));
    }

    #[test]
    fn test_implausible_status() {
        // status 0
        assert!(matches!(
            ResponseCodec::deserialize(b"\x00\x00data"),
            Err(CacheError::Malformed(_))
        ));
        // status 1000
        assert!(matches!(
            ResponseCodec::deserialize(b"\x03\xe8data"),
            Err(CacheError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_body() {
        let record = ResponseCodec::serialize(&CachedResponse {
            status: 204,
            body: Bytes::new(),
        })
        .unwrap();
        let decoded = ResponseCodec::deserialize(&record).unwrap();
        assert_eq!(decoded.status, 204);
        assert!(decoded.body.is_empty());
    }
}
