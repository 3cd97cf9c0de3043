//! Continuation token codec.
//!
//! A token is the URL-safe base64 encoding of a CBOR payload followed by a
//! 32-byte blake3 keyed hash of that payload. Tokens produced under a
//! different key, or altered in any way, fail to decode with a
//! [`CursorError`] instead of yielding a bogus position.
//!
//! ```text
//! base64url( cbor{v, k, l} || blake3_keyed(secret, cbor{v, k, l}) )
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CursorError;
use crate::list::{ListOptions, ListResponse, Page, PageLimits, PageRequest};

const VERSION: u8 = 1;
const MAC_LEN: usize = 32;
const MAX_TOKEN_LEN: usize = 4096;

#[derive(Serialize, Deserialize)]
struct CursorPayload {
    v: u8,
    k: Vec<u8>,
    l: u32,
}

/// Encodes and verifies continuation tokens.
///
/// All listings in a process share one codec so that a token is only
/// accepted by the deployment that issued it.
#[derive(Clone)]
pub struct CursorCodec {
    key: [u8; 32],
}

impl CursorCodec {
    /// Create a codec with the given signing key.
    #[must_use]
    pub const fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create a codec with a random per-process key.
    ///
    /// Tokens issued by this codec stop validating after a restart.
    #[must_use]
    pub fn random() -> Self {
        let mut key = [0u8; 32];
        let (head, tail) = key.split_at_mut(16);
        head.copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        tail.copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self { key }
    }

    /// Create a codec from a 64-character hex key.
    ///
    /// Returns `None` if the input is not exactly 32 hex-encoded bytes.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        let key: [u8; 32] = bytes.try_into().ok()?;
        Some(Self { key })
    }

    /// Encode a position and page size into an opaque token.
    #[must_use]
    pub fn encode(&self, last_key: &[u8], limit: u32) -> String {
        let payload = CursorPayload {
            v: VERSION,
            k: last_key.to_vec(),
            l: limit,
        };
        let mut buf = Vec::with_capacity(last_key.len() + MAC_LEN + 16);
        // Writing into a Vec cannot fail for this payload shape.
        if ciborium::into_writer(&payload, &mut buf).is_err() {
            buf.clear();
        }
        let mac = blake3::keyed_hash(&self.key, &buf);
        buf.extend_from_slice(mac.as_bytes());
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Decode a token into its position and page size.
    ///
    /// # Errors
    ///
    /// Returns a `CursorError` if the token is malformed, truncated, signed
    /// under another key or tampered with.
    pub fn decode(&self, token: &str) -> Result<(Vec<u8>, u32), CursorError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(CursorError::TooLong);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::Encoding)?;
        if bytes.len() <= MAC_LEN {
            return Err(CursorError::Truncated);
        }

        let (payload, mac) = bytes.split_at(bytes.len() - MAC_LEN);
        let mac: [u8; MAC_LEN] = mac.try_into().map_err(|_| CursorError::Truncated)?;
        // blake3::Hash equality is constant-time.
        if blake3::keyed_hash(&self.key, payload) != blake3::Hash::from(mac) {
            return Err(CursorError::Signature);
        }

        let decoded: CursorPayload =
            ciborium::from_reader(payload).map_err(|_| CursorError::Payload)?;
        if decoded.v != VERSION {
            return Err(CursorError::Version(decoded.v));
        }
        Ok((decoded.k, decoded.l))
    }

    /// Turn caller-supplied list options into a store page request.
    ///
    /// An explicit non-zero limit in `options` wins over the limit carried by
    /// the token; either way the result is clamped to `limits.max_limit`.
    ///
    /// # Errors
    ///
    /// Returns a `CursorError` if the continuation token does not decode.
    pub fn page_request(
        &self,
        options: &ListOptions,
        limits: PageLimits,
    ) -> Result<PageRequest, CursorError> {
        let (after, cursor_limit) = match options
            .continue_token
            .as_deref()
            .filter(|token| !token.is_empty())
        {
            Some(token) => {
                let (key, limit) = self.decode(token)?;
                (Some(key), limit)
            }
            None => (None, 0),
        };

        let requested = if options.limit > 0 {
            options.limit
        } else if cursor_limit > 0 {
            cursor_limit
        } else {
            limits.default_limit
        };

        Ok(PageRequest {
            after,
            limit: requested.clamp(1, limits.max_limit.max(1)),
        })
    }

    /// Wrap a store page into the list envelope, issuing the next token.
    #[must_use]
    pub fn respond<T>(&self, page: Page<T>, request: &PageRequest) -> ListResponse<T> {
        let continue_token = match (&page.last_key, page.remaining) {
            (Some(last_key), remaining) if remaining > 0 => self.encode(last_key, request.limit),
            _ => String::new(),
        };
        ListResponse {
            items: page.items,
            continue_token,
            remaining_item_count: page.remaining,
        }
    }
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::paginate_sorted;

    fn codec() -> CursorCodec {
        CursorCodec::new([42u8; 32])
    }

    #[test]
    fn roundtrip() {
        let codec = codec();
        let token = codec.encode(b"\x00\x01key", 25);
        assert_eq!(codec.decode(&token).unwrap(), (b"\x00\x01key".to_vec(), 25));
    }

    #[test]
    fn roundtrip_empty_key() {
        let codec = codec();
        let token = codec.encode(&[], 1);
        assert_eq!(codec.decode(&token).unwrap(), (Vec::new(), 1));
    }

    #[test]
    fn foreign_key_rejected() {
        let token = codec().encode(b"key", 10);
        let other = CursorCodec::new([7u8; 32]);
        assert_eq!(other.decode(&token), Err(CursorError::Signature));
    }

    #[test]
    fn tampered_token_rejected() {
        let codec = codec();
        let token = codec.encode(b"key", 10);
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[3] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert_eq!(codec.decode(&tampered), Err(CursorError::Signature));
    }

    #[test]
    fn garbage_never_panics() {
        let codec = codec();
        let short = "A".repeat(43);
        let oversized = "A".repeat(MAX_TOKEN_LEN + 1);
        let inputs: [&str; 8] = [
            "",
            "!!!!",
            "not a token",
            "AAAA",
            "////",
            "\u{1F600}",
            short.as_str(),
            oversized.as_str(),
        ];
        for input in inputs {
            assert!(codec.decode(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn signed_garbage_payload_rejected() {
        let codec = codec();
        let payload = b"definitely not cbor".to_vec();
        let mac = blake3::keyed_hash(&[42u8; 32], &payload);
        let mut bytes = payload;
        bytes.extend_from_slice(mac.as_bytes());
        let token = URL_SAFE_NO_PAD.encode(bytes);
        assert_eq!(codec.decode(&token), Err(CursorError::Payload));
    }

    #[test]
    fn from_hex_requires_32_bytes() {
        assert!(CursorCodec::from_hex(&"ab".repeat(32)).is_some());
        assert!(CursorCodec::from_hex("abcd").is_none());
        assert!(CursorCodec::from_hex("zz").is_none());
    }

    #[test]
    fn page_request_defaults_and_clamps() {
        let codec = codec();
        let limits = PageLimits {
            default_limit: 10,
            max_limit: 50,
        };

        let request = codec.page_request(&ListOptions::default(), limits).unwrap();
        assert_eq!(request, PageRequest::first(10));

        let request = codec.page_request(&ListOptions::new(500), limits).unwrap();
        assert_eq!(request.limit, 50);
    }

    #[test]
    fn page_request_explicit_limit_overrides_cursor() {
        let codec = codec();
        let token = codec.encode(b"k", 5);

        let request = codec
            .page_request(&ListOptions::new(0).continue_from(token.clone()), PageLimits::default())
            .unwrap();
        assert_eq!(request.limit, 5);
        assert_eq!(request.after.as_deref(), Some(&b"k"[..]));

        let request = codec
            .page_request(&ListOptions::new(7).continue_from(token), PageLimits::default())
            .unwrap();
        assert_eq!(request.limit, 7);
    }

    #[test]
    fn page_request_invalid_token() {
        let result = codec().page_request(
            &ListOptions::new(5).continue_from("bogus"),
            PageLimits::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn paging_visits_every_item_once() {
        let codec = codec();
        let collection: Vec<(Vec<u8>, u32)> =
            (0u32..23).map(|i| (i.to_be_bytes().to_vec(), i)).collect();

        let mut seen = Vec::new();
        let mut options = ListOptions::new(4);
        loop {
            let request = codec.page_request(&options, PageLimits::default()).unwrap();
            let page = paginate_sorted(collection.clone(), &request);
            let response = codec.respond(page, &request);
            seen.extend(response.items.iter().copied());
            if response.is_complete() {
                break;
            }
            options = ListOptions::new(0).continue_from(response.continue_token);
        }

        assert_eq!(seen, (0u32..23).collect::<Vec<_>>());
    }

    #[test]
    fn appended_items_show_up_only_at_the_end() {
        let codec = codec();
        let mut collection: Vec<(Vec<u8>, u32)> =
            (0u32..6).map(|i| (i.to_be_bytes().to_vec(), i)).collect();

        let request = codec
            .page_request(&ListOptions::new(4), PageLimits::default())
            .unwrap();
        let first = codec.respond(paginate_sorted(collection.clone(), &request), &request);
        assert_eq!(first.items, vec![0, 1, 2, 3]);

        collection.push((6u32.to_be_bytes().to_vec(), 6));

        let options = ListOptions::new(0).continue_from(first.continue_token);
        let request = codec.page_request(&options, PageLimits::default()).unwrap();
        let second = codec.respond(paginate_sorted(collection, &request), &request);
        assert_eq!(second.items, vec![4, 5, 6]);
        assert!(second.is_complete());
    }
}
