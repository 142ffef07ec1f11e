// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tencent Cloud request signing (`q-sign-algorithm=sha1`).
//!
//! The signature covers the lower-cased method, the request path, and the sorted, URL-encoded
//! query parameters and headers:
//!
//! ```text
//! key_time     = "<start>;<end>"
//! sign_key     = hex(hmac_sha1(secret_key, key_time))
//! request_info = method "\n" path "\n" params "\n" headers "\n"
//! to_sign      = "sha1\n" key_time "\n" hex(sha1(request_info)) "\n"
//! signature    = hex(hmac_sha1(sign_key, to_sign))
//! ```

use crate::errors::ShipError;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

const SIGN_ALGORITHM: &str = "sha1";

/// Unreserved characters (RFC 3986) pass through; everything else is percent-encoded.
const SIGN_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
pub struct Signer {
    secret_id: String,
    secret_key: String,
    ttl: Duration,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("secret_id", &self.secret_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Signer {
    #[must_use]
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            ttl,
        }
    }

    /// Signs a request valid from now until now + ttl.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, ShipError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ShipError::Sign(e.to_string()))?
            .as_secs();
        self.sign_at(method, path, params, headers, now)
    }

    /// Signs a request whose validity window starts at `start` (Unix seconds).
    ///
    /// `headers` must contain the destination `Host`.
    pub fn sign_at(
        &self,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
        start: u64,
    ) -> Result<String, ShipError> {
        if !headers.keys().any(|key| key.eq_ignore_ascii_case("host")) {
            return Err(ShipError::Sign("headers must include Host".to_string()));
        }

        let end = start
            .checked_add(self.ttl.as_secs())
            .ok_or_else(|| ShipError::Sign("signature window overflows".to_string()))?;
        let key_time = format!("{start};{end}");
        let sign_key = hmac_sha1_hex(self.secret_key.as_bytes(), key_time.as_bytes())?;

        let (param_list, formatted_params) = canonicalize(params);
        let (header_list, formatted_headers) = canonicalize(headers);
        let request_info = format!(
            "{}\n{path}\n{formatted_params}\n{formatted_headers}\n",
            method.to_ascii_lowercase()
        );
        let string_to_sign = format!(
            "{SIGN_ALGORITHM}\n{key_time}\n{}\n",
            hex::encode(Sha1::digest(request_info.as_bytes()))
        );
        let signature = hmac_sha1_hex(sign_key.as_bytes(), string_to_sign.as_bytes())?;

        Ok(format!(
            "q-sign-algorithm={SIGN_ALGORITHM}&q-ak={}&q-sign-time={key_time}&q-key-time={key_time}&q-header-list={header_list}&q-url-param-list={param_list}&q-signature={signature}",
            self.secret_id
        ))
    }
}

fn hmac_sha1_hex(key: &[u8], message: &[u8]) -> Result<String, ShipError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| ShipError::Sign(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Returns (`k1;k2`, `k1=v1&k2=v2`) with lower-cased, encoded keys in sorted order.
fn canonicalize(map: &BTreeMap<String, String>) -> (String, String) {
    let mut entries: Vec<(String, String)> = map
        .iter()
        .map(|(key, value)| {
            (
                utf8_percent_encode(&key.to_ascii_lowercase(), SIGN_ENCODE_SET).to_string(),
                utf8_percent_encode(value, SIGN_ENCODE_SET).to_string(),
            )
        })
        .collect();
    entries.sort();

    let keys = entries
        .iter()
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let pairs = entries
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    (keys, pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 1_700_000_000;

    fn signer() -> Signer {
        Signer::new("AKIDexample", "secret-key", Duration::from_secs(300))
    }

    fn params() -> BTreeMap<String, String> {
        BTreeMap::from([("topic_id".to_string(), "topic-1".to_string())])
    }

    fn headers() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Host".to_string(), "ap-guangzhou.cls.tencentcs.com".to_string()),
            ("x-cls-compress-type".to_string(), "lz4".to_string()),
        ])
    }

    fn signature_part(authorization: &str) -> &str {
        authorization
            .rsplit_once("q-signature=")
            .map(|(_, sig)| sig)
            .unwrap()
    }

    #[test]
    fn test_authorization_layout() {
        let auth = signer()
            .sign_at("POST", "/structuredlog", &params(), &headers(), START)
            .unwrap();

        assert!(auth.starts_with(
            "q-sign-algorithm=sha1&q-ak=AKIDexample&q-sign-time=1700000000;1700000300&q-key-time=1700000000;1700000300&"
        ));
        assert!(auth.contains("&q-header-list=host;x-cls-compress-type&"));
        assert!(auth.contains("&q-url-param-list=topic_id&"));
        let signature = signature_part(&auth);
        assert_eq!(signature.len(), 40);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = signer()
            .sign_at("POST", "/structuredlog", &params(), &headers(), START)
            .unwrap();
        let b = signer()
            .sign_at("POST", "/structuredlog", &params(), &headers(), START)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_input_change_changes_signature() {
        let base = signer()
            .sign_at("POST", "/structuredlog", &params(), &headers(), START)
            .unwrap();
        let base_sig = signature_part(&base).to_string();

        let mut other_headers = headers();
        other_headers.insert("x-cls-compress-type".to_string(), "zstd".to_string());
        let mut other_params = params();
        other_params.insert("topic_id".to_string(), "topic-2".to_string());

        let variants = [
            signer().sign_at("PUT", "/structuredlog", &params(), &headers(), START),
            signer().sign_at("POST", "/structuredlogs", &params(), &headers(), START),
            signer().sign_at("POST", "/structuredlog", &other_params, &headers(), START),
            signer().sign_at("POST", "/structuredlog", &params(), &other_headers, START),
            signer().sign_at("POST", "/structuredlog", &params(), &headers(), START + 1),
            Signer::new("AKIDexample", "secret-kez", Duration::from_secs(300)).sign_at(
                "POST",
                "/structuredlog",
                &params(),
                &headers(),
                START,
            ),
            Signer::new("AKIDexample", "secret-key", Duration::from_secs(301)).sign_at(
                "POST",
                "/structuredlog",
                &params(),
                &headers(),
                START,
            ),
        ];

        for variant in variants {
            let variant = variant.unwrap();
            assert_ne!(signature_part(&variant), base_sig, "{variant}");
        }
    }

    #[test]
    fn test_method_case_is_normalized() {
        let upper = signer()
            .sign_at("POST", "/structuredlog", &params(), &headers(), START)
            .unwrap();
        let lower = signer()
            .sign_at("post", "/structuredlog", &params(), &headers(), START)
            .unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_missing_host_is_rejected() {
        let result = signer().sign_at(
            "POST",
            "/structuredlog",
            &params(),
            &BTreeMap::new(),
            START,
        );
        assert!(matches!(result, Err(ShipError::Sign(_))));
    }

    #[test]
    fn test_overflowing_window_is_an_error() {
        let result = Signer::new("AKIDexample", "secret-key", Duration::from_secs(u64::MAX))
            .sign_at("POST", "/structuredlog", &params(), &headers(), START);
        assert!(matches!(result, Err(ShipError::Sign(_))));
    }

    #[test]
    fn test_canonicalize_sorts_lowercases_and_encodes() {
        let map = BTreeMap::from([
            ("b".to_string(), "x y".to_string()),
            ("A".to_string(), "1/2".to_string()),
        ]);
        let (keys, pairs) = canonicalize(&map);
        assert_eq!(keys, "a;b");
        assert_eq!(pairs, "a=1%2F2&b=x%20y");
    }

    #[test]
    fn test_sign_uses_current_time() {
        let auth = signer()
            .sign("POST", "/structuredlog", &params(), &headers())
            .unwrap();
        assert!(auth.starts_with("q-sign-algorithm=sha1&q-ak=AKIDexample&q-sign-time="));
    }
}
