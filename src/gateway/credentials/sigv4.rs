//! AWS Signature Version 4: header signing for API calls and query-string
//! signing for pre-signed URLs.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::gateway::GatewayError;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

#[derive(Debug, Clone)]
pub struct SigV4Timestamp {
    pub amz_date: String,
    pub date: String,
}

impl SigV4Timestamp {
    pub fn now() -> Result<Self, GatewayError> {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(datetime: OffsetDateTime) -> Result<Self, GatewayError> {
        const AMZ_FORMAT: &[FormatItem<'_>] =
            format_description!("[year][month][day]T[hour][minute][second]Z");
        const DATE_FORMAT: &[FormatItem<'_>] = format_description!("[year][month][day]");

        let amz_date = datetime
            .format(AMZ_FORMAT)
            .map_err(|err| GatewayError::internal(format!("amz date format: {err}")))?;
        let date = datetime
            .format(DATE_FORMAT)
            .map_err(|err| GatewayError::internal(format!("sigv4 date format: {err}")))?;
        Ok(Self { amz_date, date })
    }

    pub fn from_amz_date(amz_date: &str) -> Result<Self, GatewayError> {
        let amz_date = amz_date.trim();
        if amz_date.len() < 8 {
            return Err(GatewayError::internal(
                "sigv4 amz date must be at least 8 chars",
            ));
        }
        Ok(Self {
            amz_date: amz_date.to_string(),
            date: amz_date[..8].to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SigV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

#[derive(Debug, Clone)]
pub struct SigV4Headers {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub host: String,
    pub security_token: Option<String>,
}

impl SigV4Headers {
    /// Merge into an envelope header map, lowercase keys.
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        headers.insert("authorization".to_string(), self.authorization.clone());
        headers.insert("x-amz-date".to_string(), self.amz_date.clone());
        headers.insert(
            "x-amz-content-sha256".to_string(),
            self.content_sha256.clone(),
        );
        headers.insert("host".to_string(), self.host.clone());
        if let Some(token) = &self.security_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }
    }
}

impl SigV4Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let signer = Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
            region: region.into(),
            service: service.into(),
        };
        for (label, value) in [
            ("access_key", &signer.access_key),
            ("secret_key", &signer.secret_key),
            ("region", &signer.region),
            ("service", &signer.service),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::internal(format!("sigv4 {label} is required")));
            }
        }
        Ok(signer)
    }

    /// Sign a request; the returned headers go on the wire as-is.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        payload: &[u8],
        timestamp: SigV4Timestamp,
    ) -> Result<SigV4Headers, GatewayError> {
        let url = parse_url(url)?;
        let host = host_with_port(&url)?;

        let payload_hash = sha256_hex(payload);
        let canonical_map = canonical_header_map(
            headers,
            &host,
            &timestamp.amz_date,
            &payload_hash,
            self.session_token.as_deref(),
        );
        let (canonical_headers, signed_headers) = render_canonical_headers(&canonical_map);

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.trim(),
            canonical_uri(&url),
            canonical_query(&url),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let scope = format!(
            "{}/{}/{}/aws4_request",
            timestamp.date, self.region, self.service
        );
        let signature = self.signature(&timestamp, &scope, &canonical_request)?;
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        );

        Ok(SigV4Headers {
            authorization,
            amz_date: timestamp.amz_date,
            content_sha256: payload_hash,
            host,
            security_token: self.session_token.clone(),
        })
    }

    /// Mint a pre-signed URL valid for `expires_in` seconds. Only the host
    /// header is signed and the payload stays unsigned, which is what lets
    /// an arbitrary client replay the URL.
    pub fn presign(
        &self,
        method: &str,
        url: &str,
        expires_in: u64,
        timestamp: SigV4Timestamp,
    ) -> Result<String, GatewayError> {
        let url = parse_url(url)?;
        let host = host_with_port(&url)?;
        let scope = format!(
            "{}/{}/{}/aws4_request",
            timestamp.date, self.region, self.service
        );

        let mut query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        query.push(("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()));
        query.push((
            "X-Amz-Credential".to_string(),
            format!("{}/{}", self.access_key, scope),
        ));
        query.push(("X-Amz-Date".to_string(), timestamp.amz_date.clone()));
        query.push(("X-Amz-Expires".to_string(), expires_in.to_string()));
        query.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));
        if let Some(token) = &self.session_token {
            query.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }

        let mut encoded: Vec<(String, String)> = query
            .iter()
            .map(|(name, value)| {
                (
                    aws_percent_encode(name, true),
                    aws_percent_encode(value, true),
                )
            })
            .collect();
        encoded.sort();
        let canonical_query = encoded
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method.trim(),
            canonical_uri(&url),
            canonical_query,
            host,
            UNSIGNED_PAYLOAD
        );
        let signature = self.signature(&timestamp, &scope, &canonical_request)?;

        let mut presigned = url.clone();
        presigned.set_query(Some(&format!(
            "{canonical_query}&X-Amz-Signature={signature}"
        )));
        Ok(presigned.to_string())
    }

    fn signature(
        &self,
        timestamp: &SigV4Timestamp,
        scope: &str,
        canonical_request: &str,
    ) -> Result<String, GatewayError> {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            timestamp.amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let k_date = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), &timestamp.date)?;
        let k_region = hmac_sha256(&k_date, &self.region)?;
        let k_service = hmac_sha256(&k_region, &self.service)?;
        let k_signing = hmac_sha256(&k_service, "aws4_request")?;
        Ok(hex_encode(&hmac_sha256(&k_signing, &string_to_sign)?))
    }
}

fn parse_url(url: &str) -> Result<Url, GatewayError> {
    Url::parse(url).map_err(|err| GatewayError::internal(format!("sigv4 invalid url {url:?}: {err}")))
}

fn host_with_port(url: &Url) -> Result<String, GatewayError> {
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::internal("sigv4 url missing host"))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn canonical_header_map(
    headers: &BTreeMap<String, String>,
    host: &str,
    amz_date: &str,
    payload_hash: &str,
    session_token: Option<&str>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let key = name.to_ascii_lowercase();
        let value = normalize_header_value(value);
        out.entry(key)
            .and_modify(|existing: &mut String| {
                if !existing.is_empty() {
                    existing.push(',');
                }
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out.entry("host".to_string())
        .or_insert_with(|| host.to_string());
    out.insert("x-amz-date".to_string(), amz_date.to_string());
    out.entry("x-amz-content-sha256".to_string())
        .or_insert_with(|| payload_hash.to_string());
    if let Some(token) = session_token {
        out.insert(
            "x-amz-security-token".to_string(),
            normalize_header_value(token),
        );
    }
    out
}

fn render_canonical_headers(headers: &BTreeMap<String, String>) -> (String, String) {
    let mut canonical = String::new();
    let mut signed = Vec::new();
    for (name, value) in headers {
        canonical.push_str(name);
        canonical.push(':');
        canonical.push_str(value);
        canonical.push('\n');
        signed.push(name.clone());
    }
    (canonical, signed.join(";"))
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        aws_percent_encode(path, false)
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            (
                aws_percent_encode(&name, true),
                aws_percent_encode(&value, true),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn aws_percent_encode(value: &str, encode_slash: bool) -> String {
    let mut out = String::new();
    for &byte in value.as_bytes() {
        let unreserved =
            matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~');
        if unreserved || (!encode_slash && byte == b'/') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX_CHARS[(byte >> 4) as usize] as char);
            out.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
    }
    out
}

fn normalize_header_value(value: &str) -> String {
    let mut out = String::new();
    let mut last_space = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| GatewayError::internal(format!("sigv4 invalid hmac key: {err}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.push(HEX_CHARS[(byte >> 4) as usize] as char);
        out.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    out
}
