//! HTTP Digest (RFC 7616 style) support for the controller's `/rpc` endpoint.
//!
//! - Parses the `WWW-Authenticate: Digest ...` challenge.
//! - Computes the response hash with MD5 (default) or SHA-256.
//! - Builds the `Authorization` header for the single retry.
//!
//! The nonce count is always `00000001`: nothing about a challenge is kept
//! between calls.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::warn;

pub const NONCE_COUNT: &str = "00000001";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha256,
}

impl Algorithm {
    /// Map the challenge's `algorithm` parameter to a hash. Absent means MD5;
    /// anything unrecognised is logged and treated as MD5.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            None | Some("") => Algorithm::Md5,
            Some(a) if a.eq_ignore_ascii_case("MD5") => Algorithm::Md5,
            Some(a) if a.eq_ignore_ascii_case("SHA-256") => Algorithm::Sha256,
            Some(other) => {
                warn!("Unsupported digest algorithm {:?}; falling back to MD5", other);
                Algorithm::Md5
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha256 => "SHA-256",
        }
    }

    pub fn hash_hex(self, input: &str) -> String {
        match self {
            Algorithm::Md5 => format!("{:x}", md5::compute(input.as_bytes())),
            Algorithm::Sha256 => to_hex(&hmac_sha256::Hash::hash(input.as_bytes())),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parameters of a `Digest` challenge. Only challenges carrying both `realm`
/// and `nonce` are represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub algorithm: Option<String>,
    pub opaque: Option<String>,
    pub charset: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value. Returns `None` when there is no
    /// Digest scheme or when `realm`/`nonce` are missing.
    pub fn parse(header: &str) -> Option<Self> {
        let lower = header.to_ascii_lowercase();
        let start = lower.match_indices("digest").map(|(i, _)| i).find(|&i| {
            let boundary_before = lower[..i].chars().next_back().is_none_or(|c| c.is_whitespace() || c == ',');
            let boundary_after = lower[i + "digest".len()..].starts_with(char::is_whitespace);
            boundary_before && boundary_after
        })?;
        let rest = &header[start + "digest".len()..];

        let mut challenge = DigestChallenge {
            realm: String::new(),
            nonce: String::new(),
            qop: None,
            algorithm: None,
            opaque: None,
            charset: None,
        };
        let (mut has_realm, mut has_nonce) = (false, false);

        for (key, value) in auth_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => {
                    challenge.realm = value;
                    has_realm = true;
                }
                "nonce" => {
                    challenge.nonce = value;
                    has_nonce = true;
                }
                "qop" => challenge.qop = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                "opaque" => challenge.opaque = Some(value),
                "charset" => challenge.charset = Some(value),
                _ => {}
            }
        }

        if has_realm && has_nonce && !challenge.nonce.is_empty() {
            Some(challenge)
        } else {
            None
        }
    }

    /// The qop to answer with: `auth` if the server offers it, otherwise none.
    pub fn selected_qop(&self) -> Option<&'static str> {
        self.qop
            .as_deref()
            .filter(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
            .map(|_| "auth")
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::from_param(self.algorithm.as_deref())
    }
}

/// Split `key=value, key="quoted, value"` pairs. Stops at the first malformed
/// pair or at the start of another auth scheme.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next_if_eq(&'=').is_none() {
            break;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            let mut escaped = false;
            for c in chars.by_ref() {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    break;
                } else {
                    value.push(c);
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' || c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key, value));
    }

    out
}

/// Inputs of one digest computation.
#[derive(Debug, Clone, Copy)]
pub struct DigestInput<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub realm: &'a str,
    pub nonce: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub cnonce: &'a str,
    pub qop: Option<&'a str>,
}

pub fn compute_response(algorithm: Algorithm, input: &DigestInput<'_>) -> String {
    let ha1 = algorithm.hash_hex(&format!("{}:{}:{}", input.username, input.realm, input.password));
    let ha2 = algorithm.hash_hex(&format!("{}:{}", input.method, input.uri));
    match input.qop {
        Some(qop) => algorithm.hash_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, input.nonce, NONCE_COUNT, input.cnonce, qop, ha2
        )),
        None => algorithm.hash_hex(&format!("{}:{}:{}", ha1, input.nonce, ha2)),
    }
}

/// Build the `Authorization` header answering `challenge`.
pub fn authorization_header(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let qop = challenge.selected_qop();
    let response = compute_response(
        challenge.algorithm(),
        &DigestInput {
            username,
            password,
            realm: &challenge.realm,
            nonce: &challenge.nonce,
            method,
            uri,
            cnonce,
            qop,
        },
    );

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        quote(username),
        quote(&challenge.realm),
        quote(&challenge.nonce),
        quote(uri)
    );
    if let Some(qop) = qop {
        header.push_str(&format!(
            ", qop={}, nc={}, cnonce=\"{}\"",
            qop,
            NONCE_COUNT,
            quote(cnonce)
        ));
    }
    header.push_str(&format!(", response=\"{}\"", response));
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
    }
    if challenge.algorithm.is_some() {
        header.push_str(&format!(", algorithm={}", challenge.algorithm().name()));
    }
    if let Some(charset) = &challenge.charset {
        header.push_str(&format!(", charset={}", charset));
    }
    header
}

fn quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Fresh client nonce: 16 random bytes, hex encoded.
pub fn random_cnonce() -> String {
    let bytes: [u8; 16] = rand::random();
    to_hex(&bytes)
}

pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}
