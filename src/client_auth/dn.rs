//! Distinguished name parsing, normalization and matching.
//!
//! Registrations state the expected subject in RFC 4514 string form, most
//! specific RDN first (`CN=client1,O=Example`). Certificates encode the
//! subject most general first, so the certificate side is reversed before
//! comparison.
//!
//! # Normalization
//!
//! | Part | Rule |
//! |------|------|
//! | attribute type | case-insensitive, aliases and dotted OIDs folded to one name |
//! | value | unescaped, trimmed, inner whitespace collapsed, case-folded |
//! | multi-valued RDN | compared as a set |
//!
//! # Wildcards
//!
//! In a [`DnPattern`] an attribute value written as a bare `*` matches any
//! single value of that attribute type. `\*` is a literal asterisk. There is
//! no substring or suffix matching.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use x509_parser::x509::X509Name;

/// Attribute types with a well-known short name, and their OIDs.
const ATTRIBUTE_TYPES: &[(&str, &str)] = &[
    ("CN", "2.5.4.3"),
    ("SURNAME", "2.5.4.4"),
    ("SERIALNUMBER", "2.5.4.5"),
    ("C", "2.5.4.6"),
    ("L", "2.5.4.7"),
    ("ST", "2.5.4.8"),
    ("STREET", "2.5.4.9"),
    ("O", "2.5.4.10"),
    ("OU", "2.5.4.11"),
    ("TITLE", "2.5.4.12"),
    ("GIVENNAME", "2.5.4.42"),
    ("DC", "0.9.2342.19200300.100.1.25"),
    ("UID", "0.9.2342.19200300.100.1.1"),
    ("EMAILADDRESS", "1.2.840.113549.1.9.1"),
];

/// Alternative spellings accepted in DN strings.
const ATTRIBUTE_ALIASES: &[(&str, &str)] = &[
    ("COMMONNAME", "CN"),
    ("SN", "SURNAME"),
    ("S", "ST"),
    ("E", "EMAILADDRESS"),
    ("EMAIL", "EMAILADDRESS"),
    ("G", "GIVENNAME"),
];

/// Error parsing a DN string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnParseError {
    /// An attribute has no `=`.
    #[error("attribute '{0}' has no '=' separator")]
    MissingEquals(String),
    /// An attribute type is empty.
    #[error("empty attribute type")]
    EmptyAttributeType,
    /// An attribute type is neither a known name nor a dotted OID.
    #[error("unknown attribute type '{0}'")]
    UnknownAttributeType(String),
    /// `#`-prefixed BER values are not accepted.
    #[error("hex-encoded attribute values are not supported")]
    HexValue,
    /// Backslash at end of input.
    #[error("dangling escape at end of value")]
    DanglingEscape,
    /// Quoted value without closing quote.
    #[error("unterminated quoted value")]
    UnterminatedQuote,
    /// Characters after a closing quote.
    #[error("unexpected characters after quoted value")]
    TrailingAfterQuote,
    /// Escaped bytes are not valid UTF-8.
    #[error("attribute value is not valid UTF-8")]
    InvalidUtf8,
}

/// A normalized attribute type/value assertion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Ava {
    attr: String,
    value: String,
}

/// A normalized distinguished name, most specific RDN first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    rdns: Vec<Vec<Ava>>,
}

impl DistinguishedName {
    /// Parse an RFC 4514 DN string.
    ///
    /// # Errors
    ///
    /// Returns [`DnParseError`] for malformed input.
    pub fn parse(input: &str) -> Result<Self, DnParseError> {
        let rdns = parse_rdns(input)?
            .into_iter()
            .map(|rdn| {
                let mut avas: Vec<Ava> = rdn
                    .into_iter()
                    .map(|raw| Ava {
                        attr: raw.attr,
                        value: normalize_value(&raw.value),
                    })
                    .collect();
                avas.sort();
                avas
            })
            .collect();
        Ok(Self { rdns })
    }

    /// Normalize the subject or issuer of a parsed certificate.
    ///
    /// # Errors
    ///
    /// Returns a description when an attribute value is not a string type.
    pub fn from_x509(name: &X509Name<'_>) -> Result<Self, String> {
        let mut rdns = Vec::new();
        for rdn in name.iter() {
            let mut avas = Vec::new();
            for attr in rdn.iter() {
                let oid = attr.attr_type().to_id_string();
                let value = attr
                    .as_str()
                    .map_err(|e| format!("attribute {oid} is not a string: {e}"))?;
                avas.push(Ava {
                    attr: attribute_name_for_oid(&oid),
                    value: normalize_value(value),
                });
            }
            avas.sort();
            rdns.push(avas);
        }
        rdns.reverse();
        Ok(Self { rdns })
    }

    /// Number of RDNs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// `true` for the empty DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }
}

impl FromStr for DistinguishedName {
    type Err = DnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            for (j, ava) in rdn.iter().enumerate() {
                if j > 0 {
                    f.write_str("+")?;
                }
                write!(f, "{}={}", ava.attr, escape_value(&ava.value))?;
            }
        }
        Ok(())
    }
}

/// Value side of a pattern assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternValue {
    Any,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PatternAva {
    attr: String,
    value: PatternValue,
}

impl PatternAva {
    fn matches(&self, ava: &Ava) -> bool {
        self.attr == ava.attr
            && match &self.value {
                PatternValue::Any => true,
                PatternValue::Exact(expected) => *expected == ava.value,
            }
    }
}

/// Expected subject DN of a PKI client, with optional wildcard values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnPattern {
    rdns: Vec<Vec<PatternAva>>,
    source: String,
}

impl DnPattern {
    /// Parse a DN pattern.
    ///
    /// # Errors
    ///
    /// Returns [`DnParseError`] for malformed input.
    pub fn parse(input: &str) -> Result<Self, DnParseError> {
        let rdns = parse_rdns(input)?
            .into_iter()
            .map(|rdn| {
                rdn.into_iter()
                    .map(|raw| PatternAva {
                        value: if raw.wildcard {
                            PatternValue::Any
                        } else {
                            PatternValue::Exact(normalize_value(&raw.value))
                        },
                        attr: raw.attr,
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            rdns,
            source: input.to_string(),
        })
    }

    /// Whether `dn` satisfies the pattern.
    ///
    /// RDN count and order must agree; inside a multi-valued RDN every
    /// pattern assertion must consume a distinct assertion of the subject.
    #[must_use]
    pub fn matches(&self, dn: &DistinguishedName) -> bool {
        self.rdns.len() == dn.rdns.len()
            && self
                .rdns
                .iter()
                .zip(&dn.rdns)
                .all(|(pattern, rdn)| rdn_matches(pattern, rdn))
    }

    /// `true` if any value is a wildcard.
    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.rdns
            .iter()
            .flatten()
            .any(|ava| ava.value == PatternValue::Any)
    }

    /// The pattern as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for DnPattern {
    type Err = DnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DnPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn rdn_matches(pattern: &[PatternAva], rdn: &[Ava]) -> bool {
    if pattern.len() != rdn.len() {
        return false;
    }
    // Exact values claim their entries before wildcards take what is left.
    let exact = pattern.iter().filter(|p| p.value != PatternValue::Any);
    let wildcards = pattern.iter().filter(|p| p.value == PatternValue::Any);
    let mut used = vec![false; rdn.len()];
    exact.chain(wildcards).all(|p| {
        let found = rdn
            .iter()
            .enumerate()
            .find(|(i, ava)| !used[*i] && p.matches(ava));
        match found {
            Some((i, _)) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// RFC 4514 string parsing
// ─────────────────────────────────────────────────────────────────────────────

struct RawAva {
    attr: String,
    value: String,
    /// Value was a single unescaped `*`.
    wildcard: bool,
}

fn parse_rdns(input: &str) -> Result<Vec<Vec<RawAva>>, DnParseError> {
    let mut rdns = Vec::new();
    if input.trim().is_empty() {
        return Ok(rdns);
    }

    let mut chars = input.chars().peekable();
    let mut current = Vec::new();
    loop {
        let mut attr = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(c) => attr.push(c),
                None => return Err(DnParseError::MissingEquals(attr.trim().to_string())),
            }
        }
        let attr = canonical_attribute(attr.trim())?;

        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let (value, wildcard, terminator) = parse_value(&mut chars)?;
        current.push(RawAva {
            attr,
            value,
            wildcard,
        });

        match terminator {
            Some('+') => {}
            Some(_) => rdns.push(std::mem::take(&mut current)),
            None => {
                rdns.push(current);
                return Ok(rdns);
            }
        }
    }
}

/// Parse one value up to an unescaped `,` / `+` or end of input.
fn parse_value(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<(String, bool, Option<char>), DnParseError> {
    let mut bytes = Vec::new();
    let mut escaped = false;

    match chars.peek() {
        Some('#') => return Err(DnParseError::HexValue),
        Some('"') => {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => {
                        escaped = true;
                        push_escape(chars, &mut bytes)?;
                    }
                    Some(c) => push_char(&mut bytes, c),
                    None => return Err(DnParseError::UnterminatedQuote),
                }
            }
            let terminator = loop {
                match chars.next() {
                    Some(' ') => {}
                    Some(c @ (',' | '+')) => break Some(c),
                    None => break None,
                    Some(_) => return Err(DnParseError::TrailingAfterQuote),
                }
            };
            let value = String::from_utf8(bytes).map_err(|_| DnParseError::InvalidUtf8)?;
            // Quoting counts as escaping: "*" is a literal asterisk.
            return Ok((value, false, terminator));
        }
        _ => {}
    }

    let terminator = loop {
        match chars.next() {
            Some(c @ (',' | '+')) => break Some(c),
            Some('\\') => {
                escaped = true;
                push_escape(chars, &mut bytes)?;
            }
            Some(c) => push_char(&mut bytes, c),
            None => break None,
        }
    };

    let value = String::from_utf8(bytes).map_err(|_| DnParseError::InvalidUtf8)?;
    let wildcard = !escaped && value.trim() == "*";
    Ok((value, wildcard, terminator))
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn push_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    bytes: &mut Vec<u8>,
) -> Result<(), DnParseError> {
    let first = chars.next().ok_or(DnParseError::DanglingEscape)?;
    if let Some(hi) = first.to_digit(16) {
        if let Some(lo) = chars.peek().and_then(|c| c.to_digit(16)) {
            chars.next();
            // Two hex digits always fit in a byte.
            bytes.push(u8::try_from(hi * 16 + lo).unwrap_or(u8::MAX));
            return Ok(());
        }
    }
    push_char(bytes, first);
    Ok(())
}

fn canonical_attribute(attr: &str) -> Result<String, DnParseError> {
    if attr.is_empty() {
        return Err(DnParseError::EmptyAttributeType);
    }
    let upper = attr.to_ascii_uppercase();
    let upper = upper.strip_prefix("OID.").unwrap_or(&upper);

    if upper.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        if upper.split('.').all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit())) {
            return Ok(attribute_name_for_oid(upper));
        }
        return Err(DnParseError::UnknownAttributeType(attr.to_string()));
    }

    let name = ATTRIBUTE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map_or(upper, |(_, name)| *name);

    if ATTRIBUTE_TYPES.iter().any(|(known, _)| *known == name) {
        Ok(name.to_string())
    } else {
        Err(DnParseError::UnknownAttributeType(attr.to_string()))
    }
}

fn attribute_name_for_oid(oid: &str) -> String {
    ATTRIBUTE_TYPES
        .iter()
        .find(|(_, known)| *known == oid)
        .map_or_else(|| oid.to_string(), |(name, _)| (*name).to_string())
}

fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            _ => out.push(c),
        }
    }
    out
}
