//! Minimal X.509 reader for the handful of fields reported in [`SslInfo`].
//!
//! Walks the DER structure of the TBSCertificate directly: version, serial and
//! signature algorithm are skipped, then issuer, validity and subject are read.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::types::SslInfo;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_OID: u8 = 0x06;
const TAG_VERSION: u8 = 0xa0;

const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];
const OID_ORGANIZATION: [u8; 3] = [0x55, 0x04, 0x0a];

/// The two attributes of a distinguished name we care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameAttributes {
    pub common_name: Option<String>,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub issuer: NameAttributes,
    pub subject: NameAttributes,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl ParsedCertificate {
    /// Issuer and subject CNs match, or neither carries an organization.
    pub fn is_self_signed(&self) -> bool {
        self.issuer.common_name == self.subject.common_name
            || (self.issuer.organization == self.subject.organization
                && self.issuer.organization.is_none())
    }
}

/// Reads one TLV, returning (tag, contents, remainder).
fn read_tlv(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;

    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let octets = (first & 0x7f) as usize;
        if octets == 0 || octets > 4 || rest.len() < octets {
            return None;
        }
        let len = rest[..octets]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, &rest[octets..])
    };

    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

fn expect_tlv(input: &[u8], tag: u8) -> Option<(&[u8], &[u8])> {
    let (found, contents, rest) = read_tlv(input)?;
    (found == tag).then_some((contents, rest))
}

pub fn parse_certificate(der: &[u8]) -> Option<ParsedCertificate> {
    let (cert, _) = expect_tlv(der, TAG_SEQUENCE)?;
    let (tbs, _) = expect_tlv(cert, TAG_SEQUENCE)?;

    let mut rest = tbs;
    if rest.first() == Some(&TAG_VERSION) {
        rest = read_tlv(rest)?.2;
    }
    // serial, signature algorithm
    rest = read_tlv(rest)?.2;
    rest = read_tlv(rest)?.2;

    let (issuer, rest) = expect_tlv(rest, TAG_SEQUENCE)?;
    let (validity, rest) = expect_tlv(rest, TAG_SEQUENCE)?;
    let (subject, _) = expect_tlv(rest, TAG_SEQUENCE)?;

    let (not_before, not_after) = parse_validity(validity);

    Some(ParsedCertificate {
        issuer: parse_name(issuer),
        subject: parse_name(subject),
        not_before,
        not_after,
    })
}

fn parse_name(mut name: &[u8]) -> NameAttributes {
    let mut attrs = NameAttributes::default();

    while let Some((tag, set, rest)) = read_tlv(name) {
        name = rest;
        if tag != TAG_SET {
            continue;
        }
        let mut entries = set;
        while let Some((entry, rest)) = expect_tlv(entries, TAG_SEQUENCE) {
            entries = rest;
            let Some((oid, value)) = expect_tlv(entry, TAG_OID) else {
                continue;
            };
            let Some((value_tag, value, _)) = read_tlv(value) else {
                continue;
            };
            let slot = if oid == OID_COMMON_NAME {
                &mut attrs.common_name
            } else if oid == OID_ORGANIZATION {
                &mut attrs.organization
            } else {
                continue;
            };
            if slot.is_none() {
                *slot = decode_string(value_tag, value);
            }
        }
    }

    attrs
}

fn decode_string(tag: u8, bytes: &[u8]) -> Option<String> {
    match tag {
        // UTF8String, PrintableString, IA5String
        0x0c | 0x13 | 0x16 => std::str::from_utf8(bytes).ok().map(str::to_string),
        // TeletexString, treated as Latin-1
        0x14 => Some(bytes.iter().map(|b| *b as char).collect()),
        // BMPString
        0x1e => {
            if bytes.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).ok()
        }
        _ => None,
    }
}

fn parse_validity(validity: &[u8]) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Some((tag, first, rest)) = read_tlv(validity) else {
        return (None, None);
    };
    let not_before = parse_time(tag, first);
    let not_after = read_tlv(rest).and_then(|(tag, second, _)| parse_time(tag, second));
    (not_before, not_after)
}

fn parse_time(tag: u8, bytes: &[u8]) -> Option<DateTime<Utc>> {
    if !bytes.is_ascii() {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    match tag {
        0x17 => parse_utc_time(text),
        0x18 => parse_generalized_time(text),
        _ => None,
    }
}

/// Parse UTCTime format (YYMMDDHHMMSSZ)
fn parse_utc_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim_end_matches('Z');
    if s.len() < 12 {
        return None;
    }

    let year: i32 = s[0..2].parse().ok()?;
    let year = if year >= 50 { 1900 + year } else { 2000 + year };
    to_utc(year, &s[2..12])
}

/// Parse GeneralizedTime format (YYYYMMDDHHMMSSZ)
fn parse_generalized_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim_end_matches('Z');
    if s.len() < 14 {
        return None;
    }

    let year: i32 = s[0..4].parse().ok()?;
    to_utc(year, &s[4..14])
}

fn to_utc(year: i32, rest: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(&format!("{:04}{}", year, rest), "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Builds the reported TLS metadata from the peer's DER certificate.
///
/// An unparseable certificate still yields `SslInfo` (TLS did happen), with
/// the issuer reported as `Unknown` and the subject falling back to `hostname`.
pub fn ssl_info_from_der(
    der: &[u8],
    hostname: &str,
    valid_by_trust_store: bool,
    now: DateTime<Utc>,
) -> SslInfo {
    let parsed = parse_certificate(der);

    let Some(cert) = parsed else {
        return SslInfo {
            enabled: true,
            valid_by_trust_store,
            issuer: "Unknown".to_string(),
            subject: hostname.to_string(),
            valid_from: None,
            valid_to: None,
            days_until_expiry: None,
            self_signed: false,
        };
    };

    let days_until_expiry = cert
        .not_after
        .map(|to| (to - now).num_seconds().div_euclid(86_400));

    SslInfo {
        enabled: true,
        valid_by_trust_store,
        issuer: cert
            .issuer
            .organization
            .clone()
            .or_else(|| cert.issuer.common_name.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        subject: cert
            .subject
            .common_name
            .clone()
            .unwrap_or_else(|| hostname.to_string()),
        valid_from: cert.not_before,
        valid_to: cert.not_after,
        days_until_expiry,
        self_signed: cert.is_self_signed(),
    }
}
