//! X.500 distinguished names.
//!
//! Names are kept in DER order throughout; the text form renders RDNs in
//! that same order (`CN=host,O=Acme,C=DE`), so text round-trips preserve
//! the order a requester asked for.

use crate::asn1::{self, oids, tag, writer, DecodeError};
use crate::hash::HashAlgo;

/// One attribute type and value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeTypeValue {
    /// OID content octets of the attribute type.
    pub oid: Vec<u8>,
    /// String value. Non-string values are not accepted by this CA.
    pub value: String,
}

/// One relative distinguished name. Multi-valued RDNs keep their members
/// in encoded order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rdn {
    pub attributes: Vec<AttributeTypeValue>,
}

/// A distinguished name, with RDNs in DER order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X500Name {
    rdns: Vec<Rdn>,
}

/// Short names for the attribute types this CA renders symbolically.
const SHORT_NAMES: &[(&[u8], &str)] = &[
    (oids::DN_CN, "CN"),
    (oids::DN_SERIAL_NUMBER, "serialNumber"),
    (oids::DN_C, "C"),
    (oids::DN_L, "L"),
    (oids::DN_ST, "ST"),
    (oids::DN_O, "O"),
    (oids::DN_OU, "OU"),
    (oids::DN_DC, "DC"),
    (oids::DN_EMAIL, "emailAddress"),
    (oids::DN_UID, "UID"),
];

fn short_name(oid: &[u8]) -> Option<&'static str> {
    SHORT_NAMES.iter().find(|(o, _)| *o == oid).map(|(_, n)| *n)
}

fn oid_for_short_name(name: &str) -> Option<&'static [u8]> {
    SHORT_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(o, _)| *o)
}

impl X500Name {
    pub fn new(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Decode a DER `Name` starting at `offset`; the caller locates the
    /// SEQUENCE header.
    pub fn parse(encoded: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let seq = asn1::read_header_expect(encoded, offset, tag::SEQUENCE)?;
        let mut rdns = Vec::new();
        let mut pos = seq.content_offset;
        while pos < seq.end() {
            let set = asn1::read_header_expect(encoded, pos, tag::SET)?;
            let mut attributes = Vec::new();
            let mut attr_pos = set.content_offset;
            while attr_pos < set.end() {
                let atv = asn1::read_header_expect(encoded, attr_pos, tag::SEQUENCE)?;
                let oid_hdr = asn1::read_header_expect(encoded, atv.content_offset, tag::OID)?;
                let value_hdr = asn1::read_header(encoded, oid_hdr.end())?;
                let value = decode_directory_string(encoded, &value_hdr)?;
                attributes.push(AttributeTypeValue {
                    oid: asn1::content(encoded, &oid_hdr).to_vec(),
                    value,
                });
                attr_pos = atv.end();
            }
            if attributes.is_empty() {
                return Err(DecodeError::Malformed("empty RDN"));
            }
            rdns.push(Rdn { attributes });
            pos = set.end();
        }
        Ok(Self { rdns })
    }

    /// Parse a text name of the form `CN=host,O=Acme,C=DE`. `\,` escapes a
    /// comma inside a value; attribute types must be known short names.
    pub fn parse_text(text: &str) -> Result<Self, DecodeError> {
        let mut rdns = Vec::new();
        for part in split_unescaped(text, ',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or(DecodeError::Malformed("RDN without '='"))?;
            let oid = oid_for_short_name(key.trim())
                .ok_or(DecodeError::Malformed("unknown attribute type"))?;
            rdns.push(Rdn {
                attributes: vec![AttributeTypeValue {
                    oid: oid.to_vec(),
                    value: value.trim().replace("\\,", ","),
                }],
            });
        }
        Ok(Self { rdns })
    }

    /// DER encoding with RDNs in stored order.
    pub fn to_der(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for rdn in &self.rdns {
            let mut set_body = Vec::new();
            for attr in &rdn.attributes {
                let mut atv = writer::oid(&attr.oid);
                atv.extend_from_slice(&encode_directory_string(&attr.oid, &attr.value));
                set_body.extend_from_slice(&writer::sequence(&atv));
            }
            set_body = writer::tlv(tag::SET, &set_body);
            body.extend_from_slice(&set_body);
        }
        writer::sequence(&body)
    }

    /// Text form, RDN order preserved; commas inside values are escaped.
    pub fn to_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.rdns.len());
        for rdn in &self.rdns {
            for attr in &rdn.attributes {
                let key = short_name(&attr.oid)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("OID.{}", hex::encode(&attr.oid)));
                parts.push(format!("{}={}", key, attr.value.replace(',', "\\,")));
            }
        }
        parts.join(",")
    }

    /// Canonical text: lowercased values with collapsed whitespace, RDN
    /// order preserved. Used only for fingerprinting and equality.
    pub fn canonical_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.rdns.len());
        for rdn in &self.rdns {
            for attr in &rdn.attributes {
                let key = short_name(&attr.oid)
                    .map(|n| n.to_ascii_lowercase())
                    .unwrap_or_else(|| hex::encode(&attr.oid));
                let value = attr
                    .value
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                parts.push(format!("{}={}", key, value));
            }
        }
        parts.join(",")
    }

    /// 64-bit fingerprint of the canonical text; the store indexes
    /// subjects by this value.
    pub fn canonical_fingerprint(&self) -> i64 {
        let digest = HashAlgo::Sha1.hash(self.canonical_text().as_bytes());
        let mut value = 0i64;
        for &b in &digest[..8] {
            value = (value << 8) | b as i64;
        }
        // keep it positive so hex/text representations stay stable
        value & 0x7FFF_FFFF_FFFF_FFFF
    }

    /// Values of one attribute type, in RDN order.
    pub fn values_of(&self, oid: &[u8]) -> Vec<&str> {
        let mut out = Vec::new();
        for rdn in &self.rdns {
            for attr in &rdn.attributes {
                if attr.oid == oid {
                    out.push(attr.value.as_str());
                }
            }
        }
        out
    }

    /// Reorder the RDNs by the given attribute-type order; types not
    /// listed keep their relative order after the listed ones.
    pub fn sorted_by(&self, order: &[Vec<u8>]) -> X500Name {
        let rank = |rdn: &Rdn| -> usize {
            rdn.attributes
                .first()
                .and_then(|a| order.iter().position(|o| *o == a.oid))
                .unwrap_or(order.len())
        };
        let mut indexed: Vec<(usize, usize)> =
            self.rdns.iter().enumerate().map(|(i, r)| (rank(r), i)).collect();
        indexed.sort_by_key(|&(r, i)| (r, i));
        X500Name { rdns: indexed.into_iter().map(|(_, i)| self.rdns[i].clone()).collect() }
    }

    /// Replace every `serialNumber` RDN value with `%`, producing the SQL
    /// LIKE pattern used by `get_latest_serial_for_subject_like`.
    pub fn with_serial_wildcard(&self) -> X500Name {
        let mut rdns = self.rdns.clone();
        for rdn in &mut rdns {
            for attr in &mut rdn.attributes {
                if attr.oid == oids::DN_SERIAL_NUMBER {
                    attr.value = "%".to_string();
                }
            }
        }
        X500Name { rdns }
    }
}

/// Truncate a subject text to the schema limit, on a char boundary.
pub fn cut_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len).collect()
    }
}

fn decode_directory_string(encoded: &[u8], hdr: &asn1::Header) -> Result<String, DecodeError> {
    let bytes = asn1::content(encoded, hdr);
    match hdr.tag {
        tag::UTF8_STRING | tag::PRINTABLE_STRING | tag::IA5_STRING | tag::TELETEX_STRING => {
            String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::Malformed("attribute value"))
        }
        tag::BMP_STRING => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::Malformed("BMPString"));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units).map_err(|_| DecodeError::Malformed("BMPString"))
        }
        _ => Err(DecodeError::UnexpectedTag { tag: hdr.tag, offset: hdr.tag_offset }),
    }
}

fn encode_directory_string(type_oid: &[u8], value: &str) -> Vec<u8> {
    // country and serialNumber are PrintableString per RFC 5280; everything
    // else is emitted as UTF8String
    if type_oid == oids::DN_C || type_oid == oids::DN_SERIAL_NUMBER {
        writer::tlv(tag::PRINTABLE_STRING, value.as_bytes())
    } else if type_oid == oids::DN_EMAIL || type_oid == oids::DN_DC {
        writer::tlv(tag::IA5_STRING, value.as_bytes())
    } else {
        writer::tlv(tag::UTF8_STRING, value.as_bytes())
    }
}

fn split_unescaped(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}
