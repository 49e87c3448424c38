//! DER emission helpers.
//!
//! Two flavors: `write_header` for the streaming encoders that fill a
//! caller-provided buffer sized upfront (OCSP responses), and the `tlv`
//! family building small owned values bottom-up (certificates, CRLs).

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::tag;

/// Number of bytes `write_header` will emit for a body of `body_len` bytes.
pub fn header_len(body_len: usize) -> usize {
    if body_len < 0x80 {
        2
    } else if body_len < 0x100 {
        3
    } else if body_len < 0x10000 {
        4
    } else if body_len < 0x1000000 {
        5
    } else {
        6
    }
}

/// Total encoded size of an element with a body of `body_len` bytes.
pub fn encoded_len(body_len: usize) -> usize {
    header_len(body_len) + body_len
}

/// Write tag and length at `offset`, returning the number of bytes written.
///
/// The caller guarantees the buffer is large enough; encoders size their
/// output before writing.
pub fn write_header(tag: u8, body_len: usize, out: &mut [u8], offset: usize) -> usize {
    let mut idx = offset;
    out[idx] = tag;
    idx += 1;
    if body_len < 0x80 {
        out[idx] = body_len as u8;
        idx += 1;
    } else if body_len < 0x100 {
        out[idx] = 0x81;
        out[idx + 1] = body_len as u8;
        idx += 2;
    } else if body_len < 0x10000 {
        out[idx] = 0x82;
        out[idx + 1] = (body_len >> 8) as u8;
        out[idx + 2] = body_len as u8;
        idx += 3;
    } else if body_len < 0x1000000 {
        out[idx] = 0x83;
        out[idx + 1] = (body_len >> 16) as u8;
        out[idx + 2] = (body_len >> 8) as u8;
        out[idx + 3] = body_len as u8;
        idx += 4;
    } else {
        out[idx] = 0x84;
        out[idx + 1] = (body_len >> 24) as u8;
        out[idx + 2] = (body_len >> 16) as u8;
        out[idx + 3] = (body_len >> 8) as u8;
        out[idx + 4] = body_len as u8;
        idx += 5;
    }
    idx - offset
}

/// One complete element as an owned value.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(content.len()));
    let mut hdr = [0u8; 6];
    let n = write_header(tag, content.len(), &mut hdr, 0);
    out.extend_from_slice(&hdr[..n]);
    out.extend_from_slice(content);
    out
}

/// SEQUENCE wrapping already-encoded children.
pub fn sequence(content: &[u8]) -> Vec<u8> {
    tlv(tag::SEQUENCE, content)
}

/// INTEGER from an unsigned big-endian magnitude; a sign byte is inserted
/// when the leading bit is set.
pub fn integer_from_magnitude(magnitude: &[u8]) -> Vec<u8> {
    let mag = {
        let mut m = magnitude;
        while m.len() > 1 && m[0] == 0 {
            m = &m[1..];
        }
        m
    };
    if mag.is_empty() || mag[0] & 0x80 != 0 {
        let mut content = Vec::with_capacity(mag.len() + 1);
        content.push(0);
        content.extend_from_slice(mag);
        tlv(tag::INTEGER, &content)
    } else {
        tlv(tag::INTEGER, mag)
    }
}

/// Non-negative INTEGER.
pub fn integer_u64(value: u64) -> Vec<u8> {
    integer_from_magnitude(&value.to_be_bytes())
}

pub fn oid(content: &[u8]) -> Vec<u8> {
    tlv(tag::OID, content)
}

pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(tag::OCTET_STRING, content)
}

/// BIT STRING with no unused bits.
pub fn bit_string(content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 1);
    body.push(0);
    body.extend_from_slice(content);
    tlv(tag::BIT_STRING, &body)
}

pub fn boolean(value: bool) -> Vec<u8> {
    tlv(tag::BOOLEAN, &[if value { 0xFF } else { 0x00 }])
}

pub fn null() -> Vec<u8> {
    vec![tag::NULL, 0x00]
}

pub fn enumerated(value: u8) -> Vec<u8> {
    tlv(tag::ENUMERATED, &[value])
}

/// GeneralizedTime `YYYYMMDDHHMMSSZ` from epoch seconds.
pub fn generalized_time(epoch_seconds: i64) -> Vec<u8> {
    let dt = utc(epoch_seconds);
    let text = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second()
    );
    tlv(tag::GENERALIZED_TIME, text.as_bytes())
}

/// RFC 5280 Time: UTCTime until 2049, GeneralizedTime from 2050 on.
pub fn x509_time(epoch_seconds: i64) -> Vec<u8> {
    let dt = utc(epoch_seconds);
    if dt.year() < 2050 {
        let text = format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            dt.year() % 100, dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second()
        );
        tlv(tag::UTC_TIME, text.as_bytes())
    } else {
        generalized_time(epoch_seconds)
    }
}

fn utc(epoch_seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::read_header;

    #[test]
    fn header_roundtrip() {
        for len in [0usize, 1, 0x7F, 0x80, 0xFF, 0x100, 0xFFFF, 0x10000] {
            let mut buf = vec![0u8; encoded_len(len)];
            let written = write_header(0x30, len, &mut buf, 0);
            assert_eq!(written, header_len(len));
            // content bytes stay zero; only the header matters here
            let hdr = read_header(&buf, 0).unwrap();
            assert_eq!(hdr.len, len);
            assert_eq!(hdr.content_offset, written);
        }
    }

    #[test]
    fn integer_sign_byte() {
        assert_eq!(integer_u64(0x2A), vec![0x02, 0x01, 0x2A]);
        assert_eq!(integer_u64(0x80), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(integer_u64(0), vec![0x02, 0x01, 0x00]);
    }

    #[test]
    fn utc_time_before_2050() {
        // 2023-11-14T22:13:20Z
        let t = x509_time(1_700_000_000);
        assert_eq!(t[0], tag::UTC_TIME);
        assert_eq!(&t[2..], b"231114221320Z");
    }

    #[test]
    fn generalized_time_format() {
        let t = generalized_time(1_700_000_000);
        assert_eq!(&t[2..], b"20231114221320Z");
    }
}
