//! DNS message parsing and construction.
//!
//! Only the parts of the wire format the resolver needs: the question of an
//! inbound query, the answer TTLs of an upstream response, and the two
//! synthetic replies used for blocked domains.

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 12;

/// TTL used when a response is too short to carry a header.
pub const SHORT_RESPONSE_TTL: u32 = 300;

/// Starting point of the minimum-TTL scan; also the result for zero answers.
pub const DEFAULT_ANSWER_TTL: u32 = 3600;

/// TTL carried by the synthetic `0.0.0.0` answer.
pub const NULL_ANSWER_TTL: u32 = 60;

const FLAGS_NXDOMAIN: u16 = 0x8183;
const FLAGS_NOERROR: u16 = 0x8180;
const POINTER_MASK: u8 = 0xC0;

/// A parsed DNS query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub id: u16,
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Parse the header and first question of a DNS query.
    ///
    /// Compression pointers in the question name are skipped, not followed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedQuery("shorter than header"));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);

        let mut pos = HEADER_LEN;
        let mut domain = String::new();

        while pos < data.len() {
            let label_len = data[pos] as usize;
            if label_len == 0 {
                pos += 1;
                break;
            }
            if data[pos] & POINTER_MASK == POINTER_MASK {
                pos += 2;
                continue;
            }
            pos += 1;
            if pos + label_len > data.len() {
                return Err(Error::MalformedQuery("label runs past end of message"));
            }
            if !domain.is_empty() {
                domain.push('.');
            }
            push_label(&mut domain, &data[pos..pos + label_len]);
            pos += label_len;
        }

        if pos + 4 > data.len() {
            return Err(Error::MalformedQuery("missing QTYPE/QCLASS"));
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Ok(Self {
            id,
            domain,
            qtype,
            qclass,
        })
    }

    /// Cache key for this question: `"<domain>:<qtype>"`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.domain, self.qtype)
    }

    /// Create a response from cached data, updating the transaction ID.
    pub fn response_from_cache(&self, cached: &[u8]) -> Option<Vec<u8>> {
        if cached.len() < 2 {
            return None;
        }
        let mut response = cached.to_vec();
        set_transaction_id(&mut response, self.id);
        Some(response)
    }
}

/// Append a label in presentation form. Bytes outside printable ASCII
/// become `\DDD` escapes so distinct names never share a key.
fn push_label(domain: &mut String, label: &[u8]) {
    for &byte in label {
        match byte {
            b'.' | b'\\' => {
                domain.push('\\');
                domain.push(byte as char);
            }
            0x21..=0x7E => domain.push(byte as char),
            _ => domain.push_str(&format!("\\{byte:03}")),
        }
    }
}

/// Overwrite the transaction ID of a message in place.
pub fn set_transaction_id(message: &mut [u8], id: u16) {
    if message.len() >= 2 {
        message[..2].copy_from_slice(&id.to_be_bytes());
    }
}

/// Read the transaction ID of a message, if it has one.
pub fn transaction_id(message: &[u8]) -> Option<u16> {
    (message.len() >= 2).then(|| u16::from_be_bytes([message[0], message[1]]))
}

/// Minimum TTL across the answer section of a response.
///
/// Returns [`SHORT_RESPONSE_TTL`] for buffers without a full header and
/// [`DEFAULT_ANSWER_TTL`] when there are no answers. Answer TTLs above
/// [`DEFAULT_ANSWER_TTL`] do not raise the result.
pub fn min_ttl(response: &[u8]) -> u32 {
    if response.len() < HEADER_LEN {
        return SHORT_RESPONSE_TTL;
    }

    let qdcount = u16::from_be_bytes([response[4], response[5]]);
    let ancount = u16::from_be_bytes([response[6], response[7]]);

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        pos = skip_name(response, pos);
        pos += 4; // QTYPE + QCLASS
    }

    let mut min_ttl = DEFAULT_ANSWER_TTL;
    for _ in 0..ancount {
        pos = skip_name(response, pos);
        if pos + 10 > response.len() {
            break;
        }

        let ttl = u32::from_be_bytes([
            response[pos + 4],
            response[pos + 5],
            response[pos + 6],
            response[pos + 7],
        ]);
        min_ttl = min_ttl.min(ttl);

        let rdlength = u16::from_be_bytes([response[pos + 8], response[pos + 9]]) as usize;
        pos += 10 + rdlength;
    }

    min_ttl
}

/// Advance past an encoded name: a label chain ending in a zero byte, or a
/// compression pointer which always ends the name.
fn skip_name(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() {
        let b = data[pos];
        if b & POINTER_MASK == POINTER_MASK {
            return pos + 2;
        }
        if b == 0 {
            return pos + 1;
        }
        pos += 1 + b as usize;
    }
    pos
}

/// NXDOMAIN reply for a query: the query echoed back with QR, AA and
/// RCODE=3 set and no answers.
pub fn nxdomain_response(query: &[u8]) -> Vec<u8> {
    let mut response = query.to_vec();
    if response.len() < HEADER_LEN {
        return response;
    }
    response[2..4].copy_from_slice(&FLAGS_NXDOMAIN.to_be_bytes());
    response[6..8].copy_from_slice(&0u16.to_be_bytes());
    response
}

/// Reply answering a query with a single `A 0.0.0.0` record.
///
/// The answer is appended after the echoed query and names the question
/// through a pointer to offset 12, so the result is 16 bytes longer.
pub fn null_response(query: &[u8]) -> Vec<u8> {
    if query.len() < HEADER_LEN {
        return query.to_vec();
    }

    let mut response = Vec::with_capacity(query.len() + 16);
    response.extend_from_slice(query);
    response[2..4].copy_from_slice(&FLAGS_NOERROR.to_be_bytes());
    response[6..8].copy_from_slice(&1u16.to_be_bytes());

    response.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
    response.extend_from_slice(&1u16.to_be_bytes()); // A
    response.extend_from_slice(&1u16.to_be_bytes()); // IN
    response.extend_from_slice(&NULL_ANSWER_TTL.to_be_bytes());
    response.extend_from_slice(&4u16.to_be_bytes());
    response.extend_from_slice(&[0, 0, 0, 0]);
    response
}
