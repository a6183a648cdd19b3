//! DNS message parsing and construction.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{CodecError, ParseError};
use crate::record::{RData, RecordType, ResourceRecord, Soa, Srv};

pub const HEADER_LEN: usize = 12;

/// Largest datagram read from, or written to, the wire.
pub const MAX_UDP_PAYLOAD: usize = 512;

pub const CLASS_IN: u16 = 1;

pub const FLAG_RESPONSE: u16 = 0x8000;
pub const FLAG_TRUNCATED: u16 = 0x0200;

const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_HOPS: usize = 64;

/// Fixed 12-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated(data.len()));
        }
        let word = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);

        Ok(Self {
            id: word(0),
            flags: word(2),
            qdcount: word(4),
            ancount: word(6),
            nscount: word(8),
            arcount: word(10),
        })
    }

    /// Whether the QR bit marks this message as a response.
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    fn write(&self, buf: &mut Vec<u8>) {
        for word in [
            self.id,
            self.flags,
            self.qdcount,
            self.ancount,
            self.nscount,
            self.arcount,
        ] {
            buf.extend_from_slice(&word.to_be_bytes());
        }
    }
}

/// Read the transaction id without decoding the rest of the message.
pub fn peek_id(data: &[u8]) -> Option<u16> {
    (data.len() >= HEADER_LEN).then(|| u16::from_be_bytes([data[0], data[1]]))
}

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A decoded DNS message.
///
/// Authority and additional records are validated while parsing but not
/// kept: replies built from the cache carry only the question and answers.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
}

impl Message {
    /// Parse a DNS message from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let header = Header::parse(data)?;
        let mut pos = HEADER_LEN;

        let mut questions = Vec::new();
        for _ in 0..header.qdcount {
            let (name, next) = read_name(data, pos)?;
            let qtype = read_u16(data, next)?;
            let qclass = read_u16(data, next + 2)?;
            questions.push(Question {
                name,
                qtype,
                qclass,
            });
            pos = next + 4;
        }

        let mut answers = Vec::new();
        for _ in 0..header.ancount {
            let (record, next) = read_record(data, pos)?;
            answers.push(record);
            pos = next;
        }

        let trailing = u32::from(header.nscount) + u32::from(header.arcount);
        for _ in 0..trailing {
            let (_, next) = read_record(data, pos)?;
            pos = next;
        }

        Ok(Self {
            header,
            questions,
            answers,
        })
    }

    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Turn a query into a response carrying `answers`.
    pub fn into_reply(mut self, answers: impl IntoIterator<Item = ResourceRecord>) -> Self {
        self.header.flags |= FLAG_RESPONSE;
        self.answers.extend(answers);
        self
    }

    /// Encode the message to wire format bytes.
    ///
    /// Questions or answers that would push the datagram past 512 bytes are
    /// dropped and the TC bit is set.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut data = Vec::with_capacity(MAX_UDP_PAYLOAD);
        let mut header = Header {
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
            ..self.header
        };
        header.write(&mut data);

        let mut truncated = false;
        for q in &self.questions {
            let mark = data.len();
            write_name(&mut data, &q.name)?;
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());

            if data.len() > MAX_UDP_PAYLOAD {
                data.truncate(mark);
                header.flags |= FLAG_TRUNCATED;
                truncated = true;
                break;
            }
            header.qdcount += 1;
        }

        let first = self.questions.first().map(|q| q.name.as_str());
        let answers: &[ResourceRecord] = if truncated { &[] } else { &self.answers };
        for a in answers {
            let mark = data.len();
            // Pointer to the first question's name at offset 12
            if first.is_some_and(|name| name.eq_ignore_ascii_case(&a.name)) {
                data.extend_from_slice(&[0xC0, 0x0C]);
            } else {
                write_name(&mut data, &a.name)?;
            }
            data.extend_from_slice(&u16::from(a.record_type()).to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            write_rdata(&mut data, &a.data)?;

            if data.len() > MAX_UDP_PAYLOAD {
                data.truncate(mark);
                header.flags |= FLAG_TRUNCATED;
                break;
            }
            header.ancount += 1;
        }

        data[2..4].copy_from_slice(&header.flags.to_be_bytes());
        data[4..6].copy_from_slice(&header.qdcount.to_be_bytes());
        data[6..8].copy_from_slice(&header.ancount.to_be_bytes());

        Ok(data)
    }
}

/// Normalise a name to fully-qualified presentation form.
///
/// Returns `None` if the name cannot be encoded (empty labels, a label over
/// 63 bytes, or more than 255 bytes on the wire).
pub fn fqdn(name: &str) -> Option<String> {
    name_labels(name).map(|labels| labels_to_name(&labels))
}

fn name_labels(name: &str) -> Option<Vec<Vec<u8>>> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if name == "." {
        return Some(Vec::new());
    }

    let bytes = name.as_bytes();
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut wire_len = 1;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                if label.is_empty() {
                    return None;
                }
                wire_len += label.len() + 1;
                labels.push(std::mem::take(&mut label));
                i += 1;
            }
            b'\\' => match &bytes[i + 1..] {
                [a, b, c, ..] if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() => {
                    let value = u16::from(*a - b'0') * 100
                        + u16::from(*b - b'0') * 10
                        + u16::from(*c - b'0');
                    label.push(u8::try_from(value).ok()?);
                    i += 4;
                }
                [c, ..] => {
                    label.push(*c);
                    i += 2;
                }
                [] => return None,
            },
            c => {
                label.push(c);
                i += 1;
            }
        }
        if label.len() > MAX_LABEL_LEN {
            return None;
        }
    }

    if !label.is_empty() {
        wire_len += label.len() + 1;
        labels.push(label);
    }
    if wire_len > MAX_NAME_LEN {
        return None;
    }

    Some(labels)
}

fn labels_to_name(labels: &[Vec<u8>]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }

    let mut name = String::new();
    for label in labels {
        for &b in label {
            match b {
                b'.' | b'\\' => {
                    name.push('\\');
                    name.push(b as char);
                }
                0x21..=0x7e => name.push(b as char),
                _ => {
                    let _ = write!(name, "\\{:03}", b);
                }
            }
        }
        name.push('.');
    }
    name
}

fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<(), CodecError> {
    let labels = name_labels(name).ok_or_else(|| CodecError::InvalidName(name.to_string()))?;
    for label in &labels {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label);
    }
    buf.push(0);
    Ok(())
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, ParseError> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(ParseError::Truncated(pos))
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32, ParseError> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ParseError::Truncated(pos))
}

/// Decode a (possibly compressed) name starting at `start`.
///
/// Returns the name and the offset just past it in the original stream.
fn read_name(data: &[u8], start: usize) -> Result<(String, usize), ParseError> {
    let mut labels: Vec<Vec<u8>> = Vec::new();
    let mut pos = start;
    let mut resume = None;
    let mut hops = 0;
    let mut wire_len = 1;

    loop {
        let len = *data.get(pos).ok_or(ParseError::Truncated(pos))?;
        match len & 0xC0 {
            0x00 => {
                if len == 0 {
                    pos += 1;
                    break;
                }
                let len = len as usize;
                let label = data
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(ParseError::Truncated(pos))?;
                wire_len += len + 1;
                if wire_len > MAX_NAME_LEN {
                    return Err(ParseError::NameTooLong);
                }
                labels.push(label.to_vec());
                pos += 1 + len;
            }
            0xC0 => {
                let low = *data.get(pos + 1).ok_or(ParseError::Truncated(pos + 1))?;
                if resume.is_none() {
                    resume = Some(pos + 2);
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(ParseError::PointerLoop);
                }
                let target = (usize::from(len & 0x3F) << 8) | usize::from(low);
                if target >= data.len() {
                    return Err(ParseError::BadPointer(target));
                }
                pos = target;
            }
            _ => return Err(ParseError::BadLabel(len)),
        }
    }

    Ok((labels_to_name(&labels), resume.unwrap_or(pos)))
}

fn read_record(data: &[u8], pos: usize) -> Result<(ResourceRecord, usize), ParseError> {
    let (name, pos) = read_name(data, pos)?;
    let rtype = read_u16(data, pos)?;
    let class = read_u16(data, pos + 2)?;
    let ttl = read_u32(data, pos + 4)?;
    let rdlength = read_u16(data, pos + 8)? as usize;
    let start = pos + 10;

    let body = read_rdata(data, start, rdlength, rtype)?;
    let record = ResourceRecord {
        name,
        class,
        ttl,
        data: body,
    };

    Ok((record, start + rdlength))
}

fn read_rdata(data: &[u8], start: usize, len: usize, rtype: u16) -> Result<RData, ParseError> {
    let end = start + len;
    let rdata = data.get(start..end).ok_or(ParseError::Truncated(start))?;
    let bad = || ParseError::BadRdata { rtype, len };

    // Names inside rdata may point anywhere in the message, but must end
    // within the record.
    let name_at = |pos: usize| -> Result<(String, usize), ParseError> {
        let (name, next) = read_name(data, pos)?;
        if next > end {
            return Err(bad());
        }
        Ok((name, next))
    };

    let body = match RecordType::from(rtype) {
        RecordType::A => {
            let octets: [u8; 4] = rdata.try_into().map_err(|_| bad())?;
            RData::A(Ipv4Addr::from(octets))
        }
        RecordType::Aaaa => {
            let octets: [u8; 16] = rdata.try_into().map_err(|_| bad())?;
            RData::Aaaa(Ipv6Addr::from(octets))
        }
        RecordType::Ns => RData::Ns(name_at(start)?.0),
        RecordType::Cname => RData::Cname(name_at(start)?.0),
        RecordType::Ptr => RData::Ptr(name_at(start)?.0),
        RecordType::Mx => {
            if len < 3 {
                return Err(bad());
            }
            RData::Mx {
                preference: read_u16(data, start)?,
                exchange: name_at(start + 2)?.0,
            }
        }
        RecordType::Soa => {
            let (mname, next) = name_at(start)?;
            let (rname, next) = name_at(next)?;
            if next + 20 > end {
                return Err(bad());
            }
            RData::Soa(Soa {
                mname,
                rname,
                serial: read_u32(data, next)?,
                refresh: read_u32(data, next + 4)?,
                retry: read_u32(data, next + 8)?,
                expire: read_u32(data, next + 12)?,
                minimum: read_u32(data, next + 16)?,
            })
        }
        RecordType::Srv => {
            if len < 7 {
                return Err(bad());
            }
            RData::Srv(Srv {
                priority: read_u16(data, start)?,
                weight: read_u16(data, start + 2)?,
                port: read_u16(data, start + 4)?,
                target: name_at(start + 6)?.0,
            })
        }
        _ => RData::Other {
            rtype,
            data: rdata.to_vec(),
        },
    };

    Ok(body)
}

fn write_rdata(buf: &mut Vec<u8>, body: &RData) -> Result<(), CodecError> {
    let len_at = buf.len();
    buf.extend_from_slice(&[0x00, 0x00]); // RDLENGTH, patched below

    match body {
        RData::A(ip) => buf.extend_from_slice(&ip.octets()),
        RData::Aaaa(ip) => buf.extend_from_slice(&ip.octets()),
        RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) => write_name(buf, name)?,
        RData::Mx {
            preference,
            exchange,
        } => {
            buf.extend_from_slice(&preference.to_be_bytes());
            write_name(buf, exchange)?;
        }
        RData::Soa(soa) => {
            write_name(buf, &soa.mname)?;
            write_name(buf, &soa.rname)?;
            for value in [soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum] {
                buf.extend_from_slice(&value.to_be_bytes());
            }
        }
        RData::Srv(srv) => {
            buf.extend_from_slice(&srv.priority.to_be_bytes());
            buf.extend_from_slice(&srv.weight.to_be_bytes());
            buf.extend_from_slice(&srv.port.to_be_bytes());
            write_name(buf, &srv.target)?;
        }
        RData::Other { data, .. } => buf.extend_from_slice(data),
    }

    let rdlength = (buf.len() - len_at - 2) as u16;
    buf[len_at..len_at + 2].copy_from_slice(&rdlength.to_be_bytes());
    Ok(())
}
