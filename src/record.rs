//! Typed DNS resource records and the codec that builds them from requests.
//!
//! Records are compared by their canonical textual form (owner name, type and
//! body, TTL excluded). The cache uses this both to de-duplicate and to find
//! the record an update or delete refers to.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dns::{CLASS_IN, fqdn};
use crate::error::CodecError;

/// Record type codes understood by the forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Opt,
    Unknown(u16),
}

impl From<u16> for RecordType {
    fn from(code: u16) -> Self {
        match code {
            1 => RecordType::A,
            2 => RecordType::Ns,
            5 => RecordType::Cname,
            6 => RecordType::Soa,
            12 => RecordType::Ptr,
            15 => RecordType::Mx,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            41 => RecordType::Opt,
            other => RecordType::Unknown(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Ptr => 12,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Opt => 41,
            RecordType::Unknown(code) => code,
        }
    }
}

impl FromStr for RecordType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rtype = match s.to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "NS" => RecordType::Ns,
            "CNAME" => RecordType::Cname,
            "SOA" => RecordType::Soa,
            "PTR" => RecordType::Ptr,
            "MX" => RecordType::Mx,
            "TXT" => RecordType::Txt,
            "AAAA" => RecordType::Aaaa,
            "SRV" => RecordType::Srv,
            "OPT" => RecordType::Opt,
            _ => return Err(CodecError::UnsupportedType(s.to_string())),
        };
        Ok(rtype)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
            RecordType::Ns => f.write_str("NS"),
            RecordType::Cname => f.write_str("CNAME"),
            RecordType::Soa => f.write_str("SOA"),
            RecordType::Ptr => f.write_str("PTR"),
            RecordType::Mx => f.write_str("MX"),
            RecordType::Txt => f.write_str("TXT"),
            RecordType::Aaaa => f.write_str("AAAA"),
            RecordType::Srv => f.write_str("SRV"),
            RecordType::Opt => f.write_str("OPT"),
            RecordType::Unknown(code) => write!(f, "TYPE{}", code),
        }
    }
}

/// SOA record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Soa {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// SRV record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Srv {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Type-specific record body.
///
/// `Other` only ever comes off the wire: answers of types the codec cannot
/// build are still relayed and learned byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(String),
    Cname(String),
    Ptr(String),
    Soa(Soa),
    Mx { preference: u16, exchange: String },
    Srv(Srv),
    Other { rtype: u16, data: Vec<u8> },
}

impl RData {
    pub fn record_type(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Aaaa(_) => RecordType::Aaaa,
            RData::Ns(_) => RecordType::Ns,
            RData::Cname(_) => RecordType::Cname,
            RData::Ptr(_) => RecordType::Ptr,
            RData::Soa(_) => RecordType::Soa,
            RData::Mx { .. } => RecordType::Mx,
            RData::Srv(_) => RecordType::Srv,
            RData::Other { rtype, .. } => RecordType::from(*rtype),
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A(ip) => write!(f, "{}", ip),
            RData::Aaaa(ip) => write!(f, "{}", ip),
            RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) => f.write_str(name),
            RData::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
            RData::Mx {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            RData::Srv(srv) => write!(
                f,
                "{} {} {} {}",
                srv.priority, srv.weight, srv.port, srv.target
            ),
            RData::Other { data, .. } => {
                write!(f, "\\# {}", data.len())?;
                if !data.is_empty() {
                    f.write_str(" ")?;
                    for b in data {
                        write!(f, "{:02x}", b)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// A DNS answer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Fully-qualified owner name in presentation form.
    pub name: String,
    pub class: u16,
    pub ttl: u32,
    pub data: RData,
}

impl ResourceRecord {
    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    /// Textual form used for equality: owner name, type and body.
    pub fn canonical(&self) -> String {
        format!(
            "{} {} {}",
            self.name.to_ascii_lowercase(),
            self.record_type(),
            self.data
        )
    }

    /// Whether two records are the same record, ignoring TTL and class.
    pub fn same_as(&self, other: &ResourceRecord) -> bool {
        self.canonical() == other.canonical()
    }
}

/// SOA fields of a record request.
#[derive(Debug, Clone, Default)]
pub struct SoaFields {
    pub ns: String,
    pub mbox: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub min_ttl: u32,
}

/// MX fields of a record request.
#[derive(Debug, Clone, Default)]
pub struct MxFields {
    pub pref: u16,
    pub mx: String,
}

/// SRV fields of a record request.
#[derive(Debug, Clone, Default)]
pub struct SrvFields {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Generic description of a record, as submitted by an administrator.
///
/// `data` carries the body of A, AAAA, NS, CNAME and PTR records; SOA, MX
/// and SRV use their dedicated field groups. The `old_*` fields describe the
/// record an update replaces.
#[derive(Debug, Clone, Default)]
pub struct RecordRequest {
    pub host: String,
    pub ttl: u32,
    pub record_type: String,
    pub data: String,
    pub old_data: String,
    pub soa: SoaFields,
    pub old_soa: SoaFields,
    pub mx: MxFields,
    pub old_mx: MxFields,
    pub srv: SrvFields,
    pub old_srv: SrvFields,
}

impl RecordRequest {
    /// Build the record this request describes.
    pub fn build(&self) -> Result<ResourceRecord, CodecError> {
        build_record(
            &self.host,
            self.ttl,
            &self.record_type,
            &self.data,
            &self.soa,
            &self.mx,
            &self.srv,
        )
    }

    /// Build the record an update should replace.
    pub fn build_old(&self) -> Result<ResourceRecord, CodecError> {
        build_record(
            &self.host,
            self.ttl,
            &self.record_type,
            &self.old_data,
            &self.old_soa,
            &self.old_mx,
            &self.old_srv,
        )
    }
}

fn build_record(
    host: &str,
    ttl: u32,
    kind: &str,
    data: &str,
    soa: &SoaFields,
    mx: &MxFields,
    srv: &SrvFields,
) -> Result<ResourceRecord, CodecError> {
    let name = domain(host)?;
    let rtype: RecordType = kind.parse()?;

    let data = match rtype {
        RecordType::A => RData::A(parse_v4(data)?),
        RecordType::Aaaa => RData::Aaaa(parse_v6(data)?),
        RecordType::Ns => RData::Ns(domain(data)?),
        RecordType::Cname => RData::Cname(domain(data)?),
        RecordType::Ptr => RData::Ptr(domain(data)?),
        RecordType::Mx => RData::Mx {
            preference: mx.pref,
            exchange: domain(&mx.mx)?,
        },
        RecordType::Soa => RData::Soa(Soa {
            mname: domain(&soa.ns)?,
            rname: domain(&soa.mbox)?,
            serial: soa.serial,
            refresh: soa.refresh,
            retry: soa.retry,
            expire: soa.expire,
            minimum: soa.min_ttl,
        }),
        RecordType::Srv => RData::Srv(Srv {
            priority: srv.priority,
            weight: srv.weight,
            port: srv.port,
            target: domain(&srv.target)?,
        }),
        RecordType::Txt | RecordType::Opt | RecordType::Unknown(_) => {
            return Err(CodecError::UnsupportedType(kind.to_string()));
        }
    };

    Ok(ResourceRecord {
        name,
        class: CLASS_IN,
        ttl,
        data,
    })
}

fn domain(s: &str) -> Result<String, CodecError> {
    fqdn(s).ok_or_else(|| CodecError::InvalidName(s.to_string()))
}

fn parse_v4(s: &str) -> Result<Ipv4Addr, CodecError> {
    match s.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        Ok(IpAddr::V6(ip)) => ip
            .to_ipv4_mapped()
            .ok_or_else(|| CodecError::InvalidAddress(s.to_string())),
        Err(_) => Err(CodecError::InvalidAddress(s.to_string())),
    }
}

fn parse_v6(s: &str) -> Result<Ipv6Addr, CodecError> {
    match s.trim().parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => Ok(ip),
        Ok(IpAddr::V4(ip)) => Ok(ip.to_ipv6_mapped()),
        Err(_) => Err(CodecError::InvalidAddress(s.to_string())),
    }
}
