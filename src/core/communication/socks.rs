//! SOCKS5 wire types, per RFC 1928 (§4.4 of spec.md). Only the pieces a
//! CONNECT-only proxy needs: the version/method greeting, and the
//! request/reply message, both sharing the same on-wire layout.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::error::{Error, ErrorKind, Result};

pub const VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const RSV: u8 = 0x00;

/// Socks5 reply codes (also doubling as the `REP` field of a request,
/// where the only meaningful value is [`Command::Connect`]'s `0x01`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Reply {
    Succeeded,
    GeneralFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
}

impl Reply {
    pub fn code(self) -> u8 {
        match self {
            Reply::Succeeded => 0x00,
            Reply::GeneralFailure => 0x01,
            Reply::ConnectionNotAllowed => 0x02,
            Reply::NetworkUnreachable => 0x03,
            Reply::HostUnreachable => 0x04,
            Reply::ConnectionRefused => 0x05,
            Reply::TtlExpired => 0x06,
            Reply::CommandNotSupported => 0x07,
            Reply::AddressTypeNotSupported => 0x08,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Reply::Succeeded,
            0x01 => Reply::GeneralFailure,
            0x02 => Reply::ConnectionNotAllowed,
            0x03 => Reply::NetworkUnreachable,
            0x04 => Reply::HostUnreachable,
            0x05 => Reply::ConnectionRefused,
            0x06 => Reply::TtlExpired,
            0x07 => Reply::CommandNotSupported,
            0x08 => Reply::AddressTypeNotSupported,
            _ => return None,
        })
    }
}

/// A parsed `DST.ADDR`/`BND.ADDR` field.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(a) => write!(f, "{}", a),
            Address::Domain(d) => write!(f, "{}", d),
            Address::Ipv6(a) => write!(f, "{}", a),
        }
    }
}

const ATYPE_IPV4: u8 = 0x01;
const ATYPE_DOMAIN: u8 = 0x03;
const ATYPE_IPV6: u8 = 0x04;

/// The shared request/reply layout:
/// `VER:1, MSG:1, RSV:1=0x00, ATYP:1, ADDR:variable, PORT:2`.
///
/// `msg` holds the command byte for a request (only `CONNECT = 0x01` is
/// accepted) and the reply code for a reply.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg: u8,
    pub address: Address,
    pub port: u16,
}

impl Message {
    pub const CMD_CONNECT: u8 = 0x01;

    pub fn request(address: Address, port: u16) -> Self {
        Message {
            msg: Self::CMD_CONNECT,
            address,
            port,
        }
    }

    pub fn reply(reply: Reply, address: Address, port: u16) -> Self {
        Message {
            msg: reply.code(),
            address,
            port,
        }
    }

    pub fn reply_code(&self) -> Option<Reply> {
        Reply::from_code(self.msg)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.push(VERSION);
        out.push(self.msg);
        out.push(RSV);
        match &self.address {
            Address::Ipv4(a) => {
                out.push(ATYPE_IPV4);
                out.extend_from_slice(&a.octets());
            }
            Address::Domain(d) => {
                out.push(ATYPE_DOMAIN);
                out.push(d.len() as u8);
                out.extend_from_slice(d.as_bytes());
            }
            Address::Ipv6(a) => {
                out.push(ATYPE_IPV6);
                out.extend_from_slice(&a.octets());
            }
        }
        out.extend_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Parses a `Message` out of `data`, returning it and the number of
    /// bytes consumed. `data` must hold the whole message already — the
    /// caller (the REQUEST/REPLY frame body) knows its own length from
    /// the outer frame length, unlike a raw socket reader.
    pub fn deserialize(data: &[u8]) -> crate::core::error::Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(socks_error("truncated socks5 message header"));
        }
        let (ver, msg, rsv, atype) = (data[0], data[1], data[2], data[3]);
        if ver != VERSION {
            return Err(socks_error("unsupported socks version"));
        }
        if rsv != RSV {
            return Err(socks_error("non-zero RSV byte"));
        }

        let mut pos = 4;
        let address = match atype {
            ATYPE_IPV4 => {
                let bytes = data
                    .get(pos..pos + 4)
                    .ok_or_else(|| socks_error("truncated ipv4 address"))?;
                pos += 4;
                Address::Ipv4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            ATYPE_DOMAIN => {
                let len = *data.get(pos).ok_or_else(|| socks_error("truncated domain length"))?;
                pos += 1;
                let bytes = data
                    .get(pos..pos + len as usize)
                    .ok_or_else(|| socks_error("truncated domain name"))?;
                pos += len as usize;
                let name = std::str::from_utf8(bytes)
                    .map_err(|_| socks_error("domain name is not valid utf-8"))?;
                Address::Domain(name.to_owned())
            }
            ATYPE_IPV6 => {
                let bytes = data
                    .get(pos..pos + 16)
                    .ok_or_else(|| socks_error("truncated ipv6 address"))?;
                pos += 16;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Address::Ipv6(Ipv6Addr::from(octets))
            }
            _ => return Err(socks_error("unsupported address type")),
        };

        let port_bytes = data
            .get(pos..pos + 2)
            .ok_or_else(|| socks_error("truncated port"))?;
        let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
        pos += 2;

        Ok((Message { msg, address, port }, pos))
    }

    /// Reads a `Message` directly off a socket, one field at a time —
    /// used by the client multiplexer and server demultiplexer, which
    /// see a raw stream rather than an already-length-known frame body.
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let mut head = [0u8; 4];
        r.read_exact(&mut head).await?;
        let (ver, msg, rsv, atype) = (head[0], head[1], head[2], head[3]);
        if ver != VERSION {
            return Err(socks_error("unsupported socks version"));
        }
        if rsv != RSV {
            return Err(socks_error("non-zero RSV byte"));
        }

        let address = match atype {
            ATYPE_IPV4 => {
                let mut bytes = [0u8; 4];
                r.read_exact(&mut bytes).await?;
                Address::Ipv4(Ipv4Addr::from(bytes))
            }
            ATYPE_DOMAIN => {
                let mut len = [0u8; 1];
                r.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                r.read_exact(&mut name).await?;
                let name = String::from_utf8(name)
                    .map_err(|_| socks_error("domain name is not valid utf-8"))?;
                Address::Domain(name)
            }
            ATYPE_IPV6 => {
                let mut bytes = [0u8; 16];
                r.read_exact(&mut bytes).await?;
                Address::Ipv6(Ipv6Addr::from(bytes))
            }
            _ => return Err(socks_error("unsupported address type")),
        };

        let mut port = [0u8; 2];
        r.read_exact(&mut port).await?;

        Ok(Message {
            msg,
            address,
            port: u16::from_be_bytes(port),
        })
    }
}

/// Client greeting: `VER:1, NMETHODS:1, METHODS:NMETHODS bytes`.
#[derive(Debug, Clone)]
pub struct ClientGreeting {
    pub methods: Vec<u8>,
}

impl ClientGreeting {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.methods.len());
        out.push(VERSION);
        out.push(self.methods.len() as u8);
        out.extend_from_slice(&self.methods);
        out
    }

    pub fn deserialize(data: &[u8]) -> crate::core::error::Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(socks_error("truncated client greeting"));
        }
        if data[0] != VERSION {
            return Err(socks_error("unsupported socks version"));
        }
        let nmethods = data[1] as usize;
        let methods = data
            .get(2..2 + nmethods)
            .ok_or_else(|| socks_error("truncated method list"))?
            .to_vec();
        Ok((ClientGreeting { methods }, 2 + nmethods))
    }

    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let mut head = [0u8; 2];
        r.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(socks_error("unsupported socks version"));
        }
        let mut methods = vec![0u8; head[1] as usize];
        r.read_exact(&mut methods).await?;
        Ok(ClientGreeting { methods })
    }
}

/// Server greeting: `VER:1, METHOD:1`.
#[derive(Debug, Clone, Copy)]
pub struct ServerGreeting {
    pub method: u8,
}

impl ServerGreeting {
    pub fn no_auth() -> Self {
        ServerGreeting {
            method: METHOD_NO_AUTH,
        }
    }

    pub fn no_acceptable_methods() -> Self {
        ServerGreeting {
            method: METHOD_NO_ACCEPTABLE,
        }
    }

    pub fn serialize(&self) -> [u8; 2] {
        [VERSION, self.method]
    }

    pub fn deserialize(data: &[u8]) -> crate::core::error::Result<Self> {
        if data.len() != 2 {
            return Err(socks_error("malformed server greeting"));
        }
        if data[0] != VERSION {
            return Err(socks_error("unsupported socks version"));
        }
        Ok(ServerGreeting { method: data[1] })
    }
}

fn socks_error(msg: &str) -> Error {
    Error::wrapped(ErrorKind::Socks, msg.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_matches_spec_example() {
        let msg = Message::request(Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), 1234);
        assert_eq!(
            msg.serialize(),
            vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x04, 0xD2]
        );
    }

    #[test]
    fn message_roundtrips_for_every_address_type() {
        let cases = [
            Message::request(Address::Ipv4(Ipv4Addr::new(8, 8, 8, 8)), 53),
            Message::request(Address::Domain("example.com".into()), 443),
            Message::request(Address::Ipv6(Ipv6Addr::LOCALHOST), 22),
            Message::reply(Reply::Succeeded, Address::Ipv4(Ipv4Addr::UNSPECIFIED), 0),
        ];
        for msg in cases {
            let bytes = msg.serialize();
            let (parsed, consumed) = Message::deserialize(&bytes).expect("deserialize");
            assert_eq!(consumed, bytes.len());
            assert_eq!(parsed.msg, msg.msg);
            assert_eq!(parsed.address, msg.address);
            assert_eq!(parsed.port, msg.port);
        }
    }

    #[test]
    fn rejects_nonzero_rsv() {
        let bytes = [0x05, 0x01, 0x01, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(Message::deserialize(&bytes).is_err());
    }

    #[test]
    fn greeting_roundtrips() {
        let greeting = ClientGreeting {
            methods: vec![METHOD_NO_AUTH, 0x02],
        };
        let bytes = greeting.serialize();
        let (parsed, consumed) = ClientGreeting::deserialize(&bytes).expect("deserialize");
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.methods, greeting.methods);

        let server = ServerGreeting::no_auth();
        let parsed = ServerGreeting::deserialize(&server.serialize()).expect("deserialize");
        assert_eq!(parsed.method, METHOD_NO_AUTH);
    }
}
