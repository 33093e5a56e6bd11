//! UHF modem response wire format (`spec.md` §4.6, §6): `*XX=<body>\r\n`.
//!
//! Every code except `DR` carries a short textual body safely captured by
//! [`Line`]; `DR` carries a raw binary payload that could itself contain
//! `\r`/`\n` bytes, so it gets its own fixed-field parser instead of relying
//! on a CRLF terminator to find its end.

use heapless::Vec as HVec;

use crate::config::{MTU, UHF_GENERIC_RESPONSE_BODY_LEN};
use crate::io::{LengthResult, Readable};
use crate::poll::Poll;
use crate::ready;
use crate::serde::de::{Deserialize, DeserializeResult, HexU8, Line};

/// Outcome of a `CS` carrier-sense query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierState {
    /// `EN`: channel clear, safe to transmit.
    Clear,
    /// `DN`: channel busy, back off and retry.
    Busy,
}

/// A frame delivered by the modem (`DR` response).
#[derive(Clone)]
pub struct DataReceived {
    pub protocol: u8,
    pub source: u8,
    pub payload: HVec<u8, MTU>,
}

/// A parsed modem response line.
#[derive(Clone)]
pub enum Response {
    Er,
    Ri,
    Sn(HVec<u8, UHF_GENERIC_RESPONSE_BODY_LEN>),
    Ei,
    Cs(CarrierState),
    Dt(u8),
    Dr(DataReceived),
    Ir,
    /// A response code this driver does not interpret further.
    Unknown,
}

fn hex_pair(bytes: &[u8]) -> Option<u8> {
    if bytes.len() != 2 {
        return None;
    }
    Some((hex_digit(bytes[0])? << 4) | hex_digit(bytes[1])?)
}

pub(crate) fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

enum Stage {
    Star,
    Code { idx: usize },
    Equals,
    DispatchBody,
    GenericBody(Line<UHF_GENERIC_RESPONSE_BODY_LEN>),
    DrLength(HexU8),
    DrProtocol(HexU8),
    DrPayload { remaining: usize, buf: HVec<u8, MTU> },
    DrSlashR { idx: usize },
    DrSource(HexU8),
    DrCrlf { idx: usize },
    Done,
}

/// Resumable parser for one modem response line.
pub struct ResponseReader {
    stage: Stage,
    code: [u8; 2],
    dr_protocol: u8,
    dr_source: u8,
    dr_payload_len: usize,
    generic_body: HVec<u8, UHF_GENERIC_RESPONSE_BODY_LEN>,
    dr_payload: HVec<u8, MTU>,
}

impl ResponseReader {
    pub const fn new() -> Self {
        Self {
            stage: Stage::Star,
            code: [0; 2],
            dr_protocol: 0,
            dr_source: 0,
            dr_payload_len: 0,
            generic_body: HVec::new(),
            dr_payload: HVec::new(),
        }
    }

    pub fn poll_deserialize<R: Readable>(&mut self, r: &mut R) -> Poll<DeserializeResult> {
        loop {
            match &mut self.stage {
                Stage::Star => {
                    if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                        return Poll::Ready(DeserializeResult::NotEnoughLength);
                    }
                    if r.read_unchecked() != b'*' {
                        return Poll::Ready(DeserializeResult::Invalid);
                    }
                    self.stage = Stage::Code { idx: 0 };
                }
                Stage::Code { idx } => {
                    while *idx < 2 {
                        if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                            return Poll::Ready(DeserializeResult::NotEnoughLength);
                        }
                        self.code[*idx] = r.read_unchecked();
                        *idx += 1;
                    }
                    self.stage = Stage::Equals;
                }
                Stage::Equals => {
                    if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                        return Poll::Ready(DeserializeResult::NotEnoughLength);
                    }
                    if r.read_unchecked() != b'=' {
                        return Poll::Ready(DeserializeResult::Invalid);
                    }
                    self.stage = Stage::DispatchBody;
                }
                Stage::DispatchBody => {
                    self.stage = if self.code == *b"DR" {
                        Stage::DrLength(HexU8::new())
                    } else {
                        Stage::GenericBody(Line::new())
                    };
                }
                Stage::GenericBody(line) => {
                    match ready!(line.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.generic_body = line.result();
                    self.stage = Stage::Done;
                }
                Stage::DrLength(hex) => {
                    match ready!(hex.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    // `length` counts the protocol byte that follows, so the
                    // payload itself is one byte shorter.
                    let length = hex.result() as usize;
                    if length == 0 {
                        return Poll::Ready(DeserializeResult::Invalid);
                    }
                    self.dr_payload.clear();
                    self.dr_payload_len = length - 1;
                    self.stage = Stage::DrProtocol(HexU8::new());
                }
                Stage::DrProtocol(hex) => {
                    match ready!(hex.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.dr_protocol = hex.result();
                    self.stage = Stage::DrPayload {
                        remaining: self.dr_payload_len,
                        buf: HVec::new(),
                    };
                }
                Stage::DrPayload { remaining, buf } => {
                    while *remaining > 0 {
                        if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                            return Poll::Ready(DeserializeResult::NotEnoughLength);
                        }
                        let b = r.read_unchecked();
                        if buf.push(b).is_err() {
                            return Poll::Ready(DeserializeResult::Invalid);
                        }
                        *remaining -= 1;
                    }
                    self.dr_payload = core::mem::take(buf);
                    self.stage = Stage::DrSlashR { idx: 0 };
                }
                Stage::DrSlashR { idx } => {
                    const SLASH_R: [u8; 2] = [b'/', b'R'];
                    while *idx < 2 {
                        if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                            return Poll::Ready(DeserializeResult::NotEnoughLength);
                        }
                        if r.read_unchecked() != SLASH_R[*idx] {
                            return Poll::Ready(DeserializeResult::Invalid);
                        }
                        *idx += 1;
                    }
                    self.stage = Stage::DrSource(HexU8::new());
                }
                Stage::DrSource(hex) => {
                    match ready!(hex.poll_deserialize(r)) {
                        DeserializeResult::Ok => {}
                        other => return Poll::Ready(other),
                    }
                    self.dr_source = hex.result();
                    self.stage = Stage::DrCrlf { idx: 0 };
                }
                Stage::DrCrlf { idx } => {
                    const CRLF: [u8; 2] = [b'\r', b'\n'];
                    while *idx < 2 {
                        if ready!(r.poll_readable(1)) == LengthResult::NotEnoughLength {
                            return Poll::Ready(DeserializeResult::NotEnoughLength);
                        }
                        if r.read_unchecked() != CRLF[*idx] {
                            return Poll::Ready(DeserializeResult::Invalid);
                        }
                        *idx += 1;
                    }
                    self.stage = Stage::Done;
                }
                Stage::Done => return Poll::Ready(DeserializeResult::Ok),
            }
        }
    }

    /// Valid only after `poll_deserialize` has returned `Ready(Ok)`.
    pub fn result(&self) -> Response {
        match &self.code {
            b"ER" => Response::Er,
            b"RI" => Response::Ri,
            b"SN" => Response::Sn(self.generic_body.clone()),
            b"EI" => Response::Ei,
            b"CS" => match &self.generic_body[..] {
                b"EN" => Response::Cs(CarrierState::Clear),
                b"DN" => Response::Cs(CarrierState::Busy),
                _ => Response::Unknown,
            },
            b"DT" => hex_pair(&self.generic_body).map_or(Response::Unknown, Response::Dt),
            b"DR" => Response::Dr(DataReceived {
                protocol: self.dr_protocol,
                source: self.dr_source,
                payload: self.dr_payload.clone(),
            }),
            b"IR" => Response::Ir,
            _ => Response::Unknown,
        }
    }
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;

    #[test]
    fn parses_carrier_sense_clear() {
        let mut r = MockStream::new();
        r.feed(b"*CS=EN\r\n");
        let mut reader = ResponseReader::new();
        assert_eq!(
            reader.poll_deserialize(&mut r),
            Poll::Ready(DeserializeResult::Ok)
        );
        assert!(matches!(
            reader.result(),
            Response::Cs(CarrierState::Clear)
        ));
    }

    #[test]
    fn parses_dt_ack_status_byte() {
        let mut r = MockStream::new();
        r.feed(b"*DT=00\r\n");
        let mut reader = ResponseReader::new();
        reader.poll_deserialize(&mut r).unwrap();
        assert!(matches!(reader.result(), Response::Dt(0)));
    }

    #[test]
    fn parses_dr_with_binary_payload_containing_crlf_bytes() {
        let mut r = MockStream::new();
        // length=03 (2-byte payload + 1 protocol byte), protocol=10,
        // payload=[0x0D, 0x0A] (would break a line-oriented parser), then
        // "/R" + source C4 + terminator.
        r.feed(b"*DR=0310");
        r.feed(&[0x0D, 0x0A]);
        r.feed(b"/RC4\r\n");
        let mut reader = ResponseReader::new();
        assert_eq!(
            reader.poll_deserialize(&mut r),
            Poll::Ready(DeserializeResult::Ok)
        );
        let Response::Dr(dr) = reader.result() else {
            panic!("expected Dr");
        };
        assert_eq!(dr.protocol, 0x10);
        assert_eq!(dr.source, 0xC4);
        assert_eq!(&dr.payload[..], &[0x0D, 0x0A]);
    }

    #[test]
    fn rejects_missing_star() {
        let mut r = MockStream::new();
        r.feed(b"CS=EN\r\n");
        let mut reader = ResponseReader::new();
        assert_eq!(
            reader.poll_deserialize(&mut r),
            Poll::Ready(DeserializeResult::Invalid)
        );
    }
}
