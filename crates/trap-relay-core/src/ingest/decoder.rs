//! Built-in BER decoder for SNMP trap datagrams.
//!
//! Handles the three message formats seen on a trap port:
//!
//! - SNMPv1 Trap-PDU (0xA4): community string, security model 1
//! - SNMPv2c SNMPV2-Trap-PDU (0xA7): community string, security model 2
//! - SNMPv3 with USM security parameters: user name, security model 3,
//!   security level derived from the message flags. Encrypted scoped PDUs
//!   are rejected, decryption is out of scope.
//!
//! Only the fields the relay emits are extracted; everything else is
//! skipped positionally. Variable binding values are rendered to display
//! strings by tag, with a hex fallback for types the renderer does not
//! know.

use std::net::SocketAddr;

use super::{DecodeError, TrapDecoder};
use crate::event::{TrapEvent, VarBind};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_COUNTER64: u8 = 0x46;
const TAG_TRAP_V1: u8 = 0xA4;
const TAG_TRAP_V2: u8 = 0xA7;

const FLAG_AUTH: u8 = 0x01;
const FLAG_PRIV: u8 = 0x02;

/// Stateless BER trap decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct BerTrapDecoder;

impl BerTrapDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TrapDecoder for BerTrapDecoder {
    fn decode(&self, packet: &[u8], peer: SocketAddr) -> Result<TrapEvent, DecodeError> {
        let peer_address = format!("{}/{}", peer.ip(), peer.port());

        let mut message = Reader::new(packet);
        let (tag, body) = message.read_tlv()?;
        if tag != TAG_SEQUENCE {
            return Err(DecodeError::Malformed("message is not a SEQUENCE"));
        }

        let mut body = Reader::new(body);
        let version = body.read_integer()?;
        match version {
            // SNMPv1 and SNMPv2c share the community wrapper.
            0 | 1 => decode_community(&mut body, version, peer_address),
            3 => decode_v3(&mut body, peer_address),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }
}

/// Community-based message: version, community OCTET STRING, trap PDU.
fn decode_community(
    body: &mut Reader<'_>,
    version: i64,
    peer_address: String,
) -> Result<TrapEvent, DecodeError> {
    let community = body.read_expected(TAG_OCTET_STRING)?.to_vec();

    let (pdu_tag, pdu) = body.read_tlv()?;
    let mut pdu = Reader::new(pdu);
    let bindings = match (version, pdu_tag) {
        (0, TAG_TRAP_V1) => {
            // enterprise, agent-addr, generic-trap, specific-trap, timeticks
            pdu.read_expected(TAG_OID)?;
            pdu.read_expected(TAG_IP_ADDRESS)?;
            pdu.read_integer()?;
            pdu.read_integer()?;
            pdu.read_expected(TAG_TIMETICKS)?;
            read_bindings(&mut pdu)?
        }
        (1, TAG_TRAP_V2) => {
            // request-id, error-status, error-index
            pdu.read_integer()?;
            pdu.read_integer()?;
            pdu.read_integer()?;
            read_bindings(&mut pdu)?
        }
        _ => return Err(DecodeError::Malformed("unexpected PDU type for version")),
    };

    let security_model = if version == 0 { 1 } else { 2 };
    // Community messages carry no authentication: noAuthNoPriv.
    Ok(TrapEvent::new(
        peer_address,
        1,
        security_model,
        community,
        bindings,
    ))
}

/// SNMPv3 message: msgGlobalData, USM security parameters, scoped PDU.
fn decode_v3(body: &mut Reader<'_>, peer_address: String) -> Result<TrapEvent, DecodeError> {
    let global = body.read_expected(TAG_SEQUENCE)?;
    let mut global = Reader::new(global);
    global.read_integer()?; // msgID
    global.read_integer()?; // msgMaxSize
    let flags = global.read_expected(TAG_OCTET_STRING)?;
    if flags.len() != 1 {
        return Err(DecodeError::Malformed("msgFlags must be one byte"));
    }
    let flags = flags[0];
    let security_model = global.read_integer()?;

    let security_level = match flags & (FLAG_AUTH | FLAG_PRIV) {
        0 => 1,
        FLAG_AUTH => 2,
        f if f == FLAG_AUTH | FLAG_PRIV => 3,
        _ => return Err(DecodeError::Malformed("privacy without authentication")),
    };

    // msgSecurityParameters is an OCTET STRING wrapping the USM SEQUENCE.
    let params = body.read_expected(TAG_OCTET_STRING)?;
    let mut params = Reader::new(params);
    let usm = params.read_expected(TAG_SEQUENCE)?;
    let mut usm = Reader::new(usm);
    usm.read_expected(TAG_OCTET_STRING)?; // engine id
    usm.read_integer()?; // engine boots
    usm.read_integer()?; // engine time
    let user_name = usm.read_expected(TAG_OCTET_STRING)?.to_vec();

    if flags & FLAG_PRIV != 0 {
        return Err(DecodeError::EncryptedScopedPdu);
    }

    let scoped = body.read_expected(TAG_SEQUENCE)?;
    let mut scoped = Reader::new(scoped);
    scoped.read_expected(TAG_OCTET_STRING)?; // context engine id
    scoped.read_expected(TAG_OCTET_STRING)?; // context name

    let (pdu_tag, pdu) = scoped.read_tlv()?;
    if pdu_tag != TAG_TRAP_V2 {
        return Err(DecodeError::Malformed("scoped PDU is not a trap"));
    }
    let mut pdu = Reader::new(pdu);
    pdu.read_integer()?;
    pdu.read_integer()?;
    pdu.read_integer()?;
    let bindings = read_bindings(&mut pdu)?;

    Ok(TrapEvent::new(
        peer_address,
        security_level,
        security_model as i32,
        user_name,
        bindings,
    ))
}

/// VarBindList: SEQUENCE OF SEQUENCE { name OID, value ANY }.
fn read_bindings(pdu: &mut Reader<'_>) -> Result<Vec<VarBind>, DecodeError> {
    let list = pdu.read_expected(TAG_SEQUENCE)?;
    let mut list = Reader::new(list);

    let mut bindings = Vec::new();
    while !list.is_empty() {
        let entry = list.read_expected(TAG_SEQUENCE)?;
        let mut entry = Reader::new(entry);
        let oid = render_oid(entry.read_expected(TAG_OID)?)?;
        let (tag, content) = entry.read_tlv()?;
        bindings.push(VarBind::new(oid, render_value(tag, content)?));
    }
    Ok(bindings)
}

/// Render a varbind value to the display string the JSON output carries.
fn render_value(tag: u8, content: &[u8]) -> Result<String, DecodeError> {
    let rendered = match tag {
        TAG_INTEGER => parse_integer(content)?.to_string(),
        TAG_OCTET_STRING => String::from_utf8_lossy(content).into_owned(),
        TAG_NULL => "Null".to_string(),
        TAG_OID => render_oid(content)?,
        TAG_IP_ADDRESS if content.len() == 4 => {
            format!("{}.{}.{}.{}", content[0], content[1], content[2], content[3])
        }
        TAG_COUNTER32 | TAG_GAUGE32 | TAG_TIMETICKS | TAG_COUNTER64 => {
            parse_unsigned(content)?.to_string()
        }
        _ => content.iter().map(|b| format!("{b:02x}")).collect(),
    };
    Ok(rendered)
}

/// Big-endian two's complement, at most 8 bytes.
fn parse_integer(content: &[u8]) -> Result<i64, DecodeError> {
    if content.is_empty() || content.len() > 8 {
        return Err(DecodeError::Malformed("integer out of range"));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in content {
        value = (value << 8) | i64::from(byte);
    }
    Ok(value)
}

/// Big-endian unsigned, at most 9 bytes (Counter64 may carry a leading
/// zero to keep the sign bit clear).
fn parse_unsigned(content: &[u8]) -> Result<u64, DecodeError> {
    let content = match content {
        [0, rest @ ..] if rest.len() == 8 => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(DecodeError::Malformed("unsigned out of range"));
    }
    let mut value: u64 = 0;
    for &byte in content {
        value = (value << 8) | u64::from(byte);
    }
    Ok(value)
}

/// Dotted-decimal rendering of an encoded OBJECT IDENTIFIER.
fn render_oid(content: &[u8]) -> Result<String, DecodeError> {
    if content.is_empty() {
        return Err(DecodeError::Malformed("empty OID"));
    }

    let mut arcs: Vec<u64> = Vec::new();
    // First byte packs the first two arcs.
    let first = content[0];
    if first < 80 {
        arcs.push(u64::from(first / 40));
        arcs.push(u64::from(first % 40));
    } else {
        arcs.push(2);
        arcs.push(u64::from(first - 80));
    }

    let mut arc: u64 = 0;
    let mut continuing = false;
    for &byte in &content[1..] {
        arc = arc
            .checked_shl(7)
            .ok_or(DecodeError::Malformed("OID arc overflow"))?
            | u64::from(byte & 0x7f);
        if byte & 0x80 != 0 {
            continuing = true;
        } else {
            arcs.push(arc);
            arc = 0;
            continuing = false;
        }
    }
    if continuing {
        return Err(DecodeError::Truncated);
    }

    let rendered: Vec<String> = arcs.iter().map(u64::to_string).collect();
    Ok(rendered.join("."))
}

/// Forward-only cursor over a BER-encoded byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    /// Definite-form length. Indefinite lengths never occur in SNMP.
    fn read_length(&mut self) -> Result<usize, DecodeError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            return Err(DecodeError::Malformed("unsupported length form"));
        }
        let mut length: usize = 0;
        for &byte in self.read_bytes(count)? {
            length = (length << 8) | usize::from(byte);
        }
        Ok(length)
    }

    /// Read one tag-length-value, returning the tag and content slice.
    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), DecodeError> {
        let tag = self.read_u8()?;
        let length = self.read_length()?;
        Ok((tag, self.read_bytes(length)?))
    }

    /// Read a TLV and require a specific tag.
    fn read_expected(&mut self, expected: u8) -> Result<&'a [u8], DecodeError> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(DecodeError::Malformed("unexpected tag"));
        }
        Ok(content)
    }

    /// Read an INTEGER TLV and decode it.
    fn read_integer(&mut self) -> Result<i64, DecodeError> {
        parse_integer(self.read_expected(TAG_INTEGER)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.5:0".parse().unwrap()
    }

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        if content.len() < 0x80 {
            out.push(content.len() as u8);
        } else {
            assert!(content.len() <= 0xffff);
            out.push(0x82);
            out.extend_from_slice(&(content.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(content);
        out
    }

    fn encode_int(value: i64) -> Vec<u8> {
        // Minimal positive encoding is enough for test fixtures.
        let bytes = value.to_be_bytes();
        let skip = bytes
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(bytes.len() - 1);
        let mut content = bytes[skip..].to_vec();
        if content[0] & 0x80 != 0 {
            content.insert(0, 0);
        }
        tlv(TAG_INTEGER, &content)
    }

    fn encode_oid(arcs: &[u64]) -> Vec<u8> {
        let mut content = vec![(arcs[0] * 40 + arcs[1]) as u8];
        for &arc in &arcs[2..] {
            let mut chunk = vec![(arc & 0x7f) as u8];
            let mut rest = arc >> 7;
            while rest > 0 {
                chunk.insert(0, 0x80 | (rest & 0x7f) as u8);
                rest >>= 7;
            }
            content.extend_from_slice(&chunk);
        }
        tlv(TAG_OID, &content)
    }

    fn varbind_list(bindings: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        let mut list = Vec::new();
        for (oid, value) in bindings {
            let mut entry = oid.clone();
            entry.extend_from_slice(value);
            list.extend_from_slice(&tlv(TAG_SEQUENCE, &entry));
        }
        tlv(TAG_SEQUENCE, &list)
    }

    fn v2c_message(community: &[u8]) -> Vec<u8> {
        let mut pdu = Vec::new();
        pdu.extend_from_slice(&encode_int(42)); // request id
        pdu.extend_from_slice(&encode_int(0)); // error status
        pdu.extend_from_slice(&encode_int(0)); // error index
        pdu.extend_from_slice(&varbind_list(&[(
            encode_oid(&[1, 3, 6, 1, 4, 1, 8072, 2, 3, 2, 1]),
            encode_int(123_456),
        )]));

        let mut body = Vec::new();
        body.extend_from_slice(&encode_int(1)); // version 2c
        body.extend_from_slice(&tlv(TAG_OCTET_STRING, community));
        body.extend_from_slice(&tlv(TAG_TRAP_V2, &pdu));
        tlv(TAG_SEQUENCE, &body)
    }

    fn v3_message(flags: u8, user: &[u8]) -> Vec<u8> {
        let mut global = Vec::new();
        global.extend_from_slice(&encode_int(7)); // msgID
        global.extend_from_slice(&encode_int(65_507)); // msgMaxSize
        global.extend_from_slice(&tlv(TAG_OCTET_STRING, &[flags]));
        global.extend_from_slice(&encode_int(3)); // msgSecurityModel: USM

        let mut usm = Vec::new();
        usm.extend_from_slice(&tlv(TAG_OCTET_STRING, b"engine"));
        usm.extend_from_slice(&encode_int(1)); // boots
        usm.extend_from_slice(&encode_int(100)); // time
        usm.extend_from_slice(&tlv(TAG_OCTET_STRING, user));
        usm.extend_from_slice(&tlv(TAG_OCTET_STRING, b"")); // auth params
        usm.extend_from_slice(&tlv(TAG_OCTET_STRING, b"")); // priv params
        let usm = tlv(TAG_SEQUENCE, &usm);

        let mut pdu = Vec::new();
        pdu.extend_from_slice(&encode_int(9));
        pdu.extend_from_slice(&encode_int(0));
        pdu.extend_from_slice(&encode_int(0));
        pdu.extend_from_slice(&varbind_list(&[(
            encode_oid(&[1, 3, 6, 1, 2, 1, 1, 3, 0]),
            tlv(TAG_TIMETICKS, &[0x01, 0x00]),
        )]));

        let mut scoped = Vec::new();
        scoped.extend_from_slice(&tlv(TAG_OCTET_STRING, b"engine"));
        scoped.extend_from_slice(&tlv(TAG_OCTET_STRING, b""));
        scoped.extend_from_slice(&tlv(TAG_TRAP_V2, &pdu));

        let mut body = Vec::new();
        body.extend_from_slice(&encode_int(3)); // version
        body.extend_from_slice(&tlv(TAG_SEQUENCE, &global));
        body.extend_from_slice(&tlv(TAG_OCTET_STRING, &usm));
        body.extend_from_slice(&tlv(TAG_SEQUENCE, &scoped));
        tlv(TAG_SEQUENCE, &body)
    }

    #[test]
    fn test_decode_v1_trap() {
        let mut pdu = Vec::new();
        pdu.extend_from_slice(&encode_oid(&[1, 3, 6, 1, 4, 1, 8072])); // enterprise
        pdu.extend_from_slice(&tlv(TAG_IP_ADDRESS, &[10, 0, 0, 5])); // agent addr
        pdu.extend_from_slice(&encode_int(6)); // generic trap
        pdu.extend_from_slice(&encode_int(1)); // specific trap
        pdu.extend_from_slice(&tlv(TAG_TIMETICKS, &[0x0f])); // timestamp
        pdu.extend_from_slice(&varbind_list(&[(
            encode_oid(&[1, 3, 6, 1, 9, 1]),
            tlv(TAG_OCTET_STRING, b"link down"),
        )]));

        let mut body = Vec::new();
        body.extend_from_slice(&encode_int(0)); // version 1
        body.extend_from_slice(&tlv(TAG_OCTET_STRING, b"public"));
        body.extend_from_slice(&tlv(TAG_TRAP_V1, &pdu));
        let packet = tlv(TAG_SEQUENCE, &body);

        let event = BerTrapDecoder::new().decode(&packet, peer()).unwrap();
        assert_eq!(event.peer_address, "10.0.0.5/0");
        assert_eq!(event.security_model, 1);
        assert_eq!(event.security_level, 1);
        assert_eq!(event.security_name, b"public");
        assert_eq!(event.bindings.len(), 1);
        assert_eq!(event.bindings[0].oid, "1.3.6.1.9.1");
        assert_eq!(event.bindings[0].value, "link down");
    }

    #[test]
    fn test_decode_v2c_trap() {
        let packet = v2c_message(b"public");
        let event = BerTrapDecoder::new().decode(&packet, peer()).unwrap();
        assert_eq!(event.security_model, 2);
        assert_eq!(event.security_level, 1);
        assert_eq!(event.security_name, b"public");
        assert_eq!(event.bindings[0].oid, "1.3.6.1.4.1.8072.2.3.2.1");
        assert_eq!(event.bindings[0].value, "123456");
    }

    #[test]
    fn test_decode_v3_auth_no_priv() {
        let packet = v3_message(FLAG_AUTH, b"operator");
        let event = BerTrapDecoder::new().decode(&packet, peer()).unwrap();
        assert_eq!(event.security_model, 3);
        assert_eq!(event.security_level, 2);
        assert_eq!(event.security_name, b"operator");
        assert_eq!(event.bindings[0].oid, "1.3.6.1.2.1.1.3.0");
        assert_eq!(event.bindings[0].value, "256");
    }

    #[test]
    fn test_decode_v3_no_auth_no_priv() {
        let packet = v3_message(0, b"guest");
        let event = BerTrapDecoder::new().decode(&packet, peer()).unwrap();
        assert_eq!(event.security_level, 1);
    }

    #[test]
    fn test_encrypted_v3_rejected() {
        let packet = v3_message(FLAG_AUTH | FLAG_PRIV, b"operator");
        let result = BerTrapDecoder::new().decode(&packet, peer());
        assert!(matches!(result, Err(DecodeError::EncryptedScopedPdu)));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&encode_int(2)); // SNMPv2u, never supported
        let packet = tlv(TAG_SEQUENCE, &body);
        let result = BerTrapDecoder::new().decode(&packet, peer());
        assert!(matches!(result, Err(DecodeError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let mut packet = v2c_message(b"public");
        packet.truncate(packet.len() / 2);
        let result = BerTrapDecoder::new().decode(&packet, peer());
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let result = BerTrapDecoder::new().decode(&[0xde, 0xad, 0xbe, 0xef], peer());
        assert!(result.is_err());
    }

    #[test]
    fn test_oid_rendering_handles_large_arcs() {
        assert_eq!(
            render_oid(&encode_oid(&[1, 3, 6, 1, 4, 1, 8072, 2])[2..]).unwrap(),
            "1.3.6.1.4.1.8072.2"
        );
        assert_eq!(render_oid(&[0x2b]).unwrap(), "1.3");
    }
}
