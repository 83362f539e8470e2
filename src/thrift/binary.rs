//! Strict and lax Thrift binary protocol (spec.md §4.5).
//!
//! Every multi-field read (message/field/map/list headers, strings) peeks
//! its full predicted length before draining anything, so a short buffer
//! always yields `DecodeError::NeedMore` with zero bytes consumed — the
//! same "peek the whole frame, then commit in one drain" shape the
//! retrieved `resolver/namerd.rs` client uses for its JSON response body
//! (`concat2` the whole body before parsing) generalized down to
//! individual wire primitives.

use super::{peek_copy, read_i32_be, take, write_i32_be, DecodeError, FieldHeader, FieldType, ListHeader, MapHeader, MessageHeader, MessageType, Protocol};
use buffer::Buffer;

const STRICT_VERSION_MASK: u16 = 0x8001;

/// `strict: true` is the `0x8001`-prefixed framing; `strict: false` is the
/// lax framing with a bare length-prefixed name and no version magic.
#[derive(Clone, Debug)]
pub struct BinaryProtocol {
    strict: bool,
}

impl BinaryProtocol {
    pub fn strict() -> BinaryProtocol {
        BinaryProtocol { strict: true }
    }

    pub fn lax() -> BinaryProtocol {
        BinaryProtocol { strict: false }
    }
}

impl Protocol for BinaryProtocol {
    fn name(&self) -> String {
        if self.strict {
            "binary".to_string()
        } else {
            "binary(lax)".to_string()
        }
    }

    fn read_message_begin(&mut self, buf: &mut Buffer) -> Result<MessageHeader, DecodeError> {
        if self.strict {
            read_strict_message_begin(buf)
        } else {
            read_lax_message_begin(buf)
        }
    }

    fn read_struct_begin(&mut self, _buf: &mut Buffer) -> Result<(), DecodeError> {
        Ok(())
    }

    fn read_field_begin(&mut self, buf: &mut Buffer) -> Result<FieldHeader, DecodeError> {
        let prefix = peek_copy(buf, 1)?;
        let raw_type = prefix[0];
        if raw_type == 0 {
            take(buf, 1)?;
            return Ok(FieldHeader { id: 0, field_type: FieldType::Stop });
        }
        let field_type = FieldType::from_u8(raw_type).ok_or_else(|| DecodeError::Malformed(format!("unknown field type {}", raw_type)))?;
        let header = peek_copy(buf, 3)?;
        let id = ((header[1] as i16) << 8) | (header[2] as i16 & 0xff);
        if id < 0 {
            return Err(DecodeError::Malformed(format!("negative field id {}", id)));
        }
        take(buf, 3)?;
        Ok(FieldHeader { id, field_type })
    }

    fn read_struct_end(&mut self, _buf: &mut Buffer) -> Result<(), DecodeError> {
        Ok(())
    }

    fn read_message_end(&mut self, _buf: &mut Buffer) -> Result<(), DecodeError> {
        Ok(())
    }

    fn read_bool(&mut self, buf: &mut Buffer) -> Result<bool, DecodeError> {
        Ok(self.read_byte(buf)? != 0)
    }

    fn read_byte(&mut self, buf: &mut Buffer) -> Result<i8, DecodeError> {
        let b = take(buf, 1)?;
        Ok(b[0] as i8)
    }

    fn read_i16(&mut self, buf: &mut Buffer) -> Result<i16, DecodeError> {
        let b = take(buf, 2)?;
        Ok(((b[0] as i16) << 8) | (b[1] as i16 & 0xff))
    }

    fn read_i32(&mut self, buf: &mut Buffer) -> Result<i32, DecodeError> {
        let b = take(buf, 4)?;
        Ok(read_i32_be(&b))
    }

    fn read_i64(&mut self, buf: &mut Buffer) -> Result<i64, DecodeError> {
        let b = take(buf, 8)?;
        let mut v: i64 = 0;
        for &byte in b.iter() {
            v = (v << 8) | (byte as i64 & 0xff);
        }
        Ok(v)
    }

    fn read_double(&mut self, buf: &mut Buffer) -> Result<f64, DecodeError> {
        let bits = self.read_i64(buf)?;
        Ok(f64::from_bits(bits as u64))
    }

    fn read_binary(&mut self, buf: &mut Buffer) -> Result<Vec<u8>, DecodeError> {
        let len_bytes = peek_copy(buf, 4)?;
        let len = read_i32_be(&len_bytes);
        if len < 0 {
            return Err(DecodeError::Malformed(format!("negative string length {}", len)));
        }
        let total = 4 + len as usize;
        peek_copy(buf, total)?;
        take(buf, 4)?;
        Ok(take(buf, len as usize)?.to_vec())
    }

    fn read_map_begin(&mut self, buf: &mut Buffer) -> Result<MapHeader, DecodeError> {
        let header = peek_copy(buf, 6)?;
        let key_type = FieldType::from_u8(header[0]).ok_or_else(|| DecodeError::Malformed(format!("unknown map key type {}", header[0])))?;
        let value_type = FieldType::from_u8(header[1]).ok_or_else(|| DecodeError::Malformed(format!("unknown map value type {}", header[1])))?;
        let size = read_i32_be(&header[2..6]);
        if size < 0 {
            return Err(DecodeError::Malformed(format!("negative map size {}", size)));
        }
        take(buf, 6)?;
        Ok(MapHeader { key_type, value_type, size })
    }

    fn read_list_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader, DecodeError> {
        read_collection_header(buf)
    }

    fn read_set_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader, DecodeError> {
        read_collection_header(buf)
    }

    fn write_message_begin(&mut self, buf: &mut Buffer, name: &str, message_type: MessageType, seq_id: i32) {
        let mut out = Vec::with_capacity(8 + name.len());
        if self.strict {
            out.push((STRICT_VERSION_MASK >> 8) as u8);
            out.push(STRICT_VERSION_MASK as u8);
            out.push(0);
            out.push(message_type as u8);
            write_i32_be(&mut out, name.len() as i32);
            out.extend_from_slice(name.as_bytes());
        } else {
            write_i32_be(&mut out, name.len() as i32);
            out.extend_from_slice(name.as_bytes());
            out.push(message_type as u8);
        }
        write_i32_be(&mut out, seq_id);
        buf.append(&out);
    }

    fn write_struct_begin(&mut self, _buf: &mut Buffer) {}

    fn write_field_begin(&mut self, buf: &mut Buffer, field: FieldHeader) {
        buf.append(&[field.field_type as u8, (field.id >> 8) as u8, field.id as u8]);
    }

    fn write_field_stop(&mut self, buf: &mut Buffer) {
        buf.append(&[FieldType::Stop as u8]);
    }

    fn write_struct_end(&mut self, _buf: &mut Buffer) {}
    fn write_message_end(&mut self, _buf: &mut Buffer) {}

    fn write_bool(&mut self, buf: &mut Buffer, v: bool) {
        self.write_byte(buf, if v { 1 } else { 0 });
    }

    fn write_byte(&mut self, buf: &mut Buffer, v: i8) {
        buf.append(&[v as u8]);
    }

    fn write_i16(&mut self, buf: &mut Buffer, v: i16) {
        buf.append(&[(v >> 8) as u8, v as u8]);
    }

    fn write_i32(&mut self, buf: &mut Buffer, v: i32) {
        let mut out = Vec::with_capacity(4);
        write_i32_be(&mut out, v);
        buf.append(&out);
    }

    fn write_i64(&mut self, buf: &mut Buffer, v: i64) {
        let mut out = [0u8; 8];
        for i in 0..8 {
            out[i] = (v >> (56 - i * 8)) as u8;
        }
        buf.append(&out);
    }

    fn write_double(&mut self, buf: &mut Buffer, v: f64) {
        self.write_i64(buf, v.to_bits() as i64);
    }

    fn write_binary(&mut self, buf: &mut Buffer, v: &[u8]) -> Result<(), DecodeError> {
        if v.len() > i32::max_value() as usize {
            return Err(DecodeError::Malformed("binary payload exceeds i32::MAX".to_string()));
        }
        self.write_i32(buf, v.len() as i32);
        buf.append(v);
        Ok(())
    }

    fn write_map_begin(&mut self, buf: &mut Buffer, header: MapHeader) -> Result<(), DecodeError> {
        check_size(header.size)?;
        buf.append(&[header.key_type as u8, header.value_type as u8]);
        self.write_i32(buf, header.size);
        Ok(())
    }

    fn write_list_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<(), DecodeError> {
        write_collection_header(self, buf, header)
    }

    fn write_set_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<(), DecodeError> {
        write_collection_header(self, buf, header)
    }
}

fn read_strict_message_begin(buf: &mut Buffer) -> Result<MessageHeader, DecodeError> {
    let prefix = peek_copy(buf, 4)?;
    let version = ((prefix[0] as u16) << 8) | (prefix[1] as u16);
    if version != STRICT_VERSION_MASK {
        return Err(DecodeError::Malformed("invalid binary protocol version".to_string()));
    }
    let message_type = MessageType::from_i8(prefix[3] as i8).ok_or_else(|| DecodeError::Malformed("invalid binary protocol message type".to_string()))?;

    let with_len = peek_copy(buf, 8)?;
    let name_len = read_i32_be(&with_len[4..8]);
    if name_len < 0 {
        return Err(DecodeError::Malformed("negative message name length".to_string()));
    }
    let total = 8 + name_len as usize + 4;
    peek_copy(buf, total)?;

    take(buf, 8)?;
    let name = String::from_utf8(take(buf, name_len as usize)?.to_vec()).map_err(|e| DecodeError::Malformed(format!("message name is not valid utf-8: {}", e)))?;
    let seq_id = read_i32_be(&take(buf, 4)?);
    Ok(MessageHeader { name, message_type, seq_id })
}

fn read_lax_message_begin(buf: &mut Buffer) -> Result<MessageHeader, DecodeError> {
    let len_bytes = peek_copy(buf, 4)?;
    let name_len = read_i32_be(&len_bytes);
    if name_len < 0 {
        return Err(DecodeError::Malformed("(lax) negative message name length".to_string()));
    }
    let total = 4 + name_len as usize + 1 + 4;
    let full = peek_copy(buf, total)?;

    let type_byte = full[4 + name_len as usize];
    let message_type = MessageType::from_i8(type_byte as i8)
        .ok_or_else(|| DecodeError::Malformed(format!("invalid (lax) binary protocol message type {}", type_byte)))?;

    take(buf, 4)?;
    let name = String::from_utf8(take(buf, name_len as usize)?.to_vec()).map_err(|e| DecodeError::Malformed(format!("(lax) message name is not valid utf-8: {}", e)))?;
    take(buf, 1)?;
    let seq_id = read_i32_be(&take(buf, 4)?);
    Ok(MessageHeader { name, message_type, seq_id })
}

fn read_collection_header(buf: &mut Buffer) -> Result<ListHeader, DecodeError> {
    let header = peek_copy(buf, 5)?;
    let element_type = FieldType::from_u8(header[0]).ok_or_else(|| DecodeError::Malformed(format!("unknown element type {}", header[0])))?;
    let size = read_i32_be(&header[1..5]);
    if size < 0 {
        return Err(DecodeError::Malformed(format!("negative collection size {}", size)));
    }
    take(buf, 5)?;
    Ok(ListHeader { element_type, size })
}

fn check_size(size: i32) -> Result<(), DecodeError> {
    if size < 0 {
        return Err(DecodeError::Malformed(format!("negative collection size {}", size)));
    }
    Ok(())
}

fn write_collection_header(protocol: &mut BinaryProtocol, buf: &mut Buffer, header: ListHeader) -> Result<(), DecodeError> {
    check_size(header.size)?;
    buf.append(&[header.element_type as u8]);
    protocol.write_i32(buf, header.size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::BinaryProtocol;
    use buffer::Buffer;
    use thrift::{DecodeError, FieldHeader, FieldType, MessageType, Protocol};

    #[test]
    fn strict_message_round_trip() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        p.write_message_begin(&mut buf, "getUser", MessageType::Call, 7);
        let header = p.read_message_begin(&mut buf).unwrap();
        assert_eq!(header.name, "getUser");
        assert_eq!(header.message_type, MessageType::Call);
        assert_eq!(header.seq_id, 7);
    }

    #[test]
    fn strict_message_rejects_wrong_version() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        buf.append(&[0x00, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
        match p.read_message_begin(&mut buf) {
            Err(DecodeError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn incomplete_message_does_not_consume() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        p.write_message_begin(&mut buf, "ping", MessageType::Oneway, 1);
        let full_len = buf.len();
        let mut truncated = Buffer::new();
        truncated.append(b"\x80\x01\x00\x04\x00\x00\x00");
        assert!(truncated.len() < full_len);
        match p.read_message_begin(&mut truncated) {
            Err(DecodeError::NeedMore) => {}
            other => panic!("expected NeedMore, got {:?}", other),
        }
        assert_eq!(truncated.len(), 7);
    }

    #[test]
    fn field_header_stop_is_one_byte() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        p.write_field_stop(&mut buf);
        assert_eq!(buf.len(), 1);
        let field = p.read_field_begin(&mut buf).unwrap();
        assert_eq!(field.field_type, FieldType::Stop);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn field_header_round_trip() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        p.write_field_begin(&mut buf, FieldHeader { id: 42, field_type: FieldType::I32 });
        let field = p.read_field_begin(&mut buf).unwrap();
        assert_eq!(field.id, 42);
        assert_eq!(field.field_type, FieldType::I32);
    }

    #[test]
    fn string_round_trip() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        p.write_string(&mut buf, "hello").unwrap();
        assert_eq!(p.read_string(&mut buf).unwrap(), "hello");
    }

    #[test]
    fn lax_header_has_no_version_magic() {
        let mut p = BinaryProtocol::lax();
        let mut buf = Buffer::new();
        p.write_message_begin(&mut buf, "call", MessageType::Call, 1);
        let header = p.read_message_begin(&mut buf).unwrap();
        assert_eq!(header.name, "call");
    }

    #[test]
    fn strict_message_decodes_the_name_literal() {
        let mut p = BinaryProtocol::strict();
        let mut buf = Buffer::new();
        buf.append(&[0x80, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x08, b't', b'h', b'e', b'_', b'n', b'a', b'm', b'e', 0x00, 0x00, 0x16, 0x2E]);
        let header = p.read_message_begin(&mut buf).unwrap();
        assert_eq!(header.name, "the_name");
        assert_eq!(header.message_type, MessageType::Call);
        assert_eq!(header.seq_id, 5678);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn lax_message_rejects_bad_type_and_leaves_buffer_untouched() {
        let mut p = BinaryProtocol::lax();
        let mut buf = Buffer::new();
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00];
        buf.append(&bytes);
        match p.read_message_begin(&mut buf) {
            Err(DecodeError::Malformed(msg)) => assert_eq!(msg, "invalid (lax) binary protocol message type 5"),
            other => panic!("expected Malformed, got {:?}", other),
        }
        assert_eq!(buf.len(), bytes.len());
    }
}
