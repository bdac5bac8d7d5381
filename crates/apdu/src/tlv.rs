//! TLV helpers over `iso7816-tlv`
//!
//! Simple-TLV lookups for flat GlobalPlatform payloads plus thin BER
//! constructors for the nested templates (FCI, GET STATUS entries).

use bytes::Bytes;
use iso7816_tlv::ber;
use iso7816_tlv::simple::Tlv as SimpleTlv;

use crate::error::ParseError;

/// Find a simple-TLV value by one-byte tag
pub fn find_simple_value(data: &[u8], tag: u8) -> Option<Bytes> {
    let mut current = data;

    while !current.is_empty() {
        let (parsed, remaining) = SimpleTlv::parse(current);
        match parsed {
            Ok(tlv) => {
                let tlv_tag: u8 = tlv.tag().into();
                if tlv_tag == tag {
                    return Some(Bytes::copy_from_slice(tlv.value()));
                }
                current = remaining;
            }
            Err(_) => return None,
        }
    }

    None
}

/// Build a primitive BER TLV
pub fn primitive(tag: u16, value: &[u8]) -> Result<ber::Tlv, ParseError> {
    let tag = ber::Tag::try_from(tag).map_err(|e| ParseError::Tlv(e.to_string()))?;
    ber::Tlv::new(tag, ber::Value::Primitive(value.to_vec()))
        .map_err(|e| ParseError::Tlv(e.to_string()))
}

/// Build a constructed BER TLV from already-built children
pub fn constructed(tag: u16, children: Vec<ber::Tlv>) -> Result<ber::Tlv, ParseError> {
    let tag = ber::Tag::try_from(tag).map_err(|e| ParseError::Tlv(e.to_string()))?;
    ber::Tlv::new(tag, ber::Value::Constructed(children))
        .map_err(|e| ParseError::Tlv(e.to_string()))
}

/// Parse every top-level BER TLV in `data`
pub fn parse_ber_all(data: &[u8]) -> Vec<ber::Tlv> {
    ber::Tlv::parse_all(data)
}

/// Look up a child of a constructed BER TLV by tag number
pub fn ber_child<'a>(parent: &'a ber::Tlv, tag: u16) -> Option<&'a ber::Tlv> {
    let wanted = ber::Tag::try_from(tag).ok()?;
    match parent.value() {
        ber::Value::Constructed(children) => children.iter().find(|c| *c.tag() == wanted),
        ber::Value::Primitive(_) => None,
    }
}

/// Primitive value bytes of a BER TLV, if it is primitive
pub fn ber_primitive_value(tlv: &ber::Tlv) -> Option<&[u8]> {
    match tlv.value() {
        ber::Value::Primitive(v) => Some(v.as_slice()),
        ber::Value::Constructed(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn find_simple_value_scans_sequence() {
        let data = hex!("4F07A000000003000084074143434F554E54");

        assert_eq!(
            find_simple_value(&data, 0x4F),
            Some(Bytes::from(hex!("A0000000030000").to_vec()))
        );
        assert_eq!(
            find_simple_value(&data, 0x84),
            Some(Bytes::from(hex!("4143434F554E54").to_vec()))
        );
        assert_eq!(find_simple_value(&data, 0x50), None);
    }

    #[test]
    fn ber_construct_and_inspect() {
        let aid = hex!("A000000151000000");
        let inner = primitive(0x84, &aid).unwrap();
        let outer = constructed(0x6F, vec![inner]).unwrap();
        let raw = outer.to_vec();
        assert_eq!(raw.as_slice(), hex!("6F0A8408A000000151000000"));

        let parsed = parse_ber_all(&raw);
        assert_eq!(parsed.len(), 1);
        let child = ber_child(&parsed[0], 0x84).unwrap();
        assert_eq!(ber_primitive_value(child), Some(aid.as_slice()));
    }

    #[test]
    fn two_byte_tags_survive() {
        let tlv = primitive(0x9F70, &[0x07]).unwrap();
        assert_eq!(tlv.to_vec().as_slice(), hex!("9F700107"));
    }
}
