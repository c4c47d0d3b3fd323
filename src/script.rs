//! Data-carrier script parsing.
//!
//! A burn embeds its destination-chain metadata in an unspendable
//! OP_RETURN output. The payload starts with a fixed 4-byte tag that
//! marks the burn as addressed to this ledger; the rest is the recipient
//! address, read verbatim downstream. Matching is byte-for-byte on the
//! decoded script, never on hex strings.

/// OP_RETURN opcode: marks an output as a provably unspendable data carrier.
pub const OP_RETURN: u8 = 0x6a;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;

/// Magic tag identifying a burn addressed to this destination ledger.
pub const BURN_TAG: [u8; 4] = *b"BLNK";

/// True when the script's first byte is the data-carrier marker.
pub fn is_data_carrier(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

/// Extract the data payload from an OP_RETURN script.
///
/// Handles the three push encodings that fit a data carrier: direct
/// push (1..=75 bytes), OP_PUSHDATA1 and OP_PUSHDATA2. Returns `None`
/// for non-carrier scripts, truncated pushes, or an empty payload.
pub fn data_payload(script: &[u8]) -> Option<&[u8]> {
    if !is_data_carrier(script) {
        return None;
    }
    let rest = &script[1..];
    let (len, data) = match *rest.first()? {
        n @ 1..=75 => (n as usize, &rest[1..]),
        OP_PUSHDATA1 => {
            let n = *rest.get(1)? as usize;
            (n, &rest[2..])
        }
        OP_PUSHDATA2 => {
            let n = u16::from_le_bytes([*rest.get(1)?, *rest.get(2)?]) as usize;
            (n, &rest[3..])
        }
        _ => return None,
    };
    if len == 0 || data.len() < len {
        return None;
    }
    Some(&data[..len])
}

/// A burn payload: the tag followed by the recipient address bytes.
/// Returns the recipient portion when the tag matches.
pub fn burn_recipient(script: &[u8]) -> Option<&[u8]> {
    let payload = data_payload(script)?;
    if payload.len() < BURN_TAG.len() || payload[..BURN_TAG.len()] != BURN_TAG {
        return None;
    }
    Some(&payload[BURN_TAG.len()..])
}

/// True when the script carries a burn addressed to this ledger.
pub fn is_burn_output(script: &[u8]) -> bool {
    burn_recipient(script).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burn_script(recipient: &[u8]) -> Vec<u8> {
        let mut payload = BURN_TAG.to_vec();
        payload.extend_from_slice(recipient);
        let mut script = vec![OP_RETURN, payload.len() as u8];
        script.extend_from_slice(&payload);
        script
    }

    #[test]
    fn test_direct_push_burn_detected() {
        let script = burn_script(b"dest1qrecipient");
        assert!(is_data_carrier(&script));
        assert!(is_burn_output(&script));
        assert_eq!(burn_recipient(&script).unwrap(), b"dest1qrecipient");
    }

    #[test]
    fn test_pushdata1_burn_detected() {
        // 80-byte payload forces OP_PUSHDATA1
        let mut payload = BURN_TAG.to_vec();
        payload.extend_from_slice(&[0x41u8; 76]);
        let mut script = vec![OP_RETURN, OP_PUSHDATA1, payload.len() as u8];
        script.extend_from_slice(&payload);

        assert_eq!(data_payload(&script).unwrap().len(), 80);
        assert!(is_burn_output(&script));
    }

    #[test]
    fn test_pushdata2_payload() {
        let mut payload = BURN_TAG.to_vec();
        payload.extend_from_slice(&[0x42u8; 300]);
        let len = payload.len() as u16;
        let mut script = vec![OP_RETURN, OP_PUSHDATA2];
        script.extend_from_slice(&len.to_le_bytes());
        script.extend_from_slice(&payload);

        assert_eq!(data_payload(&script).unwrap().len(), 304);
        assert!(is_burn_output(&script));
    }

    #[test]
    fn test_wrong_tag_rejected() {
        let mut payload = b"XXXX".to_vec();
        payload.extend_from_slice(b"dest1qrecipient");
        let mut script = vec![OP_RETURN, payload.len() as u8];
        script.extend_from_slice(&payload);

        assert!(is_data_carrier(&script));
        assert!(!is_burn_output(&script));
    }

    #[test]
    fn test_non_carrier_scripts_rejected() {
        // P2PKH: OP_DUP OP_HASH160 <20> ..., not a data carrier
        let p2pkh = [
            0x76u8, 0xa9, 0x14, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x88,
            0xac,
        ];
        assert!(!is_data_carrier(&p2pkh));
        assert!(data_payload(&p2pkh).is_none());
        assert!(!is_burn_output(&p2pkh));

        assert!(!is_burn_output(&[]));
        // Bare OP_RETURN with no payload
        assert!(data_payload(&[OP_RETURN]).is_none());
    }

    #[test]
    fn test_truncated_push_rejected() {
        // Claims 20 bytes, carries 3
        let script = [OP_RETURN, 20, 0x01, 0x02, 0x03];
        assert!(data_payload(&script).is_none());
    }

    #[test]
    fn test_tag_prefix_is_binary_safe() {
        // Tag bytes appearing past the start of the payload must not match
        let mut payload = vec![0x00];
        payload.extend_from_slice(&BURN_TAG);
        let mut script = vec![OP_RETURN, payload.len() as u8];
        script.extend_from_slice(&payload);
        assert!(!is_burn_output(&script));
    }

    #[test]
    fn test_empty_recipient_allowed_by_parser() {
        // Tag with no recipient parses; the ledger rejects it downstream
        let script = burn_script(b"");
        assert_eq!(burn_recipient(&script).unwrap(), b"");
    }
}
