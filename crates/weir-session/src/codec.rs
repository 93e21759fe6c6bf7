use std::collections::HashMap;

/// Flat length-prefixed `key,value` encoding for a session's decoded map —
/// deliberately not a general serialization format, since session values
/// are opaque bytes the framework never interprets.
pub(crate) fn encode_map(values: &HashMap<String, Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in values {
        let key_bytes = key.as_bytes();
        out.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(key_bytes);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
    }
    out
}

pub(crate) fn decode_map(bytes: &[u8]) -> Option<HashMap<String, Vec<u8>>> {
    let mut values = HashMap::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let key_len = u32::from_le_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?) as usize;
        pos += 4;
        let key = String::from_utf8(bytes.get(pos..pos + key_len)?.to_vec()).ok()?;
        pos += key_len;
        let value_len = u32::from_le_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?) as usize;
        pos += 4;
        let value = bytes.get(pos..pos + value_len)?.to_vec();
        pos += value_len;
        values.insert(key, value);
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_entries() {
        let mut values = HashMap::new();
        values.insert("a".to_string(), b"1".to_vec());
        values.insert("b".to_string(), b"hello world".to_vec());
        let encoded = encode_map(&values);
        let decoded = decode_map(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn empty_map_round_trips() {
        let values = HashMap::new();
        assert_eq!(decode_map(&encode_map(&values)).unwrap(), values);
    }
}
