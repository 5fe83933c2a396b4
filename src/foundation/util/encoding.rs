use crate::foundation::MixerError;

pub fn decode_hex(s: &str) -> Result<Vec<u8>, MixerError> {
    hex::decode(s.trim()).map_err(|err| err.into())
}

pub fn parse_hex_fixed<const N: usize>(value: &str) -> Result<[u8; N], MixerError> {
    let bytes = decode_hex(value)?;
    if bytes.len() != N {
        return Err(MixerError::ParseError(format!("expected {N} bytes, got {}", bytes.len())));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
