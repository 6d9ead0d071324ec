//! Msgpack encoding of scalar header fields.
//!
//! Only the scalar fields that cross protocol adapters are specified:
//! they encode as the natural msgpack scalar (bool, integer). The full
//! wire protocol lives in the protocol plugins and is out of scope here.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::msg::{CmdResult, StatusCode};

pub fn encode_scalar<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    rmp_serde::to_vec(value).map_err(|e| Error::invalid_argument(e.to_string()))
}

pub fn decode_scalar<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::invalid_argument(e.to_string()))
}

// ---------------------------------------------------------------------------
// Per-field helpers for the cmd-result header
// ---------------------------------------------------------------------------

pub fn encode_is_final(result: &CmdResult) -> Result<Vec<u8>, Error> {
    encode_scalar(&result.is_final)
}

pub fn decode_is_final(result: &mut CmdResult, bytes: &[u8]) -> Result<(), Error> {
    result.is_final = decode_scalar(bytes)?;
    Ok(())
}

pub fn encode_is_completed(result: &CmdResult) -> Result<Vec<u8>, Error> {
    encode_scalar(&result.is_completed)
}

pub fn decode_is_completed(result: &mut CmdResult, bytes: &[u8]) -> Result<(), Error> {
    result.is_completed = decode_scalar(bytes)?;
    Ok(())
}

pub fn encode_status_code(result: &CmdResult) -> Result<Vec<u8>, Error> {
    encode_scalar(&result.status_code.as_u32())
}

pub fn decode_status_code(result: &mut CmdResult, bytes: &[u8]) -> Result<(), Error> {
    result.status_code = StatusCode::from_u32(decode_scalar(bytes)?);
    Ok(())
}

pub fn encode_timestamp(timestamp_us: i64) -> Result<Vec<u8>, Error> {
    encode_scalar(&timestamp_us)
}

pub fn decode_timestamp(bytes: &[u8]) -> Result<i64, Error> {
    decode_scalar(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Cmd;

    #[test]
    fn bool_encodes_as_single_msgpack_byte() {
        // Natural msgpack scalars: 0xc3 = true, 0xc2 = false.
        assert_eq!(encode_scalar(&true).unwrap(), vec![0xc3]);
        assert_eq!(encode_scalar(&false).unwrap(), vec![0xc2]);
    }

    #[test]
    fn small_int_uses_fixint() {
        // Positive fixint range encodes as the byte itself.
        assert_eq!(encode_scalar(&5u32).unwrap(), vec![0x05]);
    }

    #[test]
    fn cmd_result_fields_round_trip() {
        let cmd = Cmd::create("demo").unwrap();
        let mut result = CmdResult::continued_from_cmd(&cmd, StatusCode::Custom(7));

        let fin = encode_is_final(&result).unwrap();
        let comp = encode_is_completed(&result).unwrap();
        let status = encode_status_code(&result).unwrap();

        let mut decoded = CmdResult::from_cmd(&cmd, StatusCode::Ok);
        decode_is_final(&mut decoded, &fin).unwrap();
        decode_is_completed(&mut decoded, &comp).unwrap();
        decode_status_code(&mut decoded, &status).unwrap();

        assert!(!decoded.is_final);
        assert!(!decoded.is_completed);
        assert_eq!(decoded.status_code, StatusCode::Custom(7));
    }

    #[test]
    fn timestamp_round_trips() {
        let ts = 1_700_000_000_123_456i64;
        assert_eq!(decode_timestamp(&encode_timestamp(ts).unwrap()).unwrap(), ts);
    }
}
