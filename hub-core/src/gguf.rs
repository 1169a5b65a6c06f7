//! Minimal GGUF container header reader — reads only enough of the file to
//! locate the `split.count` key-value pair, matching the layout produced by
//! llama.cpp's gguf writer.
use std::io::Read;

use crate::error::{HubError, Result};

const MAGIC: &[u8; 4] = b"GGUF";
const MAX_STRING_LEN: u64 = 1024 * 1024;
const MAX_ARRAY_COUNT: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum ValueType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    F32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    U64 = 10,
    I64 = 11,
    F64 = 12,
}

impl ValueType {
    fn from_u32(v: u32) -> Option<Self> {
        use ValueType::*;
        Some(match v {
            0 => U8,
            1 => I8,
            2 => U16,
            3 => I16,
            4 => U32,
            5 => I32,
            6 => F32,
            7 => Bool,
            8 => String,
            9 => Array,
            10 => U64,
            11 => I64,
            12 => F64,
            _ => return None,
        })
    }

    fn fixed_width(self) -> Option<u64> {
        use ValueType::*;
        match self {
            U8 | I8 | Bool => Some(1),
            U16 | I16 => Some(2),
            U32 | I32 | F32 => Some(4),
            U64 | I64 | F64 => Some(8),
            String | Array => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub split_count: u16,
}

struct Reader<R: Read> {
    inner: R,
}

impl<R: Read> Reader<R> {
    fn read_exact_buf(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| HubError::Gguf(format!("unexpected eof: {e}")))?;
        Ok(buf)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_exact_buf(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_exact_buf(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_exact_buf(8)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_exact_buf(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u64()?;
        if len > MAX_STRING_LEN {
            return Err(HubError::Gguf(format!("string length {len} exceeds cap")));
        }
        let bytes = self.read_exact_buf(len as usize)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn skip_value(&mut self, vtype: ValueType) -> Result<()> {
        match vtype {
            ValueType::String => {
                self.string()?;
            }
            ValueType::Array => {
                let elem_type_raw = self.u32()?;
                let elem_type = ValueType::from_u32(elem_type_raw)
                    .ok_or_else(|| HubError::Gguf(format!("unknown array elem type {elem_type_raw}")))?;
                let count = self.u64()?;
                if count > MAX_ARRAY_COUNT {
                    return Err(HubError::Gguf(format!("array count {count} exceeds cap")));
                }
                for _ in 0..count {
                    self.skip_value(elem_type)?;
                }
            }
            other => {
                let width = other.fixed_width().expect("non-variable type has fixed width");
                self.read_exact_buf(width as usize)?;
            }
        }
        Ok(())
    }
}

/// Reads the GGUF header from `reader`, locating `split.count` if present.
/// Returns a zero `split_count` (not an error) if the key-value section ends
/// before the key is found — a file missing the key is simply non-split.
pub fn read_header<R: Read>(reader: R) -> Result<GgufHeader> {
    let mut r = Reader { inner: reader };
    let magic = r.read_exact_buf(4)?;
    if magic.as_slice() != MAGIC {
        return Err(HubError::Gguf("bad magic".to_string()));
    }
    let _version = r.u32()?;
    let _tensor_count = r.i64()?;
    let kv_count = r.i64()?;
    if kv_count < 0 {
        return Err(HubError::Gguf("negative kv count".to_string()));
    }

    for _ in 0..kv_count {
        let key = match r.string() {
            Ok(k) => k,
            Err(_) => return Ok(GgufHeader::default()),
        };
        let vtype_raw = match r.u32() {
            Ok(v) => v,
            Err(_) => return Ok(GgufHeader::default()),
        };
        let vtype = ValueType::from_u32(vtype_raw)
            .ok_or_else(|| HubError::Gguf(format!("unknown value type {vtype_raw}")))?;

        if key == "split.count" && vtype == ValueType::U16 {
            let split_count = r.u16()?;
            return Ok(GgufHeader { split_count });
        }
        if r.skip_value(vtype).is_err() {
            return Ok(GgufHeader::default());
        }
    }

    Ok(GgufHeader::default())
}
