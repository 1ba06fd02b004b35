use alloc::string::String;
use alloc::vec::Vec;

use crate::Error;

/// 码页转写协作者。
///
/// 磁盘上的8.3名称以单字节码页存储，引擎内部统一使用UTF-8；
/// 每次跨越这条边界都要经过此特质，转写表本身不由核心实现。
pub trait Codepage: Send + Sync {
    /// 码页字节 → UTF-8，追加到`out`。
    fn to_utf8(&self, out: &mut String, raw: &[u8]) -> Result<(), Error>;

    /// UTF-8 → 码页字节，追加到`out`。
    /// 无法映射的字符报[`Error::InvalidPath`]。
    fn to_codepage(&self, out: &mut Vec<u8>, s: &str) -> Result<(), Error>;
}

/// 单字节ASCII码页，非ASCII字节一律视为不可映射。
#[derive(Debug, Default)]
pub struct AsciiCodepage;

impl Codepage for AsciiCodepage {
    fn to_utf8(&self, out: &mut String, raw: &[u8]) -> Result<(), Error> {
        for &b in raw {
            if b.is_ascii() {
                out.push(b as char);
            } else {
                return Err(Error::InvalidPath);
            }
        }
        Ok(())
    }

    fn to_codepage(&self, out: &mut Vec<u8>, s: &str) -> Result<(), Error> {
        for c in s.chars() {
            if c.is_ascii() {
                out.push(c as u8);
            } else {
                return Err(Error::InvalidPath);
            }
        }
        Ok(())
    }
}
