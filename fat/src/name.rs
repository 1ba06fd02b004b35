//! 名称处理：长名、8.3短名与两者的换算
//!
//! 长名以UTF-16存在长目录项里，13单元一项；
//! 短名是码页字节，基名8字节+扩展名3字节，空格填充。
//! 长名放不进8.3时生成带`~`的代短名，派生自长名的散列，
//! 正面撞车的概率低，撞上了就换个探测值重来。

use alloc::string::String;
use alloc::vec::Vec;

use vfs::{Codepage, Error};

use crate::volume::data::LongDirEntry;

/// 长名上限，UTF-16单元数
pub const MAX_LFN: usize = 255;

/// 长名里不许出现的字符（控制字符另算）
const ILLEGAL: &[u8] = br#""*/:<>?\|"#;

/// 8.3短名里合法，长名判定之外还要排除的字符
const ILLEGAL_SFN: &[u8] = br#" +,;=[]."#;

pub fn validate(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.bytes().all(|b| b == b'.' || b == b' ') {
        return Err(Error::InvalidPath);
    }
    if name.encode_utf16().count() > MAX_LFN {
        return Err(Error::NameTooLong);
    }
    if name
        .bytes()
        .any(|b| b < 0x20 || b == 0x7F || ILLEGAL.contains(&b))
    {
        return Err(Error::InvalidPath);
    }
    Ok(())
}

/// 按8.3规则压出基础短名。
///
/// # 返回
///
/// - `[u8; 11]`: 大写、空格填充的短名。
/// - `bool`: 名字是否无损地放进了8.3（是则不必写长目录项）。
pub fn basis_name(name: &str, cp: &dyn Codepage) -> Result<([u8; 11], bool), Error> {
    let (base, ext) = match name.rfind('.') {
        // 首字符的点不算扩展名分隔符
        Some(0) | None => (name, ""),
        Some(i) => (&name[..i], &name[i + 1..]),
    };

    let mut exact = base.len() <= 8 && ext.len() <= 3 && !base.is_empty();

    let mut arr = [b' '; 11];
    let fill = |field: &mut [u8], s: &str| -> Result<bool, Error> {
        let mut lossy = false;
        let mut bytes = Vec::new();
        cp.to_codepage(&mut bytes, s).or_else(|_| {
            // 码页装不下的字符逐个降级为'_'
            lossy = true;
            bytes.clear();
            for c in s.chars() {
                let mut one = Vec::new();
                let mut tmp = [0u8; 4];
                if cp.to_codepage(&mut one, c.encode_utf8(&mut tmp)).is_err() {
                    one.clear();
                    one.push(b'_');
                }
                bytes.extend(one);
            }
            Ok::<(), Error>(())
        })?;

        for (slot, &b) in field.iter_mut().zip(&bytes) {
            if b < 0x20 || b == 0x7F || ILLEGAL.contains(&b) {
                return Err(Error::InvalidPath);
            }
            if ILLEGAL_SFN.contains(&b) {
                *slot = b'_';
                lossy = true;
            } else {
                // 大写化抹掉的大小写也是信息损失，要靠长名保真
                lossy |= b != b.to_ascii_uppercase();
                *slot = b.to_ascii_uppercase();
            }
        }
        if bytes.len() > field.len() {
            lossy = true;
        }
        Ok(lossy)
    };

    let base_lossy = fill(&mut arr[..8], base)?;
    let ext_lossy = fill(&mut arr[8..], ext)?;
    exact &= !(base_lossy || ext_lossy);

    Ok((arr, exact))
}

/// 第一阶段代短名：截短的基名接`~n`数字尾巴，如`LONGNA~1`。
pub fn numeric_tail(basis: &[u8; 11], n: u32) -> [u8; 11] {
    debug_assert!(n >= 1);

    let mut digits = [0u8; 8];
    let mut len = 0;
    let mut v = n;
    while v > 0 {
        digits[len] = b'0' + (v % 10) as u8;
        v /= 10;
        len += 1;
    }
    debug_assert!(len <= 7);

    let base_end = basis[..8]
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |i| i + 1);
    let keep = base_end.min(8 - 1 - len);

    let mut arr = *basis;
    for slot in arr[keep..8].iter_mut() {
        *slot = b' ';
    }
    arr[keep] = b'~';
    for (i, slot) in arr[keep + 1..keep + 1 + len].iter_mut().enumerate() {
        *slot = digits[len - 1 - i];
    }
    arr
}

/// 第二阶段代短名：基名前2字符 + 长名散列的4位十六进制 + `~1`。
/// 数字尾巴用尽后才轮到它；撞车时换`probe`重摇散列。
pub fn gen_sfn(name: &str, basis: &[u8; 11], probe: u32) -> [u8; 11] {
    let mut hash: u16 = 0;
    for unit in name.encode_utf16() {
        hash = hash.rotate_left(3).wrapping_add(unit);
    }
    hash = hash.wrapping_add(probe as u16);

    let mut arr = *basis;
    // 基名前2字符留下，空格换下划线
    for slot in arr[..2].iter_mut() {
        if *slot == b' ' {
            *slot = b'_';
        }
    }
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for (i, slot) in arr[2..6].iter_mut().enumerate() {
        *slot = HEX[(hash >> (12 - i * 4)) as usize & 0xF];
    }
    arr[6] = b'~';
    arr[7] = b'1';
    arr
}

/// 长名切成长目录项的13单元块，**正序**排列。
/// 最后一块按规矩补终止符0x0000、其余填0xFFFF。
pub fn lfn_units(name: &str) -> Vec<[u16; LongDirEntry::CAP]> {
    let utf16: Vec<u16> = name.encode_utf16().collect();

    utf16
        .chunks(LongDirEntry::CAP)
        .map(|chunk| {
            let mut unit = [0xFFFF_u16; LongDirEntry::CAP];
            unit[..chunk.len()].copy_from_slice(chunk);
            if chunk.len() < LongDirEntry::CAP {
                unit[chunk.len()] = 0x0000;
            }
            unit
        })
        .collect()
}

/// 把正序排列的单元块拼回名字。
/// 不是合法UTF-16就返回[`None`]，调用方静默放弃这串长目录项。
pub fn assemble(units: &[[u16; LongDirEntry::CAP]]) -> Option<String> {
    let utf16: Vec<u16> = units
        .iter()
        .flatten()
        .copied()
        .take_while(|&u| u != 0x0000 && u != 0xFFFF)
        .collect();

    String::from_utf16(&utf16).ok()
}

/// FAT的名字匹配不区分ASCII大小写。
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.chars()
            .zip(b.chars())
            .all(|(x, y)| x.eq_ignore_ascii_case(&y))
}

/// 8.3短名的展示形式，如`README.TXT`。
pub fn short_display(name: &[u8; 11], cp: &dyn Codepage) -> Result<String, Error> {
    let base = &name[..8];
    let ext = &name[8..];
    let base_end = base.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let ext_end = ext.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);

    let mut out = String::new();
    cp.to_utf8(&mut out, &base[..base_end])?;
    if ext_end > 0 {
        out.push('.');
        cp.to_utf8(&mut out, &ext[..ext_end])?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfs::AsciiCodepage;

    #[test]
    fn plain_names_fit_basis() {
        let cp = AsciiCodepage;
        let (arr, exact) = basis_name("README.TXT", &cp).unwrap();
        assert_eq!(*b"README  TXT", arr);
        assert!(exact);

        let (arr, exact) = basis_name("DOCS", &cp).unwrap();
        assert_eq!(*b"DOCS       ", arr);
        assert!(exact);
    }

    #[test]
    fn lowercase_does_not_fit() {
        // 大写化有损，必须写长目录项才能还原原名
        let cp = AsciiCodepage;
        let (arr, exact) = basis_name("readme.txt", &cp).unwrap();
        assert_eq!(*b"README  TXT", arr);
        assert!(!exact);

        let (_, exact) = basis_name("Docs", &cp).unwrap();
        assert!(!exact);
    }

    #[test]
    fn long_names_do_not_fit() {
        let cp = AsciiCodepage;
        let (_, exact) = basis_name("a long file name.text", &cp).unwrap();
        assert!(!exact);

        let (arr, exact) = basis_name("lots.of.dots.txt", &cp).unwrap();
        assert!(!exact);
        // 只有最后一个点算分隔符
        assert_eq!(&arr[8..], b"TXT");
    }

    #[test]
    fn numeric_tail_shape() {
        let cp = AsciiCodepage;
        let (basis, _) = basis_name("a long file name.text", &cp).unwrap();
        assert_eq!(*b"A_LONG~1TEX", numeric_tail(&basis, 1));
        assert_eq!(*b"A_LONG~9TEX", numeric_tail(&basis, 9));
        // 两位数尾巴再挤掉基名一个字符
        assert_eq!(*b"A_LON~42TEX", numeric_tail(&basis, 42));

        let (basis, _) = basis_name("it", &cp).unwrap();
        assert_eq!(*b"IT~3       ", numeric_tail(&basis, 3));
    }

    #[test]
    fn sfn_tail_shape() {
        let cp = AsciiCodepage;
        let (basis, _) = basis_name("a long file name.text", &cp).unwrap();
        let sfn = gen_sfn("a long file name.text", &basis, 0);
        assert_eq!(b'~', sfn[6]);
        assert_eq!(b'1', sfn[7]);
        assert_eq!(&basis[8..], &sfn[8..]);
        // 探测值变了，散列段也要变
        assert_ne!(gen_sfn("a long file name.text", &basis, 1)[2..6], sfn[2..6]);
    }

    #[test]
    fn unit_round_trip() {
        for name in ["hello.txt", "thirteenchars", "a much longer name than one entry"] {
            let units = lfn_units(name);
            assert_eq!(name, assemble(&units).unwrap());
        }
    }

    #[test]
    fn validation() {
        assert!(validate("ok name.txt").is_ok());
        assert_eq!(Err(Error::InvalidPath), validate(""));
        assert_eq!(Err(Error::InvalidPath), validate(".."));
        assert_eq!(Err(Error::InvalidPath), validate("a/b"));
        assert_eq!(Err(Error::InvalidPath), validate("what?"));
        assert_eq!(Err(Error::InvalidPath), validate("a\u{7f}b"));

        let long: String = core::iter::repeat('x').take(256).collect();
        assert_eq!(Err(Error::NameTooLong), validate(&long));
    }

    #[test]
    fn display_form() {
        let cp = AsciiCodepage;
        assert_eq!("README.TXT", short_display(b"README  TXT", &cp).unwrap());
        assert_eq!("DOCS", short_display(b"DOCS       ", &cp).unwrap());
    }
}
