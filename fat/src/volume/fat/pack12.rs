//! FAT12条目的打包/解包
//!
//! 每条12位，两条挤进三个字节，条目会跨扇区边界，
//! 所以FAT12的整张表都驻留内存，这里只对连续字节切片操作。
//!
//! 簇号`n`的条目起始于字节`n + n/2`：
//! 偶数簇占低12位，奇数簇占高12位。

/// 读出簇号`clno`的12位条目。
pub fn unpack12(fat: &[u8], clno: u32) -> u16 {
    let i = clno as usize + clno as usize / 2;
    let pair = u16::from_le_bytes([fat[i], fat[i + 1]]);

    if clno & 1 == 0 {
        pair & 0x0FFF
    } else {
        pair >> 4
    }
}

/// 写入簇号`clno`的12位条目，保留同组另一条的4位。
pub fn pack12(fat: &mut [u8], clno: u32, value: u16) {
    debug_assert!(value <= 0x0FFF);
    let i = clno as usize + clno as usize / 2;

    if clno & 1 == 0 {
        fat[i] = value as u8;
        fat[i + 1] = (fat[i + 1] & 0xF0) | (value >> 8) as u8;
    } else {
        fat[i] = (fat[i] & 0x0F) | (value << 4) as u8;
        fat[i + 1] = (value >> 4) as u8;
    }
}

/// 条目占据的字节区间，供脏页登记使用。
pub fn byte_span(clno: u32) -> (usize, usize) {
    let i = clno as usize + clno as usize / 2;
    (i, i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_odd_packing() {
        let mut fat = [0u8; 9];
        pack12(&mut fat, 2, 0xABC);
        pack12(&mut fat, 3, 0x123);

        assert_eq!(0xABC, unpack12(&fat, 2));
        assert_eq!(0x123, unpack12(&fat, 3));
        // 字节布局：2号条目 -> BC .A，3号条目 -> 3. 12
        assert_eq!([0xBC, 0x3A, 0x12], fat[3..6]);
    }

    #[test]
    fn neighbours_survive_rewrite() {
        let mut fat = [0u8; 12];
        pack12(&mut fat, 4, 0xFFF);
        pack12(&mut fat, 5, 0xFFF);

        pack12(&mut fat, 4, 0x005);
        assert_eq!(0x005, unpack12(&fat, 4));
        assert_eq!(0xFFF, unpack12(&fat, 5));

        pack12(&mut fat, 5, 0x006);
        assert_eq!(0x005, unpack12(&fat, 4));
        assert_eq!(0x006, unpack12(&fat, 5));
    }

    #[test]
    fn full_table_walk() {
        // 够放32条
        let mut fat = alloc::vec![0u8; 48];
        for clno in 0..32u32 {
            pack12(&mut fat, clno, (clno as u16).wrapping_mul(41) & 0x0FFF);
        }
        for clno in 0..32u32 {
            assert_eq!((clno as u16).wrapping_mul(41) & 0x0FFF, unpack12(&fat, clno));
        }
    }
}
