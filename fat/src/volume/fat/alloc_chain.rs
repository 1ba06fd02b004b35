//! 簇的分配与回收
//!
//! 分配从`free_hint`起扫描并回绕，拿到第一个空闲簇后
//! 贪心地吃连号的空闲簇，尽量少碎片。调用方拿到多少算多少，
//! 不够就带着新的链尾再来。

use vfs::Error;

use super::FatTable;
use crate::cluster::{ClusterId, ClusterKind};

impl FatTable {
    /// 从提示位置起找第一个空闲簇，回绕整卷。
    fn find_free(&mut self) -> Result<ClusterId, Error> {
        let max = self.max_index;
        let hint = self.free_hint.raw().clamp(2, max);

        for raw in (hint..=max).chain(2..hint) {
            let id = ClusterId::new(raw);
            if self.is_free(id)? {
                return Ok(id);
            }
        }

        log::warn!("volume full");
        Err(Error::NoSpace)
    }

    fn is_free(&mut self, id: ClusterId) -> Result<bool, Error> {
        Ok(self.entry(id)? == ClusterKind::Free)
    }

    /// 分配至多`want`个簇连成一段链。
    ///
    /// 首簇之后只收连号的空闲簇；`after`给定时把新段缝到其后。
    /// 返回(首簇, 实得个数)。
    pub fn alloc_chain(
        &mut self,
        after: Option<ClusterId>,
        want: usize,
    ) -> Result<(ClusterId, usize), Error> {
        debug_assert!(want > 0);

        let first = self.find_free()?;
        // 先封口再缝合，任何时刻链上不出现悬空条目
        self.terminate(first)?;
        if let Some(prev) = after {
            self.link(prev, first)?;
        }

        let mut last = first;
        let mut got = 1;
        while got < want {
            let cand = last.step(1);
            if cand.raw() > self.max_index || !self.is_free(cand)? {
                break;
            }
            self.terminate(cand)?;
            self.link(last, cand)?;
            last = cand;
            got += 1;
        }

        self.free_hint = if last.raw() < self.max_index {
            last.step(1)
        } else {
            ClusterId::MIN
        };
        if let Some(count) = self.free_count {
            // FSINFO的提示可能偏低，兜不住就作废，留待全卷重扫
            self.free_count = count.checked_sub(got as u32);
            if self.free_count.is_none() {
                log::warn!("free count hint too low, dropping it");
            }
        }

        log::trace!("allocated {got} clusters from {first}");
        Ok((first, got))
    }

    /// 释放整条链表，返回释放的簇数。
    ///
    /// 先读后清：下一跳读出来之前绝不动当前条目。
    /// 链中途损坏就停在那里，已释放的部分保持释放。
    pub fn release_chain(&mut self, start: ClusterId) -> Result<u32, Error> {
        let mut id = start;
        let mut freed = 0u32;

        loop {
            let verdict = self.entry(id)?;
            match verdict {
                ClusterKind::Next(next) => {
                    self.clear(id)?;
                    freed += 1;
                    id = next;
                }
                ClusterKind::Eoc => {
                    self.clear(id)?;
                    freed += 1;
                    break;
                }
                _ => {
                    log::warn!("chain from {start} breaks at {id} ({verdict:?})");
                    break;
                }
            }
        }

        if let Some(count) = &mut self.free_count {
            *count += freed;
        }
        if start < self.free_hint {
            self.free_hint = start;
        }

        Ok(freed)
    }

    /// 截断链表：`keep`成为最后一个簇，其后全部释放。
    pub fn truncate_chain(&mut self, keep: ClusterId) -> Result<u32, Error> {
        let tail = self.next(keep)?;
        self.terminate(keep)?;
        match tail {
            Some(tail) => self.release_chain(tail),
            None => Ok(0),
        }
    }

    fn clear(&mut self, id: ClusterId) -> Result<(), Error> {
        self.link(id, ClusterId::FREE)
    }

    /// 空闲簇总数。首次调用做全卷扫描，之后走缓存。
    pub fn free_clusters(&mut self) -> Result<u32, Error> {
        if let Some(count) = self.free_count {
            return Ok(count);
        }

        let mut count = 0;
        for raw in 2..=self.max_index {
            if self.is_free(ClusterId::new(raw))? {
                count += 1;
            }
        }
        self.free_count = Some(count);
        Ok(count)
    }
}
