//! 多粒度锁的基础构件
//!
//! [`LockObj`]是一把计数锁：共享方计数进入，独占方等到
//! 计数归零且无其它独占者。落选者原地自旋、重新竞争，
//! 不维护等待队列。
//!
//! 引擎里的层级（按获取顺序）：
//! 粗粒度锁 → 驱动器锁 → inode锁 → FAT锁 → I/O锁。

use spin::Mutex;

#[derive(Debug, Default)]
struct LockState {
    /// 共享持有者计数
    opencount: usize,
    exclusive: bool,
}

#[derive(Debug)]
pub struct LockObj {
    state: Mutex<LockState>,
}

impl LockObj {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                opencount: 0,
                exclusive: false,
            }),
        }
    }

    pub fn shared(&self) -> SharedGuard<'_> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.exclusive {
                    state.opencount += 1;
                    return SharedGuard(self);
                }
            }
            core::hint::spin_loop();
        }
    }

    pub fn exclusive(&self) -> ExclusiveGuard<'_> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.exclusive && state.opencount == 0 {
                    state.exclusive = true;
                    return ExclusiveGuard(self);
                }
            }
            core::hint::spin_loop();
        }
    }
}

impl Default for LockObj {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SharedGuard<'a>(&'a LockObj);

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        debug_assert!(state.opencount > 0);
        state.opencount -= 1;
    }
}

#[derive(Debug)]
pub struct ExclusiveGuard<'a>(&'a LockObj);

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        debug_assert!(state.exclusive);
        state.exclusive = false;
    }
}
