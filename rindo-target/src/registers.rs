//! レジスタアクセス機能

use crate::Result;
use nix::libc::user_regs_struct;
use nix::unistd::Pid;

/// レジスタ情報
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// レジスタに書き込む
    pub fn write(&self, regs: user_regs_struct) -> Result<()> {
        nix::sys::ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        let regs = self.read()?;
        Ok(regs.rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        let mut regs = self.read()?;
        regs.rip = pc;
        self.write(regs)
    }

    /// 名前でレジスタを読み取る
    pub fn read_by_name(&self, name: &str) -> Result<u64> {
        let regs = self.read()?;
        field(&regs, name).ok_or_else(|| anyhow::anyhow!("Unknown register '{}'", name))
    }

    /// 名前でレジスタに書き込む
    pub fn write_by_name(&self, name: &str, value: u64) -> Result<()> {
        let mut regs = self.read()?;
        if !set_field(&mut regs, name, value) {
            return Err(anyhow::anyhow!("Unknown register '{}'", name));
        }
        self.write(regs)
    }
}

/// 名前からレジスタ値を取り出す
pub(crate) fn field(regs: &user_regs_struct, name: &str) -> Option<u64> {
    match name {
        "rip" => Some(regs.rip),
        "rsp" => Some(regs.rsp),
        "rbp" => Some(regs.rbp),
        "rax" => Some(regs.rax),
        "rbx" => Some(regs.rbx),
        "rcx" => Some(regs.rcx),
        "rdx" => Some(regs.rdx),
        "rsi" => Some(regs.rsi),
        "rdi" => Some(regs.rdi),
        "r8" => Some(regs.r8),
        "r9" => Some(regs.r9),
        "r10" => Some(regs.r10),
        "r11" => Some(regs.r11),
        "r12" => Some(regs.r12),
        "r13" => Some(regs.r13),
        "r14" => Some(regs.r14),
        "r15" => Some(regs.r15),
        "eflags" => Some(regs.eflags),
        _ => None,
    }
}

/// 名前でレジスタ値を設定する
pub(crate) fn set_field(regs: &mut user_regs_struct, name: &str, value: u64) -> bool {
    match name {
        "rip" => regs.rip = value,
        "rsp" => regs.rsp = value,
        "rbp" => regs.rbp = value,
        "rax" => regs.rax = value,
        "rbx" => regs.rbx = value,
        "rcx" => regs.rcx = value,
        "rdx" => regs.rdx = value,
        "rsi" => regs.rsi = value,
        "rdi" => regs.rdi = value,
        "r8" => regs.r8 = value,
        "r9" => regs.r9 = value,
        "r10" => regs.r10 = value,
        "r11" => regs.r11 = value,
        "r12" => regs.r12 = value,
        "r13" => regs.r13 = value,
        "r14" => regs.r14 = value,
        "r15" => regs.r15 = value,
        "eflags" => regs.eflags = value,
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_roundtrip() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        assert!(set_field(&mut regs, "rdi", 0x1234));
        assert_eq!(field(&regs, "rdi"), Some(0x1234));
        assert_eq!(field(&regs, "rax"), Some(0));
        assert_eq!(field(&regs, "xyz"), None);
        assert!(!set_field(&mut regs, "xyz", 1));
    }
}
