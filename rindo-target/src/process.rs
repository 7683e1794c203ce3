//! プロセス制御機能
//!
//! プロセスの起動・アタッチ・実行継続に加えて、式評価エンジンが必要とする
//! 2つの注入プリミティブ（ネスト関数呼び出しとターゲット内メモリ確保）を提供します。

use crate::memory::Memory;
use crate::registers::Registers;
use crate::Result;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use rindo_runtime::{MemoryAccess as _, NestedOutcome};
use std::ffi::CString;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// ネスト呼び出しの戻り先として積む番兵アドレス
///
/// mmap_min_addrより低く、どのプロセスでもマッピングされ得ないアドレスです。
/// 呼び出された関数がここへretすると命令フェッチが失敗してSIGSEGVで停止し、
/// その時点のRIPが番兵と一致することで「呼び出しが戻った」ことを検出します。
const CALL_RETURN_SENTINEL: u64 = 0xf00d;

/// 呼び出し待機のポーリング間隔
const CALL_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// ブレークポイントヒット（SIGTRAP）
    Breakpoint,
    /// シグナル受信
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// その他の停止
    Other,
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: nix::unistd::Pid,
}

impl Process {
    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// 新しいプロセスをforkして起動し、PTRACE_TRACEMEを設定してから
    /// 指定された実行可能ファイルをexecveで実行します。
    /// プロセスは最初の命令で停止状態で返されます。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        use nix::sys::ptrace;
        use nix::unistd::{execve, fork, ForkResult};

        let program_path = program.as_ref().to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid program path"))?;
        let program_cstring = CString::new(program_path)?;

        let mut cstring_args = vec![program_cstring.clone()];
        for arg in args {
            cstring_args.push(CString::new(arg.as_str())?);
        }

        // 環境変数は親プロセスから継承
        let env: Vec<CString> = std::env::vars()
            .map(|(key, val)| CString::new(format!("{}={}", key, val)).map_err(anyhow::Error::from))
            .collect::<Result<Vec<_>>>()?;

        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                // 子プロセスがexecve後に停止するまで待機
                match waitpid(child, None)? {
                    WaitStatus::Stopped(_, _) => Ok(Self { pid: child }),
                    status => {
                        Err(anyhow::anyhow!("Unexpected wait status after execve: {:?}", status))
                    }
                }
            }
            ForkResult::Child => {
                ptrace::traceme()?;

                // execveを実行（成功すると戻ってこない）
                execve(&program_cstring, &cstring_args, &env)?;
                unreachable!("execve failed");
            }
        }
    }

    /// 既存のプロセスにアタッチし、停止を待つ
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = nix::unistd::Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)?;
        waitpid(pid, None)?;
        Ok(Self { pid })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスを実行継続する
    pub fn continue_execution(&self) -> Result<()> {
        nix::sys::ptrace::cont(self.pid, None)?;
        Ok(())
    }

    /// プロセスを実行継続して停止イベントを待機する
    pub fn continue_and_wait(&self) -> Result<StopReason> {
        nix::sys::ptrace::cont(self.pid, None)?;

        let status = waitpid(self.pid, None)?;
        match status {
            WaitStatus::Stopped(_, signal) => {
                if signal == Signal::SIGTRAP {
                    Ok(StopReason::Breakpoint)
                } else {
                    Ok(StopReason::Signal(signal))
                }
            }
            WaitStatus::Exited(_, code) => Ok(StopReason::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Ok(StopReason::Signal(signal)),
            _ => Ok(StopReason::Other),
        }
    }

    /// 停止中のターゲット内で関数を呼び出す
    ///
    /// レジスタを退避してから SysV ABI の呼び出しフレームを構築し、
    /// 番兵アドレスに戻るまでターゲットを一時的に再開します。
    /// 戻り値（RAX）を回収した後、レジスタは必ず呼び出し前の状態に復元されます。
    /// タイムアウト時はSIGSTOPで停止させ、復元してから`Cancelled`を返します。
    pub fn call_function(
        &self,
        memory: &Memory,
        registers: &Registers,
        entry: u64,
        args: &[u64],
        timeout: Duration,
    ) -> Result<NestedOutcome> {
        let saved = registers.read()?;
        let mut regs = saved;

        regs.rip = entry;
        place_call_args(&mut regs, args)?;

        // 赤ゾーンを避けてスタックを下げ、call直後と同じアライメント
        // （関数入口でrsp % 16 == 8）を作ってから番兵の戻りアドレスを積む
        let mut rsp = (saved.rsp - 0x200) & !0xf;
        rsp -= 8;
        memory.write_bytes(rsp, &CALL_RETURN_SENTINEL.to_le_bytes())?;
        regs.rsp = rsp;
        // 可変引数規約: ベクタレジスタの使用数
        regs.rax = 0;

        registers.write(regs)?;
        debug!("nested call: entry=0x{:x}, {} args", entry, args.len());
        nix::sys::ptrace::cont(self.pid, None)?;

        let deadline = Instant::now() + timeout;
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG))? {
                WaitStatus::StillAlive => {
                    if Instant::now() >= deadline {
                        // タイムアウト: 停止させて呼び出し前の状態に復元する
                        nix::sys::signal::kill(self.pid, Signal::SIGSTOP)?;
                        waitpid(self.pid, None)?;
                        registers.write(saved)?;
                        debug!("nested call timed out after {:?}", timeout);
                        return Ok(NestedOutcome::Cancelled);
                    }
                    std::thread::sleep(CALL_POLL_INTERVAL);
                }
                WaitStatus::Stopped(_, signal) => {
                    let now = registers.read()?;
                    if now.rip == CALL_RETURN_SENTINEL {
                        // 関数が番兵へretした: 戻り値を回収して復元
                        let ret = now.rax;
                        registers.write(saved)?;
                        return Ok(NestedOutcome::Returned(ret));
                    }

                    // 呼び出し中に別の停止イベントが発生した
                    registers.write(saved)?;
                    return Err(anyhow::anyhow!(
                        "nested call stopped by {:?} at 0x{:x}",
                        signal,
                        now.rip
                    ));
                }
                WaitStatus::Exited(_, code) => {
                    return Err(anyhow::anyhow!(
                        "process exited with code {} during nested call",
                        code
                    ));
                }
                status => {
                    registers.write(saved)?;
                    return Err(anyhow::anyhow!(
                        "unexpected wait status during nested call: {:?}",
                        status
                    ));
                }
            }
        }
    }

    /// ターゲット内にメモリを確保する
    ///
    /// syscallガジェットを探し、mmapシステムコールを1命令だけ実行して
    /// 匿名ページを確保します。レジスタは実行後に復元されます。
    pub fn allocate_memory(
        &self,
        memory: &Memory,
        registers: &Registers,
        size: usize,
    ) -> Result<u64> {
        let gadget = self.find_syscall_gadget(memory)?;

        let saved = registers.read()?;
        let mut regs = saved;
        regs.rip = gadget;
        regs.rax = 9; // mmap
        regs.rdi = 0;
        regs.rsi = size as u64;
        regs.rdx = 0x3; // PROT_READ | PROT_WRITE
        regs.r10 = 0x22; // MAP_PRIVATE | MAP_ANONYMOUS
        regs.r8 = u64::MAX;
        regs.r9 = 0;
        registers.write(regs)?;

        nix::sys::ptrace::step(self.pid, None)?;
        waitpid(self.pid, None)?;

        let result = registers.read()?.rax;
        registers.write(saved)?;

        let errno = -(result as i64);
        if (0..4096).contains(&errno) && errno != 0 {
            return Err(anyhow::anyhow!("mmap in target failed with errno {}", errno));
        }

        debug!("allocated {} bytes in target at 0x{:x}", size, result);
        Ok(result)
    }

    /// 実行可能マッピングからsyscall命令（0f 05）を探す
    fn find_syscall_gadget(&self, memory: &Memory) -> Result<u64> {
        const CHUNK: usize = 4096;

        for mapping in memory.get_mappings()?.iter().filter(|m| m.executable) {
            let mut addr = mapping.start;
            while addr + 1 < mapping.end {
                let size = CHUNK.min((mapping.end - addr) as usize);
                let Ok(bytes) = memory.read(addr, size) else {
                    break;
                };
                if let Some(pos) = find_syscall_in(&bytes) {
                    return Ok(addr + pos as u64);
                }
                // チャンク境界をまたぐガジェットを取りこぼさないよう1バイト重ねる
                addr += (size - 1) as u64;
            }
        }

        Err(anyhow::anyhow!("no syscall gadget found in executable mappings"))
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = nix::sys::ptrace::detach(self.pid, None);
    }
}

/// SysV ABIの整数引数レジスタに値を配置する
fn place_call_args(regs: &mut nix::libc::user_regs_struct, args: &[u64]) -> Result<()> {
    const ARG_REGISTERS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

    if args.len() > ARG_REGISTERS.len() {
        return Err(anyhow::anyhow!(
            "too many arguments for register-based call ({} > {})",
            args.len(),
            ARG_REGISTERS.len()
        ));
    }

    for (name, value) in ARG_REGISTERS.iter().zip(args.iter()) {
        crate::registers::set_field(regs, name, *value);
    }
    Ok(())
}

/// バイト列からsyscall命令のオフセットを探す
fn find_syscall_in(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == [0x0f, 0x05])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_call_args() {
        let mut regs: nix::libc::user_regs_struct = unsafe { std::mem::zeroed() };
        place_call_args(&mut regs, &[1, 2, 3]).unwrap();
        assert_eq!(regs.rdi, 1);
        assert_eq!(regs.rsi, 2);
        assert_eq!(regs.rdx, 3);
        assert_eq!(regs.rcx, 0);

        assert!(place_call_args(&mut regs, &[0; 7]).is_err());
    }

    #[test]
    fn test_find_syscall_in() {
        assert_eq!(find_syscall_in(&[0x90, 0x0f, 0x05, 0xc3]), Some(1));
        assert_eq!(find_syscall_in(&[0x90, 0x90]), None);
        assert_eq!(find_syscall_in(&[]), None);
    }
}
