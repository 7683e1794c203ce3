//! デバッグ対象の統合ファサード
//!
//! プロセス制御・メモリ・レジスタをひとつにまとめ、rindo_runtimeの
//! トレイト群を実装します。評価エンジンはこの型を`dyn DebugTarget`として扱います。

use crate::memory::Memory;
use crate::process::{Process, StopReason};
use crate::registers::Registers;
use crate::Result;
use rindo_runtime::{MemoryAccess, NestedOutcome, RegisterAccess, RuntimeError, TargetControl};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// ネスト呼び出しの既定タイムアウト
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// デバッグ対象
pub struct Target {
    process: Process,
    memory: Memory,
    registers: Registers,
    stopped: bool,
    call_timeout: Duration,
}

impl Target {
    /// 実行可能ファイルを起動してターゲットを作成する
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        let process = Process::spawn(program, args)?;
        Ok(Self::from_process(process))
    }

    /// 既存のプロセスにアタッチしてターゲットを作成する
    pub fn attach(pid: i32) -> Result<Self> {
        let process = Process::attach(pid)?;
        Ok(Self::from_process(process))
    }

    fn from_process(process: Process) -> Self {
        let pid = process.pid();
        Self {
            process,
            memory: Memory::new(pid),
            registers: Registers::new(pid),
            stopped: true,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.process.pid()
    }

    /// ネスト呼び出しのタイムアウトを設定する
    pub fn set_call_timeout(&mut self, timeout: Duration) {
        self.call_timeout = timeout;
    }

    /// 実行を継続して次の停止イベントを待つ
    pub fn continue_and_wait(&mut self) -> Result<StopReason> {
        self.stopped = false;
        let reason = self.process.continue_and_wait()?;
        match reason {
            StopReason::Exited(_) => {}
            _ => self.stopped = true,
        }
        debug!("target stopped: {:?}", reason);
        Ok(reason)
    }
}

impl MemoryAccess for Target {
    fn read(&self, addr: u64, size: usize) -> rindo_runtime::Result<Vec<u8>> {
        self.memory.read(addr, size)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> rindo_runtime::Result<()> {
        self.memory.write(addr, data)
    }
}

impl RegisterAccess for Target {
    fn read_register(&self, name: &str) -> rindo_runtime::Result<u64> {
        self.registers
            .read_by_name(name)
            .map_err(|e| RuntimeError::Register(e.to_string()))
    }

    fn write_register(&mut self, name: &str, value: u64) -> rindo_runtime::Result<()> {
        self.registers
            .write_by_name(name, value)
            .map_err(|e| RuntimeError::Register(e.to_string()))
    }
}

impl TargetControl for Target {
    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn resume_nested_call(&mut self, entry: u64, args: &[u64]) -> rindo_runtime::Result<NestedOutcome> {
        if !self.stopped {
            return Err(RuntimeError::NotStopped);
        }
        self.process
            .call_function(&self.memory, &self.registers, entry, args, self.call_timeout)
            .map_err(|e| RuntimeError::CallFailed(e.to_string()))
    }

    fn continue_process(&mut self) -> rindo_runtime::Result<()> {
        // 次の停止イベントまでブロックする。停止後は再び評価可能になる
        self.continue_and_wait()
            .map(|_| ())
            .map_err(|e| RuntimeError::CallFailed(e.to_string()))
    }

    fn allocate(&mut self, size: usize) -> rindo_runtime::Result<u64> {
        if !self.stopped {
            return Err(RuntimeError::NotStopped);
        }
        self.process
            .allocate_memory(&self.memory, &self.registers, size)
            .map_err(|e| RuntimeError::CallFailed(e.to_string()))
    }
}
