//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use rindo_runtime::{MemoryAccess, RuntimeError};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom, Write as _};

/// メモリマッピング情報
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

/// メモリアクセス
///
/// キャッシュは持たず、毎回の読み取りが現在のターゲットメモリを反映します。
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    pub fn read_bytes(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(5) {
                        // EIO (errno 5): ptraceにフォールバック
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// メモリにデータを書き込む
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリに書き込みます。
    pub fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr))
            .map_err(|e| anyhow::anyhow!("Failed to seek to address 0x{:x}: {}", addr, e))?;

        file.write_all(data)
            .map_err(|e| anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), addr, e))?;

        Ok(())
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();

        for line in reader.lines() {
            let line = line?;
            // フォーマット: "address perms offset dev inode pathname"
            // 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                continue;
            }

            let addr_parts: Vec<&str> = parts[0].split('-').collect();
            if addr_parts.len() != 2 {
                continue;
            }

            let start = u64::from_str_radix(addr_parts[0], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
            let end = u64::from_str_radix(addr_parts[1], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;

            let perms = parts[1];
            let readable = perms.chars().next() == Some('r');
            let writable = perms.chars().nth(1) == Some('w');
            let executable = perms.chars().nth(2) == Some('x');

            mappings.push(MemoryMapping {
                start,
                end,
                readable,
                writable,
                executable,
            });
        }

        Ok(mappings)
    }

    /// 指定されたアドレスが有効なメモリマッピング内にあるかチェックする
    pub fn is_mapped(&self, addr: u64) -> Result<bool> {
        let mappings = self.get_mappings()?;
        Ok(mappings.iter().any(|m| addr >= m.start && addr < m.end))
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    /// 小さなデータ読み取り（1-8バイト）に適しています。
    pub fn read_via_ptrace(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr as usize + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr)
                .map_err(|e| anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr as usize + offset, e))?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            let copy_size = remaining.min(word_size);

            data.extend_from_slice(&bytes[..copy_size]);
        }

        data.truncate(size);
        Ok(data)
    }

    /// アクセス失敗をタグ付きエラーに変換する
    ///
    /// 可能ならマッピング情報を参照して「未マッピング」を区別します。
    pub(crate) fn access_error(&self, addr: u64, err: anyhow::Error) -> RuntimeError {
        let reason = match self.is_mapped(addr) {
            Ok(false) => format!("address is not mapped ({})", err),
            _ => err.to_string(),
        };
        RuntimeError::Access { addr, reason }
    }
}

/// rindo_runtimeのMemoryAccessトレイトを実装
impl MemoryAccess for Memory {
    fn read(&self, addr: u64, size: usize) -> rindo_runtime::Result<Vec<u8>> {
        self.read_bytes(addr, size)
            .map_err(|e| self.access_error(addr, e))
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> rindo_runtime::Result<()> {
        self.write_bytes(addr, data)
            .map_err(|e| self.access_error(addr, e))
    }
}
