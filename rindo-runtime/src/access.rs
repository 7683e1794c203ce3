//! ターゲットプロセスへの抽象アクセスインターフェース
//!
//! デバッガバックエンド（ptrace実装やテスト用モック）が実装するトレイト群です。
//! すべての操作はプロセスが停止状態であることを前提とします（呼び出し側で保証）。

use crate::error::RuntimeError;
use crate::Result;

/// ターゲットメモリへの読み書き
///
/// キャッシュは行わず、毎回の読み取りが現在のターゲットメモリを反映します。
pub trait MemoryAccess {
    /// メモリからデータを読み取る
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>>;

    /// メモリにデータを書き込む
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    /// u64値を読み取る（リトルエンディアン）
    fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| RuntimeError::Access {
            addr,
            reason: format!("short read: {} bytes (expected 8)", bytes.len()),
        })?;
        Ok(u64::from_le_bytes(array))
    }

    /// u32値を読み取る（リトルエンディアン）
    fn read_u32(&self, addr: u64) -> Result<u32> {
        let bytes = self.read(addr, 4)?;
        let array: [u8; 4] = bytes.as_slice().try_into().map_err(|_| RuntimeError::Access {
            addr,
            reason: format!("short read: {} bytes (expected 4)", bytes.len()),
        })?;
        Ok(u32::from_le_bytes(array))
    }

    /// u8値を読み取る
    fn read_u8(&self, addr: u64) -> Result<u8> {
        let bytes = self.read(addr, 1)?;
        bytes.first().copied().ok_or(RuntimeError::Access {
            addr,
            reason: "short read: 0 bytes (expected 1)".to_string(),
        })
    }

    /// u64値を書き込む（リトルエンディアン）
    fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// NUL終端文字列を読み取る
    ///
    /// `max_len`バイトまで読み進めてもNULが見つからない場合はそこで打ち切ります。
    fn read_cstr(&self, addr: u64, max_len: usize) -> Result<String> {
        const CHUNK: usize = 32;
        let mut collected = Vec::new();

        while collected.len() < max_len {
            let want = CHUNK.min(max_len - collected.len());
            let chunk = self.read(addr + collected.len() as u64, want)?;
            match chunk.iter().position(|&b| b == 0) {
                Some(pos) => {
                    collected.extend_from_slice(&chunk[..pos]);
                    return Ok(String::from_utf8_lossy(&collected).into_owned());
                }
                None => collected.extend_from_slice(&chunk),
            }
        }

        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}

/// レジスタファイルへのアクセス
pub trait RegisterAccess {
    /// 名前でレジスタを読み取る
    fn read_register(&self, name: &str) -> Result<u64>;

    /// 名前でレジスタに書き込む
    fn write_register(&mut self, name: &str, value: u64) -> Result<()>;
}

/// ネスト呼び出しの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedOutcome {
    /// 呼び出しが戻り値とともに完了した
    Returned(u64),
    /// 割り込みまたはタイムアウトにより中断され、レジスタは呼び出し前の状態に復元済み
    Cancelled,
}

/// ターゲットプロセスの実行制御
///
/// ネスト呼び出しは「ターゲットを一時的に再開し、呼び出しが戻るまでブロックして
/// 再度停止する」単一の同期操作として表現します。中断時はレジスタ・スタックを
/// 呼び出し前の状態に復元してから`Cancelled`を返す責務を実装側が負います。
pub trait TargetControl {
    /// プロセスが停止状態かどうか
    fn is_stopped(&self) -> bool;

    /// 停止中のターゲット内で関数を呼び出し、戻るまでブロックする
    fn resume_nested_call(&mut self, entry: u64, args: &[u64]) -> Result<NestedOutcome>;

    /// プロセスの実行を再開する
    fn continue_process(&mut self) -> Result<()>;

    /// ターゲット内にメモリを確保する（式評価時のオブジェクト構築用）
    fn allocate(&mut self, size: usize) -> Result<u64>;
}

/// デバッガバックエンドの完全なインターフェース
pub trait DebugTarget: MemoryAccess + RegisterAccess + TargetControl {}

impl<T: MemoryAccess + RegisterAccess + TargetControl> DebugTarget for T {}
