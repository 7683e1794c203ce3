//! Rindo ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のプロセスを制御するための低レベル機能を提供します。
//! ptrace、レジスタアクセス、メモリアクセス、ターゲット内へのネスト関数呼び出しの
//! 注入などを行います。

pub mod memory;
pub mod process;
pub mod registers;
pub mod target;

pub use memory::{Memory, MemoryMapping};
pub use process::{Process, StopReason};
pub use registers::Registers;
pub use target::Target;

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
