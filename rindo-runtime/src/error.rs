//! ランタイム解析のエラー型

/// ランタイムメタデータ解析・ディスパッチのエラー
///
/// すべてのエラーは発生箇所を識別できるタグ付きの値として呼び出し元に伝播します。
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// ターゲットメモリへのアクセス失敗（未マッピング、保護違反など）
    #[error("memory access failed at 0x{addr:x}: {reason}")]
    Access { addr: u64, reason: String },

    /// レジスタファイルへのアクセス失敗
    #[error("register access failed: {0}")]
    Register(String),

    /// プロセスが停止状態にない
    #[error("process is not stopped")]
    NotStopped,

    /// ランタイムメタデータの解決失敗（循環チェーン、壊れたレコードなど）
    #[error("type resolution failed: {0}")]
    TypeResolution(String),

    /// 値がオブジェクト参照ではない
    #[error("0x{0:x} is not an object reference")]
    NotAnObject(u64),

    /// 継承チェーン上にセレクタが見つからない
    #[error("selector '{0}' not found on '{1}' or its ancestors")]
    SelectorNotFound(String, String),

    /// 名前に対応するクラスがクラステーブルに存在しない
    #[error("no runtime type named '{0}'")]
    TypeNotFound(String),

    /// ネスト呼び出しがユーザ割り込みまたはタイムアウトで中断された
    #[error("nested call was cancelled")]
    Cancelled,

    /// ネスト呼び出しが正常に完了しなかった
    #[error("nested call failed: {0}")]
    CallFailed(String),
}
