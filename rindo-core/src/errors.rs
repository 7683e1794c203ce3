//! 評価エラーの分類

use rindo_runtime::RuntimeError;
use thiserror::Error;

/// 式評価のエラー
///
/// すべての失敗は発生したステージ（[`EvalStage`]）とともに呼び出し側へ
/// 伝播します。自動的なリトライは行いません。
#[derive(Debug, Error)]
pub enum EvalError {
    /// 式が文法に合わない（ターゲット状態は一切変更されない）
    #[error("syntax error: {0}")]
    Syntax(String),

    /// 識別子をフレーム変数にもクラス名にも解決できない
    #[error("unbound name '{0}'")]
    UnboundName(String),

    /// 代入の左辺が格納先を持たない
    #[error("expression is not assignable")]
    NotAssignable,

    /// デリファレンス対象がポインタでもオブジェクト参照でもない
    #[error("value is not a pointer")]
    NotAPointer,

    /// プロセス再開をまたいだ結果スロットの参照
    #[error("result slot ${0} is stale (the process has resumed since it was stored)")]
    StaleValue(usize),

    /// 別の評価が進行中
    #[error("another evaluation is in flight")]
    Busy,

    /// ランタイム層（型解決・ディスパッチ・メモリアクセス）のエラー
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// 失敗が発生した評価ステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStage {
    Parse,
    Bind,
    Evaluate,
    Format,
}

impl std::fmt::Display for EvalStage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            EvalStage::Parse => "parse",
            EvalStage::Bind => "bind",
            EvalStage::Evaluate => "evaluate",
            EvalStage::Format => "format",
        };
        write!(f, "{}", name)
    }
}
