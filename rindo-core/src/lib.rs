//! Rindo 式評価エンジン
//!
//! 停止中のターゲットプロセスに対してソースレベルの式を評価します。
//! 制限付き文法（リテラル・識別子・キャスト・メッセージ送信・メンバアクセス・代入）を
//! パースし、実行時型の解決と動的ディスパッチを駆動して型付きの結果を生成します。
//! 結果スロット履歴（`$N`）と停止スコープのキャッシュ無効化はセッションが管理します。

pub mod ast;
pub mod errors;
pub mod eval;
pub mod format;
pub mod frame;
pub mod parse;
pub mod session;

pub use errors::{EvalError, EvalStage};
pub use frame::{EmptyFrames, FrameResolver, VariableBinding, VariableLocation};
pub use session::{EvalFailure, EvalOptions, EvaluatedValue, EvaluationResult, Session};

/// 式評価の結果型
pub type Result<T> = std::result::Result<T, errors::EvalError>;
