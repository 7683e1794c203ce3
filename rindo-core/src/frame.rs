//! スタックフレーム変数の解決
//!
//! 変数名から格納位置への解決は外部コラボレータ（デバッグ情報サービス）の
//! 責務であり、このクレートはトレイト境界のみを定義します。

use rindo_runtime::DeclaredType;

/// 変数の格納位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableLocation {
    /// ターゲットメモリ上のアドレス
    Address(u64),
    /// レジスタ名
    Register(String),
}

/// フレーム内の変数束縛
#[derive(Debug, Clone)]
pub struct VariableBinding {
    pub location: VariableLocation,
    /// ソース上の宣言型
    pub ty: DeclaredType,
}

/// 現在のフレームで変数名を格納位置に解決するサービス
pub trait FrameResolver {
    fn resolve_variable(&self, name: &str) -> Option<VariableBinding>;
}

/// 変数を一切解決しないフレーム
///
/// デバッグ情報が利用できない場合に使用します。クラス名・リテラル・
/// 結果スロットを使う式は変数束縛なしでも評価できます。
pub struct EmptyFrames;

impl FrameResolver for EmptyFrames {
    fn resolve_variable(&self, _name: &str) -> Option<VariableBinding> {
        None
    }
}
