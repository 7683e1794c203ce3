//! 式の抽象構文木
//!
//! ASTは1回の評価の間だけ評価器が所有し、結果の生成後に破棄されます。

use rindo_runtime::DeclaredType;

/// 式ノード
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// 整数リテラル
    IntLiteral(i64),
    /// オブジェクト文字列リテラル（`@"..."`）
    StringLiteral(String),
    /// C文字列リテラル（`"..."`）
    CStringLiteral(String),
    /// 識別子（フレーム変数またはクラス名）
    Identifier(String),
    /// 結果スロット参照（`$N`）
    ResultSlot(usize),
    /// メンバアクセス（`expr.name`）
    Member(Box<Expr>, String),
    /// メッセージ送信（`[receiver selector: arg ...]`）
    Message {
        receiver: Box<Expr>,
        /// コロンを含む完全なセレクタ名（例: `setX:y:`）
        selector: String,
        args: Vec<Expr>,
    },
    /// 型キャスト（`(Type)expr`）
    Cast(DeclaredType, Box<Expr>),
    /// デリファレンス（`*expr`）
    Deref(Box<Expr>),
    /// 代入（`lvalue = expr`）
    Assign(Box<Expr>, Box<Expr>),
}
