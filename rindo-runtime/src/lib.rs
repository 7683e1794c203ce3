//! Rindo ランタイムメタデータ解析
//!
//! このクレートは、停止中のターゲットプロセス内に存在するオブジェクトランタイムの
//! メタデータ（クラスレコード、メソッドテーブル、タグ付き即値）を解析する機能を提供します。
//! オブジェクトの実行時クラスの解決、継承チェーンの構築、動的ディスパッチを行います。

pub mod access;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod resolver;
pub mod tagged;
pub mod value;

pub use access::{DebugTarget, MemoryAccess, NestedOutcome, RegisterAccess, TargetControl};
pub use descriptor::{
    BuiltinMethod, ClassDescriptor, FieldDescriptor, MethodDescriptor, MethodImpl, Selector,
};
pub use dispatch::dispatch;
pub use error::RuntimeError;
pub use resolver::{TypeResolver, MAX_ANCESTOR_DEPTH};
pub use tagged::TaggedValue;
pub use value::{DeclaredType, TargetValue};

/// ランタイム解析の結果型
pub type Result<T> = std::result::Result<T, error::RuntimeError>;
