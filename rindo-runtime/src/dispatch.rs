//! 動的メソッドディスパッチ
//!
//! ランタイムのディスパッチ機構と同じ規則でメソッドを解決・起動します。
//! 静的な型情報ではなく、レシーバの実行時クラスからメソッドを検索します。
//! 「メソッド」はターゲットプロセス側に存在するため、ホスト言語の仮想
//! ディスパッチには一切依存せず、継承チェーンの明示的なウォークで解決します。

use crate::access::{DebugTarget, NestedOutcome};
use crate::descriptor::{BuiltinMethod, MethodDescriptor, MethodImpl, Selector};
use crate::error::RuntimeError;
use crate::resolver::TypeResolver;
use crate::tagged::{self, TaggedValue};
use crate::value::{DeclaredType, TargetValue};
use crate::Result;
use tracing::debug;

/// SysV ABIでレジスタ渡しできる引数の上限（レシーバ＋セレクタ識別子を含む）
const MAX_CALL_ARGS: usize = 6;

/// レシーバのメソッドをターゲットプロセス内で起動する
///
/// 解決順序: レシーバの実行時クラスのメソッドテーブルを検索し、見つからなければ
/// スーパークラスへ遡る（最派生優先、最初の一致で打ち切り）。チェーン上のどの
/// クラスもセレクタを定義していなければ`SelectorNotFound`。
///
/// 型なし参照（`id`）経由のメッセージ送信は宣言型を完全に無視してライブ
/// オブジェクトから実行時クラスを解決するため、静的型付き参照経由と
/// 同一の結果になります。型名をレシーバとした送信（クラスメソッド）のみ、
/// そのクラス自身のテーブルを直接検索します。
pub fn dispatch<T: DebugTarget + ?Sized>(
    target: &mut T,
    resolver: &mut TypeResolver,
    receiver: &TargetValue,
    selector: &Selector,
    args: &[TargetValue],
) -> Result<TargetValue> {
    if !target.is_stopped() {
        return Err(RuntimeError::NotStopped);
    }
    if selector.arity != args.len() {
        return Err(RuntimeError::CallFailed(format!(
            "selector '{}' takes {} arguments, got {}",
            selector, selector.arity, args.len()
        )));
    }

    let start = match &receiver.declared {
        DeclaredType::Class(name) => resolver.lookup_by_name(&*target, name)?,
        _ => resolver.resolve_object(&*target, receiver.word())?,
    };

    let chain = resolver.ancestor_chain(&*target, start)?;
    let receiver_class = chain
        .first()
        .map(|c| c.name.clone())
        .unwrap_or_default();

    let method = chain
        .iter()
        .find_map(|class| class.find_method(selector))
        .cloned()
        .ok_or_else(|| {
            RuntimeError::SelectorNotFound(selector.name.clone(), receiver_class.clone())
        })?;

    debug!(
        "dispatching '{}' on {} (imp: {:?})",
        selector, receiver_class, method.imp
    );

    match method.imp {
        MethodImpl::Builtin(builtin) => run_builtin(builtin, receiver),
        MethodImpl::Target(entry) => call_in_target(target, &method, entry, receiver, args),
    }
}

/// ターゲットプロセス内の実装アドレスへ制御を移す
///
/// 呼び出し規約: レシーバポインタ、セレクタ識別子、引数値の順でレジスタ渡し。
/// ターゲットに対するネストした「実行して再停止」操作であり、戻るまで
/// 評価スレッドをブロックします。
fn call_in_target<T: DebugTarget + ?Sized>(
    target: &mut T,
    method: &MethodDescriptor,
    entry: u64,
    receiver: &TargetValue,
    args: &[TargetValue],
) -> Result<TargetValue> {
    let mut words = Vec::with_capacity(args.len() + 2);
    words.push(receiver.word());
    words.push(method.selector_addr);
    for arg in args {
        words.push(arg.word());
    }

    if words.len() > MAX_CALL_ARGS {
        return Err(RuntimeError::CallFailed(format!(
            "too many arguments for register-based call ({} > {})",
            words.len(),
            MAX_CALL_ARGS
        )));
    }

    match target.resume_nested_call(entry, &words)? {
        NestedOutcome::Returned(raw) => {
            // メソッドシグネチャの戻り型が結果値の幅を決める
            Ok(TargetValue::from_word(method.return_type.clone(), raw))
        }
        NestedOutcome::Cancelled => Err(RuntimeError::Cancelled),
    }
}

/// タグ付き即値への組み込みメソッドをエンジン側で実行する
fn run_builtin(builtin: BuiltinMethod, receiver: &TargetValue) -> Result<TargetValue> {
    match builtin {
        BuiltinMethod::StringLength => match tagged::decode(receiver.word())? {
            TaggedValue::ShortString(s) => {
                Ok(TargetValue::from_word(DeclaredType::Int, s.len() as u64))
            }
            TaggedValue::Int(_) => Err(RuntimeError::TypeResolution(
                "tagged integer has no string length".to_string(),
            )),
        },
        BuiltinMethod::IntValue => match tagged::decode(receiver.word())? {
            TaggedValue::Int(v) => Ok(TargetValue::from_word(DeclaredType::Int, v as u64)),
            TaggedValue::ShortString(_) => Err(RuntimeError::TypeResolution(
                "tagged string has no integer value".to_string(),
            )),
        },
        BuiltinMethod::Describe => Ok(TargetValue::from_word(DeclaredType::Id, receiver.word())),
    }
}
