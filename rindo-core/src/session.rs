//! 評価セッション
//!
//! 結果スロット履歴（`$N`）、再入ガード、stopスコープのキャッシュ無効化を
//! 管理し、パース→束縛→評価→整形のパイプラインを駆動します。
//! スロットカウンタはセッション生成時に0から始まり、stopをまたいで持続します。

use crate::errors::{EvalError, EvalStage};
use crate::eval::Evaluator;
use crate::format;
use crate::frame::FrameResolver;
use crate::parse;
use rindo_runtime::{ClassDescriptor, DebugTarget, TargetValue, TypeResolver};
use std::rc::Rc;
use tracing::debug;

/// 評価オプション
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {
    /// ディープダンプ（継承チェーン全体のフィールド展開）を行うか
    pub show_types: bool,
    /// サマリの型表示を宣言型ではなく実行時型にするか
    pub prefer_dynamic: bool,
}

/// 評価に成功した値と整形済みの表示文字列
#[derive(Debug, Clone)]
pub struct EvaluatedValue {
    pub value: TargetValue,
    pub display: String,
}

/// 失敗したステージ付きのエラー
#[derive(Debug)]
pub struct EvalFailure {
    pub stage: EvalStage,
    pub error: EvalError,
}

/// 評価器の境界を越えて返される1回分の評価結果
///
/// 失敗した評価もスロット番号を保持します（スロットは評価の受理時点で
/// 割り当てられるため）。
#[derive(Debug)]
pub struct EvaluationResult {
    pub slot: usize,
    pub outcome: std::result::Result<EvaluatedValue, EvalFailure>,
}

/// 1つのデバッグ対象に対する評価セッション
pub struct Session {
    target: Box<dyn DebugTarget>,
    resolver: TypeResolver,
    frames: Box<dyn FrameResolver>,
    history: Vec<Option<TargetValue>>,
    in_flight: bool,
}

impl Session {
    /// セッションを作成する
    ///
    /// `class_table` はターゲット内のクラステーブル（`[count][ptr...]`）の
    /// アドレスです。
    pub fn new(
        target: Box<dyn DebugTarget>,
        frames: Box<dyn FrameResolver>,
        class_table: u64,
    ) -> Self {
        Self {
            target,
            resolver: TypeResolver::new(class_table),
            frames,
            history: Vec::new(),
            in_flight: false,
        }
    }

    /// 式を評価する
    ///
    /// スロットは評価の受理時点で割り当てられるため、その後どのステージで
    /// 失敗してもカウンタは単調増加します。`Busy` による拒絶だけは評価が
    /// 受理されていないため、スロットを消費しません。
    pub fn evaluate(
        &mut self,
        text: &str,
        options: &EvalOptions,
    ) -> std::result::Result<EvaluationResult, EvalError> {
        if self.in_flight {
            return Err(EvalError::Busy);
        }
        self.in_flight = true;

        let slot = self.history.len();
        self.history.push(None);
        debug!("evaluating '{}' into ${}", text, slot);

        let outcome = self.run(text, options, slot);
        if let Ok(evaluated) = &outcome {
            let mut stored = evaluated.value.clone();
            // 格納するスロットには実行時クラスを解決して添えておく
            if stored.declared.is_object_like() && stored.runtime_class.is_none() {
                stored.runtime_class = self
                    .resolver
                    .resolve_object(&*self.target, stored.word())
                    .ok();
            }
            self.history[slot] = Some(stored);
        }

        self.in_flight = false;
        Ok(EvaluationResult { slot, outcome })
    }

    fn run(
        &mut self,
        text: &str,
        options: &EvalOptions,
        slot: usize,
    ) -> std::result::Result<EvaluatedValue, EvalFailure> {
        let expr = parse::parse(text).map_err(|error| EvalFailure {
            stage: EvalStage::Parse,
            error,
        })?;

        let value = Evaluator::new(
            &mut *self.target,
            &mut self.resolver,
            &*self.frames,
            &self.history,
        )
        .eval(&expr)
        .map_err(|error| EvalFailure {
            stage: stage_of(&error),
            error,
        })?;

        let display = if options.show_types {
            format::dump(&mut *self.target, &mut self.resolver, slot, &value).map_err(
                |error| EvalFailure {
                    stage: EvalStage::Format,
                    error,
                },
            )?
        } else {
            format::summary(
                &mut *self.target,
                &mut self.resolver,
                slot,
                &value,
                options.prefer_dynamic,
            )
        };

        Ok(EvaluatedValue { value, display })
    }

    /// プロセスを再開する
    ///
    /// 記述子キャッシュを破棄し、格納済みの値をすべて無効化します。
    /// 再開後はアドレスもクラスレイアウトも変わっている可能性があるためです。
    pub fn continue_process(&mut self) -> rindo_runtime::Result<()> {
        self.resolver.invalidate();
        for value in self.history.iter_mut().flatten() {
            value.invalidate();
        }
        self.target.continue_process()
    }

    /// 名前で型を検索する
    pub fn lookup_type(&mut self, name: &str) -> rindo_runtime::Result<Rc<ClassDescriptor>> {
        self.resolver.lookup_by_name(&*self.target, name)
    }
}

fn stage_of(error: &EvalError) -> EvalStage {
    match error {
        EvalError::Syntax(_) => EvalStage::Parse,
        EvalError::UnboundName(_) | EvalError::StaleValue(_) => EvalStage::Bind,
        _ => EvalStage::Evaluate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EmptyFrames;
    use rindo_runtime::{
        MemoryAccess, NestedOutcome, RegisterAccess, RuntimeError, TargetControl,
    };

    /// あらゆるターゲットアクセスを拒否するスタブ
    struct NullTarget;

    impl MemoryAccess for NullTarget {
        fn read(&self, addr: u64, _size: usize) -> rindo_runtime::Result<Vec<u8>> {
            Err(RuntimeError::Access {
                addr,
                reason: "no target".to_string(),
            })
        }

        fn write(&mut self, addr: u64, _data: &[u8]) -> rindo_runtime::Result<()> {
            Err(RuntimeError::Access {
                addr,
                reason: "no target".to_string(),
            })
        }
    }

    impl RegisterAccess for NullTarget {
        fn read_register(&self, name: &str) -> rindo_runtime::Result<u64> {
            Err(RuntimeError::Register(name.to_string()))
        }

        fn write_register(&mut self, name: &str, _value: u64) -> rindo_runtime::Result<()> {
            Err(RuntimeError::Register(name.to_string()))
        }
    }

    impl TargetControl for NullTarget {
        fn is_stopped(&self) -> bool {
            true
        }

        fn resume_nested_call(
            &mut self,
            _entry: u64,
            _args: &[u64],
        ) -> rindo_runtime::Result<NestedOutcome> {
            Err(RuntimeError::CallFailed("no target".to_string()))
        }

        fn continue_process(&mut self) -> rindo_runtime::Result<()> {
            Ok(())
        }

        fn allocate(&mut self, _size: usize) -> rindo_runtime::Result<u64> {
            Err(RuntimeError::CallFailed("no target".to_string()))
        }
    }

    fn null_session() -> Session {
        Session::new(Box::new(NullTarget), Box::new(EmptyFrames), 0)
    }

    #[test]
    fn test_busy_rejection_consumes_no_slot() {
        let mut session = null_session();
        session.in_flight = true;

        let result = session.evaluate("1", &EvalOptions::default());
        assert!(matches!(result, Err(EvalError::Busy)));
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_failed_evaluation_still_consumes_a_slot() {
        let mut session = null_session();

        let first = session.evaluate("[str", &EvalOptions::default()).unwrap();
        assert_eq!(first.slot, 0);
        let failure = first.outcome.unwrap_err();
        assert_eq!(failure.stage, EvalStage::Parse);
        assert!(matches!(failure.error, EvalError::Syntax(_)));

        // 整数リテラルはターゲットアクセスなしで評価できる
        let second = session.evaluate("42", &EvalOptions::default()).unwrap();
        assert_eq!(second.slot, 1);
        let evaluated = second.outcome.unwrap();
        assert_eq!(evaluated.display, "(int) $1 = 42");
    }

    #[test]
    fn test_failed_slot_is_unresolvable() {
        let mut session = null_session();
        session.evaluate("[str", &EvalOptions::default()).unwrap();

        let result = session.evaluate("$0", &EvalOptions::default()).unwrap();
        let failure = result.outcome.unwrap_err();
        assert_eq!(failure.stage, EvalStage::Bind);
        assert!(matches!(failure.error, EvalError::UnboundName(_)));
    }
}
