//! 式の評価
//!
//! ASTをポストオーダーで評価し、ノード種別ごとにちょうど1つの評価規則を
//! 適用します。評価順序は厳密に左から右（レシーバが引数より先）で、
//! 完了済みのサブ式がターゲットメモリへ行った書き込みは失敗時にも
//! ロールバックされません（ターゲット内で物理的にコードを実行する以上、
//! 起きた書き込みは起きたままです）。

use crate::ast::Expr;
use crate::errors::EvalError;
use crate::frame::{FrameResolver, VariableBinding, VariableLocation};
use crate::Result;
use rindo_runtime::tagged;
use rindo_runtime::{
    dispatch, DebugTarget, DeclaredType, FieldDescriptor, RuntimeError, Selector, TargetValue,
    TypeResolver,
};
use tracing::debug;

/// 長い文字列リテラルの箱詰めに使うクラス名
const STRING_CLASS: &str = "String";

/// 箱詰め文字列オブジェクトのヘッダサイズ（isa + 長さ）
const BOXED_STRING_HEADER: usize = 16;

/// 代入の格納先
enum Place {
    Memory { addr: u64, ty: DeclaredType },
    Register { name: String, ty: DeclaredType },
}

/// 1回の評価を駆動する評価器
pub struct Evaluator<'a> {
    target: &'a mut dyn DebugTarget,
    resolver: &'a mut TypeResolver,
    frames: &'a dyn FrameResolver,
    history: &'a [Option<TargetValue>],
}

impl<'a> Evaluator<'a> {
    pub fn new(
        target: &'a mut dyn DebugTarget,
        resolver: &'a mut TypeResolver,
        frames: &'a dyn FrameResolver,
        history: &'a [Option<TargetValue>],
    ) -> Self {
        Self {
            target,
            resolver,
            frames,
            history,
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<TargetValue> {
        match expr {
            Expr::IntLiteral(v) => Ok(TargetValue::from_word(DeclaredType::Int, *v as u64)),
            Expr::StringLiteral(s) => self.eval_string_literal(s),
            Expr::CStringLiteral(s) => self.eval_cstring_literal(s),
            Expr::Identifier(name) => self.eval_identifier(name),
            Expr::ResultSlot(n) => self.eval_result_slot(*n),
            Expr::Member(obj, name) => {
                let value = self.eval(obj)?;
                self.eval_member(&value, name)
            }
            Expr::Message {
                receiver,
                selector,
                args,
            } => {
                // レシーバを引数より先に評価する
                let receiver = self.eval(receiver)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg)?);
                }
                let selector = Selector::new(selector.clone(), arg_values.len());
                dispatch(
                    &mut *self.target,
                    &mut *self.resolver,
                    &receiver,
                    &selector,
                    &arg_values,
                )
                .map_err(EvalError::Runtime)
            }
            Expr::Cast(ty, e) => {
                let value = self.eval(e)?;
                Ok(TargetValue::from_word(ty.clone(), value.word()))
            }
            Expr::Deref(e) => {
                let value = self.eval(e)?;
                self.eval_deref(&value)
            }
            Expr::Assign(lhs, rhs) => {
                let place = self.eval_place(lhs)?;
                let value = self.eval(rhs)?;
                self.store(&place, &value)
            }
        }
    }

    /// オブジェクト文字列リテラルの実体化
    ///
    /// 短い文字列はタグ付き即値としてインライン化し、収まらない場合は
    /// ターゲット内に新しい文字列オブジェクトを構築します。
    fn eval_string_literal(&mut self, s: &str) -> Result<TargetValue> {
        if let Some(word) = tagged::encode_short_string(s) {
            return Ok(TargetValue::from_word(DeclaredType::Id, word));
        }
        self.build_boxed_string(s)
    }

    /// ターゲット内に `[isa][len][bytes NUL]` 形式の文字列オブジェクトを構築する
    fn build_boxed_string(&mut self, s: &str) -> Result<TargetValue> {
        let class = self
            .resolver
            .lookup_by_name(&*self.target, STRING_CLASS)?;

        let addr = self
            .target
            .allocate(BOXED_STRING_HEADER + s.len() + 1)?;
        self.target.write_u64(addr, class.address)?;
        self.target.write_u64(addr + 8, s.len() as u64)?;

        let mut data = s.as_bytes().to_vec();
        data.push(0);
        self.target.write(addr + BOXED_STRING_HEADER as u64, &data)?;

        debug!("boxed string literal ({} bytes) at 0x{:x}", s.len(), addr);
        Ok(TargetValue::from_word(
            DeclaredType::Object(STRING_CLASS.to_string()),
            addr,
        ))
    }

    /// C文字列リテラルをターゲット内にNUL終端で配置する
    fn eval_cstring_literal(&mut self, s: &str) -> Result<TargetValue> {
        let addr = self.target.allocate(s.len() + 1)?;
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        self.target.write(addr, &data)?;
        Ok(TargetValue::from_word(
            DeclaredType::Pointer(Box::new(DeclaredType::Char)),
            addr,
        ))
    }

    /// 識別子の解決: フレーム変数が優先、なければクラス名として解決
    fn eval_identifier(&mut self, name: &str) -> Result<TargetValue> {
        if let Some(binding) = self.frames.resolve_variable(name) {
            return self.load_binding(&binding);
        }

        match self.resolver.lookup_by_name(&*self.target, name) {
            Ok(desc) => Ok(TargetValue::from_word(
                DeclaredType::Class(name.to_string()),
                desc.address,
            )),
            Err(RuntimeError::TypeNotFound(_)) => Err(EvalError::UnboundName(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn load_binding(&mut self, binding: &VariableBinding) -> Result<TargetValue> {
        match &binding.location {
            VariableLocation::Address(addr) => {
                let bytes = self.target.read(*addr, binding.ty.byte_size())?;
                Ok(TargetValue {
                    declared: binding.ty.clone(),
                    runtime_class: None,
                    bytes,
                    valid: true,
                })
            }
            VariableLocation::Register(name) => {
                let word = self.target.read_register(name)?;
                Ok(TargetValue::from_word(binding.ty.clone(), word))
            }
        }
    }

    fn eval_result_slot(&self, n: usize) -> Result<TargetValue> {
        match self.history.get(n) {
            Some(Some(value)) if value.valid => Ok(value.clone()),
            Some(Some(_)) => Err(EvalError::StaleValue(n)),
            _ => Err(EvalError::UnboundName(format!("${}", n))),
        }
    }

    /// メンバアクセス: 継承チェーン上のフィールドを優先し、
    /// 見つからなければ引数なしセレクタの送信にフォールバックする
    fn eval_member(&mut self, value: &TargetValue, name: &str) -> Result<TargetValue> {
        if let Some(field) = self.find_field_in_chain(value, name)? {
            return self.read_field(value.word(), &field);
        }

        dispatch(
            &mut *self.target,
            &mut *self.resolver,
            value,
            &Selector::new(name, 0),
            &[],
        )
        .map_err(EvalError::Runtime)
    }

    fn find_field_in_chain(
        &mut self,
        value: &TargetValue,
        name: &str,
    ) -> Result<Option<FieldDescriptor>> {
        let class = self.resolver.resolve_object(&*self.target, value.word())?;
        let chain = self.resolver.ancestor_chain(&*self.target, class)?;
        Ok(chain
            .iter()
            .find_map(|c| c.find_field(name))
            .cloned())
    }

    fn read_field(&mut self, object: u64, field: &FieldDescriptor) -> Result<TargetValue> {
        let bytes = self
            .target
            .read(object + field.offset, field.ty.byte_size())?;
        Ok(TargetValue {
            declared: field.ty.clone(),
            runtime_class: None,
            bytes,
            valid: true,
        })
    }

    fn eval_deref(&mut self, value: &TargetValue) -> Result<TargetValue> {
        match value.declared.clone() {
            DeclaredType::Pointer(inner) => {
                if matches!(*inner, DeclaredType::Void) {
                    return Err(EvalError::NotAPointer);
                }
                let bytes = self.target.read(value.word(), inner.byte_size())?;
                Ok(TargetValue {
                    declared: *inner,
                    runtime_class: None,
                    bytes,
                    valid: true,
                })
            }
            // オブジェクト参照のデリファレンスは参照先オブジェクト自身
            DeclaredType::Id | DeclaredType::Object(_) => Ok(value.clone()),
            _ => Err(EvalError::NotAPointer),
        }
    }

    /// 代入の左辺を格納先に解決する
    fn eval_place(&mut self, expr: &Expr) -> Result<Place> {
        match expr {
            Expr::Identifier(name) => {
                let binding = self
                    .frames
                    .resolve_variable(name)
                    .ok_or_else(|| EvalError::UnboundName(name.to_string()))?;
                Ok(match binding.location {
                    VariableLocation::Address(addr) => Place::Memory {
                        addr,
                        ty: binding.ty,
                    },
                    VariableLocation::Register(name) => Place::Register {
                        name,
                        ty: binding.ty,
                    },
                })
            }
            Expr::Member(obj, name) => {
                let value = self.eval(obj)?;
                let field = self
                    .find_field_in_chain(&value, name)?
                    .ok_or(EvalError::NotAssignable)?;
                Ok(Place::Memory {
                    addr: value.word() + field.offset,
                    ty: field.ty,
                })
            }
            Expr::Deref(e) => {
                let value = self.eval(e)?;
                match value.declared.clone() {
                    DeclaredType::Pointer(inner) => Ok(Place::Memory {
                        addr: value.word(),
                        ty: *inner,
                    }),
                    _ => Err(EvalError::NotAPointer),
                }
            }
            _ => Err(EvalError::NotAssignable),
        }
    }

    /// 格納先の型の幅で値を書き込み、格納された値を結果として返す
    fn store(&mut self, place: &Place, value: &TargetValue) -> Result<TargetValue> {
        match place {
            Place::Memory { addr, ty } => {
                let size = ty.byte_size().clamp(1, 8);
                let bytes = value.word().to_le_bytes();
                self.target.write(*addr, &bytes[..size])?;
                Ok(TargetValue {
                    declared: ty.clone(),
                    runtime_class: None,
                    bytes: bytes[..size].to_vec(),
                    valid: true,
                })
            }
            Place::Register { name, ty } => {
                self.target.write_register(name, value.word())?;
                Ok(TargetValue::from_word(ty.clone(), value.word()))
            }
        }
    }
}
