//! 評価結果の整形
//!
//! 2つのモードを提供します:
//! - サマリ: `(型) $N = 値`。オブジェクト値はアドレスを固定幅16進で表示し、
//!   実行時クラスが記述メソッドを持つ場合は追加でディスパッチして人間可読の
//!   説明を添えます。この二次ディスパッチの失敗は評価全体を失敗させず、
//!   アドレスのみの表示へ退化します。
//! - ディープダンプ: 値をデリファレンスして継承チェーン全体を歩き、
//!   最派生クラスからルートまで、各レベルのフィールドを再帰的に表示します。
//!   レベルの出力が混ざることはありません。

use crate::Result;
use rindo_runtime::tagged::{self, TaggedValue};
use rindo_runtime::{dispatch, DebugTarget, DeclaredType, Selector, TargetValue, TypeResolver};
use std::collections::HashSet;

/// ネストしたオブジェクトフィールドの展開上限
const MAX_DUMP_DEPTH: usize = 4;

/// 記述メソッドのセレクタ
const DESCRIPTION_SELECTOR: &str = "description";

/// サマリ行 `(型) $N = 値` を生成する
///
/// この関数は失敗しません。二次的な解決・ディスパッチの失敗はすべて
/// より素朴な表示へ退化します。
pub fn summary(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    slot: usize,
    value: &TargetValue,
    prefer_dynamic: bool,
) -> String {
    let ty = dynamic_type_name(target, resolver, value, prefer_dynamic)
        .unwrap_or_else(|| value.declared.to_string());
    let rendered = render_value(target, resolver, value);
    format!("({}) ${} = {}", ty, slot, rendered)
}

/// 継承チェーン全体を展開するディープダンプを生成する
///
/// オブジェクトでない値はサマリ表示へ退化します。
pub fn dump(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    slot: usize,
    value: &TargetValue,
) -> Result<String> {
    let word = value.word();
    if !value.declared.is_object_like() || word == 0 {
        return Ok(summary(target, resolver, slot, value, false));
    }

    let class = match resolver.resolve_object(&*target, word) {
        Ok(class) => class,
        // オブジェクトとして解決できない値はスカラとして扱う
        Err(rindo_runtime::RuntimeError::NotAnObject(_)) => {
            return Ok(summary(target, resolver, slot, value, false));
        }
        Err(e) => return Err(e.into()),
    };

    let mut out = format!(
        "({} *) ${} = {}\n",
        class.name,
        slot,
        render_value(target, resolver, value)
    );

    let mut visited = HashSet::new();
    visited.insert(word);
    dump_levels(target, resolver, word, 0, 0, &mut visited, &mut out)?;
    Ok(out)
}

/// 1オブジェクトの全継承レベルを最派生からルートの順で出力する
fn dump_levels(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    word: u64,
    indent: usize,
    depth: usize,
    visited: &mut HashSet<u64>,
    out: &mut String,
) -> Result<()> {
    let class = resolver.resolve_object(&*target, word)?;
    let chain = resolver.ancestor_chain(&*target, class)?;
    let pad = "  ".repeat(indent);

    for level in &chain {
        out.push_str(&format!("{}({}) {{\n", pad, level.name));
        for field in &level.fields {
            let bytes = target.read(word + field.offset, field.ty.byte_size())?;
            let field_value = TargetValue {
                declared: field.ty.clone(),
                runtime_class: None,
                bytes,
                valid: true,
            };

            if field.ty.is_object_like() {
                dump_object_field(
                    target,
                    resolver,
                    &field_value,
                    &field.name,
                    indent,
                    depth,
                    visited,
                    out,
                )?;
            } else {
                out.push_str(&format!(
                    "{}  {} = {}\n",
                    pad,
                    field.name,
                    render_scalar(&field_value)
                ));
            }
        }
        out.push_str(&format!("{}}}\n", pad));
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn dump_object_field(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    value: &TargetValue,
    name: &str,
    indent: usize,
    depth: usize,
    visited: &mut HashSet<u64>,
    out: &mut String,
) -> Result<()> {
    let pad = "  ".repeat(indent);
    let word = value.word();

    if tagged::is_tagged(word) {
        let rendered = match tagged::decode(word) {
            Ok(TaggedValue::Int(i)) => i.to_string(),
            Ok(TaggedValue::ShortString(s)) => format!("@\"{}\"", s),
            Err(_) => format!("0x{:016x}", word),
        };
        out.push_str(&format!("{}  {} = {}\n", pad, name, rendered));
        return Ok(());
    }

    out.push_str(&format!("{}  {} = 0x{:016x}\n", pad, name, word));
    if word != 0 && depth + 1 < MAX_DUMP_DEPTH && visited.insert(word) {
        dump_levels(target, resolver, word, indent + 2, depth + 1, visited, out)?;
    }
    Ok(())
}

/// 動的型優先モードでの型名（解決できない場合はNone）
fn dynamic_type_name(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    value: &TargetValue,
    prefer_dynamic: bool,
) -> Option<String> {
    if !prefer_dynamic || !value.declared.is_object_like() {
        return None;
    }
    let class = resolver.resolve_object(&*target, value.word()).ok()?;
    Some(format!("{} *", class.name))
}

fn render_value(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    value: &TargetValue,
) -> String {
    match &value.declared {
        DeclaredType::Id | DeclaredType::Object(_) => {
            let word = value.word();
            if tagged::is_tagged(word) {
                return match tagged::decode(word) {
                    Ok(TaggedValue::Int(i)) => i.to_string(),
                    Ok(TaggedValue::ShortString(s)) => format!("@\"{}\"", s),
                    Err(_) => format!("0x{:016x}", word),
                };
            }
            match describe_object(target, resolver, value) {
                Some(text) => format!("0x{:016x} @\"{}\"", word, text),
                None => format!("0x{:016x}", word),
            }
        }
        DeclaredType::Class(_) | DeclaredType::Pointer(_) => {
            format!("0x{:016x}", value.word())
        }
        _ => render_scalar(value),
    }
}

/// オブジェクトの記述メソッドをディスパッチして説明文字列を得る
///
/// チェーン上に記述メソッドが存在しない場合や、ディスパッチ・デコードの
/// いかなる失敗もNoneとし、呼び出し側をアドレスのみの表示へ退化させます。
fn describe_object(
    target: &mut dyn DebugTarget,
    resolver: &mut TypeResolver,
    value: &TargetValue,
) -> Option<String> {
    let selector = Selector::new(DESCRIPTION_SELECTOR, 0);

    let class = resolver.resolve_object(&*target, value.word()).ok()?;
    let chain = resolver.ancestor_chain(&*target, class).ok()?;
    if !chain.iter().any(|c| c.find_method(&selector).is_some()) {
        return None;
    }

    let result = dispatch(target, resolver, value, &selector, &[]).ok()?;
    match tagged::decode(result.word()) {
        Ok(TaggedValue::ShortString(s)) => Some(s),
        _ => None,
    }
}

/// スカラ値の表示
fn render_scalar(value: &TargetValue) -> String {
    match &value.declared {
        DeclaredType::Void => "<void>".to_string(),
        DeclaredType::UnsignedInt => (value.word() as u32).to_string(),
        DeclaredType::Bool => (value.word() & 0xff != 0).to_string(),
        DeclaredType::Char => {
            let b = value.word() as u8;
            if b.is_ascii_graphic() || b == b' ' {
                format!("'{}'", b as char)
            } else {
                value.as_i64().to_string()
            }
        }
        _ => value.as_i64().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scalar() {
        let v = TargetValue::from_word(DeclaredType::Int, 0xffff_ffff);
        assert_eq!(render_scalar(&v), "-1");

        let v = TargetValue::from_word(DeclaredType::UnsignedInt, 0xffff_ffff);
        assert_eq!(render_scalar(&v), "4294967295");

        let v = TargetValue::from_word(DeclaredType::Char, b'A' as u64);
        assert_eq!(render_scalar(&v), "'A'");

        let v = TargetValue::from_word(DeclaredType::Char, 1);
        assert_eq!(render_scalar(&v), "1");

        let v = TargetValue::from_word(DeclaredType::Bool, 1);
        assert_eq!(render_scalar(&v), "true");
    }
}
