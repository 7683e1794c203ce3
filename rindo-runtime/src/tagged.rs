//! タグ付き即値のエンコーディング
//!
//! 一部のランタイムは小さな整数や短い文字列をヒープオブジェクトではなく、
//! ポインタサイズのスロットにインライン格納します。rindoの対象ランタイムでは
//! ビット0が立っているワードがタグ付き即値です。
//!
//! ```text
//! bit 0      : タグマーク（1=即値）
//! bits 1-3   : 種別（0=整数, 1=短文字列）
//! 整数       : bits 4-63 が値（算術右シフトで復元）
//! 短文字列   : bits 4-7 が長さ（0..=7）、バイト1〜7にUTF-8本体
//! ```
//!
//! タグ付き値には実体のメタデータレコードが存在しないため、種別ごとに
//! 合成クラス記述子を用意し、メタデータウォークの前に解決します。

use crate::descriptor::{
    BuiltinMethod, ClassDescriptor, MethodDescriptor, MethodImpl, Selector,
};
use crate::error::RuntimeError;
use crate::value::DeclaredType;
use crate::Result;

/// タグマークのビット
pub const TAG_BIT: u64 = 0x1;

const KIND_INT: u64 = 0;
const KIND_STRING: u64 = 1;

/// 合成クラス記述子のキャッシュキーとして使う擬似メタデータアドレス
///
/// 実メタデータは8バイト境界に置かれるため、タグビットの立った値と衝突しません。
pub const TAGGED_INT_KEY: u64 = (KIND_INT << 1) | TAG_BIT;
pub const TAGGED_STRING_KEY: u64 = (KIND_STRING << 1) | TAG_BIT;

/// 短文字列としてインライン格納できる最大バイト数
pub const MAX_SHORT_STRING: usize = 7;

/// ワードがタグ付き即値かどうか
pub fn is_tagged(word: u64) -> bool {
    word & TAG_BIT != 0
}

/// デコード済みのタグ付き値
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    Int(i64),
    ShortString(String),
}

/// タグ付きワードをデコードする
pub fn decode(word: u64) -> Result<TaggedValue> {
    if !is_tagged(word) {
        return Err(RuntimeError::NotAnObject(word));
    }

    match (word >> 1) & 0b111 {
        KIND_INT => Ok(TaggedValue::Int((word as i64) >> 4)),
        KIND_STRING => {
            let len = ((word >> 4) & 0xf) as usize;
            if len > MAX_SHORT_STRING {
                return Err(RuntimeError::TypeResolution(format!(
                    "tagged string 0x{:x} claims length {}",
                    word, len
                )));
            }
            let bytes = word.to_le_bytes();
            let text = std::str::from_utf8(&bytes[1..1 + len]).map_err(|_| {
                RuntimeError::TypeResolution(format!(
                    "tagged string 0x{:x} holds invalid UTF-8",
                    word
                ))
            })?;
            Ok(TaggedValue::ShortString(text.to_string()))
        }
        kind => Err(RuntimeError::TypeResolution(format!(
            "unknown tag kind {} in word 0x{:x}",
            kind, word
        ))),
    }
}

/// 整数をタグ付きワードにエンコードする
pub fn encode_int(value: i64) -> u64 {
    ((value as u64) << 4) | (KIND_INT << 1) | TAG_BIT
}

/// 短文字列をタグ付きワードにエンコードする
///
/// 7バイトを超える文字列はインライン化できないため`None`を返します。
pub fn encode_short_string(s: &str) -> Option<u64> {
    let bytes = s.as_bytes();
    if bytes.len() > MAX_SHORT_STRING {
        return None;
    }

    let mut word = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        word |= (b as u64) << (8 * (i + 1));
    }
    word |= (bytes.len() as u64) << 4;
    word |= (KIND_STRING << 1) | TAG_BIT;
    Some(word)
}

/// タグ付きワードに対応する擬似メタデータアドレスを返す
pub fn synthetic_key(word: u64) -> Result<u64> {
    match decode(word)? {
        TaggedValue::Int(_) => Ok(TAGGED_INT_KEY),
        TaggedValue::ShortString(_) => Ok(TAGGED_STRING_KEY),
    }
}

/// タグ付き整数の合成クラス記述子
pub fn tagged_int_class() -> ClassDescriptor {
    ClassDescriptor {
        name: "TaggedInt".to_string(),
        address: TAGGED_INT_KEY,
        super_address: None,
        fields: Vec::new(),
        methods: vec![
            builtin("intValue", BuiltinMethod::IntValue, DeclaredType::Int),
            builtin("description", BuiltinMethod::Describe, DeclaredType::Id),
        ],
        synthetic: true,
    }
}

/// タグ付き短文字列の合成クラス記述子
pub fn tagged_string_class() -> ClassDescriptor {
    ClassDescriptor {
        name: "TaggedString".to_string(),
        address: TAGGED_STRING_KEY,
        super_address: None,
        fields: Vec::new(),
        methods: vec![
            builtin("length", BuiltinMethod::StringLength, DeclaredType::Int),
            builtin("description", BuiltinMethod::Describe, DeclaredType::Id),
        ],
        synthetic: true,
    }
}

fn builtin(name: &str, imp: BuiltinMethod, return_type: DeclaredType) -> MethodDescriptor {
    MethodDescriptor {
        selector: Selector::new(name, 0),
        selector_addr: 0,
        imp: MethodImpl::Builtin(imp),
        return_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrip() {
        for v in [0i64, 1, -1, 42, -42, 1 << 40, -(1 << 40)] {
            let word = encode_int(v);
            assert!(is_tagged(word));
            assert_eq!(decode(word).unwrap(), TaggedValue::Int(v));
        }
    }

    #[test]
    fn test_short_string_roundtrip() {
        for s in ["", "a", "new", "seven77"] {
            let word = encode_short_string(s).unwrap();
            assert!(is_tagged(word));
            assert_eq!(
                decode(word).unwrap(),
                TaggedValue::ShortString(s.to_string())
            );
        }
    }

    #[test]
    fn test_too_long_string_is_rejected() {
        assert!(encode_short_string("eight888").is_none());
    }

    #[test]
    fn test_untagged_word_is_not_decodable() {
        assert!(!is_tagged(0x4000));
        assert!(matches!(
            decode(0x4000),
            Err(RuntimeError::NotAnObject(0x4000))
        ));
    }

    #[test]
    fn test_synthetic_keys_are_tagged() {
        // 擬似アドレスが実メタデータアドレスと衝突しないこと
        assert!(is_tagged(TAGGED_INT_KEY));
        assert!(is_tagged(TAGGED_STRING_KEY));
        let word = encode_short_string("abc").unwrap();
        assert_eq!(synthetic_key(word).unwrap(), TAGGED_STRING_KEY);
    }
}
