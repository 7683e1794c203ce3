//! 評価結果の値モデル

use crate::descriptor::ClassDescriptor;
use std::rc::Rc;

/// 宣言型（ソース上の型またはキャストで与えられた型）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Void,
    Int,
    UnsignedInt,
    Long,
    Char,
    Bool,
    /// 型なしオブジェクト参照
    Id,
    /// 名前付きオブジェクト参照
    Object(String),
    /// クラスオブジェクト参照（型名をレシーバとして使った場合）
    Class(String),
    /// ポインタ型
    Pointer(Box<DeclaredType>),
}

impl DeclaredType {
    /// メタデータ中の型コードから宣言型を得る
    ///
    /// コード: 0=void, 1=int, 2=unsigned, 3=long, 4=char, 5=bool, 6=id, 7=pointer
    pub fn from_type_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(DeclaredType::Void),
            1 => Some(DeclaredType::Int),
            2 => Some(DeclaredType::UnsignedInt),
            3 => Some(DeclaredType::Long),
            4 => Some(DeclaredType::Char),
            5 => Some(DeclaredType::Bool),
            6 => Some(DeclaredType::Id),
            7 => Some(DeclaredType::Pointer(Box::new(DeclaredType::Void))),
            _ => None,
        }
    }

    /// 型のサイズ（バイト数）
    pub fn byte_size(&self) -> usize {
        match self {
            DeclaredType::Void => 0,
            DeclaredType::Int | DeclaredType::UnsignedInt => 4,
            DeclaredType::Long => 8,
            DeclaredType::Char | DeclaredType::Bool => 1,
            DeclaredType::Id
            | DeclaredType::Object(_)
            | DeclaredType::Class(_)
            | DeclaredType::Pointer(_) => 8,
        }
    }

    /// オブジェクト参照として扱える型かどうか
    pub fn is_object_like(&self) -> bool {
        match self {
            DeclaredType::Id | DeclaredType::Object(_) => true,
            DeclaredType::Pointer(inner) => inner.is_object_like(),
            _ => false,
        }
    }
}

impl std::fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeclaredType::Void => write!(f, "void"),
            DeclaredType::Int => write!(f, "int"),
            DeclaredType::UnsignedInt => write!(f, "unsigned int"),
            DeclaredType::Long => write!(f, "long"),
            DeclaredType::Char => write!(f, "char"),
            DeclaredType::Bool => write!(f, "bool"),
            DeclaredType::Id => write!(f, "id"),
            DeclaredType::Object(name) | DeclaredType::Class(name) => write!(f, "{}", name),
            DeclaredType::Pointer(inner) => write!(f, "{} *", inner),
        }
    }
}

/// 評価によって生成された型付きの値
///
/// 実行時クラスは遅延解決され、オブジェクト以外の値では常に`None`です。
/// 実行時クラスが存在する場合、それは宣言型と同じか、より派生したクラスです。
/// プロセスが再開されると値に埋め込まれたアドレスは無効になるため、
/// `valid`フラグで追跡します。
#[derive(Debug, Clone)]
pub struct TargetValue {
    /// 宣言型（ソースまたはキャスト由来）
    pub declared: DeclaredType,
    /// 解決済みの実行時クラス（遅延、オブジェクト以外はNone）
    pub runtime_class: Option<Rc<ClassDescriptor>>,
    /// 生のバイト表現（リトルエンディアン）
    pub bytes: Vec<u8>,
    /// このstop中の値として有効かどうか
    pub valid: bool,
}

impl TargetValue {
    /// ワード値から値を構築する
    pub fn from_word(declared: DeclaredType, word: u64) -> Self {
        Self {
            declared,
            runtime_class: None,
            bytes: word.to_le_bytes().to_vec(),
            valid: true,
        }
    }

    /// ワード値として取り出す（8バイトにゼロ拡張）
    pub fn word(&self) -> u64 {
        let mut array = [0u8; 8];
        for (dst, src) in array.iter_mut().zip(self.bytes.iter()) {
            *dst = *src;
        }
        u64::from_le_bytes(array)
    }

    /// 宣言型のサイズで符号拡張した整数値として取り出す
    pub fn as_i64(&self) -> i64 {
        let word = self.word();
        match self.declared.byte_size() {
            1 => word as u8 as i8 as i64,
            4 => word as u32 as i32 as i64,
            _ => word as i64,
        }
    }

    /// プロセス再開により値を無効化する
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_roundtrip() {
        let v = TargetValue::from_word(DeclaredType::Long, 0xdead_beef_1234);
        assert_eq!(v.word(), 0xdead_beef_1234);
        assert!(v.valid);
    }

    #[test]
    fn test_as_i64_sign_extends_int() {
        // -1 を32bit幅で格納した場合
        let v = TargetValue::from_word(DeclaredType::Int, 0xffff_ffff);
        assert_eq!(v.as_i64(), -1);

        let v = TargetValue::from_word(DeclaredType::Long, 0xffff_ffff);
        assert_eq!(v.as_i64(), 0xffff_ffff);
    }

    #[test]
    fn test_object_like() {
        assert!(DeclaredType::Id.is_object_like());
        assert!(DeclaredType::Object("MyString".into()).is_object_like());
        assert!(DeclaredType::Pointer(Box::new(DeclaredType::Object("MyString".into())))
            .is_object_like());
        assert!(!DeclaredType::Int.is_object_like());
        assert!(!DeclaredType::Pointer(Box::new(DeclaredType::Char)).is_object_like());
    }

    #[test]
    fn test_display() {
        let ty = DeclaredType::Pointer(Box::new(DeclaredType::Object("MyString".into())));
        assert_eq!(ty.to_string(), "MyString *");
        assert_eq!(DeclaredType::UnsignedInt.to_string(), "unsigned int");
    }
}
