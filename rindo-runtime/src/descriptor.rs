//! ランタイムクラスレコードの解析
//!
//! ターゲットメモリ中のクラスメタデータレコードを読み取り、
//! クラス記述子（フィールド一覧・メソッドテーブル・スーパークラス参照）を構築します。
//!
//! クラスレコードのレイアウト（すべてリトルエンディアンの8バイトワード）:
//!
//! ```text
//! +0x00 name_ptr      -> NUL終端クラス名
//! +0x08 super_ptr     （ルートクラスは0）
//! +0x10 field_count
//! +0x18 fields_ptr    -> FieldRecord（0x18バイト）の配列
//! +0x20 method_count
//! +0x28 methods_ptr   -> MethodRecord（0x20バイト）の配列
//! ```
//!
//! FieldRecord: `{ name_ptr, offset, type_code }`
//! MethodRecord: `{ selector_ptr, imp_addr, arity, return_type_code }`

use crate::access::MemoryAccess;
use crate::error::RuntimeError;
use crate::value::DeclaredType;
use crate::Result;

/// クラスレコード内のオフセット
pub const CLASS_NAME_OFFSET: u64 = 0x00;
pub const CLASS_SUPER_OFFSET: u64 = 0x08;
pub const CLASS_FIELD_COUNT_OFFSET: u64 = 0x10;
pub const CLASS_FIELDS_OFFSET: u64 = 0x18;
pub const CLASS_METHOD_COUNT_OFFSET: u64 = 0x20;
pub const CLASS_METHODS_OFFSET: u64 = 0x28;

/// フィールドレコードのサイズ
pub const FIELD_RECORD_SIZE: u64 = 0x18;
/// メソッドレコードのサイズ
pub const METHOD_RECORD_SIZE: u64 = 0x20;

/// 名前文字列の読み取り上限
const MAX_NAME_LEN: usize = 256;
/// フィールド・メソッド数の健全性チェック上限
const MAX_RECORD_COUNT: u64 = 4096;

/// ディスパッチキーとなるセレクタ
///
/// メソッド名と引数個数の組。パース後は不変です。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    pub name: String,
    pub arity: usize,
}

impl Selector {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// エンジン側で実行される組み込みメソッド（タグ付き即値用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMethod {
    /// タグ付き短文字列の長さ
    StringLength,
    /// タグ付き整数の値
    IntValue,
    /// 自己記述（レシーバ自身を返す）
    Describe,
}

/// メソッドの実装先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodImpl {
    /// ターゲットプロセス内の実装アドレス
    Target(u64),
    /// エンジンが直接実行する組み込み実装
    Builtin(BuiltinMethod),
}

/// メソッド記述子
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub selector: Selector,
    /// メタデータ中のセレクタ文字列のアドレス（呼び出し時にセレクタ識別子として渡す）
    pub selector_addr: u64,
    pub imp: MethodImpl,
    pub return_type: DeclaredType,
}

/// フィールド記述子
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    /// オブジェクト先頭からのオフセット（バイト）
    pub offset: u64,
    pub ty: DeclaredType,
}

/// ライブターゲット中のクラスひとつを表すメタデータ
///
/// stopごとにメタデータアドレスをキーとしてキャッシュされ、プロセス再開時に
/// 破棄されます。スーパークラスは所有せず、メタデータアドレスのみを
/// ルックアップキーとして保持します。
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub name: String,
    /// このクラスのメタデータレコードのアドレス
    pub address: u64,
    /// 直接のスーパークラスのメタデータアドレス（ルートならNone）
    pub super_address: Option<u64>,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    /// タグ付き即値用の合成クラスかどうか
    pub synthetic: bool,
}

impl ClassDescriptor {
    /// セレクタに一致するメソッドをこのクラスのテーブルから探す
    pub fn find_method(&self, selector: &Selector) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.selector == *selector)
    }

    /// 名前に一致するフィールドをこのクラスで探す
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// ターゲットメモリのクラスレコードから記述子を構築する
    pub fn read_from<M: MemoryAccess + ?Sized>(mem: &M, addr: u64) -> Result<Self> {
        let name_ptr = mem.read_u64(addr + CLASS_NAME_OFFSET)?;
        if name_ptr == 0 {
            return Err(RuntimeError::TypeResolution(format!(
                "class record at 0x{:x} has a null name pointer",
                addr
            )));
        }
        let name = mem.read_cstr(name_ptr, MAX_NAME_LEN)?;

        let super_ptr = mem.read_u64(addr + CLASS_SUPER_OFFSET)?;
        let super_address = if super_ptr == 0 { None } else { Some(super_ptr) };

        let fields = Self::read_fields(mem, addr)?;
        let methods = Self::read_methods(mem, addr)?;

        Ok(Self {
            name,
            address: addr,
            super_address,
            fields,
            methods,
            synthetic: false,
        })
    }

    fn read_fields<M: MemoryAccess + ?Sized>(mem: &M, addr: u64) -> Result<Vec<FieldDescriptor>> {
        let count = mem.read_u64(addr + CLASS_FIELD_COUNT_OFFSET)?;
        if count > MAX_RECORD_COUNT {
            return Err(RuntimeError::TypeResolution(format!(
                "class record at 0x{:x} claims {} fields (corrupted metadata?)",
                addr, count
            )));
        }
        let base = mem.read_u64(addr + CLASS_FIELDS_OFFSET)?;

        let mut fields = Vec::with_capacity(count as usize);
        for i in 0..count {
            let rec = base + i * FIELD_RECORD_SIZE;
            let name_ptr = mem.read_u64(rec)?;
            let offset = mem.read_u64(rec + 0x08)?;
            let code = mem.read_u64(rec + 0x10)?;

            let ty = DeclaredType::from_type_code(code).ok_or_else(|| {
                RuntimeError::TypeResolution(format!(
                    "field record at 0x{:x} has unknown type code {}",
                    rec, code
                ))
            })?;

            fields.push(FieldDescriptor {
                name: mem.read_cstr(name_ptr, MAX_NAME_LEN)?,
                offset,
                ty,
            });
        }
        Ok(fields)
    }

    fn read_methods<M: MemoryAccess + ?Sized>(mem: &M, addr: u64) -> Result<Vec<MethodDescriptor>> {
        let count = mem.read_u64(addr + CLASS_METHOD_COUNT_OFFSET)?;
        if count > MAX_RECORD_COUNT {
            return Err(RuntimeError::TypeResolution(format!(
                "class record at 0x{:x} claims {} methods (corrupted metadata?)",
                addr, count
            )));
        }
        let base = mem.read_u64(addr + CLASS_METHODS_OFFSET)?;

        let mut methods = Vec::with_capacity(count as usize);
        for i in 0..count {
            let rec = base + i * METHOD_RECORD_SIZE;
            let selector_ptr = mem.read_u64(rec)?;
            let imp_addr = mem.read_u64(rec + 0x08)?;
            let arity = mem.read_u64(rec + 0x10)? as usize;
            let ret_code = mem.read_u64(rec + 0x18)?;

            let return_type = DeclaredType::from_type_code(ret_code).ok_or_else(|| {
                RuntimeError::TypeResolution(format!(
                    "method record at 0x{:x} has unknown return type code {}",
                    rec, ret_code
                ))
            })?;

            methods.push(MethodDescriptor {
                selector: Selector::new(mem.read_cstr(selector_ptr, MAX_NAME_LEN)?, arity),
                selector_addr: selector_ptr,
                imp: MethodImpl::Target(imp_addr),
                return_type,
            });
        }
        Ok(methods)
    }
}
