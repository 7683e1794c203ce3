//! 実行時型の解決
//!
//! オブジェクトポインタから実際の実行時クラスと継承チェーンを決定します。
//! 解決済みのクラス記述子はメタデータアドレスをキーとしてstopの間キャッシュされ、
//! プロセス再開時に`invalidate`で破棄されます（再開後はアドレスもレイアウトも
//! 変わっている可能性があるため）。

use crate::access::MemoryAccess;
use crate::descriptor::ClassDescriptor;
use crate::error::RuntimeError;
use crate::tagged;
use crate::Result;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// 継承チェーンウォークの上限深度
///
/// これを超えるチェーンはターゲットメモリの破損（循環メタデータ）とみなします。
pub const MAX_ANCESTOR_DEPTH: usize = 64;

/// クラステーブルのエントリ数上限（健全性チェック）
const MAX_CLASS_TABLE_LEN: u64 = 65536;

/// 実行時型リゾルバ
pub struct TypeResolver {
    /// クラステーブル（`[count][ptr...]`）のアドレス
    class_table: u64,
    /// メタデータアドレス -> 記述子のstopスコープキャッシュ
    cache: HashMap<u64, Rc<ClassDescriptor>>,
}

impl TypeResolver {
    /// 新しいリゾルバを作成する
    pub fn new(class_table: u64) -> Self {
        Self {
            class_table,
            cache: HashMap::new(),
        }
    }

    /// キャッシュを破棄する（プロセス再開時に必須）
    pub fn invalidate(&mut self) {
        debug!("invalidating {} cached class descriptors", self.cache.len());
        self.cache.clear();
    }

    /// メタデータアドレスから記述子を取得する（キャッシュあり）
    pub fn descriptor_at<M: MemoryAccess + ?Sized>(
        &mut self,
        mem: &M,
        addr: u64,
    ) -> Result<Rc<ClassDescriptor>> {
        if let Some(desc) = self.cache.get(&addr) {
            return Ok(desc.clone());
        }

        let desc = match addr {
            tagged::TAGGED_INT_KEY => tagged::tagged_int_class(),
            tagged::TAGGED_STRING_KEY => tagged::tagged_string_class(),
            _ => ClassDescriptor::read_from(mem, addr)?,
        };
        debug!("resolved class '{}' at 0x{:x}", desc.name, addr);

        let desc = Rc::new(desc);
        self.cache.insert(addr, desc.clone());
        Ok(desc)
    }

    /// オブジェクト参照ワードから最派生の実行時クラスを解決する
    ///
    /// タグ付き即値はメタデータウォークの前に認識し、合成クラスとして解決します。
    /// オブジェクトポインタとして不正な値は`NotAnObject`となり、呼び出し側は
    /// 値をスカラとして扱うことにフォールバックできます。
    pub fn resolve_object<M: MemoryAccess + ?Sized>(
        &mut self,
        mem: &M,
        word: u64,
    ) -> Result<Rc<ClassDescriptor>> {
        if word == 0 {
            return Err(RuntimeError::NotAnObject(0));
        }

        if tagged::is_tagged(word) {
            let key = tagged::synthetic_key(word)?;
            return self.descriptor_at(mem, key);
        }

        // 先頭ワードがクラスメタデータレコードへのポインタ（isa）
        let isa = mem.read_u64(word)?;
        if isa == 0 {
            return Err(RuntimeError::NotAnObject(word));
        }
        self.descriptor_at(mem, isa)
    }

    /// 最派生クラスからルートまでの継承チェーンを構築する
    ///
    /// 深度が`MAX_ANCESTOR_DEPTH`を超えた場合は循環メタデータとみなして失敗します。
    pub fn ancestor_chain<M: MemoryAccess + ?Sized>(
        &mut self,
        mem: &M,
        start: Rc<ClassDescriptor>,
    ) -> Result<Vec<Rc<ClassDescriptor>>> {
        let mut chain = Vec::new();
        let mut current = start;

        loop {
            if chain.len() >= MAX_ANCESTOR_DEPTH {
                return Err(RuntimeError::TypeResolution(format!(
                    "ancestor chain exceeds {} classes (cyclic metadata?)",
                    MAX_ANCESTOR_DEPTH
                )));
            }

            let super_address = current.super_address;
            chain.push(current);

            match super_address {
                Some(addr) => current = self.descriptor_at(mem, addr)?,
                None => break,
            }
        }

        Ok(chain)
    }

    /// クラステーブルを走査して名前でクラスを検索する
    pub fn lookup_by_name<M: MemoryAccess + ?Sized>(
        &mut self,
        mem: &M,
        name: &str,
    ) -> Result<Rc<ClassDescriptor>> {
        let count = mem.read_u64(self.class_table)?;
        if count > MAX_CLASS_TABLE_LEN {
            return Err(RuntimeError::TypeResolution(format!(
                "class table at 0x{:x} claims {} entries (corrupted metadata?)",
                self.class_table, count
            )));
        }

        for i in 0..count {
            let ptr = mem.read_u64(self.class_table + 8 + i * 8)?;
            let desc = self.descriptor_at(mem, ptr)?;
            if desc.name == name {
                return Ok(desc);
            }
        }

        Err(RuntimeError::TypeNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        CLASS_FIELDS_OFFSET, CLASS_FIELD_COUNT_OFFSET, CLASS_METHODS_OFFSET,
        CLASS_METHOD_COUNT_OFFSET, CLASS_NAME_OFFSET, CLASS_SUPER_OFFSET,
    };

    struct MockMemory {
        data: Vec<u8>,
    }

    impl MockMemory {
        fn new(size: usize) -> Self {
            Self {
                data: vec![0u8; size],
            }
        }

        fn put_u64(&mut self, addr: u64, value: u64) {
            let addr = addr as usize;
            self.data[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
        }

        fn put_cstr(&mut self, addr: u64, s: &str) {
            let addr = addr as usize;
            self.data[addr..addr + s.len()].copy_from_slice(s.as_bytes());
            self.data[addr + s.len()] = 0;
        }

        /// フィールドもメソッドも持たない空のクラスレコードを書き込む
        fn put_class(&mut self, addr: u64, name_ptr: u64, name: &str, super_ptr: u64) {
            self.put_cstr(name_ptr, name);
            self.put_u64(addr + CLASS_NAME_OFFSET, name_ptr);
            self.put_u64(addr + CLASS_SUPER_OFFSET, super_ptr);
            self.put_u64(addr + CLASS_FIELD_COUNT_OFFSET, 0);
            self.put_u64(addr + CLASS_FIELDS_OFFSET, 0);
            self.put_u64(addr + CLASS_METHOD_COUNT_OFFSET, 0);
            self.put_u64(addr + CLASS_METHODS_OFFSET, 0);
        }
    }

    impl MemoryAccess for MockMemory {
        fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
            let addr = addr as usize;
            if addr + size > self.data.len() {
                return Err(RuntimeError::Access {
                    addr: addr as u64,
                    reason: "address out of range".to_string(),
                });
            }
            Ok(self.data[addr..addr + size].to_vec())
        }

        fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
            let addr = addr as usize;
            if addr + data.len() > self.data.len() {
                return Err(RuntimeError::Access {
                    addr: addr as u64,
                    reason: "address out of range".to_string(),
                });
            }
            self.data[addr..addr + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    const BASE_CLASS: u64 = 0x100;
    const DERIVED_CLASS: u64 = 0x200;
    const CLASS_TABLE: u64 = 0x400;
    const OBJECT: u64 = 0x500;

    fn build_runtime() -> MockMemory {
        let mut mem = MockMemory::new(0x1000);
        mem.put_class(BASE_CLASS, 0x300, "Base", 0);
        mem.put_class(DERIVED_CLASS, 0x310, "Derived", BASE_CLASS);

        // クラステーブル
        mem.put_u64(CLASS_TABLE, 2);
        mem.put_u64(CLASS_TABLE + 8, BASE_CLASS);
        mem.put_u64(CLASS_TABLE + 16, DERIVED_CLASS);

        // Derivedのインスタンス（先頭ワードがisa）
        mem.put_u64(OBJECT, DERIVED_CLASS);
        mem
    }

    #[test]
    fn test_resolve_object_finds_most_derived_class() {
        let mem = build_runtime();
        let mut resolver = TypeResolver::new(CLASS_TABLE);

        let class = resolver.resolve_object(&mem, OBJECT).unwrap();
        assert_eq!(class.name, "Derived");
        assert_eq!(class.super_address, Some(BASE_CLASS));
    }

    #[test]
    fn test_ancestor_chain_is_most_derived_first() {
        let mem = build_runtime();
        let mut resolver = TypeResolver::new(CLASS_TABLE);

        let class = resolver.resolve_object(&mem, OBJECT).unwrap();
        let chain = resolver.ancestor_chain(&mem, class).unwrap();

        let names: Vec<&str> = chain.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Derived", "Base"]);
    }

    #[test]
    fn test_cyclic_metadata_is_bounded() {
        let mut mem = build_runtime();
        // Baseのスーパークラスを自分自身に書き換えて循環させる
        mem.put_u64(BASE_CLASS + CLASS_SUPER_OFFSET, BASE_CLASS);

        let mut resolver = TypeResolver::new(CLASS_TABLE);
        let class = resolver.resolve_object(&mem, OBJECT).unwrap();
        let err = resolver.ancestor_chain(&mem, class).unwrap_err();
        assert!(matches!(err, RuntimeError::TypeResolution(_)));
    }

    #[test]
    fn test_tagged_word_resolves_to_synthetic_class() {
        let mem = build_runtime();
        let mut resolver = TypeResolver::new(CLASS_TABLE);

        let word = tagged::encode_short_string("abc").unwrap();
        let class = resolver.resolve_object(&mem, word).unwrap();
        assert_eq!(class.name, "TaggedString");
        assert!(class.synthetic);

        let class = resolver.resolve_object(&mem, tagged::encode_int(7)).unwrap();
        assert_eq!(class.name, "TaggedInt");
    }

    #[test]
    fn test_null_and_nullisa_are_not_objects() {
        let mem = build_runtime();
        let mut resolver = TypeResolver::new(CLASS_TABLE);

        assert!(matches!(
            resolver.resolve_object(&mem, 0),
            Err(RuntimeError::NotAnObject(0))
        ));
        // 0x600は未初期化領域（isa = 0）
        assert!(matches!(
            resolver.resolve_object(&mem, 0x600),
            Err(RuntimeError::NotAnObject(0x600))
        ));
    }

    #[test]
    fn test_lookup_by_name() {
        let mem = build_runtime();
        let mut resolver = TypeResolver::new(CLASS_TABLE);

        let class = resolver.lookup_by_name(&mem, "Base").unwrap();
        assert_eq!(class.address, BASE_CLASS);

        assert!(matches!(
            resolver.lookup_by_name(&mem, "NoSuchClass"),
            Err(RuntimeError::TypeNotFound(_))
        ));
    }

    #[test]
    fn test_cache_is_stale_until_invalidated() {
        let mut mem = build_runtime();
        let mut resolver = TypeResolver::new(CLASS_TABLE);

        let before = resolver.resolve_object(&mem, OBJECT).unwrap();
        assert_eq!(before.name, "Derived");

        // 再ロードでクラス名が変わったことをシミュレート
        mem.put_cstr(0x310, "Reload");

        // invalidateするまではキャッシュが返る
        let cached = resolver.resolve_object(&mem, OBJECT).unwrap();
        assert_eq!(cached.name, "Derived");

        resolver.invalidate();
        let fresh = resolver.resolve_object(&mem, OBJECT).unwrap();
        assert_eq!(fresh.name, "Reload");
    }
}
