//! 페이로드 저장소
//!
//! 로컬 파일과 에셋(콘텐츠 주소) 저장소는 외부 협력자이므로
//! 관리자는 `XferStorage` 트레이트를 통해서만 접근한다.
//! - `LocalStorage`: std::fs 기반
//! - `MemoryStorage`: 메모리 기반 (테스트, 임베딩용)

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// 에셋 ID (콘텐츠 주소)
pub type AssetId = Uuid;

/// 에셋 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum AssetType {
    Texture = 0,
    Sound = 1,
    CallingCard = 2,
    Landmark = 3,
    Clothing = 5,
    Object = 6,
    Notecard = 7,
    LslText = 10,
    LslBytecode = 11,
    Bodypart = 13,
    Animation = 20,
    Gesture = 21,
    Mesh = 49,
    Material = 57,
}

impl AssetType {
    /// 와이어 값에서 변환 (알 수 없는 타입은 `None`)
    pub fn from_i16(value: i16) -> Option<Self> {
        let ty = match value {
            0 => AssetType::Texture,
            1 => AssetType::Sound,
            2 => AssetType::CallingCard,
            3 => AssetType::Landmark,
            5 => AssetType::Clothing,
            6 => AssetType::Object,
            7 => AssetType::Notecard,
            10 => AssetType::LslText,
            11 => AssetType::LslBytecode,
            13 => AssetType::Bodypart,
            20 => AssetType::Animation,
            21 => AssetType::Gesture,
            49 => AssetType::Mesh,
            57 => AssetType::Material,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// 파일 경로 기준 디렉터리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PathRoot {
    /// 경로 그대로 (송신 승인 필요)
    #[default]
    None,
    /// 캐시 디렉터리
    Cache,
    /// 그 밖의 디렉터리 (원격 요청에서는 거부)
    Other(u8),
}

impl PathRoot {
    pub fn to_wire(self) -> u8 {
        match self {
            PathRoot::None => 0,
            PathRoot::Cache => 4,
            PathRoot::Other(v) => v,
        }
    }

    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => PathRoot::None,
            4 => PathRoot::Cache,
            v => PathRoot::Other(v),
        }
    }
}

/// 캐시 파일명 검증
///
/// 우리 코드가 캐시에 두는 이름만 허용: 영숫자로 시작, 이후 영숫자 `_` `-` `.`, 최대 50자
pub fn verify_cache_filename(filename: &str) -> bool {
    let len = filename.len();
    if !(1..=50).contains(&len) {
        return false;
    }
    filename.bytes().enumerate().all(|(i, c)| {
        c.is_ascii_alphanumeric() || (i > 0 && matches!(c, b'_' | b'-' | b'.'))
    })
}

/// 전송 페이로드 저장소
pub trait XferStorage: Send {
    /// 기준 디렉터리 + 이름 -> 실제 경로
    fn expand_path(&self, root: PathRoot, name: &str) -> Result<PathBuf>;

    fn file_exists(&self, path: &Path) -> bool;

    fn file_len(&mut self, path: &Path) -> Result<u64>;

    /// `offset`부터 최대 `len` 바이트 읽기
    fn read_file(&mut self, path: &Path, offset: u64, len: usize) -> Result<Bytes>;

    /// 파일 끝에 추가 (없으면 생성)
    fn append_file(&mut self, path: &Path, data: &[u8]) -> Result<()>;

    fn rename_file(&mut self, from: &Path, to: &Path) -> Result<()>;

    fn remove_file(&mut self, path: &Path) -> Result<()>;

    fn read_asset(&mut self, id: &AssetId, asset_type: AssetType) -> Result<Bytes>;

    fn store_asset(&mut self, id: &AssetId, asset_type: AssetType, data: Bytes) -> Result<()>;
}

/// 로컬 파일시스템 저장소
///
/// 에셋은 캐시 디렉터리에 `<uuid>.<type>` 파일로 둔다.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    cache_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn asset_path(&self, id: &AssetId, asset_type: AssetType) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", id, asset_type.as_i16()))
    }
}

impl XferStorage for LocalStorage {
    fn expand_path(&self, root: PathRoot, name: &str) -> Result<PathBuf> {
        match root {
            PathRoot::None => Ok(PathBuf::from(name)),
            PathRoot::Cache => Ok(self.cache_dir.join(name)),
            PathRoot::Other(v) => Err(Error::RestrictedPath(format!("root {v}: {name}"))),
        }
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn file_len(&mut self, path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn read_file(&mut self, path: &Path, offset: u64, len: usize) -> Result<Bytes> {
        let mut file = std::fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn append_file(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn rename_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn read_asset(&mut self, id: &AssetId, asset_type: AssetType) -> Result<Bytes> {
        match std::fs::read(self.asset_path(id, asset_type)) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::AssetNotFound { id: *id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn store_asset(&mut self, id: &AssetId, asset_type: AssetType, data: Bytes) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::write(self.asset_path(id, asset_type), &data)?;
        Ok(())
    }
}

/// 메모리 저장소
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    files: HashMap<PathBuf, Vec<u8>>,
    assets: HashMap<(AssetId, AssetType), Bytes>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&mut self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), data.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<&[u8]> {
        self.files.get(path.as_ref()).map(Vec::as_slice)
    }

    pub fn insert_asset(&mut self, id: AssetId, asset_type: AssetType, data: impl Into<Bytes>) {
        self.assets.insert((id, asset_type), data.into());
    }

    pub fn asset(&self, id: &AssetId, asset_type: AssetType) -> Option<&Bytes> {
        self.assets.get(&(*id, asset_type))
    }

    /// 이후 모든 쓰기를 실패시킴 (I/O 장애 재현용)
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "write disabled",
            )));
        }
        Ok(())
    }

    fn not_found(path: &Path) -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            path.display().to_string(),
        ))
    }
}

impl XferStorage for MemoryStorage {
    fn expand_path(&self, root: PathRoot, name: &str) -> Result<PathBuf> {
        match root {
            PathRoot::None => Ok(PathBuf::from(name)),
            PathRoot::Cache => Ok(Path::new("cache").join(name)),
            PathRoot::Other(v) => Err(Error::RestrictedPath(format!("root {v}: {name}"))),
        }
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn file_len(&mut self, path: &Path) -> Result<u64> {
        self.files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    fn read_file(&mut self, path: &Path, offset: u64, len: usize) -> Result<Bytes> {
        let data = self.files.get(path).ok_or_else(|| Self::not_found(path))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    fn append_file(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn rename_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        self.check_writable()?;
        let data = self.files.remove(from).ok_or_else(|| Self::not_found(from))?;
        self.files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    fn read_asset(&mut self, id: &AssetId, asset_type: AssetType) -> Result<Bytes> {
        self.assets
            .get(&(*id, asset_type))
            .cloned()
            .ok_or(Error::AssetNotFound { id: *id })
    }

    fn store_asset(&mut self, id: &AssetId, asset_type: AssetType, data: Bytes) -> Result<()> {
        self.check_writable()?;
        self.assets.insert((*id, asset_type), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_filename_rules() {
        assert!(verify_cache_filename("abc.tmp"));
        assert!(verify_cache_filename("a_b-c.d"));
        assert!(!verify_cache_filename(""));
        assert!(!verify_cache_filename(".hidden"));
        assert!(!verify_cache_filename("../etc/passwd"));
        assert!(!verify_cache_filename("a/b"));
        assert!(!verify_cache_filename(&"a".repeat(51)));
    }

    #[test]
    fn test_path_root_wire() {
        assert_eq!(PathRoot::from_wire(PathRoot::Cache.to_wire()), PathRoot::Cache);
        assert_eq!(PathRoot::from_wire(0), PathRoot::None);
        assert_eq!(PathRoot::from_wire(9), PathRoot::Other(9));
    }

    #[test]
    fn test_asset_type_lookup() {
        assert_eq!(AssetType::from_i16(49), Some(AssetType::Mesh));
        assert_eq!(AssetType::from_i16(-1), None);
        assert_eq!(AssetType::Notecard.as_i16(), 7);
    }

    #[test]
    fn test_local_storage_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = LocalStorage::new(dir.path());
        let path = storage.expand_path(PathRoot::Cache, "part.tmp").unwrap();

        storage.append_file(&path, b"hello ").unwrap();
        storage.append_file(&path, b"world").unwrap();
        assert_eq!(storage.file_len(&path).unwrap(), 11);
        assert_eq!(&storage.read_file(&path, 6, 100).unwrap()[..], b"world");

        let renamed = dir.path().join("done.bin");
        storage.rename_file(&path, &renamed).unwrap();
        assert!(storage.file_exists(&renamed));
        assert!(!storage.file_exists(&path));

        storage.remove_file(&renamed).unwrap();
        assert!(storage.file_len(&renamed).is_err());
    }

    #[test]
    fn test_local_storage_assets() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = LocalStorage::new(dir.path().join("cache"));
        let id = Uuid::new_v4();

        assert!(matches!(
            storage.read_asset(&id, AssetType::Texture),
            Err(Error::AssetNotFound { .. })
        ));
        storage
            .store_asset(&id, AssetType::Texture, Bytes::from_static(b"j2c"))
            .unwrap();
        assert_eq!(&storage.read_asset(&id, AssetType::Texture).unwrap()[..], b"j2c");
    }

    #[test]
    fn test_memory_storage_write_failure() {
        let mut storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.append_file(Path::new("x"), b"1").is_err());
        assert!(storage.expand_path(PathRoot::Other(2), "x").is_err());
    }
}
