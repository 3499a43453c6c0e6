//! Catalog data model (C2): Version, Upload, UploadChunk, UpdateFile, Category.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bump kind accepted by `CreateVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum VersionBump {
    Major = 0,
    Minor = 1,
    Revision = 2,
}

impl TryFrom<i16> for VersionBump {
    type Error = anyhow::Error;
    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(VersionBump::Major),
            1 => Ok(VersionBump::Minor),
            2 => Ok(VersionBump::Revision),
            other => anyhow::bail!("invalid version bump type {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i16)]
pub enum VersionState {
    Pending = 0,
    Processing = 1,
    Ready = 2,
}

impl From<i16> for VersionState {
    fn from(v: i16) -> Self {
        match v {
            1 => VersionState::Processing,
            2 => VersionState::Ready,
            _ => VersionState::Pending,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Version {
    pub id: Uuid,
    pub major: i32,
    pub minor: i32,
    pub revision: i32,
    pub description: String,
    pub state: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Version {
    pub fn semver(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.revision)
    }

    pub fn state(&self) -> VersionState {
        VersionState::from(self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i16)]
pub enum UploadState {
    None = 0,
    Pending = 1,
    Processing = 2,
    Ready = 3,
}

impl From<i16> for UploadState {
    fn from(v: i16) -> Self {
        match v {
            1 => UploadState::Pending,
            2 => UploadState::Processing,
            3 => UploadState::Ready,
            _ => UploadState::None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Upload {
    pub id: Uuid,
    pub version_id: Uuid,
    pub concurrent_id: Uuid,
    pub hash: String,
    pub chunk_size: i32,
    pub file_size: i64,
    pub chunks_count: i32,
    pub state: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn state(&self) -> UploadState {
        UploadState::from(self.state)
    }
}

/// Chunk size bounds enforced by StartUpload / UploadChunk validation.
pub const MIN_CHUNK_SIZE: i64 = 16 * 1024;
pub const MAX_CHUNK_SIZE: i64 = 512 * 1024;
pub const MIN_FILE_SIZE: i64 = 1024;
pub const MAX_FILE_SIZE: i64 = 5 * 1024 * 1024 * 1024;

pub fn chunks_count(file_size: i64, chunk_size: i64) -> i32 {
    ((file_size + chunk_size - 1) / chunk_size) as i32
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadChunk {
    pub upload_id: Uuid,
    pub concurrent_id: Uuid,
    pub offset: i32,
    pub length: i32,
    pub created_at: DateTime<Utc>,
}

/// Finite classification of a logical file. Indices matter: they are the
/// order in which the category-matching regex table is tried, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i16)]
pub enum Category {
    General = 0,
    Desktop = 1,
    Mobile = 2,
    Windows = 3,
    Linux = 4,
    MacOs = 5,
    Android = 6,
    Ios = 7,
    Uncompressed = 8,
    Bc3 = 9,
    Bc7 = 10,
    Etc2 = 11,
    Astc = 12,
}

impl Category {
    pub const ALL_DESCENDING: [Category; 13] = [
        Category::Astc,
        Category::Etc2,
        Category::Bc7,
        Category::Bc3,
        Category::Uncompressed,
        Category::Ios,
        Category::Android,
        Category::MacOs,
        Category::Linux,
        Category::Windows,
        Category::Mobile,
        Category::Desktop,
        Category::General,
    ];

    pub fn folder(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Desktop => "desktop",
            Category::Mobile => "mobile",
            Category::Windows => "windows",
            Category::Linux => "linux",
            Category::MacOs => "macos",
            Category::Android => "android",
            Category::Ios => "ios",
            Category::Uncompressed => "uncompressed",
            Category::Bc3 => "bc3",
            Category::Bc7 => "bc7",
            Category::Etc2 => "etc2",
            Category::Astc => "astc",
        }
    }
}

impl From<i16> for Category {
    fn from(v: i16) -> Self {
        match v {
            1 => Category::Desktop,
            2 => Category::Mobile,
            3 => Category::Windows,
            4 => Category::Linux,
            5 => Category::MacOs,
            6 => Category::Android,
            7 => Category::Ios,
            8 => Category::Uncompressed,
            9 => Category::Bc3,
            10 => Category::Bc7,
            11 => Category::Etc2,
            12 => Category::Astc,
            _ => Category::General,
        }
    }
}

/// Operating system axis used by the manifest resolver and the HTTP/gRPC
/// surface (`os ∈ [0,5]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Os {
    Windows = 0,
    Linux = 1,
    MacOs = 2,
    Android = 3,
    Ios = 4,
    General = 5,
}

impl TryFrom<i32> for Os {
    type Error = anyhow::Error;
    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Os::Windows),
            1 => Ok(Os::Linux),
            2 => Ok(Os::MacOs),
            3 => Ok(Os::Android),
            4 => Ok(Os::Ios),
            5 => Ok(Os::General),
            other => anyhow::bail!("os index out of range: {other}"),
        }
    }
}

impl Os {
    /// PlatformLookup: coarse platform grouping, General has no platform slot.
    pub fn platform_category(&self) -> Option<Category> {
        match self {
            Os::Windows | Os::Linux | Os::MacOs => Some(Category::Desktop),
            Os::Android | Os::Ios => Some(Category::Mobile),
            Os::General => None,
        }
    }

    /// OperatingSystemLookup: identity mapping, General has no OS-specific slot.
    pub fn os_category(&self) -> Option<Category> {
        match self {
            Os::Windows => Some(Category::Windows),
            Os::Linux => Some(Category::Linux),
            Os::MacOs => Some(Category::MacOs),
            Os::Android => Some(Category::Android),
            Os::Ios => Some(Category::Ios),
            Os::General => None,
        }
    }
}

/// Texture-format axis (`texture ∈ [0,4]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Texture {
    Uncompressed = 0,
    Bc3 = 1,
    Bc7 = 2,
    Etc2 = 3,
    Astc = 4,
}

impl TryFrom<i32> for Texture {
    type Error = anyhow::Error;
    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Texture::Uncompressed),
            1 => Ok(Texture::Bc3),
            2 => Ok(Texture::Bc7),
            3 => Ok(Texture::Etc2),
            4 => Ok(Texture::Astc),
            other => anyhow::bail!("texture index out of range: {other}"),
        }
    }
}

impl Texture {
    pub fn category(&self) -> Category {
        match self {
            Texture::Uncompressed => Category::Uncompressed,
            Texture::Bc3 => Category::Bc3,
            Texture::Bc7 => Category::Bc7,
            Texture::Etc2 => Category::Etc2,
            Texture::Astc => Category::Astc,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpdateFile {
    pub id: Uuid,
    pub version_id: Uuid,
    pub category: i16,
    pub file_name: String,
    pub extension: String,
    pub local_path: String,
    pub packed_size: i64,
    pub file_size: i64,
    pub crc32: String,
    pub created_at: DateTime<Utc>,
}

impl UpdateFile {
    pub fn category(&self) -> Category {
        Category::from(self.category)
    }
}
