//! Manifest Resolver (C7): computes the set of files needed for
//! `(from_version, os, texture)`, deduplicated newest-wins, cached in C3.

use crate::cache::ManifestCache;
use crate::db::models::{Category, Os, Texture};
use crate::db::{versions, DbPool};
use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestFile {
    #[serde(rename = "UrlPath")]
    pub url_path: String,
    #[serde(rename = "LocalPath")]
    pub local_path: String,
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Extension")]
    pub extension: String,
    #[serde(rename = "PackedSize")]
    pub packed_size: i64,
    #[serde(rename = "OriginalSize")]
    pub original_size: i64,
    #[serde(rename = "CRC32")]
    pub crc32: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub version: String,
    pub files: Vec<ManifestFile>,
}

/// The relevant category set for a caller (§4.7 step 3): General always,
/// plus the coarse platform slot, the OS-specific slot, and the texture
/// slot.
fn relevant_categories(os: Os, texture: Texture) -> Vec<Category> {
    let mut categories = vec![Category::General];
    if let Some(platform) = os.platform_category() {
        categories.push(platform);
    }
    if let Some(os_category) = os.os_category() {
        categories.push(os_category);
    }
    categories.push(texture.category());
    categories
}

pub async fn resolve(
    pool: &DbPool,
    cache: &ManifestCache,
    client_major: i32,
    client_minor: i32,
    client_revision: i32,
    os: Os,
    texture: Texture,
) -> AppResult<Manifest> {
    let candidates =
        versions::list_ready_versions_after(pool, client_major, client_minor, client_revision).await?;

    if candidates.is_empty() {
        return Ok(Manifest {
            version: format!("{client_major}.{client_minor}.{client_revision}"),
            files: Vec::new(),
        });
    }

    let source = &candidates[0];
    let target = &candidates[candidates.len() - 1];
    let cache_key = ManifestCache::key(&source.semver(), &target.semver(), os as i32, texture as i32);

    if let Some(cached) = cache.get::<Manifest>(&cache_key).await? {
        return Ok(cached);
    }

    let categories = relevant_categories(os, texture);
    let category_codes: Vec<i16> = categories.iter().map(|&c| c as i16).collect();
    let version_ids: Vec<Uuid> = candidates.iter().map(|v| v.id).collect();

    let rows = versions::files_for_versions(pool, &version_ids, &category_codes).await?;

    // Newest-wins dedup keyed by local_path.
    let mut best: HashMap<String, (crate::db::models::UpdateFile, chrono::DateTime<chrono::Utc>)> =
        HashMap::new();
    for (file, owning_version) in rows {
        let entry = best.entry(file.local_path.clone());
        match entry {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert((file, owning_version.created_at));
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if owning_version.created_at > slot.get().1 {
                    slot.insert((file, owning_version.created_at));
                }
            }
        }
    }

    let files = best
        .into_values()
        .map(|(file, _)| ManifestFile {
            url_path: file.version_id.to_string().to_uppercase(),
            local_path: file.local_path,
            filename: file.file_name,
            extension: file.extension,
            packed_size: file.packed_size,
            original_size: file.file_size,
            crc32: file.crc32,
        })
        .collect();

    let manifest = Manifest {
        version: target.semver(),
        files,
    };

    cache.set(&cache_key, &manifest).await?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevant_categories_for_desktop_windows_bc7() {
        let categories = relevant_categories(Os::Windows, Texture::Bc7);
        assert_eq!(
            categories,
            vec![Category::General, Category::Desktop, Category::Windows, Category::Bc7]
        );
    }

    #[test]
    fn relevant_categories_for_general_os_has_no_platform_or_os_slot() {
        let categories = relevant_categories(Os::General, Texture::Astc);
        assert_eq!(categories, vec![Category::General, Category::Astc]);
    }

    #[test]
    fn relevant_categories_for_mobile_android() {
        let categories = relevant_categories(Os::Android, Texture::Etc2);
        assert_eq!(
            categories,
            vec![Category::General, Category::Mobile, Category::Android, Category::Etc2]
        );
    }
}
