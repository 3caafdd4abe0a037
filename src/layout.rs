//! Media-server directory layout ("Trash Guides" profile).
//!
//! Expands a profile into the standard `media/`, `torrents/` and optional
//! `usenet/` tree and returns one folder policy per generated directory.
//! Generating the policies never touches the disk; the directories are only
//! created by [`TrashGuidesConfig::create_dirs`].

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, FolderConfig, octal_mode};

/// Media types used when the profile lists none.
pub const DEFAULT_MEDIA_TYPES: [&str; 4] = ["movies", "tv", "music", "books"];

const DEFAULT_OWNER: u32 = 1000;
const DEFAULT_FOLDER_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Download client family the layout is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Usenet,
    Torrent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashGuidesConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LayoutKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_types: Vec<String>,

    #[serde(default)]
    pub create_structure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    #[serde(default, with = "octal_mode", skip_serializing_if = "Option::is_none")]
    pub folder_mode: Option<u32>,

    #[serde(default, with = "octal_mode", skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
}

impl TrashGuidesConfig {
    /// Whether loading should generate and create the layout.
    pub fn is_active(&self) -> bool {
        self.enabled && self.create_structure
    }

    /// Folder policies for every directory of the layout, parents first.
    pub fn folders(&self) -> Result<Vec<FolderConfig>, ConfigError> {
        let root = self
            .root_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ConfigError::Layout("trashGuides.rootPath is required".into()))?;
        let kind = self.kind.ok_or_else(|| {
            ConfigError::Layout("trashGuides.type must be 'usenet' or 'torrent'".into())
        })?;

        let media_types: Vec<&str> = if self.media_types.is_empty() {
            DEFAULT_MEDIA_TYPES.to_vec()
        } else {
            self.media_types.iter().map(String::as_str).collect()
        };

        let mut paths = vec![root.join("media"), root.join("torrents")];
        for media in &media_types {
            paths.push(root.join("media").join(media));
            paths.push(root.join("torrents").join(media));
        }

        if kind == LayoutKind::Usenet {
            let usenet = root.join("usenet");
            paths.push(usenet.clone());
            paths.push(usenet.join("complete"));
            paths.push(usenet.join("incomplete"));
            paths.extend(media_types.iter().map(|m| usenet.join("complete").join(m)));
        }

        Ok(paths.into_iter().map(|path| self.folder(path)).collect())
    }

    fn folder(&self, path: PathBuf) -> FolderConfig {
        FolderConfig {
            folder_mode: Some(self.folder_mode.unwrap_or(DEFAULT_FOLDER_MODE)),
            file_mode: Some(self.file_mode.unwrap_or(DEFAULT_FILE_MODE)),
            ..FolderConfig::new(
                path,
                self.uid.unwrap_or(DEFAULT_OWNER),
                self.gid.unwrap_or(DEFAULT_OWNER),
            )
        }
    }

    /// Folder policies of an active profile, nothing otherwise.
    pub fn expand(&self) -> Result<Vec<FolderConfig>, ConfigError> {
        if !self.is_active() {
            return Ok(Vec::new());
        }
        self.folders()
    }

    /// Create every directory of an active profile. Returns how many layout
    /// directories there are; existing ones are left as they are.
    pub fn create_dirs(&self) -> Result<usize, ConfigError> {
        let folders = self.expand()?;
        if folders.is_empty() {
            return Ok(0);
        }

        let mode = self.folder_mode.unwrap_or(DEFAULT_FOLDER_MODE);
        for folder in &folders {
            create_dir(&folder.path, mode)?;
        }

        crate::log_event!(
            "layout",
            "created",
            "{} directories under {}",
            folders.len(),
            self.root_path.as_deref().unwrap_or(Path::new("")).display()
        );
        Ok(folders.len())
    }
}

fn create_dir(path: &Path, mode: u32) -> Result<(), ConfigError> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|source| ConfigError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}
