//! Share link parsing.
//!
//! Supported formats:
//! - `https://mega.nz/folder/HANDLE#KEY`, optionally followed by
//!   `/file/ID` or `/folder/ID`
//! - `https://mega.nz/file/HANDLE#KEY`
//! - `https://mega.nz/#F!HANDLE!KEY` (legacy), optionally followed by
//!   `?ID` (file) or `!ID` (folder)
//! - `https://mega.nz/#!HANDLE!KEY` (legacy)

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{MegaError, Result};

static LEGACY_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(#F!)|(#!))([A-Za-z0-9_-]+)(?:!([A-Za-z0-9_-]*))?(?:\?([A-Za-z0-9_-]+)|!([A-Za-z0-9_-]+))?",
    )
    .unwrap_or_else(|e| unreachable!("invalid legacy link pattern: {}", e))
});

static MODERN_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(folder/)|(file/))([A-Za-z0-9_-]+)(?:#([A-Za-z0-9_-]*))?(?:/file/([A-Za-z0-9_-]+)|/folder/([A-Za-z0-9_-]+))?",
    )
    .unwrap_or_else(|e| unreachable!("invalid link pattern: {}", e))
});

/// A parsed share link.
///
/// Empty strings stand for absent parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Share {
    /// Handle of the shared folder or file
    pub id: String,
    /// MEGA base64 share key
    pub decryption_key: String,
    pub is_folder: bool,
    pub selected_folder_id: String,
    pub selected_file_id: String,
}

fn is_legacy_url(url: &str) -> bool {
    url.contains("#F!") || url.contains("#!")
}

fn group(captures: &Captures<'_>, index: usize) -> String {
    captures
        .get(index)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

impl Share {
    /// Parse a share link in either format.
    pub fn from_url(url: &str) -> Result<Self> {
        let pattern = if is_legacy_url(url) {
            &LEGACY_URL
        } else {
            &MODERN_URL
        };
        let captures = pattern
            .captures(url)
            .ok_or_else(|| MegaError::UnsupportedUrl(url.to_string()))?;

        Ok(Self {
            is_folder: captures.get(1).is_some(),
            id: group(&captures, 3),
            decryption_key: group(&captures, 4),
            selected_file_id: group(&captures, 5),
            selected_folder_id: group(&captures, 6),
        })
    }

    /// A share of `id` without key or selection.
    pub fn from_parts(id: impl Into<String>, is_folder: bool) -> Self {
        Self {
            id: id.into(),
            is_folder,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.decryption_key = key.into();
        self
    }

    pub fn with_selected_folder(mut self, id: impl Into<String>) -> Self {
        self.selected_folder_id = id.into();
        self
    }

    pub fn with_selected_file(mut self, id: impl Into<String>) -> Self {
        self.selected_file_id = id.into();
        self
    }

    /// Whether `url` is a folder link.
    pub fn is_folder_url(url: &str) -> Result<bool> {
        Ok(Self::from_url(url)?.is_folder)
    }

    /// The selected file, else the selected folder.
    pub fn selected_id(&self) -> Option<&str> {
        [&self.selected_file_id, &self.selected_folder_id]
            .into_iter()
            .find(|id| !id.is_empty())
            .map(String::as_str)
    }

    pub fn has_key(&self) -> bool {
        !self.decryption_key.is_empty()
    }

    /// Render the share as a link.
    ///
    /// The key separator is kept when a node is selected but there is no key,
    /// so parsing the result gives back the same share.
    pub fn to_url(&self, legacy: bool) -> String {
        let (folder, file, id, key, selected_file, selected_folder) = if legacy {
            ("#F", "#", "!", "!", "?", "!")
        } else {
            ("folder", "file", "/", "#", "/file/", "/folder/")
        };

        let selected = if !self.selected_file_id.is_empty() {
            format!("{}{}", selected_file, self.selected_file_id)
        } else if !self.selected_folder_id.is_empty() {
            format!("{}{}", selected_folder, self.selected_folder_id)
        } else {
            String::new()
        };

        let mut url = format!(
            "https://mega.nz/{}{}{}",
            if self.is_folder { folder } else { file },
            id,
            self.id
        );
        if self.has_key() {
            url.push_str(key);
            url.push_str(&self.decryption_key);
        } else if !selected.is_empty() {
            url.push_str(key);
        }
        url.push_str(&selected);
        url
    }
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[id]               {}", self.id)?;
        writeln!(f, "[decryption key]   {}", self.decryption_key)?;
        writeln!(f, "[is folder]        {}", self.is_folder)?;
        writeln!(f, "[selected folder]  {}", self.selected_folder_id)?;
        writeln!(f, "[selected file]    {}", self.selected_file_id)?;
        writeln!(f, "[url]              {}", self.to_url(false))?;
        write!(f, "[url legacy]       {}", self.to_url(true))
    }
}
