use std::fmt;
use std::path::{Path, PathBuf};

use crate::carousel::LoopedSequence;

/// A displayable image: either a remote URL or a file on local disk.
///
/// Strings starting with `http` are treated as remote; everything else is a
/// local path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageRef {
    Remote(String),
    Local(PathBuf),
}

impl ImageRef {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http") {
            Self::Remote(raw.to_string())
        } else {
            Self::Local(PathBuf::from(raw))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path.as_path()),
            Self::Remote(_) => None,
        }
    }
}

impl From<PathBuf> for ImageRef {
    fn from(path: PathBuf) -> Self {
        Self::Local(path)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => f.write_str(url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadImage(pub ImageRef);

#[derive(Debug, Clone)]
pub struct PreparedImageCpu {
    pub source: ImageRef,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum LoaderEvent {
    ImageLoaded(PreparedImageCpu),
    LoadFailed(ImageRef),
}

/// Short on-screen messages shown in place of the toasts of a phone UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The remote fetch came back empty; showing cached images instead.
    UsingCache,
    /// Neither the network nor the cache produced anything. Terminal.
    NoImages,
}

impl Notice {
    pub fn message(self) -> &'static str {
        match self {
            Self::UsingCache => "Reading local cache…",
            Self::NoImages => "No images available",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NoImages)
    }
}

#[derive(Debug, Clone)]
pub enum ViewerCommand {
    /// Replace everything on screen with a new looped sequence, starting at page 1.
    Show(LoopedSequence),
    ScrollTo { position: usize, animated: bool },
    Notify(Notice),
}

/// Emitted by the viewer once a page has settled on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSelected(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_prefix_means_remote() {
        assert_eq!(
            ImageRef::parse("https://cdn.example/a.jpg"),
            ImageRef::Remote("https://cdn.example/a.jpg".into())
        );
        assert_eq!(
            ImageRef::parse("http://10.0.2.2/a.jpg"),
            ImageRef::Remote("http://10.0.2.2/a.jpg".into())
        );
        assert_eq!(
            ImageRef::parse("/data/cache/img_0.jpg"),
            ImageRef::Local(PathBuf::from("/data/cache/img_0.jpg"))
        );
    }
}
