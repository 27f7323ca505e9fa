//! Secret types.

use std::fmt;

/// A sensitive substitution value handed to the compiler separately from
/// plain environment variables.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
    /// Image names allowed to receive the secret. Empty means any image.
    pub matches: Vec<String>,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            matches: Vec::new(),
        }
    }

    /// Restrict the secret to the given image names.
    pub fn with_matches(mut self, images: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.matches = images.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the secret may be exposed to a container running `image`.
    ///
    /// Tags and digests are ignored when comparing.
    pub fn matches_image(&self, image: &str) -> bool {
        if self.matches.is_empty() {
            return true;
        }
        let name = image_name(image);
        self.matches.iter().any(|m| image_name(m) == name)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"***")
            .field("matches", &self.matches)
            .finish()
    }
}

/// Strip the tag and digest from an image reference.
///
/// A colon only starts a tag when it follows the last path separator, so
/// registry ports (`localhost:5000/app`) are preserved.
pub fn image_name(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    let last_slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[last_slash..].find(':') {
        Some(idx) => &image[..last_slash + idx],
        None => image,
    }
}
