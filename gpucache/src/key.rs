// Copyright 2026 gpucache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// Namespace of [`UniqueKey`]s. Domain `0` is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Domain(u32);

impl Domain {
    /// The invalid domain.
    pub const INVALID: Self = Self(0);

    pub(crate) fn new(value: u32) -> Self {
        Self(value)
    }

    /// Return `true` if the domain is not [`Domain::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Namespace of [`ScratchKey`]s. Resource type `0` is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType(u32);

impl ResourceType {
    /// The invalid resource type.
    pub const INVALID: Self = Self(0);

    pub(crate) fn new(value: u32) -> Self {
        Self(value)
    }

    /// Return `true` if the resource type is not [`ResourceType::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Key describing an interchangeable class of resources.
///
/// Two resources with equal scratch keys may be substituted for one another. Many live resources can share the same
/// scratch key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    resource_type: ResourceType,
    words: Arc<[u32]>,
}

impl ScratchKey {
    /// Start building a scratch key of the given resource type.
    pub fn builder(resource_type: ResourceType) -> ScratchKeyBuilder {
        ScratchKeyBuilder {
            resource_type,
            words: vec![],
        }
    }

    /// Return `true` if the key was built from a valid resource type.
    pub fn is_valid(&self) -> bool {
        self.resource_type.is_valid()
    }

    /// Resource type of the key.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Payload words of the key.
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Builder for [`ScratchKey`].
#[derive(Debug)]
pub struct ScratchKeyBuilder {
    resource_type: ResourceType,
    words: Vec<u32>,
}

impl ScratchKeyBuilder {
    /// Append a payload word.
    pub fn with_word(mut self, word: u32) -> Self {
        self.words.push(word);
        self
    }

    /// Append payload words.
    pub fn with_words(mut self, words: impl IntoIterator<Item = u32>) -> Self {
        self.words.extend(words);
        self
    }

    /// Finish the key.
    pub fn build(self) -> ScratchKey {
        ScratchKey {
            resource_type: self.resource_type,
            words: self.words.into(),
        }
    }
}

/// Key naming exactly one resource within a [`Domain`].
///
/// A unique key may carry an optional diagnostic tag. The tag takes no part in equality or hashing.
#[derive(Clone, Default)]
pub struct UniqueKey {
    domain: Domain,
    words: Arc<[u32]>,
    tag: Option<Arc<str>>,
}

impl Debug for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("UniqueKey");
        s.field("domain", &self.domain).field("words", &self.words);
        if let Some(tag) = self.tag.as_ref() {
            s.field("tag", tag);
        }
        s.finish()
    }
}

impl PartialEq for UniqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.words == other.words
    }
}

impl Eq for UniqueKey {}

impl Hash for UniqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        self.words.hash(state);
    }
}

impl UniqueKey {
    /// Start building a unique key in the given domain.
    pub fn builder(domain: Domain) -> UniqueKeyBuilder {
        UniqueKeyBuilder {
            domain,
            words: vec![],
            tag: None,
        }
    }

    /// Return `true` if the key was built from a valid domain.
    pub fn is_valid(&self) -> bool {
        self.domain.is_valid()
    }

    /// Domain of the key.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Payload words of the key.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Diagnostic tag of the key, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

/// Builder for [`UniqueKey`].
#[derive(Debug)]
pub struct UniqueKeyBuilder {
    domain: Domain,
    words: Vec<u32>,
    tag: Option<Arc<str>>,
}

impl UniqueKeyBuilder {
    /// Append a payload word.
    pub fn with_word(mut self, word: u32) -> Self {
        self.words.push(word);
        self
    }

    /// Append payload words.
    pub fn with_words(mut self, words: impl IntoIterator<Item = u32>) -> Self {
        self.words.extend(words);
        self
    }

    /// Attach a diagnostic tag.
    pub fn with_tag(mut self, tag: impl Into<Arc<str>>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Finish the key.
    pub fn build(self) -> UniqueKey {
        UniqueKey {
            domain: self.domain,
            words: self.words.into(),
            tag: self.tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::hash::BuildHasher;

    use super::*;
    use crate::context::CacheContext;

    #[test]
    fn test_default_keys_are_invalid() {
        assert!(!ScratchKey::default().is_valid());
        assert!(!UniqueKey::default().is_valid());
        assert!(!Domain::INVALID.is_valid());
        assert!(!ResourceType::INVALID.is_valid());
    }

    #[test]
    fn test_scratch_key_equality() {
        let context = CacheContext::new();
        let t1 = context.generate_resource_type();
        let t2 = context.generate_resource_type();

        let a = ScratchKey::builder(t1).with_words([256, 256, 1]).build();
        let b = ScratchKey::builder(t1).with_word(256).with_word(256).with_word(1).build();
        let c = ScratchKey::builder(t2).with_words([256, 256, 1]).build();
        let d = ScratchKey::builder(t1).with_words([256, 256]).build();

        assert!(a.is_valid());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_unique_key_tag_ignored_by_equality_and_hash() {
        let context = CacheContext::new();
        let domain = context.generate_domain();

        let a = UniqueKey::builder(domain).with_words([1, 2]).with_tag("atlas").build();
        let b = UniqueKey::builder(domain).with_words([1, 2]).build();

        assert_eq!(a, b);
        assert_eq!(a.tag(), Some("atlas"));
        assert_eq!(b.tag(), None);

        let state = hashbrown::DefaultHashBuilder::default();
        assert_eq!(state.hash_one(&a), state.hash_one(&b));

        let other = UniqueKey::builder(context.generate_domain()).with_words([1, 2]).build();
        assert_ne!(a, other);
    }
}
