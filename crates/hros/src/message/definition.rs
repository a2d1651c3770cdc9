// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message type identity exchanged during connection handshakes.
//!
//! A definition carries the package-qualified type name, the MD5 checksum
//! both sides compare before agreeing to talk, and the full definition text
//! a publisher advertises so recorders can decode bags long after the
//! original package is gone.

use md5::{Digest, Md5};

/// Identity of a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDefinition {
    type_name: String,
    md5_checksum: String,
    definition_text: String,
}

impl MessageDefinition {
    /// Build a definition from precomputed parts.
    pub fn new(type_name: &str, md5_checksum: &str, definition_text: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            md5_checksum: md5_checksum.to_string(),
            definition_text: definition_text.to_string(),
        }
    }

    /// Build a definition whose checksum is computed from the text.
    ///
    /// The checksum covers the canonical form of the text (comments
    /// stripped, per-line whitespace trimmed, blank lines dropped). This
    /// matches the reference tooling for flat definitions made of builtin
    /// field types; definitions embedding other message types need their
    /// checksum supplied via [`MessageDefinition::new`].
    pub fn from_text(type_name: &str, definition_text: &str) -> Self {
        let canonical = canonical_text(definition_text);
        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let md5_checksum: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self {
            type_name: type_name.to_string(),
            md5_checksum,
            definition_text: definition_text.to_string(),
        }
    }

    /// Package-qualified type name, e.g. `std_msgs/String`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Hex MD5 checksum of the canonical definition.
    pub fn md5_checksum(&self) -> &str {
        &self.md5_checksum
    }

    /// Raw definition text as authored.
    pub fn definition_text(&self) -> &str {
        &self.definition_text
    }
}

/// Strip comments and normalize whitespace line by line.
fn canonical_text(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let uncommented = match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let trimmed = uncommented.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_definition_checksum() {
        // Reference checksum for the single-field string message.
        let def = MessageDefinition::from_text("std_msgs/String", "string data\n");
        assert_eq!(def.md5_checksum(), "992ce8a1687cec8c8bd883ec73ca41d1");
        assert_eq!(def.type_name(), "std_msgs/String");
        assert_eq!(def.definition_text(), "string data\n");
    }

    #[test]
    fn test_comments_do_not_affect_checksum() {
        let bare = MessageDefinition::from_text("std_msgs/String", "string data");
        let commented = MessageDefinition::from_text(
            "std_msgs/String",
            "# payload carried verbatim\nstring data   # field\n\n",
        );
        assert_eq!(bare.md5_checksum(), commented.md5_checksum());
    }

    #[test]
    fn test_precomputed_checksum_kept() {
        let def = MessageDefinition::new("geometry_msgs/Twist", "9f195f881246fdfa2798d1d3eebca84a", "");
        assert_eq!(def.md5_checksum(), "9f195f881246fdfa2798d1d3eebca84a");
    }

    #[test]
    fn test_canonical_text_shape() {
        assert_eq!(
            canonical_text("  int32 x # coord\n\n# note\nint32 y\n"),
            "int32 x\nint32 y"
        );
    }
}
